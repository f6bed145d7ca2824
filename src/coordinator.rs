//! Multi-repository fan-out and result aggregation.
//!
//! Queries spanning several repositories run concurrently with bounded
//! fan-out; per-repository top-k lists are merged into a global top-k by
//! score, with repository round-robin tie-breaking and a contribution cap so
//! one repository cannot swamp the result set.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::future::Future;
use tracing::warn;

use crate::types::{CodeHit, RepoId, Repository};

/// Scores closer than this are treated as tied.
const SCORE_EPSILON: f64 = 1e-9;

/// One repository's contribution to a fanned-out query.
#[derive(Debug, Clone)]
pub struct TaggedHits {
    pub repo_id: RepoId,
    pub hits: Vec<CodeHit>,
}

/// Run `per_repo` against every repository with at most `concurrency` in
/// flight. Failures are logged and dropped from the result; the caller
/// decides whether an all-failed outcome is an error.
pub async fn fan_out<F, Fut>(
    repos: Vec<Repository>,
    concurrency: usize,
    per_repo: F,
) -> (Vec<TaggedHits>, usize)
where
    F: Fn(Repository) -> Fut,
    Fut: Future<Output = Result<TaggedHits>>,
{
    let total = repos.len();
    let results: Vec<Option<TaggedHits>> = stream::iter(repos)
        .map(|repo| {
            let repo_id = repo.repo_id.clone();
            let fut = per_repo(repo);
            async move {
                match fut.await {
                    Ok(tagged) => Some(tagged),
                    Err(e) => {
                        warn!("query against {repo_id} failed: {e:#}");
                        None
                    }
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let succeeded: Vec<TaggedHits> = results.into_iter().flatten().collect();
    let failed = total - succeeded.len();
    (succeeded, failed)
}

/// Per-repository contribution cap: roughly 60% of the limit once more than
/// one repository participates, so a second repository always gets room.
fn contribution_cap(limit: usize, repo_count: usize) -> usize {
    if repo_count <= 1 {
        limit
    } else {
        ((limit * 3 + 4) / 5).max(1)
    }
}

/// Merge per-repository hit lists (each already sorted best-first) into a
/// global top-`limit` list.
///
/// Selection is by score; ties rotate across repositories. The contribution
/// cap applies while other repositories still have candidates, and is
/// lifted to fill the limit once they run dry.
pub fn aggregate(mut per_repo: Vec<TaggedHits>, limit: usize) -> Vec<CodeHit> {
    // Deterministic repo order regardless of fan-out completion order.
    per_repo.sort_by(|a, b| a.repo_id.as_str().cmp(b.repo_id.as_str()));

    let repo_count = per_repo.len();
    let cap = contribution_cap(limit, repo_count);
    let mut cursors = vec![0usize; repo_count];
    let mut taken = vec![0usize; repo_count];
    let mut result: Vec<CodeHit> = Vec::with_capacity(limit);
    let mut rotation = 0usize;

    // Phase 1: respect the cap.
    while result.len() < limit {
        let mut best: Option<usize> = None;
        for offset in 0..repo_count {
            let candidate = (rotation + offset) % repo_count;
            if cursors[candidate] >= per_repo[candidate].hits.len() || taken[candidate] >= cap {
                continue;
            }
            let candidate_score = per_repo[candidate].hits[cursors[candidate]].score;
            match best {
                None => best = Some(candidate),
                Some(current) => {
                    let current_score = per_repo[current].hits[cursors[current]].score;
                    // Strictly-better only: on a tie the earlier slot in the
                    // rotation keeps the pick, which is what rotates repos.
                    if candidate_score > current_score + SCORE_EPSILON {
                        best = Some(candidate);
                    }
                }
            }
        }

        let Some(winner) = best else { break };
        result.push(per_repo[winner].hits[cursors[winner]].clone());
        cursors[winner] += 1;
        taken[winner] += 1;
        rotation = (winner + 1) % repo_count;
    }

    // Phase 2: if others ran dry below the limit, lift the cap.
    while result.len() < limit {
        let mut best: Option<usize> = None;
        for candidate in 0..repo_count {
            if cursors[candidate] >= per_repo[candidate].hits.len() {
                continue;
            }
            let candidate_score = per_repo[candidate].hits[cursors[candidate]].score;
            match best {
                None => best = Some(candidate),
                Some(current) => {
                    let current_score = per_repo[current].hits[cursors[current]].score;
                    if candidate_score > current_score + SCORE_EPSILON {
                        best = Some(candidate);
                    }
                }
            }
        }
        let Some(winner) = best else { break };
        result.push(per_repo[winner].hits[cursors[winner]].clone());
        cursors[winner] += 1;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn hit(repo: &RepoId, path: &str, score: f64) -> CodeHit {
        CodeHit {
            repo_id: Some(repo.clone()),
            rel_path: path.to_string(),
            line: 1,
            snippet: String::new(),
            language: "rust".to_string(),
            score,
        }
    }

    fn tagged(seed: &str, scores: &[f64]) -> TaggedHits {
        let repo_id = RepoId::derive(None, Path::new(seed));
        let hits = scores
            .iter()
            .enumerate()
            .map(|(i, &score)| hit(&repo_id, &format!("{seed}/f{i}.rs"), score))
            .collect();
        TaggedHits { repo_id, hits }
    }

    #[test]
    fn equal_scores_alternate_between_repos() {
        let a = tagged("repo-a", &[1.0; 10]);
        let b = tagged("repo-b", &[1.0; 10]);
        let merged = aggregate(vec![a.clone(), b.clone()], 10);

        assert_eq!(merged.len(), 10);
        let from_a = merged
            .iter()
            .filter(|h| h.repo_id.as_ref() == Some(&a.repo_id))
            .count();
        let from_b = merged
            .iter()
            .filter(|h| h.repo_id.as_ref() == Some(&b.repo_id))
            .count();
        assert_eq!(from_a, 5);
        assert_eq!(from_b, 5);
    }

    #[test]
    fn dominant_repo_is_capped_while_other_has_candidates() {
        // Repo a outscores b everywhere; with limit 10 it may take at most 6.
        let a = tagged("repo-a", &[9.0, 8.9, 8.8, 8.7, 8.6, 8.5, 8.4, 8.3, 8.2, 8.1]);
        let b = tagged("repo-b", &[5.0, 4.9, 4.8, 4.7, 4.6, 4.5, 4.4, 4.3, 4.2, 4.1]);
        let merged = aggregate(vec![a.clone(), b.clone()], 10);

        let from_a = merged
            .iter()
            .filter(|h| h.repo_id.as_ref() == Some(&a.repo_id))
            .count();
        assert_eq!(from_a, 6);
        assert_eq!(merged.len(), 10);
    }

    #[test]
    fn cap_lifts_when_other_repo_runs_dry() {
        let a = tagged("repo-a", &[9.0; 10]);
        let b = tagged("repo-b", &[5.0, 4.9, 4.8]);
        let merged = aggregate(vec![a.clone(), b], 10);

        let from_a = merged
            .iter()
            .filter(|h| h.repo_id.as_ref() == Some(&a.repo_id))
            .count();
        assert_eq!(from_a, 7);
        assert_eq!(merged.len(), 10);
    }

    #[test]
    fn single_repo_is_uncapped() {
        let a = tagged("repo-a", &[1.0; 10]);
        let merged = aggregate(vec![a], 10);
        assert_eq!(merged.len(), 10);
    }

    #[test]
    fn aggregation_is_deterministic() {
        let a = tagged("repo-a", &[3.0, 2.0, 1.0]);
        let b = tagged("repo-b", &[3.0, 2.5]);
        let first = aggregate(vec![a.clone(), b.clone()], 4);
        let second = aggregate(vec![b, a], 4);
        let paths_first: Vec<_> = first.iter().map(|h| h.rel_path.clone()).collect();
        let paths_second: Vec<_> = second.iter().map(|h| h.rel_path.clone()).collect();
        assert_eq!(paths_first, paths_second);
    }

    #[tokio::test]
    async fn fan_out_drops_failures_and_counts_them() {
        use chrono::Utc;
        let now = Utc::now();
        let make_repo = |seed: &str| Repository {
            repo_id: RepoId::derive(None, Path::new(seed)),
            root_path: Path::new(seed).to_path_buf(),
            remote_url: None,
            current_commit: None,
            current_branch: None,
            last_indexed_commit: None,
            index_dir: Path::new(seed).join(".index"),
            auto_sync: false,
            created_at: now,
            updated_at: now,
        };
        let repos = vec![make_repo("/ok"), make_repo("/bad")];

        let (succeeded, failed) = fan_out(repos, 4, |repo| async move {
            if repo.root_path.starts_with("/bad") {
                anyhow::bail!("snapshot missing");
            }
            Ok(TaggedHits {
                repo_id: repo.repo_id.clone(),
                hits: vec![],
            })
        })
        .await;

        assert_eq!(succeeded.len(), 1);
        assert_eq!(failed, 1);
    }
}

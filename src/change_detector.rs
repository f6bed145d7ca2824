//! Commit-pair change detection with rename tracking.
//!
//! Produces the four disjoint sets the incremental indexer applies, plus a
//! verdict on whether an incremental update is worthwhile at all. Output is
//! deterministic and repeatable for the same commit pair.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

use crate::errors::EngineError;
use crate::types::ChangeSet;

/// Incremental is worthwhile only below both bounds: a fraction of the
/// tracked tree, and an absolute ceiling.
pub const INCREMENTAL_MAX_FILES: usize = 2000;
pub const INCREMENTAL_MAX_RATIO: f64 = 0.20;

/// Rename detection considers pairs at least this similar.
const RENAME_THRESHOLD: u16 = 50;

pub struct ChangeDetector;

impl ChangeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Diff two commits of the repository at `root`.
    ///
    /// Binary and oversized blobs are reported under `modified`; the indexer
    /// stores them as empty-content sentinel rows, which gives them the
    /// delete-then-add-empty treatment without a special set here.
    pub fn detect(&self, root: &Path, old_commit: &str, new_commit: &str) -> Result<ChangeSet> {
        let repo = git2::Repository::open(root)
            .map_err(|e| EngineError::NotFound(format!("not a git repository: {e}")))?;

        let old_tree = commit_tree(&repo, old_commit)?;
        let new_tree = commit_tree(&repo, new_commit)?;

        let mut diff_opts = git2::DiffOptions::new();
        diff_opts.include_typechange(true);
        let mut diff = repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut diff_opts))
            .context("diff computation failed")?;

        let mut find_opts = git2::DiffFindOptions::new();
        find_opts.renames(true);
        find_opts.rename_threshold(RENAME_THRESHOLD);
        diff.find_similar(Some(&mut find_opts))
            .context("rename detection failed")?;

        let mut change_set = ChangeSet {
            old_commit: old_commit.to_string(),
            new_commit: new_commit.to_string(),
            ..Default::default()
        };

        for delta in diff.deltas() {
            let new_path = delta
                .new_file()
                .path()
                .map(|p| p.to_string_lossy().replace('\\', "/"));
            let old_path = delta
                .old_file()
                .path()
                .map(|p| p.to_string_lossy().replace('\\', "/"));

            match delta.status() {
                git2::Delta::Added => {
                    if let Some(path) = new_path {
                        change_set.added.push(path);
                    }
                }
                git2::Delta::Deleted => {
                    if let Some(path) = old_path {
                        change_set.deleted.push(path);
                    }
                }
                git2::Delta::Modified | git2::Delta::Typechange => {
                    if let Some(path) = new_path {
                        change_set.modified.push(path);
                    }
                }
                git2::Delta::Renamed => match (old_path, new_path) {
                    (Some(old), Some(new)) => change_set.renamed.push((old, new)),
                    _ => {}
                },
                _ => {}
            }
        }

        // Deterministic output regardless of diff internals.
        change_set.added.sort();
        change_set.modified.sort();
        change_set.deleted.sort();
        change_set.renamed.sort();

        let tracked_total = count_tree_files(&new_tree);
        let budget =
            (((tracked_total as f64) * INCREMENTAL_MAX_RATIO) as usize).min(INCREMENTAL_MAX_FILES);
        change_set.incremental_ok = change_set.len() <= budget.max(1);
        debug!(
            "change set {}..{}: +{} ~{} -{} renamed {} (incremental_ok={})",
            &old_commit[..old_commit.len().min(8)],
            &new_commit[..new_commit.len().min(8)],
            change_set.added.len(),
            change_set.modified.len(),
            change_set.deleted.len(),
            change_set.renamed.len(),
            change_set.incremental_ok,
        );
        Ok(change_set)
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn commit_tree<'repo>(
    repo: &'repo git2::Repository,
    commit: &str,
) -> Result<git2::Tree<'repo>> {
    let oid = git2::Oid::from_str(commit)
        .map_err(|e| EngineError::Invalid(format!("bad commit id {commit}: {e}")))?;
    let commit = repo
        .find_commit(oid)
        .map_err(|e| EngineError::NotFound(format!("commit {commit}: {e}")))?;
    commit.tree().context("commit has no tree")
}

fn count_tree_files(tree: &git2::Tree) -> usize {
    let mut count = 0usize;
    let _ = tree.walk(git2::TreeWalkMode::PreOrder, |_, entry| {
        if entry.kind() == Some(git2::ObjectType::Blob) {
            count += 1;
        }
        git2::TreeWalkResult::Ok
    });
    count
}

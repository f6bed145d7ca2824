//! Query dispatcher: routes symbol lookup, code search, and status across
//! registered repositories.
//!
//! The load-bearing rule is the direct full-text bypass: storage-backed BM25
//! search always executes and never waits for plugin loading. Symbol-table
//! knowledge only reorders full-text hits within score ties, so the result
//! set for a snapshot is identical whether or not plugins are loaded.
//! Semantic hits are merged by score and never displace a higher-scoring
//! full-text hit; a failing semantic back end silently degrades.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::coordinator::{self, TaggedHits};
use crate::errors::EngineError;
use crate::index_manager::IndexManager;
use crate::observability::{log_operation, Operation, OperationContext};
use crate::plugin_manager::PluginManager;
use crate::registry::RepositoryRegistry;
use crate::storage::{SearchFilter, SymbolFilter};
use crate::types::{
    CodeHit, IndexHealth, RepoId, Repository, StatusReport, SymbolHit, SymbolKind,
};

/// Which repositories a query addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RepoScope {
    #[default]
    All,
    One(RepoId),
}

/// Options for `search_code`.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub semantic: bool,
    pub language: Option<String>,
    pub repo_scope: RepoScope,
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            semantic: false,
            language: None,
            repo_scope: RepoScope::All,
            limit: 10,
        }
    }
}

/// Options for `lookup_symbol`.
#[derive(Debug, Clone)]
pub struct SymbolQueryOptions {
    pub kind: Option<SymbolKind>,
    pub repo_scope: RepoScope,
    pub limit: usize,
}

impl Default for SymbolQueryOptions {
    fn default() -> Self {
        Self {
            kind: None,
            repo_scope: RepoScope::All,
            limit: 10,
        }
    }
}

/// Response of `search_code`; `partial` is set when the deadline expired
/// before every sub-operation finished.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub hits: Vec<CodeHit>,
    pub partial: bool,
}

/// Interface to the optional vector/semantic search back end. The engine
/// only ever consults it through this seam.
#[async_trait]
pub trait SemanticBackend: Send + Sync {
    fn healthy(&self) -> bool;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CodeHit>>;
}

/// Routes queries to storage, plugins, and the semantic back end.
pub struct Dispatcher {
    registry: Arc<RepositoryRegistry>,
    index_manager: Arc<IndexManager>,
    plugins: Arc<PluginManager>,
    semantic: Option<Arc<dyn SemanticBackend>>,
    query_deadline: Duration,
    fanout: usize,
    semantic_enabled: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RepositoryRegistry>,
        index_manager: Arc<IndexManager>,
        plugins: Arc<PluginManager>,
        semantic: Option<Arc<dyn SemanticBackend>>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            index_manager,
            plugins,
            semantic,
            query_deadline: Duration::from_millis(config.query_deadline_ms),
            fanout: config.multi_repo_fanout,
            semantic_enabled: config.semantic_enabled,
        }
    }

    /// Symbol definition lookup across the scope, deterministically ordered:
    /// exact matches first, then kind priority, then path, then line.
    pub async fn lookup_symbol(
        &self,
        name: &str,
        options: &SymbolQueryOptions,
    ) -> Result<Vec<SymbolHit>> {
        let mut ctx = OperationContext::new("lookup_symbol");
        ctx.add_attribute("name", name);

        let result = self.lookup_symbol_inner(name, options).await;
        log_operation(
            &ctx,
            &Operation::SymbolLookup {
                name: name.to_string(),
                result_count: result.as_ref().map(|r| r.len()).unwrap_or(0),
            },
            &result.as_ref().map(|_| ()).map_err(|e| anyhow::anyhow!("{e}")),
        );
        result
    }

    async fn lookup_symbol_inner(
        &self,
        name: &str,
        options: &SymbolQueryOptions,
    ) -> Result<Vec<SymbolHit>> {
        if name.trim().is_empty() {
            return Err(EngineError::Invalid("symbol name must not be empty".into()).into());
        }
        let repos = self.scope_repos(&options.repo_scope)?;
        let repo_count = repos.len();
        let filter = SymbolFilter {
            limit: options.limit,
            kind: options.kind,
            repo: None,
        };

        let per_repo: Vec<Result<Vec<SymbolHit>>> = futures::stream::iter(repos)
            .map(|repo| {
                let filter = filter.clone();
                async move {
                    let storage = self.index_manager.open_current(&repo)?;
                    let rows = storage.lookup_symbol(name, &filter)?;
                    Ok(rows
                        .into_iter()
                        .map(|row| SymbolHit {
                            repo_id: Some(repo.repo_id.clone()),
                            rel_path: row.rel_path,
                            name: row.name,
                            kind: row.kind,
                            line: row.line,
                            signature: row.signature,
                            language: row.language,
                        })
                        .collect())
                }
            })
            .buffer_unordered(self.fanout.max(1))
            .collect()
            .await;

        let failed = per_repo.iter().filter(|r| r.is_err()).count();
        if failed == repo_count && repo_count > 0 {
            return Err(EngineError::Unavailable(
                "no repository index could be opened for symbol lookup".into(),
            )
            .into());
        }

        let mut hits: Vec<SymbolHit> = per_repo
            .into_iter()
            .filter_map(|result| match result {
                Ok(hits) => Some(hits),
                Err(e) => {
                    warn!("symbol lookup failed in one repository: {e:#}");
                    None
                }
            })
            .flatten()
            .collect();

        hits.sort_by(|a, b| {
            let exact_a = a.name == name;
            let exact_b = b.name == name;
            exact_b
                .cmp(&exact_a)
                .then_with(|| a.kind.priority().cmp(&b.kind.priority()))
                .then_with(|| a.rel_path.cmp(&b.rel_path))
                .then_with(|| a.line.cmp(&b.line))
        });
        hits.truncate(options.limit);
        Ok(hits)
    }

    /// Ranked content search with the resolution algorithm of the engine:
    /// optional semantic pass, optional symbol-table reordering, and the
    /// direct full-text bypass that always runs.
    pub async fn search_code(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        let mut ctx = OperationContext::new("search_code");
        ctx.add_attribute("query", query);

        let started = Instant::now();
        let accumulated: Arc<Mutex<Vec<CodeHit>>> = Arc::new(Mutex::new(Vec::new()));

        let outcome = tokio::time::timeout(
            self.query_deadline,
            self.resolve_search(query, options, Arc::clone(&accumulated)),
        )
        .await;

        let response = match outcome {
            Ok(Ok(hits)) => Ok(SearchResponse {
                hits,
                partial: false,
            }),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => {
                // Deadline expired: return whatever was merged so far.
                warn!(
                    "search deadline of {:?} exceeded after {:?}; returning partial results",
                    self.query_deadline,
                    started.elapsed()
                );
                let mut hits = accumulated.lock().clone();
                dedupe_hits(&mut hits);
                hits.truncate(options.limit);
                Ok(SearchResponse {
                    hits,
                    partial: true,
                })
            }
        };

        log_operation(
            &ctx,
            &Operation::CodeSearch {
                query: query.to_string(),
                result_count: response.as_ref().map(|r| r.hits.len()).unwrap_or(0),
                partial: response.as_ref().map(|r| r.partial).unwrap_or(false),
            },
            &response.as_ref().map(|_| ()).map_err(|e| anyhow::anyhow!("{e}")),
        );
        response
    }

    async fn resolve_search(
        &self,
        query: &str,
        options: &SearchOptions,
        accumulated: Arc<Mutex<Vec<CodeHit>>>,
    ) -> Result<Vec<CodeHit>> {
        if query.trim().is_empty() {
            return Err(EngineError::Invalid("query must not be empty".into()).into());
        }

        // 1. Semantic pass; failure silently degrades to full-text.
        let mut semantic_hits: Vec<CodeHit> = Vec::new();
        if options.semantic && self.semantic_enabled {
            if let Some(backend) = &self.semantic {
                if backend.healthy() {
                    match backend.search(query, options.limit).await {
                        Ok(hits) => {
                            accumulated.lock().extend(hits.iter().cloned());
                            semantic_hits = hits;
                        }
                        Err(e) => {
                            debug!("semantic back end failed, degrading to full-text: {e:#}")
                        }
                    }
                }
            }
        }

        // 2 + 3. Per-repository resolution. The storage full-text search is
        // unconditional (direct BM25 bypass); symbol-table knowledge only
        // reorders within score ties, and only for symbol-shaped queries.
        let repos = self.scope_repos(&options.repo_scope)?;
        let repo_count = repos.len();
        let use_symbols = is_symbol_like(query) && self.plugins.loaded_count() > 0;
        let filter = SearchFilter {
            limit: options.limit,
            repo: None,
            language: options.language.clone(),
        };

        let (per_repo, failed) = coordinator::fan_out(repos, self.fanout, |repo| {
            let filter = filter.clone();
            let query = query.to_string();
            let accumulated = Arc::clone(&accumulated);
            async move {
                let storage = self.index_manager.open_current(&repo)?;
                let fulltext = storage.search_fulltext(&query, &filter)?;
                let mut hits: Vec<CodeHit> = fulltext
                    .into_iter()
                    .map(|hit| CodeHit {
                        repo_id: Some(repo.repo_id.clone()),
                        rel_path: hit.rel_path,
                        line: hit.line,
                        snippet: hit.snippet,
                        language: hit.language,
                        score: hit.score,
                    })
                    .collect();

                if use_symbols {
                    let rows = storage.lookup_symbol(
                        &query,
                        &SymbolFilter {
                            limit: filter.limit,
                            kind: None,
                            repo: None,
                        },
                    )?;
                    let defined: HashSet<String> =
                        rows.into_iter().map(|row| row.rel_path).collect();
                    promote_within_ties(&mut hits, &defined);
                }

                accumulated.lock().extend(hits.iter().cloned());
                Ok(TaggedHits {
                    repo_id: repo.repo_id.clone(),
                    hits,
                })
            }
        })
        .await;

        if failed == repo_count && repo_count > 0 {
            return Err(EngineError::Unavailable(
                "no repository index could be opened for search".into(),
            )
            .into());
        }

        // 4. Merge: per-repo top-k -> global top-k, then fold in semantic
        // hits by score, dedupe, truncate.
        let mut merged = coordinator::aggregate(per_repo, options.limit);
        if !semantic_hits.is_empty() {
            merge_by_score(&mut merged, semantic_hits);
        }
        dedupe_hits(&mut merged);
        merged.truncate(options.limit);
        Ok(merged)
    }

    /// Subsystem readiness. Never fails while the process is live.
    pub async fn status(&self) -> StatusReport {
        let repos = self.registry.list().unwrap_or_default();
        let mut storage_ok = true;
        let mut health = Vec::with_capacity(repos.len());

        for repo in &repos {
            let (snapshot_present, file_count, symbol_count) =
                match self.index_manager.open_current(repo) {
                    Ok(storage) => match storage.stats() {
                        Ok(stats) => (true, stats.file_count, stats.symbol_count),
                        Err(_) => {
                            storage_ok = false;
                            (true, 0, 0)
                        }
                    },
                    Err(_) => (false, 0, 0),
                };
            health.push(IndexHealth {
                repo_id: repo.repo_id.clone(),
                root_path: repo.root_path.clone(),
                snapshot_present,
                last_indexed_commit: repo.last_indexed_commit.clone(),
                file_count,
                symbol_count,
            });
        }

        StatusReport {
            repos: health,
            storage_ok,
            plugins_loaded: self.plugins.loaded_count(),
            semantic_available: self
                .semantic
                .as_ref()
                .map(|backend| backend.healthy())
                .unwrap_or(false),
        }
    }

    fn scope_repos(&self, scope: &RepoScope) -> Result<Vec<Repository>> {
        match scope {
            RepoScope::All => {
                let repos = self.registry.list()?;
                if repos.is_empty() {
                    return Err(
                        EngineError::NotFound("no repositories registered".into()).into()
                    );
                }
                Ok(repos)
            }
            RepoScope::One(repo_id) => Ok(vec![self.registry.lookup(repo_id)?]),
        }
    }
}

/// A query that looks like one identifier gets symbol-informed ordering.
fn is_symbol_like(query: &str) -> bool {
    let trimmed = query.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_')
        && !trimmed.chars().next().unwrap_or('0').is_ascii_digit()
}

/// Stable reorder: within each group of (effectively) tied scores, paths
/// carrying an exact symbol definition come first. The hit set, each hit's
/// content, and cross-group order are untouched.
fn promote_within_ties(hits: &mut [CodeHit], defined_paths: &HashSet<String>) {
    const EPSILON: f64 = 1e-9;
    let mut group_start = 0;
    while group_start < hits.len() {
        let mut group_end = group_start + 1;
        while group_end < hits.len()
            && (hits[group_end].score - hits[group_start].score).abs() <= EPSILON
        {
            group_end += 1;
        }
        hits[group_start..group_end]
            .sort_by_key(|hit| !defined_paths.contains(&hit.rel_path));
        group_start = group_end;
    }
}

/// Merge extra hits into a score-sorted list, keeping it sorted.
fn merge_by_score(base: &mut Vec<CodeHit>, extra: Vec<CodeHit>) {
    base.extend(extra);
    base.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.rel_path.len().cmp(&b.rel_path.len()))
            .then_with(|| a.rel_path.cmp(&b.rel_path))
    });
}

/// Deduplicate by `(repo_id, rel_path, line)`, keeping the first (highest
/// ranked) occurrence.
fn dedupe_hits(hits: &mut Vec<CodeHit>) {
    let mut seen: HashSet<(Option<String>, String, u32)> = HashSet::new();
    hits.retain(|hit| {
        seen.insert((
            hit.repo_id.as_ref().map(|r| r.as_str().to_string()),
            hit.rel_path.clone(),
            hit.line,
        ))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, line: u32, score: f64) -> CodeHit {
        CodeHit {
            repo_id: None,
            rel_path: path.to_string(),
            line,
            snippet: String::new(),
            language: "rust".to_string(),
            score,
        }
    }

    #[test]
    fn symbol_like_queries_are_single_identifiers() {
        assert!(is_symbol_like("BM25Indexer"));
        assert!(is_symbol_like("snake_case_name"));
        assert!(!is_symbol_like("TODO: revisit"));
        assert!(!is_symbol_like("two words"));
        assert!(!is_symbol_like("9starts_with_digit"));
        assert!(!is_symbol_like(""));
    }

    #[test]
    fn promotion_only_reorders_within_ties() {
        let mut hits = vec![
            hit("high.rs", 1, 5.0),
            hit("tie_plain.rs", 1, 3.0),
            hit("tie_defined.rs", 1, 3.0),
            hit("low.rs", 1, 1.0),
        ];
        let defined: HashSet<String> = ["tie_defined.rs".to_string()].into_iter().collect();
        promote_within_ties(&mut hits, &defined);

        let paths: Vec<&str> = hits.iter().map(|h| h.rel_path.as_str()).collect();
        // high stays first despite not being defined; within the tie the
        // defined path moves up; low stays last.
        assert_eq!(paths, vec!["high.rs", "tie_defined.rs", "tie_plain.rs", "low.rs"]);
    }

    #[test]
    fn promotion_preserves_the_hit_set() {
        let mut hits = vec![hit("a.rs", 1, 2.0), hit("b.rs", 2, 2.0), hit("c.rs", 3, 2.0)];
        let before: HashSet<(String, u32)> = hits
            .iter()
            .map(|h| (h.rel_path.clone(), h.line))
            .collect();
        let defined: HashSet<String> = ["c.rs".to_string()].into_iter().collect();
        promote_within_ties(&mut hits, &defined);
        let after: HashSet<(String, u32)> = hits
            .iter()
            .map(|h| (h.rel_path.clone(), h.line))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let mut hits = vec![
            hit("a.rs", 1, 5.0),
            hit("a.rs", 1, 4.0),
            hit("a.rs", 2, 3.0),
        ];
        dedupe_hits(&mut hits);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].score, 5.0);
    }

    #[test]
    fn merge_by_score_keeps_descending_order() {
        let mut base = vec![hit("a.rs", 1, 5.0), hit("b.rs", 1, 3.0)];
        merge_by_score(&mut base, vec![hit("c.rs", 1, 4.0)]);
        let scores: Vec<f64> = base.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![5.0, 4.0, 3.0]);
    }
}

//! Dispatcher behavior end-to-end: symbol lookup, the direct full-text
//! bypass, plugin-independent result sets, deadlines, and semantic
//! degradation.

mod common;

use anyhow::Result;
use async_trait::async_trait;
use common::{commit_files, EngineHarness};
use pretty_assertions::assert_eq;
use repolens::{
    CodeHit, EngineConfig, RepoScope, SearchOptions, SemanticBackend, SymbolKind,
    SymbolQueryOptions,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn symbol_lookup_finds_single_definition() -> Result<()> {
    let harness = EngineHarness::new()?;
    let repo_root = harness.state_dir.path().join("proj");
    std::fs::create_dir_all(&repo_root)?;
    commit_files(
        &repo_root,
        &[("lib/search.rs", "pub struct BM25Indexer;\n")],
        "c1",
    )?;

    let repo = harness.engine.registry.register(&repo_root)?;
    harness.engine.index_manager.sync(&repo.repo_id).await?;

    let hits = harness
        .engine
        .dispatcher
        .lookup_symbol("BM25Indexer", &SymbolQueryOptions::default())
        .await?;

    assert_eq!(hits.len(), 1);
    let hit = &hits[0];
    assert_eq!(hit.rel_path, "lib/search.rs");
    assert_eq!(hit.kind, SymbolKind::Class);
    assert_eq!(hit.line, 1);
    assert_eq!(hit.language, "rust");
    Ok(())
}

#[tokio::test]
async fn fulltext_search_works_with_zero_plugins() -> Result<()> {
    // Plugin construction is effectively disabled; the direct BM25 bypass
    // must still answer with ranked, highlighted snippets.
    let harness = EngineHarness::with_config(|config| {
        config.plugin_construction_timeout_ms = 1;
    })?;
    let repo_root = harness.state_dir.path().join("proj");
    std::fs::create_dir_all(&repo_root)?;
    commit_files(
        &repo_root,
        &[
            ("src/a.rs", "// TODO: revisit retry logic\nfn a() {}\n"),
            ("src/b.rs", "// TODO: revisit backoff\nfn b() {}\n"),
            ("src/c.rs", "// nothing relevant\n"),
        ],
        "c1",
    )?;

    let repo = harness.engine.registry.register(&repo_root)?;
    harness.engine.index_manager.sync(&repo.repo_id).await?;

    let response = harness
        .engine
        .dispatcher
        .search_code("TODO: revisit", &SearchOptions::default())
        .await?;

    assert!(!response.partial);
    assert_eq!(response.hits.len(), 2);
    for hit in &response.hits {
        assert!(hit.snippet.contains("TODO:"), "snippet: {}", hit.snippet);
        assert!(hit.snippet.contains('«') && hit.snippet.contains('»'));
    }
    Ok(())
}

#[tokio::test]
async fn result_set_is_identical_with_and_without_plugins() -> Result<()> {
    let harness = EngineHarness::new()?;
    let repo_root = harness.state_dir.path().join("proj");
    std::fs::create_dir_all(&repo_root)?;
    commit_files(
        &repo_root,
        &[
            ("src/widget.rs", "pub struct Widget;\npub fn make_widget() -> Widget { Widget }\n"),
            ("src/user.rs", "// uses Widget everywhere\n"),
            ("docs/widget.md", "Widget docs\n"),
        ],
        "c1",
    )?;

    let repo = harness.engine.registry.register(&repo_root)?;
    harness.engine.index_manager.sync(&repo.repo_id).await?;

    // Same snapshot, two dispatcher stacks: one with working plugins, one
    // whose plugin loads all fail.
    let with_plugins = harness
        .engine
        .dispatcher
        .search_code("Widget", &SearchOptions::default())
        .await?;

    let crippled = repolens::create_engine(
        EngineConfig {
            plugin_construction_timeout_ms: 1,
            ..harness.engine.config.clone()
        },
        None,
    )?;
    let without_plugins = crippled
        .dispatcher
        .search_code("Widget", &SearchOptions::default())
        .await?;

    let set = |hits: &[CodeHit]| -> BTreeSet<(String, u32)> {
        hits.iter().map(|h| (h.rel_path.clone(), h.line)).collect()
    };
    assert_eq!(set(&with_plugins.hits), set(&without_plugins.hits));
    Ok(())
}

#[tokio::test]
async fn unclaimed_extension_still_searchable_but_symbol_free() -> Result<()> {
    let harness = EngineHarness::new()?;
    let repo_root = harness.state_dir.path().join("proj");
    std::fs::create_dir_all(&repo_root)?;
    commit_files(
        &repo_root,
        &[("data/weird.zzz", "def hidden_symbol(): unusual_needle\n")],
        "c1",
    )?;

    let repo = harness.engine.registry.register(&repo_root)?;
    harness.engine.index_manager.sync(&repo.repo_id).await?;

    let response = harness
        .engine
        .dispatcher
        .search_code("unusual_needle", &SearchOptions::default())
        .await?;
    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].rel_path, "data/weird.zzz");

    let symbols = harness
        .engine
        .dispatcher
        .lookup_symbol("hidden_symbol", &SymbolQueryOptions::default())
        .await?;
    assert!(symbols.is_empty());
    Ok(())
}

struct StallingBackend;

#[async_trait]
impl SemanticBackend for StallingBackend {
    fn healthy(&self) -> bool {
        true
    }
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<CodeHit>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(vec![])
    }
}

struct FailingBackend;

#[async_trait]
impl SemanticBackend for FailingBackend {
    fn healthy(&self) -> bool {
        true
    }
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<CodeHit>> {
        anyhow::bail!("embedding service down")
    }
}

#[tokio::test]
async fn deadline_returns_partial_results() -> Result<()> {
    let harness = EngineHarness::build(
        |config| {
            config.query_deadline_ms = 250;
            config.semantic_enabled = true;
        },
        Some(Arc::new(StallingBackend)),
    )?;

    let repo_root = harness.state_dir.path().join("proj");
    std::fs::create_dir_all(&repo_root)?;
    commit_files(&repo_root, &[("a.rs", "fn stalls() {}\n")], "c1")?;
    let repo = harness.engine.registry.register(&repo_root)?;
    harness.engine.index_manager.sync(&repo.repo_id).await?;

    let response = harness
        .engine
        .dispatcher
        .search_code(
            "stalls",
            &SearchOptions {
                semantic: true,
                ..Default::default()
            },
        )
        .await?;
    assert!(response.partial);
    Ok(())
}

#[tokio::test]
async fn semantic_failure_degrades_silently() -> Result<()> {
    let harness = EngineHarness::build(
        |config| {
            config.semantic_enabled = true;
        },
        Some(Arc::new(FailingBackend)),
    )?;

    let repo_root = harness.state_dir.path().join("proj");
    std::fs::create_dir_all(&repo_root)?;
    commit_files(&repo_root, &[("a.rs", "fn resilient_path() {}\n")], "c1")?;
    let repo = harness.engine.registry.register(&repo_root)?;
    harness.engine.index_manager.sync(&repo.repo_id).await?;

    let response = harness
        .engine
        .dispatcher
        .search_code(
            "resilient_path",
            &SearchOptions {
                semantic: true,
                ..Default::default()
            },
        )
        .await?;

    assert!(!response.partial);
    assert_eq!(response.hits.len(), 1);
    Ok(())
}

#[tokio::test]
async fn status_always_reports() -> Result<()> {
    let harness = EngineHarness::new()?;

    // With nothing registered.
    let report = harness.engine.dispatcher.status().await;
    assert!(report.repos.is_empty());
    assert!(report.storage_ok);
    assert!(!report.semantic_available);

    // With one indexed repository.
    let repo_root = harness.state_dir.path().join("proj");
    std::fs::create_dir_all(&repo_root)?;
    commit_files(&repo_root, &[("a.rs", "fn visible() {}\n")], "c1")?;
    let repo = harness.engine.registry.register(&repo_root)?;
    harness.engine.index_manager.sync(&repo.repo_id).await?;

    let report = harness.engine.dispatcher.status().await;
    assert_eq!(report.repos.len(), 1);
    assert!(report.repos[0].snapshot_present);
    assert_eq!(report.repos[0].file_count, 1);
    assert!(report.repos[0].last_indexed_commit.is_some());
    Ok(())
}

#[tokio::test]
async fn scoped_search_hits_only_the_named_repo() -> Result<()> {
    let harness = EngineHarness::new()?;
    for name in ["alpha", "beta"] {
        let repo_root = harness.state_dir.path().join(name);
        std::fs::create_dir_all(&repo_root)?;
        commit_files(
            &repo_root,
            &[("main.rs", &format!("fn shared_term_{name}() {{}} // shared_term\n"))],
            "c1",
        )?;
        let repo = harness.engine.registry.register(&repo_root)?;
        harness.engine.index_manager.sync(&repo.repo_id).await?;
    }

    let repos = harness.engine.registry.list()?;
    let alpha = repos
        .iter()
        .find(|r| r.root_path.ends_with("alpha"))
        .unwrap();

    let response = harness
        .engine
        .dispatcher
        .search_code(
            "shared_term",
            &SearchOptions {
                repo_scope: RepoScope::One(alpha.repo_id.clone()),
                ..Default::default()
            },
        )
        .await?;

    assert!(!response.hits.is_empty());
    for hit in &response.hits {
        assert_eq!(hit.repo_id.as_ref(), Some(&alpha.repo_id));
    }
    Ok(())
}

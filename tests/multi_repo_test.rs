//! Multi-repository fan-out: tagging, fairness caps, and grouped results.

mod common;

use anyhow::Result;
use common::{commit_files, EngineHarness};
use repolens::{RepoScope, SearchOptions};
use std::collections::HashMap;

#[tokio::test]
async fn fan_out_tags_hits_and_caps_contributions() -> Result<()> {
    let harness = EngineHarness::new()?;

    // Two repositories, each with ten files matching "retry".
    for name in ["repo-one", "repo-two"] {
        let repo_root = harness.state_dir.path().join(name);
        std::fs::create_dir_all(&repo_root)?;
        let files: Vec<(String, String)> = (0..10)
            .map(|i| {
                (
                    format!("src/worker_{i}.rs"),
                    format!("// retry logic variant {i}\nfn retry_{i}() {{}}\n"),
                )
            })
            .collect();
        let file_refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_str()))
            .collect();
        commit_files(&repo_root, &file_refs, "c1")?;

        let repo = harness.engine.registry.register(&repo_root)?;
        harness.engine.index_manager.sync(&repo.repo_id).await?;
    }

    let response = harness
        .engine
        .dispatcher
        .search_code(
            "retry",
            &SearchOptions {
                repo_scope: RepoScope::All,
                limit: 10,
                ..Default::default()
            },
        )
        .await?;

    assert!(response.hits.len() <= 10);
    assert!(!response.hits.is_empty());

    let mut per_repo: HashMap<String, usize> = HashMap::new();
    for hit in &response.hits {
        let repo_id = hit.repo_id.as_ref().expect("hits are tagged").to_string();
        *per_repo.entry(repo_id).or_default() += 1;
    }
    assert_eq!(per_repo.len(), 2, "both repositories contribute");
    for (repo_id, count) in &per_repo {
        assert!(
            *count <= 6,
            "repository {repo_id} contributed {count} of {} hits",
            response.hits.len()
        );
    }
    Ok(())
}

#[tokio::test]
async fn one_empty_repo_does_not_starve_results() -> Result<()> {
    let harness = EngineHarness::new()?;

    let rich_root = harness.state_dir.path().join("rich");
    std::fs::create_dir_all(&rich_root)?;
    let files: Vec<(String, String)> = (0..8)
        .map(|i| (format!("f{i}.rs"), format!("// needle {i}\n")))
        .collect();
    let file_refs: Vec<(&str, &str)> = files
        .iter()
        .map(|(p, c)| (p.as_str(), c.as_str()))
        .collect();
    commit_files(&rich_root, &file_refs, "c1")?;
    let rich = harness.engine.registry.register(&rich_root)?;
    harness.engine.index_manager.sync(&rich.repo_id).await?;

    let empty_root = harness.state_dir.path().join("empty");
    std::fs::create_dir_all(&empty_root)?;
    commit_files(&empty_root, &[("unrelated.rs", "// nothing here\n")], "c1")?;
    let empty = harness.engine.registry.register(&empty_root)?;
    harness.engine.index_manager.sync(&empty.repo_id).await?;

    let response = harness
        .engine
        .dispatcher
        .search_code(
            "needle",
            &SearchOptions {
                limit: 10,
                ..Default::default()
            },
        )
        .await?;

    // The cap lifts when the other repository has nothing to offer.
    assert_eq!(response.hits.len(), 8);
    for hit in &response.hits {
        assert_eq!(hit.repo_id.as_ref(), Some(&rich.repo_id));
    }
    Ok(())
}

#[tokio::test]
async fn results_group_by_repository_not_merge_across() -> Result<()> {
    // Hits carry their repository identity; nothing joins rows from two
    // repositories into one result.
    let harness = EngineHarness::new()?;
    for name in ["left", "right"] {
        let repo_root = harness.state_dir.path().join(name);
        std::fs::create_dir_all(&repo_root)?;
        commit_files(
            &repo_root,
            &[("shared.rs", "fn cross_repo_term() {}\n")],
            "c1",
        )?;
        let repo = harness.engine.registry.register(&repo_root)?;
        harness.engine.index_manager.sync(&repo.repo_id).await?;
    }

    let response = harness
        .engine
        .dispatcher
        .search_code("cross_repo_term", &SearchOptions::default())
        .await?;

    assert_eq!(response.hits.len(), 2);
    let tags: std::collections::HashSet<String> = response
        .hits
        .iter()
        .map(|h| h.repo_id.as_ref().unwrap().to_string())
        .collect();
    assert_eq!(tags.len(), 2);
    Ok(())
}

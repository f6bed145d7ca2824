//! Shared integration-test harness: real git repositories and a fully wired
//! engine over temporary directories. Tests run against actual repositories
//! and actual SQLite snapshots, never mocks.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use repolens::{create_engine, Engine, EngineConfig, SemanticBackend};

/// Commit files into a (possibly new) git repository; returns the commit id.
pub fn commit_files(root: &Path, files: &[(&str, &str)], message: &str) -> Result<String> {
    let repo = match git2::Repository::open(root) {
        Ok(repo) => repo,
        Err(_) => git2::Repository::init(root)?,
    };

    for (rel_path, content) in files {
        let full: PathBuf = root.join(rel_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, content)?;
    }

    let mut index = repo.index()?;
    index.add_all(["*"], git2::IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree_id = index.write_tree()?;

    let signature = git2::Signature::now("repolens test", "test@example.com")?;
    let tree = repo.find_tree(tree_id)?;
    let parent = repo
        .head()
        .ok()
        .and_then(|head| head.target())
        .and_then(|oid| repo.find_commit(oid).ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    let commit = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parents,
    )?;
    Ok(commit.to_string())
}

/// Remove files and commit the removal; returns the commit id.
pub fn commit_removal(root: &Path, files: &[&str], message: &str) -> Result<String> {
    for rel_path in files {
        let full = root.join(rel_path);
        if full.exists() {
            std::fs::remove_file(full)?;
        }
    }
    let repo = git2::Repository::open(root)?;
    let mut index = repo.index()?;
    for rel_path in files {
        index.remove_path(Path::new(rel_path))?;
    }
    index.write()?;
    let tree_id = index.write_tree()?;

    let signature = git2::Signature::now("repolens test", "test@example.com")?;
    let tree = repo.find_tree(tree_id)?;
    let parent = repo
        .head()
        .ok()
        .and_then(|head| head.target())
        .and_then(|oid| repo.find_commit(oid).ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    let commit = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parents,
    )?;
    Ok(commit.to_string())
}

/// A wired engine over temp state directories.
pub struct EngineHarness {
    pub engine: Engine,
    pub state_dir: TempDir,
}

impl EngineHarness {
    pub fn new() -> Result<Self> {
        Self::build(|_| {}, None)
    }

    pub fn with_config(mutate: impl FnOnce(&mut EngineConfig)) -> Result<Self> {
        Self::build(mutate, None)
    }

    pub fn build(
        mutate: impl FnOnce(&mut EngineConfig),
        semantic: Option<Arc<dyn SemanticBackend>>,
    ) -> Result<Self> {
        let state_dir = TempDir::new()?;
        let mut config = EngineConfig {
            index_root: state_dir.path().join("indexes"),
            registry_path: state_dir.path().join("repository_registry.json"),
            batch_size: 16,
            worker_count: 2,
            ..EngineConfig::default()
        };
        mutate(&mut config);
        let engine = create_engine(config, semantic)?;
        Ok(Self { engine, state_dir })
    }
}

//! Git-aware index management: decides restore-from-artifact vs incremental
//! vs full rebuild per sync request, owns snapshot naming, and swaps the
//! `current` pointer atomically.
//!
//! `current` is a pointer file (one line: the active snapshot's file name),
//! rewritten by temp-file + rename. Readers resolve it on every open, so a
//! swap is atomic from their perspective: they see the old snapshot or the
//! new one, never a mix.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifact::{sha256_of_file, ArtifactDescriptor, ArtifactStore};
use crate::change_detector::ChangeDetector;
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::indexer::{IndexReport, Indexer, ProgressCallback};
use crate::plugin_manager::PluginManager;
use crate::registry::{RegistryUpdate, RepositoryRegistry};
use crate::storage::{StorageEngine, SCHEMA_VERSION};
use crate::types::{RepoId, Repository};
use crate::vcs;

/// Name of the pointer file inside each repository's index directory.
pub const CURRENT_POINTER: &str = "current";

/// Which path a sync request took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    UpToDate,
    RestoredArtifact,
    Incremental,
    Full,
}

#[derive(Debug)]
pub struct SyncOutcome {
    pub action: SyncAction,
    pub report: Option<IndexReport>,
    pub commit: Option<String>,
}

/// Orchestrates index builds and snapshot installs for all repositories.
pub struct IndexManager {
    registry: Arc<RepositoryRegistry>,
    indexer: Indexer,
    detector: ChangeDetector,
    artifacts: Option<ArtifactStore>,
}

impl IndexManager {
    pub fn new(
        registry: Arc<RepositoryRegistry>,
        plugins: Arc<PluginManager>,
        config: &EngineConfig,
    ) -> Self {
        let artifacts = config.artifact_store_url.as_deref().and_then(|url| {
            match ArtifactStore::from_url(url) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!("artifact store {url} unusable: {e:#}");
                    None
                }
            }
        });
        Self {
            registry,
            indexer: Indexer::new(plugins, config),
            detector: ChangeDetector::new(),
            artifacts,
        }
    }

    /// Snapshot file name for a `(branch, commit)` pair.
    pub fn snapshot_name(branch: Option<&str>, commit: Option<&str>) -> String {
        match commit {
            Some(commit) => {
                let branch = branch.unwrap_or("detached").replace(['/', '\\'], "-");
                let short = &commit[..commit.len().min(12)];
                format!("{branch}_{short}.db")
            }
            None => "working_tree.db".to_string(),
        }
    }

    /// Path of the active snapshot, if a pointer exists and its target does.
    pub fn current_snapshot_path(&self, repo: &Repository) -> Option<PathBuf> {
        let pointer = repo.index_dir.join(CURRENT_POINTER);
        let name = std::fs::read_to_string(pointer).ok()?;
        let name = name.trim();
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return None;
        }
        let path = repo.index_dir.join(name);
        path.exists().then_some(path)
    }

    /// Open the active snapshot for reads.
    pub fn open_current(&self, repo: &Repository) -> Result<StorageEngine> {
        let path = self.current_snapshot_path(repo).ok_or_else(|| {
            EngineError::Unavailable(format!("repository {} has no index yet", repo.repo_id))
        })?;
        StorageEngine::open_read_only(&path)
    }

    /// Bring one repository's index in line with its working tree, choosing
    /// restore, incremental, or full as the situation allows.
    pub async fn sync(&self, repo_id: &RepoId) -> Result<SyncOutcome> {
        self.sync_with(repo_id, false, None).await
    }

    pub async fn sync_with(
        &self,
        repo_id: &RepoId,
        force_full: bool,
        progress: Option<ProgressCallback>,
    ) -> Result<SyncOutcome> {
        let repo = self.registry.lookup(repo_id)?;
        let vcs_state = vcs::discover_state(&repo.root_path);
        let head = vcs_state.commit.clone();

        if !force_full {
            if let (Some(head), Some(last)) = (&head, &repo.last_indexed_commit) {
                if head == last && self.current_snapshot_path(&repo).is_some() {
                    debug!("{repo_id} already indexed at {head}");
                    return Ok(SyncOutcome {
                        action: SyncAction::UpToDate,
                        report: None,
                        commit: Some(head.clone()),
                    });
                }
            }

            // 1. Prebuilt artifact for the target commit, when the local
            // index is absent or older.
            if let (Some(store), Some(head)) = (&self.artifacts, &head) {
                let local_stale = self.current_snapshot_path(&repo).is_none()
                    || repo.last_indexed_commit.as_deref() != Some(head.as_str());
                if local_stale {
                    if let Some(descriptor) = store.find(repo_id, head) {
                        if descriptor.schema_version <= SCHEMA_VERSION {
                            return self
                                .restore_artifact(&repo, store, head, vcs_state.branch.as_deref())
                                .await;
                        }
                    }
                }
            }

            // 2. Incremental when the change set is small enough.
            if let (Some(head), Some(last)) = (&head, &repo.last_indexed_commit) {
                match self
                    .try_incremental(&repo, last, head, vcs_state.branch.as_deref())
                    .await
                {
                    Ok(Some(outcome)) => return Ok(outcome),
                    Ok(None) => {}
                    Err(e) => warn!("{repo_id}: incremental failed, falling back to full: {e:#}"),
                }
            }
        }

        // 3. Full rebuild.
        self.full_build(&repo, &vcs_state, progress).await
    }

    async fn restore_artifact(
        &self,
        repo: &Repository,
        store: &ArtifactStore,
        commit: &str,
        branch: Option<&str>,
    ) -> Result<SyncOutcome> {
        let snapshot_name = Self::snapshot_name(branch, Some(commit));
        let destination = repo.index_dir.join(&snapshot_name);
        store.unpack(&repo.repo_id, commit, &destination)?;
        self.install_snapshot(&repo.index_dir, &snapshot_name)?;
        self.record_success(&repo.repo_id, branch, commit)?;
        info!("{}: restored artifact for {commit}", repo.repo_id);
        Ok(SyncOutcome {
            action: SyncAction::RestoredArtifact,
            report: None,
            commit: Some(commit.to_string()),
        })
    }

    async fn try_incremental(
        &self,
        repo: &Repository,
        last: &str,
        head: &str,
        branch: Option<&str>,
    ) -> Result<Option<SyncOutcome>> {
        let Some(current_path) = self.current_snapshot_path(repo) else {
            return Ok(None);
        };

        let change_set = self.detector.detect(&repo.root_path, last, head)?;
        if !change_set.incremental_ok {
            debug!(
                "{}: change set of {} files too large for incremental",
                repo.repo_id,
                change_set.len()
            );
            return Ok(None);
        }

        let report = {
            let storage = StorageEngine::open(&current_path)?;
            if storage.is_read_only() {
                // Pending schema migration; a fresh full build resolves it.
                return Ok(None);
            }
            storage.upsert_repository(repo)?;
            self.indexer.apply_changes(repo, &storage, &change_set).await?
        };

        // The snapshot now corresponds to the new commit; rename it and
        // repoint `current`.
        let new_name = Self::snapshot_name(branch, Some(head));
        let new_path = repo.index_dir.join(&new_name);
        if new_path != current_path {
            std::fs::rename(&current_path, &new_path)
                .context("failed to rename snapshot after incremental apply")?;
        }
        self.install_snapshot(&repo.index_dir, &new_name)?;
        self.record_success(&repo.repo_id, branch, head)?;
        info!(
            "{}: incremental {last:.8}..{head:.8} ({} files)",
            repo.repo_id,
            change_set.len()
        );
        Ok(Some(SyncOutcome {
            action: SyncAction::Incremental,
            report: Some(report),
            commit: Some(head.to_string()),
        }))
    }

    async fn full_build(
        &self,
        repo: &Repository,
        vcs_state: &vcs::VcsState,
        progress: Option<ProgressCallback>,
    ) -> Result<SyncOutcome> {
        std::fs::create_dir_all(&repo.index_dir)
            .with_context(|| format!("cannot create {}", repo.index_dir.display()))?;

        let snapshot_name =
            Self::snapshot_name(vcs_state.branch.as_deref(), vcs_state.commit.as_deref());
        let building_path = repo.index_dir.join(format!("{snapshot_name}.building"));
        if building_path.exists() {
            std::fs::remove_file(&building_path).ok();
        }

        let report = {
            let storage = StorageEngine::open(&building_path)?;
            self.indexer.full_index(repo, &storage, progress).await?
        };

        // Materialize fully, then swap: readers keep the old snapshot until
        // the pointer moves.
        let final_path = repo.index_dir.join(&snapshot_name);
        std::fs::rename(&building_path, &final_path)
            .context("failed to install built snapshot")?;
        cleanup_wal_sidecars(&building_path);
        self.install_snapshot(&repo.index_dir, &snapshot_name)?;

        if let Some(commit) = &vcs_state.commit {
            self.record_success(&repo.repo_id, vcs_state.branch.as_deref(), commit)?;
        }
        info!(
            "{}: full index complete ({} files)",
            repo.repo_id, report.files_indexed
        );
        Ok(SyncOutcome {
            action: SyncAction::Full,
            report: Some(report),
            commit: vcs_state.commit.clone(),
        })
    }

    /// Pack the active snapshot into the artifact store so other machines
    /// can restore instead of rebuilding.
    pub fn pack_current(&self, repo_id: &RepoId) -> Result<std::path::PathBuf> {
        let store = self.artifacts.as_ref().ok_or_else(|| {
            EngineError::Invalid("no artifact store configured".into())
        })?;
        let repo = self.registry.lookup(repo_id)?;
        let commit = repo.last_indexed_commit.clone().ok_or_else(|| {
            EngineError::Invalid(format!("repository {repo_id} has no indexed commit to pack"))
        })?;
        let snapshot = self.current_snapshot_path(&repo).ok_or_else(|| {
            EngineError::Unavailable(format!("repository {repo_id} has no active snapshot"))
        })?;

        let (schema_version, file_count) = {
            let storage = StorageEngine::open_read_only(&snapshot)?;
            (storage.schema_version(), storage.stats()?.file_count)
        };
        let descriptor = ArtifactDescriptor {
            repo_id: repo.repo_id.clone(),
            commit,
            branch: repo.current_branch.clone(),
            schema_version,
            file_count,
            sha256: sha256_of_file(&snapshot)?,
        };
        store.pack(&snapshot, &descriptor)
    }

    /// Atomically repoint `current` at a snapshot file.
    fn install_snapshot(&self, index_dir: &Path, snapshot_name: &str) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(index_dir)
            .context("cannot create pointer temp file")?;
        use std::io::Write;
        writeln!(tmp, "{snapshot_name}")?;
        tmp.persist(index_dir.join(CURRENT_POINTER))
            .map_err(|e| EngineError::Transient(format!("pointer swap failed: {e}")))?;
        Ok(())
    }

    fn record_success(&self, repo_id: &RepoId, branch: Option<&str>, commit: &str) -> Result<()> {
        self.registry.update_state(
            repo_id,
            RegistryUpdate {
                current_commit: Some(commit.to_string()),
                current_branch: branch.map(str::to_string),
                last_indexed_commit: Some(commit.to_string()),
            },
        )?;
        Ok(())
    }
}

/// Remove stale WAL sidecars left next to a renamed-away snapshot path.
fn cleanup_wal_sidecars(db_path: &Path) {
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = db_path.as_os_str().to_owned();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.exists() {
            std::fs::remove_file(sidecar).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SearchFilter;
    use crate::vcs::fixtures::commit_files;

    fn harness(dir: &Path) -> (Arc<RepositoryRegistry>, IndexManager, EngineConfig) {
        let config = EngineConfig {
            index_root: dir.join("indexes"),
            registry_path: dir.join("repository_registry.json"),
            batch_size: 8,
            worker_count: 2,
            ..EngineConfig::default()
        };
        let registry = Arc::new(
            RepositoryRegistry::open(&config.registry_path, &config.index_root).unwrap(),
        );
        let plugins = Arc::new(PluginManager::new(&config));
        let manager = IndexManager::new(Arc::clone(&registry), plugins, &config);
        (registry, manager, config)
    }

    #[test]
    fn snapshot_names_encode_branch_and_commit() {
        assert_eq!(
            IndexManager::snapshot_name(Some("main"), Some("0123456789abcdef")),
            "main_0123456789ab.db"
        );
        assert_eq!(
            IndexManager::snapshot_name(Some("feature/x"), Some("deadbeef")),
            "feature-x_deadbeef.db"
        );
        assert_eq!(IndexManager::snapshot_name(None, None), "working_tree.db");
    }

    #[tokio::test]
    async fn full_then_up_to_date() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_root = dir.path().join("proj");
        std::fs::create_dir_all(&repo_root)?;
        commit_files(&repo_root, &[("src/lib.rs", "pub fn alpha() {}\n")], "c1")?;

        let (registry, manager, _config) = harness(dir.path());
        let repo = registry.register(&repo_root)?;

        let outcome = manager.sync(&repo.repo_id).await?;
        assert_eq!(outcome.action, SyncAction::Full);

        let again = manager.sync(&repo.repo_id).await?;
        assert_eq!(again.action, SyncAction::UpToDate);

        let repo = registry.lookup(&repo.repo_id)?;
        assert_eq!(repo.last_indexed_commit, outcome.commit);

        let storage = manager.open_current(&repo)?;
        let rows = storage.lookup_symbol("alpha", &Default::default())?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rel_path, "src/lib.rs");
        Ok(())
    }

    #[tokio::test]
    async fn incremental_after_commit() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_root = dir.path().join("proj");
        std::fs::create_dir_all(&repo_root)?;
        commit_files(
            &repo_root,
            &[
                ("b/old.rs", "pub fn keep_me() {}\n"),
                ("c/gone.rs", "pub fn vanishes() {}\n"),
            ],
            "c1",
        )?;

        let (registry, manager, _config) = harness(dir.path());
        let repo = registry.register(&repo_root)?;
        manager.sync(&repo.repo_id).await?;

        commit_files(&repo_root, &[("a/new.rs", "pub fn fresh() {}\n")], "add")?;
        commit_files(
            &repo_root,
            &[("b/old.rs", "pub fn keep_me() { /* v2 */ }\n")],
            "modify",
        )?;
        crate::vcs::fixtures::commit_removal(&repo_root, &["c/gone.rs"], "remove")?;

        let outcome = manager.sync(&repo.repo_id).await?;
        assert_eq!(outcome.action, SyncAction::Incremental);

        let repo = registry.lookup(&repo.repo_id)?;
        let storage = manager.open_current(&repo)?;

        assert!(storage.file_id("a/new.rs")?.is_some());
        assert!(storage.file_id("c/gone.rs")?.is_none());
        assert!(storage
            .lookup_symbol("vanishes", &Default::default())?
            .is_empty());
        assert_eq!(storage.lookup_symbol("fresh", &Default::default())?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn pack_then_restore_instead_of_rebuild() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_root = dir.path().join("proj");
        std::fs::create_dir_all(&repo_root)?;
        commit_files(&repo_root, &[("x.rs", "pub fn packed() {}\n")], "c1")?;

        // A manager with an artifact store configured from the start.
        let config = EngineConfig {
            index_root: dir.path().join("indexes"),
            registry_path: dir.path().join("repository_registry.json"),
            artifact_store_url: Some(dir.path().join("artifacts").display().to_string()),
            batch_size: 8,
            worker_count: 2,
            ..EngineConfig::default()
        };
        let registry = Arc::new(RepositoryRegistry::open(
            &config.registry_path,
            &config.index_root,
        )?);
        let plugins = Arc::new(PluginManager::new(&config));
        let manager = IndexManager::new(Arc::clone(&registry), plugins, &config);

        // Build, pack, then wipe local state: drop the index directory and
        // re-register so the record carries no last-indexed commit.
        let repo = registry.register(&repo_root)?;
        manager.sync(&repo.repo_id).await?;
        let archive = manager.pack_current(&repo.repo_id)?;
        assert!(archive.exists());

        std::fs::remove_dir_all(registry.lookup(&repo.repo_id)?.index_dir)?;
        registry.deregister(&repo.repo_id)?;
        let repo = registry.register(&repo_root)?;
        assert!(repo.last_indexed_commit.is_none());

        let outcome = manager.sync(&repo.repo_id).await?;
        assert_eq!(outcome.action, SyncAction::RestoredArtifact);

        let storage = manager.open_current(&registry.lookup(&repo.repo_id)?)?;
        let hits = storage.search_fulltext(
            "packed",
            &SearchFilter {
                limit: 5,
                ..Default::default()
            },
        )?;
        assert_eq!(hits.len(), 1);

        // Artifacts are immutable: packing the same commit again conflicts.
        let err = manager.pack_current(&repo.repo_id).unwrap_err();
        assert_eq!(crate::errors::classify(&err), "Conflict");
        Ok(())
    }

    #[tokio::test]
    async fn non_git_tree_gets_full_builds() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_root = dir.path().join("plain");
        std::fs::create_dir_all(&repo_root)?;
        std::fs::write(repo_root.join("notes.txt"), "plain tree content")?;

        let (registry, manager, _config) = harness(dir.path());
        let repo = registry.register(&repo_root)?;

        let outcome = manager.sync(&repo.repo_id).await?;
        assert_eq!(outcome.action, SyncAction::Full);
        assert!(outcome.commit.is_none());

        let storage = manager.open_current(&registry.lookup(&repo.repo_id)?)?;
        assert_eq!(storage.stats()?.file_count, 1);
        Ok(())
    }
}

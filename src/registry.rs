//! Persistent multi-repository registry.
//!
//! A single JSON document maps repository fingerprints to working-tree
//! paths, current VCS state, and index locations. The registry is the sole
//! source of truth for `repo_id -> root_path`; it holds pointers and
//! metadata but never owns the indexes themselves. Writes go through
//! rename-over-temp, and concurrent writers are arbitrated by an advisory
//! file lock held only for the duration of a read-modify-write.

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::types::{RepoId, Repository};

/// Version tag of the on-disk document format.
const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RegistryDocument {
    version: u32,
    repositories: Vec<Repository>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            repositories: Vec::new(),
        }
    }
}

/// Fields updatable after an indexing pass.
#[derive(Debug, Default, Clone)]
pub struct RegistryUpdate {
    pub current_commit: Option<String>,
    pub current_branch: Option<String>,
    pub last_indexed_commit: Option<String>,
}

/// Handle to the registry document.
pub struct RepositoryRegistry {
    path: PathBuf,
    lock_path: PathBuf,
    index_root: PathBuf,
}

impl RepositoryRegistry {
    /// Open (or create) the registry at `path`; indexes for newly registered
    /// repositories are placed under `index_root`.
    pub fn open(path: impl Into<PathBuf>, index_root: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let index_root = index_root.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create registry dir {}", parent.display()))?;
        }
        fs::create_dir_all(&index_root)
            .with_context(|| format!("failed to create index root {}", index_root.display()))?;

        let lock_path = path.with_extension("lock");
        Ok(Self {
            path,
            lock_path,
            index_root,
        })
    }

    /// Register a working tree, deriving its fingerprint from the git remote
    /// when one exists.
    pub fn register(&self, root: impl AsRef<Path>) -> Result<Repository> {
        let canonical = root
            .as_ref()
            .canonicalize()
            .map_err(|e| EngineError::Invalid(format!("cannot canonicalize path: {e}")))?;
        if !canonical.is_dir() {
            return Err(EngineError::Invalid(format!(
                "{} is not a directory",
                canonical.display()
            ))
            .into());
        }

        let vcs = crate::vcs::discover_state(&canonical);
        let repo_id = RepoId::derive(vcs.remote_url.as_deref(), &canonical);
        let now = Utc::now();
        let repository = Repository {
            repo_id: repo_id.clone(),
            root_path: canonical.clone(),
            remote_url: vcs.remote_url,
            current_commit: vcs.commit,
            current_branch: vcs.branch,
            last_indexed_commit: None,
            index_dir: self.index_root.join(repo_id.as_str()),
            auto_sync: true,
            created_at: now,
            updated_at: now,
        };

        self.with_locked_document(|doc| {
            if doc.repositories.iter().any(|r| r.root_path == canonical) {
                return Err(EngineError::Conflict(format!(
                    "{} is already registered",
                    canonical.display()
                ))
                .into());
            }
            // Same identity from a different checkout path: an index is
            // associated with at most one repo_id, so reject rather than
            // silently rebind.
            if doc.repositories.iter().any(|r| r.repo_id == repo_id) {
                return Err(EngineError::Conflict(format!(
                    "repository id {repo_id} is already registered from another path"
                ))
                .into());
            }
            doc.repositories.push(repository.clone());
            Ok(())
        })?;

        info!(
            "registered repository {} at {}",
            repository.repo_id,
            canonical.display()
        );
        Ok(repository)
    }

    /// Look up a repository by id.
    pub fn lookup(&self, repo_id: &RepoId) -> Result<Repository> {
        let doc = self.load()?;
        doc.repositories
            .into_iter()
            .find(|r| &r.repo_id == repo_id)
            .ok_or_else(|| EngineError::NotFound(format!("repository {repo_id}")).into())
    }

    /// Look up the repository whose working tree contains `path`.
    pub fn lookup_by_path(&self, path: impl AsRef<Path>) -> Result<Repository> {
        let canonical = path
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| path.as_ref().to_path_buf());
        let doc = self.load()?;
        doc.repositories
            .into_iter()
            .find(|r| canonical.starts_with(&r.root_path))
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "no registered repository contains {}",
                    canonical.display()
                ))
                .into()
            })
    }

    /// All registered repositories, ordered by registration time.
    pub fn list(&self) -> Result<Vec<Repository>> {
        Ok(self.load()?.repositories)
    }

    /// Record VCS state after a successful indexing pass.
    pub fn update_state(&self, repo_id: &RepoId, update: RegistryUpdate) -> Result<Repository> {
        let mut updated = None;
        self.with_locked_document(|doc| {
            let repo = doc
                .repositories
                .iter_mut()
                .find(|r| &r.repo_id == repo_id)
                .ok_or_else(|| EngineError::NotFound(format!("repository {repo_id}")))?;
            if let Some(commit) = &update.current_commit {
                repo.current_commit = Some(commit.clone());
            }
            if let Some(branch) = &update.current_branch {
                repo.current_branch = Some(branch.clone());
            }
            if let Some(commit) = &update.last_indexed_commit {
                repo.last_indexed_commit = Some(commit.clone());
            }
            repo.updated_at = Utc::now();
            updated = Some(repo.clone());
            Ok(())
        })?;
        updated.ok_or_else(|| EngineError::NotFound(format!("repository {repo_id}")).into())
    }

    /// Remove a repository from the registry. The index directory is left in
    /// place; deregistration only severs the pointer.
    pub fn deregister(&self, repo_id: &RepoId) -> Result<Repository> {
        let mut removed = None;
        self.with_locked_document(|doc| {
            let before = doc.repositories.len();
            doc.repositories.retain(|r| {
                if &r.repo_id == repo_id {
                    removed = Some(r.clone());
                    false
                } else {
                    true
                }
            });
            if doc.repositories.len() == before {
                return Err(EngineError::NotFound(format!("repository {repo_id}")).into());
            }
            Ok(())
        })?;
        removed.ok_or_else(|| EngineError::NotFound(format!("repository {repo_id}")).into())
    }

    /// Load the document, repairing a corrupt file.
    ///
    /// A document that fails to parse is preserved alongside the registry as
    /// `<name>.corrupt` and replaced by an empty repaired copy; the failure
    /// surfaces as `Corrupt` so the caller knows registrations were lost.
    fn load(&self) -> Result<RegistryDocument> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RegistryDocument::default());
            }
            Err(e) => {
                return Err(EngineError::Transient(format!("registry read failed: {e}")).into())
            }
        };

        match serde_json::from_str::<RegistryDocument>(&raw) {
            Ok(doc) if doc.version <= REGISTRY_VERSION => Ok(doc),
            Ok(doc) => Err(EngineError::Corrupt(format!(
                "registry version {} is newer than supported {}",
                doc.version, REGISTRY_VERSION
            ))
            .into()),
            Err(parse_err) => {
                let corrupt_path = self.path.with_extension("json.corrupt");
                warn!(
                    "registry at {} is corrupt ({parse_err}); preserving original at {}",
                    self.path.display(),
                    corrupt_path.display()
                );
                fs::copy(&self.path, &corrupt_path)
                    .with_context(|| "failed to preserve corrupt registry")?;
                self.save(&RegistryDocument::default())?;
                Err(EngineError::Corrupt(format!(
                    "registry document was corrupt and has been reset; original preserved at {}",
                    corrupt_path.display()
                ))
                .into())
            }
        }
    }

    /// Atomic write: serialize to a temp file in the same directory, then
    /// rename over the target.
    fn save(&self, doc: &RegistryDocument) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| EngineError::Invalid("registry path has no parent".into()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("failed to create registry temp file")?;
        serde_json::to_writer_pretty(&mut tmp, doc).context("failed to serialize registry")?;
        tmp.persist(&self.path)
            .map_err(|e| EngineError::Transient(format!("registry rename failed: {e}")))?;
        debug!("registry saved: {} entries", doc.repositories.len());
        Ok(())
    }

    /// Read-modify-write under the advisory lock. The lock is held only for
    /// the duration of the closure plus the save.
    fn with_locked_document<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut RegistryDocument) -> Result<()>,
    {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .with_context(|| format!("failed to open lock file {}", self.lock_path.display()))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| EngineError::Conflict(format!("registry lock unavailable: {e}")))?;

        let result = (|| {
            let mut doc = self.load()?;
            f(&mut doc)?;
            self.save(&doc)
        })();

        let _ = FileExt::unlock(&lock_file);
        result
    }

    pub fn registry_path(&self) -> &Path {
        &self.path
    }

    pub fn index_root(&self) -> &Path {
        &self.index_root
    }
}

/// Lock file guard used by external callers that need the registry quiesced
/// (artifact install, tests).
pub struct RegistryLock {
    _file: File,
}

impl RegistryLock {
    pub fn acquire(registry: &RepositoryRegistry) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&registry.lock_path)?;
        file.lock_exclusive()
            .map_err(|e| EngineError::Conflict(format!("registry lock unavailable: {e}")))?;
        Ok(Self { _file: file })
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self._file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_registry(dir: &Path) -> RepositoryRegistry {
        RepositoryRegistry::open(dir.join("repository_registry.json"), dir.join("indexes"))
            .expect("open registry")
    }

    #[test]
    fn register_lookup_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_dir = dir.path().join("proj");
        std::fs::create_dir_all(&repo_dir)?;

        let registry = test_registry(dir.path());
        let repo = registry.register(&repo_dir)?;
        assert_eq!(repo.root_path, repo_dir.canonicalize()?);
        assert!(repo.index_dir.starts_with(registry.index_root()));

        let found = registry.lookup(&repo.repo_id)?;
        assert_eq!(found.root_path, repo.root_path);

        let by_path = registry.lookup_by_path(&repo_dir)?;
        assert_eq!(by_path.repo_id, repo.repo_id);
        Ok(())
    }

    #[test]
    fn duplicate_registration_conflicts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_dir = dir.path().join("proj");
        std::fs::create_dir_all(&repo_dir)?;

        let registry = test_registry(dir.path());
        registry.register(&repo_dir)?;
        let err = registry.register(&repo_dir).unwrap_err();
        assert_eq!(crate::errors::classify(&err), "Conflict");
        Ok(())
    }

    #[test]
    fn deregister_keeps_index_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_dir = dir.path().join("proj");
        std::fs::create_dir_all(&repo_dir)?;

        let registry = test_registry(dir.path());
        let repo = registry.register(&repo_dir)?;
        std::fs::create_dir_all(&repo.index_dir)?;

        registry.deregister(&repo.repo_id)?;
        assert!(repo.index_dir.exists());
        let err = registry.lookup(&repo.repo_id).unwrap_err();
        assert_eq!(crate::errors::classify(&err), "NotFound");
        Ok(())
    }

    #[test]
    fn update_state_records_commits() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_dir = dir.path().join("proj");
        std::fs::create_dir_all(&repo_dir)?;

        let registry = test_registry(dir.path());
        let repo = registry.register(&repo_dir)?;

        let updated = registry.update_state(
            &repo.repo_id,
            RegistryUpdate {
                current_commit: Some("abc123".into()),
                current_branch: Some("main".into()),
                last_indexed_commit: Some("abc123".into()),
            },
        )?;
        assert_eq!(updated.last_indexed_commit.as_deref(), Some("abc123"));

        let reloaded = registry.lookup(&repo.repo_id)?;
        assert_eq!(reloaded.current_branch.as_deref(), Some("main"));
        Ok(())
    }

    #[test]
    fn corrupt_document_is_preserved_and_repaired() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry_path = dir.path().join("repository_registry.json");
        std::fs::write(&registry_path, "{ not json")?;

        let registry = RepositoryRegistry::open(&registry_path, dir.path().join("indexes"))?;
        let err = registry.list().unwrap_err();
        assert_eq!(crate::errors::classify(&err), "Corrupt");

        // Original preserved, repaired copy in place, next call succeeds.
        assert!(registry_path.with_extension("json.corrupt").exists());
        assert!(registry.list()?.is_empty());
        Ok(())
    }

    #[test]
    fn missing_document_is_empty_not_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = test_registry(dir.path());
        assert!(registry.list()?.is_empty());
        Ok(())
    }
}

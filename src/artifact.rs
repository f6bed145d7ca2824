//! Prebuilt index artifacts: immutable zstd-compressed snapshots addressed
//! by `(repo_id, commit)`, with a JSON sidecar describing what they contain.
//!
//! The artifact store is a directory layout (`<root>/<repo_id>/<commit>.db.zst`
//! plus `<commit>.json`); a remote object store mounts or syncs into the
//! same shape, so the engine only ever deals with files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::EngineError;
use crate::types::RepoId;

const ARCHIVE_SUFFIX: &str = "db.zst";
const ZSTD_LEVEL: i32 = 3;

/// Sidecar descriptor stored next to each artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub repo_id: RepoId,
    pub commit: String,
    pub branch: Option<String>,
    pub schema_version: u32,
    pub file_count: u64,
    /// SHA-256 of the uncompressed snapshot.
    pub sha256: String,
}

/// Filesystem-backed artifact store.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a store from the configured URL; only `file://` and plain
    /// paths are served locally, anything else is not reachable from here.
    pub fn from_url(url: &str) -> Result<Self> {
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(Self::new(path));
        }
        if !url.contains("://") {
            return Ok(Self::new(url));
        }
        Err(EngineError::Unavailable(format!(
            "artifact store {url} requires an external fetcher"
        ))
        .into())
    }

    fn archive_path(&self, repo_id: &RepoId, commit: &str) -> PathBuf {
        self.root
            .join(repo_id.as_str())
            .join(format!("{commit}.{ARCHIVE_SUFFIX}"))
    }

    fn descriptor_path(&self, repo_id: &RepoId, commit: &str) -> PathBuf {
        self.root
            .join(repo_id.as_str())
            .join(format!("{commit}.json"))
    }

    /// Whether an artifact exists for this commit.
    pub fn find(&self, repo_id: &RepoId, commit: &str) -> Option<ArtifactDescriptor> {
        let descriptor_path = self.descriptor_path(repo_id, commit);
        let raw = std::fs::read_to_string(descriptor_path).ok()?;
        let descriptor: ArtifactDescriptor = serde_json::from_str(&raw).ok()?;
        if self.archive_path(repo_id, commit).exists() {
            Some(descriptor)
        } else {
            None
        }
    }

    /// Compress a snapshot into the store and write its sidecar. Artifacts
    /// are immutable: packing over an existing commit is a conflict.
    pub fn pack(
        &self,
        snapshot_path: &Path,
        descriptor: &ArtifactDescriptor,
    ) -> Result<PathBuf> {
        let archive_path = self.archive_path(&descriptor.repo_id, &descriptor.commit);
        if archive_path.exists() {
            return Err(EngineError::Conflict(format!(
                "artifact for commit {} already exists",
                descriptor.commit
            ))
            .into());
        }
        if let Some(parent) = archive_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut reader = BufReader::new(
            File::open(snapshot_path)
                .with_context(|| format!("cannot read snapshot {}", snapshot_path.display()))?,
        );
        let writer = BufWriter::new(File::create(&archive_path)?);
        let mut encoder = zstd::stream::Encoder::new(writer, ZSTD_LEVEL)?;
        std::io::copy(&mut reader, &mut encoder).context("compression failed")?;
        encoder.finish()?.into_inner().map_err(|e| {
            EngineError::Transient(format!("artifact flush failed: {}", e.error()))
        })?;

        let descriptor_path = self.descriptor_path(&descriptor.repo_id, &descriptor.commit);
        std::fs::write(&descriptor_path, serde_json::to_string_pretty(descriptor)?)?;
        info!(
            "packed artifact {} -> {}",
            snapshot_path.display(),
            archive_path.display()
        );
        Ok(archive_path)
    }

    /// Decompress an artifact to `destination` and verify it against the
    /// sidecar hash. The destination is written fully before this returns;
    /// installing it as `current` is the index manager's job.
    pub fn unpack(
        &self,
        repo_id: &RepoId,
        commit: &str,
        destination: &Path,
    ) -> Result<ArtifactDescriptor> {
        let descriptor = self.find(repo_id, commit).ok_or_else(|| {
            EngineError::NotFound(format!("artifact for {repo_id} at {commit}"))
        })?;

        let archive_path = self.archive_path(repo_id, commit);
        let reader = BufReader::new(File::open(&archive_path)?);
        let mut decoder = zstd::stream::Decoder::new(reader)?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(destination)?);
        std::io::copy(&mut decoder, &mut writer).context("decompression failed")?;
        drop(writer);

        let actual = sha256_of_file(destination)?;
        if actual != descriptor.sha256 {
            std::fs::remove_file(destination).ok();
            return Err(EngineError::Corrupt(format!(
                "artifact {commit} hash mismatch: expected {}, got {actual}",
                descriptor.sha256
            ))
            .into());
        }

        debug!("unpacked artifact {commit} to {}", destination.display());
        Ok(descriptor)
    }
}

/// SHA-256 of a file's contents, hex encoded.
pub fn sha256_of_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

//! Incremental indexer: full builds and change-set application.
//!
//! Files are processed in batches across a bounded worker pool; every file
//! is one transaction (file row, symbols, references, full-text row), so
//! partial progress is always consistent and resumable. Plugin failures are
//! absorbed per file: the file still gets its full-text row, just no
//! structural data.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::plugin_manager::PluginManager;
use crate::plugins::{language_for_path, PluginOutput, PluginVariant};
use crate::storage::{FileMeta, ReferenceRecord, StorageEngine, SymbolRecord};
use crate::types::{ChangeSet, Repository, LANG_BINARY_OR_OVERSIZED};
use crate::vcs;

/// How often the progress callback fires.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Progress snapshot reported during long builds.
#[derive(Debug, Clone)]
pub struct IndexProgress {
    pub done: usize,
    pub total: usize,
    /// Files per second since the build started.
    pub rate: f64,
    pub eta: Duration,
}

pub type ProgressCallback = Arc<dyn Fn(&IndexProgress) + Send + Sync>;

/// Outcome counters for one indexing pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IndexReport {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_deleted: usize,
    pub files_renamed: usize,
    pub symbols_extracted: usize,
    pub references_recorded: usize,
    pub plugin_failures: usize,
    pub elapsed_ms: u64,
}

/// Per-file and change-set indexing over one repository snapshot.
pub struct Indexer {
    plugins: Arc<PluginManager>,
    batch_size: usize,
    worker_count: usize,
    max_file_bytes: u64,
    ignored_dirs: Vec<String>,
}

impl Indexer {
    pub fn new(plugins: Arc<PluginManager>, config: &EngineConfig) -> Self {
        Self {
            plugins,
            batch_size: config.batch_size,
            worker_count: config.effective_worker_count(),
            max_file_bytes: config.max_file_bytes,
            ignored_dirs: config.ignored_dirs.clone(),
        }
    }

    /// Build the snapshot from scratch: enumerate tracked files, process in
    /// batches across the worker pool, report progress at fixed intervals.
    pub async fn full_index(
        &self,
        repo: &Repository,
        storage: &StorageEngine,
        progress: Option<ProgressCallback>,
    ) -> Result<IndexReport> {
        let started = Instant::now();
        let files = vcs::list_tracked_files(&repo.root_path, &self.ignored_dirs)?;
        let total = files.len();
        let commit = vcs::head_commit(&repo.root_path);
        info!(
            "full index of {} ({} files) at {:?}",
            repo.repo_id, total, commit
        );

        storage.upsert_repository(repo)?;

        // Warm the repository's dominant language up front and raise its
        // cache priority, so per-file lookups never pay construction.
        if let Some(primary) = dominant_language(&files, &self.plugins) {
            self.plugins.warm(&[primary]).await;
            self.plugins.promote(primary);
        }

        let report = Mutex::new(IndexReport::default());
        let done = AtomicUsize::new(0);
        let last_report = Mutex::new(Instant::now());

        for batch in files.chunks(self.batch_size) {
            stream::iter(batch)
                .map(|rel_path| {
                    let commit = commit.clone();
                    let report = &report;
                    let done = &done;
                    let last_report = &last_report;
                    let progress = &progress;
                    async move {
                        let outcome = self
                            .index_one_file(repo, storage, rel_path, commit.as_deref())
                            .await;
                        match outcome {
                            Ok(file_report) => merge(report, &file_report),
                            Err(e) => {
                                warn!("failed to index {rel_path}: {e:#}");
                                report.lock().files_skipped += 1;
                            }
                        }

                        let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                        if let Some(callback) = progress {
                            let mut last = last_report.lock();
                            if last.elapsed() >= PROGRESS_INTERVAL || finished == total {
                                *last = Instant::now();
                                let elapsed = started.elapsed().as_secs_f64().max(0.001);
                                let rate = finished as f64 / elapsed;
                                let remaining = (total - finished) as f64;
                                callback(&IndexProgress {
                                    done: finished,
                                    total,
                                    rate,
                                    eta: Duration::from_secs_f64(remaining / rate.max(0.001)),
                                });
                            }
                        }
                    }
                })
                .buffer_unordered(self.worker_count)
                .collect::<Vec<_>>()
                .await;
        }

        let mut final_report = report.into_inner();
        final_report.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(final_report)
    }

    /// Apply one change set: add, re-index, delete, and rename files, one
    /// transaction per file.
    pub async fn apply_changes(
        &self,
        repo: &Repository,
        storage: &StorageEngine,
        change_set: &ChangeSet,
    ) -> Result<IndexReport> {
        let started = Instant::now();
        let commit = Some(change_set.new_commit.as_str());
        let mut report = IndexReport::default();

        for rel_path in change_set.added.iter().chain(&change_set.modified) {
            match self.index_one_file(repo, storage, rel_path, commit).await {
                Ok(file_report) => accumulate(&mut report, &file_report),
                Err(e) => {
                    warn!("failed to index {rel_path}: {e:#}");
                    report.files_skipped += 1;
                }
            }
        }

        for rel_path in &change_set.deleted {
            storage.with_txn(|txn| {
                if let Some(file_id) = txn.file_id(rel_path)? {
                    txn.delete_file(file_id)?;
                }
                Ok(())
            })?;
            report.files_deleted += 1;
        }

        for (old_path, new_path) in &change_set.renamed {
            let renamed = self
                .apply_rename(repo, storage, old_path, new_path, commit)
                .await?;
            if renamed {
                report.files_renamed += 1;
            } else {
                report.files_indexed += 1;
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            "applied change set {}..{}: {:?}",
            change_set.old_commit, change_set.new_commit, report
        );
        Ok(report)
    }

    /// Rename without re-parsing when content is unchanged; otherwise drop
    /// the old row and index the new path as a modification.
    async fn apply_rename(
        &self,
        repo: &Repository,
        storage: &StorageEngine,
        old_path: &str,
        new_path: &str,
        commit: Option<&str>,
    ) -> Result<bool> {
        let bytes = match std::fs::read(repo.root_path.join(new_path)) {
            Ok(bytes) => bytes,
            Err(_) => {
                // Renamed then deleted before we got here; drop the old row.
                storage.with_txn(|txn| {
                    if let Some(file_id) = txn.file_id(old_path)? {
                        txn.delete_file(file_id)?;
                    }
                    Ok(())
                })?;
                return Ok(false);
            }
        };
        let new_hash = content_hash(&bytes);
        let stored = storage.file_hash(old_path)?;

        if stored.as_deref() == Some(new_hash.as_str()) {
            storage.with_txn(|txn| {
                if let Some(file_id) = txn.file_id(old_path)? {
                    txn.rename_file(file_id, new_path)?;
                }
                Ok(())
            })?;
            return Ok(true);
        }

        storage.with_txn(|txn| {
            if let Some(file_id) = txn.file_id(old_path)? {
                txn.delete_file(file_id)?;
            }
            Ok(())
        })?;
        self.index_one_file(repo, storage, new_path, commit).await?;
        Ok(false)
    }

    /// Hash, decode, extract, and write one file in a single transaction.
    async fn index_one_file(
        &self,
        repo: &Repository,
        storage: &StorageEngine,
        rel_path: &str,
        commit: Option<&str>,
    ) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        let full_path = repo.root_path.join(rel_path);

        let bytes = match std::fs::read(&full_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Disappeared between enumeration and processing.
                report.files_skipped += 1;
                return Ok(report);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", full_path.display()))
            }
        };

        let hash = content_hash(&bytes);
        let oversized = bytes.len() as u64 > self.max_file_bytes;
        let binary = !oversized && looks_binary(&bytes);
        let sentinel = (oversized || binary).then_some(LANG_BINARY_OR_OVERSIZED);

        if storage.file_hash(rel_path)?.as_deref() == Some(hash.as_str()) {
            // Unchanged content: refresh bookkeeping only, keeping the
            // sentinel language for skipped files.
            let meta = self.file_meta(&full_path, rel_path, &bytes, commit, sentinel)?;
            storage.with_txn(|txn| {
                txn.put_file(&repo.repo_id, &meta)?;
                Ok(())
            })?;
            report.files_skipped += 1;
            return Ok(report);
        }

        if oversized || binary {
            let meta = self.file_meta(
                &full_path,
                rel_path,
                &bytes,
                commit,
                Some(LANG_BINARY_OR_OVERSIZED),
            )?;
            let filename = filename_of(rel_path);
            storage.with_txn(|txn| {
                let file_id = txn.put_file(&repo.repo_id, &meta)?;
                txn.put_symbols(file_id, &[])?;
                txn.put_references(file_id, &[])?;
                txn.put_fulltext(file_id, rel_path, filename, "", LANG_BINARY_OR_OVERSIZED)?;
                Ok(())
            })?;
            report.files_indexed += 1;
            return Ok(report);
        }

        let (content, encoding) = decode_content(&bytes);
        if encoding != "utf-8" {
            debug!("{rel_path}: decoded as {encoding}");
        }

        let plugin = self.plugins.plugin_for(Path::new(rel_path)).await;
        let language: String = if plugin.variant() == PluginVariant::Generic {
            language_for_path(Path::new(rel_path)).to_string()
        } else {
            plugin.language().to_string()
        };

        let output = {
            let plugin = Arc::clone(&plugin);
            let rel = rel_path.to_string();
            let body = content.clone();
            tokio::task::spawn_blocking(move || plugin.index(&rel, &body))
                .await
                .context("plugin task panicked")?
        };
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                // Plugin crash isolation: log, keep the file full-text-only.
                warn!(
                    "plugin {} failed on {rel_path}: {e:#}; indexing full-text only",
                    plugin.language()
                );
                report.plugin_failures += 1;
                PluginOutput::default()
            }
        };

        let symbols = to_symbol_records(&output, &language);
        let meta = self.file_meta(&full_path, rel_path, &bytes, commit, Some(&language))?;
        let filename = filename_of(rel_path);

        let (symbol_count, reference_count) = storage.with_txn(|txn| {
            let file_id = txn.put_file(&repo.repo_id, &meta)?;
            txn.put_symbols(file_id, &symbols)?;

            // Resolve name references against whatever symbols exist so far;
            // unresolved ones are dropped, not stored.
            let mut references: Vec<ReferenceRecord> = Vec::new();
            for parsed in &output.references {
                if let Some(symbol_id) = txn.symbol_id_by_name(&parsed.name)? {
                    references.push(ReferenceRecord {
                        symbol_id,
                        line: parsed.line,
                        col: parsed.col,
                        kind: parsed.kind,
                    });
                }
            }
            txn.put_references(file_id, &references)?;
            txn.put_fulltext(file_id, rel_path, filename, &content, &meta.language)?;
            Ok((symbols.len(), references.len()))
        })?;

        report.files_indexed += 1;
        report.symbols_extracted += symbol_count;
        report.references_recorded += reference_count;
        Ok(report)
    }

    fn file_meta(
        &self,
        full_path: &Path,
        rel_path: &str,
        bytes: &[u8],
        commit: Option<&str>,
        language: Option<&str>,
    ) -> Result<FileMeta> {
        let mtime = std::fs::metadata(full_path)
            .and_then(|m| m.modified())
            .map(|t| {
                t.duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        Ok(FileMeta {
            rel_path: rel_path.to_string(),
            language: language
                .map(str::to_string)
                .unwrap_or_else(|| language_for_path(Path::new(rel_path)).to_string()),
            content_hash: content_hash(bytes),
            size: bytes.len() as u64,
            mtime,
            last_indexed_commit: commit.map(str::to_string),
        })
    }
}

fn merge(report: &Mutex<IndexReport>, file_report: &IndexReport) {
    accumulate(&mut report.lock(), file_report);
}

/// Most common plugin-claimed language across the file list, with a stable
/// tie-break so the warm-up choice is deterministic.
fn dominant_language(files: &[String], plugins: &PluginManager) -> Option<&'static str> {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for rel_path in files {
        if let Some(language) = plugins.claimed_language(Path::new(rel_path)) {
            *counts.entry(language).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|&(language, count)| (count, language))
        .map(|(language, _)| language)
}

fn accumulate(into: &mut IndexReport, from: &IndexReport) {
    into.files_indexed += from.files_indexed;
    into.files_skipped += from.files_skipped;
    into.files_deleted += from.files_deleted;
    into.files_renamed += from.files_renamed;
    into.symbols_extracted += from.symbols_extracted;
    into.references_recorded += from.references_recorded;
    into.plugin_failures += from.plugin_failures;
}

fn to_symbol_records(output: &PluginOutput, language: &str) -> Vec<SymbolRecord> {
    output
        .symbols
        .iter()
        .map(|s| SymbolRecord {
            name: s.name.clone(),
            qualified_name: s.qualified_name.clone(),
            kind: s.kind,
            signature: s.signature.clone(),
            documentation: s.documentation.clone(),
            start_line: s.start_line,
            start_col: s.start_col,
            end_line: s.end_line,
            end_col: s.end_col,
            language: language.to_string(),
        })
        .collect()
}

fn filename_of(rel_path: &str) -> &str {
    rel_path.rsplit('/').next().unwrap_or(rel_path)
}

/// xxh3 content hash, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:016x}", xxhash_rust::xxh3::xxh3_64(bytes))
}

/// NUL byte in the first 8 KiB means binary.
fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(8192)].contains(&0)
}

/// Decode file bytes trying UTF-8, UTF-8 with BOM, Latin-1, and CP1252 in
/// order. The output is always valid UTF-8; undecodable sequences are
/// replaced rather than propagated.
fn decode_content(bytes: &[u8]) -> (String, &'static str) {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        if let Ok(s) = std::str::from_utf8(rest) {
            return (s.to_string(), "utf-8-bom");
        }
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        return (s.to_string(), "utf-8");
    }
    // Latin-1 maps every byte, so it would always "succeed"; bytes in the
    // C1 control range almost always mean CP1252 in practice, so those fall
    // through to the CP1252 decoder instead.
    if !bytes.iter().any(|b| (0x80..=0x9F).contains(b)) {
        return (bytes.iter().map(|&b| b as char).collect(), "latin-1");
    }
    let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    (decoded.into_owned(), "cp1252")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{Capabilities, LanguagePlugin, PluginSpec};
    use crate::types::RepoId;
    use chrono::Utc;

    struct PanickyPlugin;
    impl LanguagePlugin for PanickyPlugin {
        fn language(&self) -> &'static str {
            "weird"
        }
        fn variant(&self) -> PluginVariant {
            PluginVariant::Regex
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                symbols: true,
                ..Default::default()
            }
        }
        fn supports(&self, path: &Path) -> bool {
            path.extension().and_then(|e| e.to_str()) == Some("weird")
        }
        fn index(&self, rel_path: &str, _content: &str) -> Result<PluginOutput> {
            anyhow::bail!("cannot parse {rel_path}")
        }
    }

    fn construct_panicky() -> Result<Arc<dyn LanguagePlugin>> {
        Ok(Arc::new(PanickyPlugin))
    }

    fn test_repo(root: &Path) -> Repository {
        let now = Utc::now();
        Repository {
            repo_id: RepoId::derive(None, root),
            root_path: root.to_path_buf(),
            remote_url: None,
            current_commit: None,
            current_branch: None,
            last_indexed_commit: None,
            index_dir: root.join(".index"),
            auto_sync: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn small_config() -> EngineConfig {
        EngineConfig {
            batch_size: 4,
            worker_count: 2,
            max_file_bytes: 1024,
            ..EngineConfig::default()
        }
    }

    fn indexer_with_specs(specs: Vec<PluginSpec>, config: &EngineConfig) -> Indexer {
        Indexer::new(Arc::new(PluginManager::with_specs(specs, config)), config)
    }

    #[tokio::test]
    async fn full_index_writes_files_and_fulltext() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_root = dir.path().join("repo");
        std::fs::create_dir_all(repo_root.join("src"))?;
        std::fs::write(repo_root.join("src/a.txt"), "alpha beta gamma")?;
        std::fs::write(repo_root.join("src/b.txt"), "beta delta")?;

        let config = small_config();
        let indexer = indexer_with_specs(vec![], &config);
        let storage = StorageEngine::open(dir.path().join("snapshot.db"))?;
        let repo = test_repo(&repo_root);

        let report = indexer.full_index(&repo, &storage, None).await?;
        assert_eq!(report.files_indexed, 2);

        let hits = storage.search_fulltext(
            "beta",
            &crate::storage::SearchFilter {
                limit: 10,
                ..Default::default()
            },
        )?;
        assert_eq!(hits.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn reindex_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_root = dir.path().join("repo");
        std::fs::create_dir_all(&repo_root)?;
        std::fs::write(repo_root.join("a.txt"), "stable content")?;

        let config = small_config();
        let indexer = indexer_with_specs(vec![], &config);
        let storage = StorageEngine::open(dir.path().join("snapshot.db"))?;
        let repo = test_repo(&repo_root);

        indexer.full_index(&repo, &storage, None).await?;
        let first = storage.stats()?;
        let first_hash = storage.file_hash("a.txt")?;

        indexer.full_index(&repo, &storage, None).await?;
        let second = storage.stats()?;
        let second_hash = storage.file_hash("a.txt")?;

        assert_eq!(first.file_count, second.file_count);
        assert_eq!(first.fulltext_row_count, second.fulltext_row_count);
        assert_eq!(first_hash, second_hash);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_boundary_is_exact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_root = dir.path().join("repo");
        std::fs::create_dir_all(&repo_root)?;
        // "pad " x 255 + "edge" = exactly 1024 bytes; one more byte crosses.
        let at_limit = format!("{}edge", "pad ".repeat(255));
        assert_eq!(at_limit.len(), 1024);
        let over_limit = format!("{at_limit}x");
        std::fs::write(repo_root.join("at_limit.txt"), &at_limit)?;
        std::fs::write(repo_root.join("over_limit.txt"), &over_limit)?;

        let config = small_config();
        let indexer = indexer_with_specs(vec![], &config);
        let storage = StorageEngine::open(dir.path().join("snapshot.db"))?;
        let repo = test_repo(&repo_root);

        indexer.full_index(&repo, &storage, None).await?;

        let hits = storage.search_fulltext(
            "edge",
            &crate::storage::SearchFilter {
                limit: 10,
                ..Default::default()
            },
        )?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rel_path, "at_limit.txt");

        // The oversized file still has a file row carrying the sentinel.
        assert!(storage.file_id("over_limit.txt")?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn plugin_crash_keeps_fulltext() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_root = dir.path().join("repo");
        std::fs::create_dir_all(&repo_root)?;
        std::fs::write(repo_root.join("data.weird"), "searchable payload")?;

        let config = small_config();
        let indexer = indexer_with_specs(
            vec![PluginSpec {
                language: "weird",
                extensions: &["weird"],
                variant: PluginVariant::Regex,
                construct: construct_panicky,
            }],
            &config,
        );
        let storage = StorageEngine::open(dir.path().join("snapshot.db"))?;
        let repo = test_repo(&repo_root);

        let report = indexer.full_index(&repo, &storage, None).await?;
        assert_eq!(report.plugin_failures, 1);

        let stats = storage.stats()?;
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.symbol_count, 0);

        let hits = storage.search_fulltext(
            "payload",
            &crate::storage::SearchFilter {
                limit: 10,
                ..Default::default()
            },
        )?;
        assert_eq!(hits.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_change_set_touches_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_root = dir.path().join("repo");
        std::fs::create_dir_all(&repo_root)?;
        std::fs::write(repo_root.join("a.txt"), "content")?;

        let config = small_config();
        let indexer = indexer_with_specs(vec![], &config);
        let storage = StorageEngine::open(dir.path().join("snapshot.db"))?;
        let repo = test_repo(&repo_root);

        indexer.full_index(&repo, &storage, None).await?;
        let before = storage.stats()?;

        let report = indexer
            .apply_changes(&repo, &storage, &ChangeSet::default())
            .await?;
        let after = storage.stats()?;

        assert_eq!(report.files_indexed, 0);
        assert_eq!(report.files_deleted, 0);
        assert_eq!(before.file_count, after.file_count);
        assert_eq!(before.symbol_count, after.symbol_count);
        assert_eq!(before.fulltext_row_count, after.fulltext_row_count);
        Ok(())
    }

    #[tokio::test]
    async fn rename_without_content_change_skips_reparse() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo_root = dir.path().join("repo");
        std::fs::create_dir_all(&repo_root)?;
        std::fs::write(repo_root.join("before.txt"), "unchanged body")?;

        let config = small_config();
        let indexer = indexer_with_specs(vec![], &config);
        let storage = StorageEngine::open(dir.path().join("snapshot.db"))?;
        let repo = test_repo(&repo_root);
        indexer.full_index(&repo, &storage, None).await?;

        std::fs::rename(repo_root.join("before.txt"), repo_root.join("after.txt"))?;
        let change_set = ChangeSet {
            renamed: vec![("before.txt".to_string(), "after.txt".to_string())],
            ..Default::default()
        };
        let report = indexer.apply_changes(&repo, &storage, &change_set).await?;

        assert_eq!(report.files_renamed, 1);
        assert!(storage.file_id("after.txt")?.is_some());
        assert!(storage.file_id("before.txt")?.is_none());
        Ok(())
    }

    #[test]
    fn decode_chain_order() {
        let (utf8, tag) = decode_content("plain".as_bytes());
        assert_eq!((utf8.as_str(), tag), ("plain", "utf-8"));

        let mut bom = vec![0xEF, 0xBB, 0xBF];
        bom.extend_from_slice(b"bommed");
        let (content, tag) = decode_content(&bom);
        assert_eq!((content.as_str(), tag), ("bommed", "utf-8-bom"));

        // 0xE9 is é in Latin-1 and invalid UTF-8.
        let (latin, tag) = decode_content(&[b'c', b'a', b'f', 0xE9]);
        assert_eq!((latin.as_str(), tag), ("café", "latin-1"));

        // 0x93/0x94 are curly quotes in CP1252 but C1 controls in Latin-1.
        let (cp, tag) = decode_content(&[0x93, b'h', b'i', 0x94]);
        assert_eq!(tag, "cp1252");
        assert_eq!(cp, "\u{201C}hi\u{201D}");
    }

    #[test]
    fn binary_detection_checks_leading_bytes() {
        assert!(looks_binary(&[1, 2, 0, 4]));
        assert!(!looks_binary(b"all text"));
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
        assert_eq!(content_hash(b"abc").len(), 16);
    }
}

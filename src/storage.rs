//! Embedded relational + full-text storage engine for one index snapshot.
//!
//! Backed by SQLite with the FTS5 extension: relational tables hold file,
//! symbol, and reference rows; a full-text virtual table serves BM25-ranked
//! content search with highlighted snippets. All multi-row writes are
//! transactional, file and full-text rows are kept in 1:1 correspondence
//! inside a single transaction, and the engine answers content search even
//! when no language plugin has ever been loaded.
//!
//! Text reaching this layer is already valid UTF-8; the indexer replaces
//! invalid sequences during decoding, before insertion.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::types::{ReferenceKind, RepoId, Repository, StorageStats, SymbolKind};

/// Version of the current physical schema (`PRAGMA user_version`).
pub const SCHEMA_VERSION: u32 = 2;

/// Full-text table of the current layout.
const FTS_TABLE: &str = "file_search";
/// Full-text table name used by the older layout; detected at open time and
/// selected for reads (and in-place writes) when present.
const LEGACY_FTS_TABLE: &str = "content_fts";

/// Highlight markers and fragment separator used in snippets.
const MARK_START: &str = "«";
const MARK_END: &str = "»";
const ELLIPSIS: &str = " … ";

/// Target snippet geometry: tokens per fragment and fragments per row.
const SNIPPET_TOKENS: usize = 20;
const SNIPPET_FRAGMENTS: usize = 3;

/// A file row ready for insertion.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub rel_path: String,
    pub language: String,
    pub content_hash: String,
    pub size: u64,
    pub mtime: i64,
    pub last_indexed_commit: Option<String>,
}

/// A symbol row ready for insertion (storage-facing shape of plugin output).
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub name: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub signature: Option<String>,
    pub documentation: Option<String>,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub language: String,
}

/// A resolved reference edge ready for insertion.
#[derive(Debug, Clone)]
pub struct ReferenceRecord {
    pub symbol_id: i64,
    pub line: u32,
    pub col: u32,
    pub kind: ReferenceKind,
}

/// Filters for `search_fulltext`.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub limit: usize,
    pub repo: Option<RepoId>,
    pub language: Option<String>,
}

/// Filters for `lookup_symbol`.
#[derive(Debug, Clone, Default)]
pub struct SymbolFilter {
    pub limit: usize,
    pub kind: Option<SymbolKind>,
    pub repo: Option<RepoId>,
}

/// One ranked full-text result.
#[derive(Debug, Clone)]
pub struct FulltextHit {
    pub rel_path: String,
    pub snippet: String,
    pub language: String,
    /// BM25 relevance, higher is better.
    pub score: f64,
    /// Line of the first highlighted fragment.
    pub line: u32,
}

/// One symbol lookup result.
#[derive(Debug, Clone)]
pub struct SymbolRow {
    pub rel_path: String,
    pub name: String,
    pub kind: SymbolKind,
    pub line: u32,
    pub signature: Option<String>,
    pub language: String,
}

/// Handle to one snapshot database.
pub struct StorageEngine {
    conn: Mutex<Connection>,
    path: PathBuf,
    fts_table: &'static str,
    read_only: bool,
    schema_version: u32,
}

impl StorageEngine {
    /// Open a snapshot read-write, creating the schema when the file is
    /// fresh. A snapshot written by a newer schema version opens read-only
    /// with a migration advisory instead of failing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(&path)
            .map_err(|e| EngineError::Unavailable(format!("cannot open storage: {e}")))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version > SCHEMA_VERSION {
            warn!(
                "snapshot {} has schema version {version}, newer than supported {SCHEMA_VERSION}; \
                 opening read-only — upgrade the engine to migrate",
                path.display()
            );
            let fts_table = detect_fts_table(&conn)?;
            return Ok(Self {
                conn: Mutex::new(conn),
                path,
                fts_table,
                read_only: true,
                schema_version: version,
            });
        }

        if version == 0 && !table_exists(&conn, "files")? {
            create_schema(&conn)?;
        }
        let fts_table = detect_fts_table(&conn)?;
        let schema_version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
            fts_table,
            read_only: false,
            schema_version,
        })
    }

    /// Open an existing snapshot for reads only. Fails with `Unavailable`
    /// when the file does not exist.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| EngineError::Unavailable(format!("cannot open snapshot: {e}")))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let fts_table = detect_fts_table(&conn)?;
        let schema_version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
            fts_table,
            read_only: true,
            schema_version,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Name of the full-text table selected at open time.
    pub fn fts_table_name(&self) -> &'static str {
        self.fts_table
    }

    /// Run `f` inside one transaction; commits on `Ok`, rolls back on `Err`.
    /// All multi-row writes go through here.
    pub fn with_txn<T>(&self, f: impl FnOnce(&StorageTxn<'_>) -> Result<T>) -> Result<T> {
        if self.read_only {
            return Err(EngineError::Corrupt(format!(
                "snapshot {} is read-only (schema version {} vs supported {SCHEMA_VERSION})",
                self.path.display(),
                self.schema_version
            ))
            .into());
        }
        let mut conn = self.conn.lock();
        let txn = conn
            .transaction()
            .map_err(|e| EngineError::Transient(format!("begin failed: {e}")))?;
        let stxn = StorageTxn {
            txn,
            fts_table: self.fts_table,
        };
        match f(&stxn) {
            Ok(value) => {
                stxn.txn
                    .commit()
                    .map_err(|e| EngineError::Transient(format!("commit failed: {e}")))?;
                Ok(value)
            }
            Err(e) => {
                // Dropping the transaction rolls it back.
                drop(stxn);
                Err(e)
            }
        }
    }

    /// Record (or refresh) the repository row for this snapshot.
    pub fn upsert_repository(&self, repo: &Repository) -> Result<()> {
        self.with_txn(|txn| {
            txn.txn.execute(
                "INSERT INTO repositories
                     (repo_id, remote_url, root_path, current_commit, current_branch, last_indexed_commit)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(repo_id) DO UPDATE SET
                     remote_url = excluded.remote_url,
                     root_path = excluded.root_path,
                     current_commit = excluded.current_commit,
                     current_branch = excluded.current_branch,
                     last_indexed_commit = excluded.last_indexed_commit",
                params![
                    repo.repo_id.as_str(),
                    repo.remote_url,
                    repo.root_path.to_string_lossy(),
                    repo.current_commit,
                    repo.current_branch,
                    repo.last_indexed_commit,
                ],
            )?;
            Ok(())
        })
    }

    /// BM25-ranked content search with highlighted multi-fragment snippets.
    ///
    /// Ties are broken by shorter path first, then lexicographic path, so
    /// two consecutive calls on an unchanged snapshot return byte-identical
    /// results.
    pub fn search_fulltext(&self, query: &str, filter: &SearchFilter) -> Result<Vec<FulltextHit>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let match_expr = fts_match_expression(&terms);
        let limit = if filter.limit == 0 { 10 } else { filter.limit };

        let table = self.fts_table;
        let mut sql = format!(
            "SELECT {table}.rowid, {table}.rel_path, {table}.language,
                    bm25({table}) AS rank, {table}.body
             FROM {table}
             WHERE {table} MATCH ?1"
        );
        let mut bindings: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(match_expr)];
        if let Some(language) = &filter.language {
            sql.push_str(&format!(
                " AND {table}.language = ?{}",
                bindings.len() + 1
            ));
            bindings.push(Box::new(language.clone()));
        }
        if let Some(repo) = &filter.repo {
            sql.push_str(&format!(
                " AND {table}.rowid IN (SELECT file_id FROM files WHERE repo_id = ?{})",
                bindings.len() + 1
            ));
            bindings.push(Box::new(repo.as_str().to_string()));
        }
        sql.push_str(&format!(
            " ORDER BY rank ASC, length({table}.rel_path) ASC, {table}.rel_path ASC LIMIT ?{}",
            bindings.len() + 1
        ));
        bindings.push(Box::new(limit as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            bindings.iter().map(|b| b.as_ref()).collect();
        let mut rows = stmt.query(params_ref.as_slice())?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let rel_path: String = row.get(1)?;
            let language: String = row.get(2)?;
            let rank: f64 = row.get(3)?;
            let body: String = row.get(4)?;
            let (snippet, line) = make_snippet(&body, &terms);
            hits.push(FulltextHit {
                rel_path,
                snippet,
                language,
                // bm25() reports lower-is-better; negate so callers can sort
                // descending like every other score in the engine.
                score: -rank,
                line,
            });
        }
        debug!("fulltext search {:?} -> {} hits", query, hits.len());
        Ok(hits)
    }

    /// Exact-then-prefix symbol lookup with deterministic ordering: exact
    /// matches first, then kind priority (class, function, method, other),
    /// then path, then line.
    pub fn lookup_symbol(&self, name: &str, filter: &SymbolFilter) -> Result<Vec<SymbolRow>> {
        if name.is_empty() {
            return Ok(Vec::new());
        }
        let limit = if filter.limit == 0 { 10 } else { filter.limit };
        let prefix = format!("{}%", like_escape(name));

        let mut sql = String::from(
            "SELECT fi.rel_path, s.name, s.kind, s.start_line, s.signature, s.language
             FROM symbols s JOIN files fi ON fi.file_id = s.file_id
             WHERE (s.name = ?1 OR s.name LIKE ?2 ESCAPE '\\')",
        );
        let mut bindings: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(name.to_string()), Box::new(prefix)];
        if let Some(kind) = filter.kind {
            sql.push_str(&format!(" AND s.kind = ?{}", bindings.len() + 1));
            bindings.push(Box::new(kind.to_string()));
        }
        if let Some(repo) = &filter.repo {
            sql.push_str(&format!(" AND fi.repo_id = ?{}", bindings.len() + 1));
            bindings.push(Box::new(repo.as_str().to_string()));
        }
        sql.push_str(&format!(
            " ORDER BY (s.name = ?1) DESC,
               CASE s.kind
                   WHEN 'class' THEN 0
                   WHEN 'function' THEN 1
                   WHEN 'method' THEN 2
                   ELSE 3
               END ASC,
               fi.rel_path ASC, s.start_line ASC
             LIMIT ?{}",
            bindings.len() + 1
        ));
        bindings.push(Box::new(limit as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            bindings.iter().map(|b| b.as_ref()).collect();
        let mut rows = stmt.query(params_ref.as_slice())?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let kind_raw: String = row.get(2)?;
            out.push(SymbolRow {
                rel_path: row.get(0)?,
                name: row.get(1)?,
                kind: SymbolKind::parse(&kind_raw).unwrap_or(SymbolKind::Other),
                line: row.get::<_, i64>(3)? as u32,
                signature: row.get(4)?,
                language: row.get(5)?,
            });
        }
        Ok(out)
    }

    /// Aggregate counts for this snapshot.
    pub fn stats(&self) -> Result<StorageStats> {
        let conn = self.conn.lock();
        let file_count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        let symbol_count: i64 = conn.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?;
        let reference_count: i64 = conn.query_row("SELECT COUNT(*) FROM refs", [], |r| r.get(0))?;
        let fulltext_row_count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.fts_table),
            [],
            |r| r.get(0),
        )?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;

        Ok(StorageStats {
            file_count: file_count as u64,
            symbol_count: symbol_count as u64,
            reference_count: reference_count as u64,
            fulltext_row_count: fulltext_row_count as u64,
            bytes: (page_count * page_size) as u64,
        })
    }

    /// Content hash of a stored file, if present.
    pub fn file_hash(&self, rel_path: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT content_hash FROM files WHERE rel_path = ?1",
            params![rel_path],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Rowid of a stored file, if present.
    pub fn file_id(&self, rel_path: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT file_id FROM files WHERE rel_path = ?1",
            params![rel_path],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// All stored repository-relative paths, sorted.
    pub fn all_paths(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT rel_path FROM files ORDER BY rel_path")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Transactional write surface handed to `with_txn` closures.
pub struct StorageTxn<'conn> {
    txn: rusqlite::Transaction<'conn>,
    fts_table: &'static str,
}

impl StorageTxn<'_> {
    /// Insert or update a file row; returns its `file_id`.
    pub fn put_file(&self, repo_id: &RepoId, meta: &FileMeta) -> Result<i64> {
        let file_id: i64 = self.txn.query_row(
            "INSERT INTO files
                 (repo_id, rel_path, language, content_hash, size, mtime, last_indexed_commit)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(repo_id, rel_path) DO UPDATE SET
                 language = excluded.language,
                 content_hash = excluded.content_hash,
                 size = excluded.size,
                 mtime = excluded.mtime,
                 last_indexed_commit = excluded.last_indexed_commit
             RETURNING file_id",
            params![
                repo_id.as_str(),
                meta.rel_path,
                meta.language,
                meta.content_hash,
                meta.size as i64,
                meta.mtime,
                meta.last_indexed_commit,
            ],
            |row| row.get(0),
        )?;
        Ok(file_id)
    }

    /// Replace-all-for-file symbol write. Symbols are purged before
    /// insertion so re-indexing can never leave duplicates behind.
    pub fn put_symbols(&self, file_id: i64, symbols: &[SymbolRecord]) -> Result<()> {
        self.txn
            .execute("DELETE FROM symbols WHERE file_id = ?1", params![file_id])?;
        let mut stmt = self.txn.prepare_cached(
            "INSERT INTO symbols
                 (file_id, kind, name, qualified_name, signature,
                  start_line, start_col, end_line, end_col, documentation, language)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for symbol in symbols {
            stmt.execute(params![
                file_id,
                symbol.kind.to_string(),
                symbol.name,
                symbol.qualified_name,
                symbol.signature,
                symbol.start_line,
                symbol.start_col,
                symbol.end_line,
                symbol.end_col,
                symbol.documentation,
                symbol.language,
            ])?;
        }
        Ok(())
    }

    /// Replace-all-for-file reference write.
    pub fn put_references(&self, file_id: i64, references: &[ReferenceRecord]) -> Result<()> {
        self.txn
            .execute("DELETE FROM refs WHERE file_id = ?1", params![file_id])?;
        let mut stmt = self.txn.prepare_cached(
            "INSERT INTO refs (symbol_id, file_id, line, col, kind)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for reference in references {
            stmt.execute(params![
                reference.symbol_id,
                file_id,
                reference.line,
                reference.col,
                reference.kind.to_string(),
            ])?;
        }
        Ok(())
    }

    /// Insert or replace the full-text row for a file.
    pub fn put_fulltext(
        &self,
        file_id: i64,
        rel_path: &str,
        filename: &str,
        content: &str,
        language: &str,
    ) -> Result<()> {
        self.txn.execute(
            &format!("DELETE FROM {} WHERE rowid = ?1", self.fts_table),
            params![file_id],
        )?;
        self.txn.execute(
            &format!(
                "INSERT INTO {} (rowid, rel_path, filename, body, language)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                self.fts_table
            ),
            params![file_id, rel_path, filename, content, language],
        )?;
        Ok(())
    }

    /// Delete a file and everything attached to it in this one transaction.
    pub fn delete_file(&self, file_id: i64) -> Result<()> {
        self.txn.execute(
            &format!("DELETE FROM {} WHERE rowid = ?1", self.fts_table),
            params![file_id],
        )?;
        self.txn
            .execute("DELETE FROM refs WHERE file_id = ?1", params![file_id])?;
        self.txn
            .execute("DELETE FROM symbols WHERE file_id = ?1", params![file_id])?;
        self.txn
            .execute("DELETE FROM files WHERE file_id = ?1", params![file_id])?;
        Ok(())
    }

    /// Path-only rename: updates the file row and the full-text row without
    /// touching symbols or content.
    pub fn rename_file(&self, file_id: i64, new_rel_path: &str) -> Result<()> {
        self.txn.execute(
            "UPDATE files SET rel_path = ?2 WHERE file_id = ?1",
            params![file_id, new_rel_path],
        )?;
        let filename = new_rel_path.rsplit('/').next().unwrap_or(new_rel_path);
        self.txn.execute(
            &format!(
                "UPDATE {} SET rel_path = ?2, filename = ?3 WHERE rowid = ?1",
                self.fts_table
            ),
            params![file_id, new_rel_path, filename],
        )?;
        Ok(())
    }

    /// Rowid of a stored file within this transaction's view.
    pub fn file_id(&self, rel_path: &str) -> Result<Option<i64>> {
        self.txn
            .query_row(
                "SELECT file_id FROM files WHERE rel_path = ?1",
                params![rel_path],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// First symbol in the snapshot with the given name, used to resolve
    /// plugin-emitted references to edges.
    pub fn symbol_id_by_name(&self, name: &str) -> Result<Option<i64>> {
        self.txn
            .query_row(
                "SELECT symbol_id FROM symbols WHERE name = ?1 ORDER BY symbol_id LIMIT 1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }
}

fn create_schema(conn: &Connection) -> Result<()> {
    // WAL keeps unbounded readers concurrent with the single writer.
    // `PRAGMA journal_mode` returns the resulting mode as a row, so it must
    // be issued via pragma_update_and_check rather than pragma_update.
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_row| Ok(()))?;
    conn.execute_batch(&format!(
        "CREATE TABLE repositories (
             repo_id TEXT PRIMARY KEY,
             remote_url TEXT,
             root_path TEXT NOT NULL,
             current_commit TEXT,
             current_branch TEXT,
             last_indexed_commit TEXT
         );
         CREATE TABLE files (
             file_id INTEGER PRIMARY KEY,
             repo_id TEXT NOT NULL,
             rel_path TEXT NOT NULL,
             language TEXT NOT NULL,
             content_hash TEXT NOT NULL,
             size INTEGER NOT NULL,
             mtime INTEGER NOT NULL,
             last_indexed_commit TEXT,
             UNIQUE (repo_id, rel_path)
         );
         CREATE TABLE symbols (
             symbol_id INTEGER PRIMARY KEY,
             file_id INTEGER NOT NULL REFERENCES files(file_id),
             kind TEXT NOT NULL,
             name TEXT NOT NULL,
             qualified_name TEXT NOT NULL,
             signature TEXT,
             start_line INTEGER NOT NULL,
             start_col INTEGER NOT NULL,
             end_line INTEGER NOT NULL,
             end_col INTEGER NOT NULL,
             documentation TEXT,
             language TEXT NOT NULL
         );
         CREATE INDEX idx_symbols_name ON symbols(name);
         CREATE INDEX idx_symbols_file ON symbols(file_id);
         CREATE TABLE refs (
             reference_id INTEGER PRIMARY KEY,
             symbol_id INTEGER NOT NULL REFERENCES symbols(symbol_id),
             file_id INTEGER NOT NULL REFERENCES files(file_id),
             line INTEGER NOT NULL,
             col INTEGER NOT NULL,
             kind TEXT NOT NULL
         );
         CREATE INDEX idx_refs_symbol ON refs(symbol_id);
         CREATE INDEX idx_refs_file ON refs(file_id);
         CREATE VIRTUAL TABLE {FTS_TABLE} USING fts5(rel_path, filename, body, language);
         PRAGMA user_version = {SCHEMA_VERSION};"
    ))?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Select which full-text table serves this snapshot: the current name when
/// present, else the older layout's.
fn detect_fts_table(conn: &Connection) -> Result<&'static str> {
    if table_exists(conn, FTS_TABLE)? {
        return Ok(FTS_TABLE);
    }
    if table_exists(conn, LEGACY_FTS_TABLE)? {
        debug!("using legacy full-text table {LEGACY_FTS_TABLE}");
        return Ok(LEGACY_FTS_TABLE);
    }
    // Fresh or schema-less file: the current name will be created on demand.
    Ok(FTS_TABLE)
}

/// Split a raw query into match terms; punctuation-only tokens are dropped
/// because the tokenizer would never index them.
fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| t.to_string())
        .filter(|t| t.chars().any(|c| c.is_alphanumeric()))
        .collect()
}

/// Build an FTS5 MATCH expression that treats the query as an AND of quoted
/// terms, immune to operator injection from raw user input.
fn fts_match_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape LIKE wildcards in a symbol-name prefix.
fn like_escape(name: &str) -> String {
    name.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Build a bounded multi-fragment snippet with highlight markers, and report
/// the 1-based line of the first fragment.
///
/// Matching is case-insensitive for ASCII content; non-ASCII bodies fall
/// back to exact matching so byte offsets stay aligned.
fn make_snippet(body: &str, terms: &[String]) -> (String, u32) {
    let haystack: std::borrow::Cow<'_, str> = if body.is_ascii() {
        std::borrow::Cow::Owned(body.to_ascii_lowercase())
    } else {
        std::borrow::Cow::Borrowed(body)
    };
    let needles: Vec<String> = terms
        .iter()
        .map(|t| {
            if body.is_ascii() {
                t.to_ascii_lowercase()
            } else {
                t.clone()
            }
        })
        .collect();

    // Byte offsets of term occurrences, capped to keep scans bounded.
    let mut positions: Vec<(usize, usize)> = Vec::new();
    for needle in &needles {
        if needle.is_empty() {
            continue;
        }
        let mut from = 0;
        while let Some(found) = haystack[from..].find(needle.as_str()) {
            let abs = from + found;
            positions.push((abs, needle.len()));
            from = abs + needle.len();
            if positions.len() >= 64 {
                break;
            }
        }
    }
    positions.sort_unstable();
    positions.dedup_by_key(|(start, _)| *start);

    // Whitespace-token spans over the body, for fragment windows.
    let tokens = token_spans(body);
    if positions.is_empty() || tokens.is_empty() {
        // Token spans end on char boundaries, so the slice below is safe for
        // non-ASCII bodies too.
        let end = tokens
            .get(SNIPPET_TOKENS.saturating_sub(1))
            .or_else(|| tokens.last())
            .map(|&(_, e)| e)
            .unwrap_or(0);
        return (body[..end].trim().to_string(), 1);
    }

    let mut fragments: Vec<(usize, usize)> = Vec::new();
    for &(start, _) in &positions {
        if fragments.len() >= SNIPPET_FRAGMENTS {
            break;
        }
        if fragments.iter().any(|&(s, e)| start >= s && start < e) {
            continue;
        }
        let token_idx = tokens
            .partition_point(|&(_, token_end)| token_end <= start)
            .min(tokens.len() - 1);
        let lo = token_idx.saturating_sub(SNIPPET_TOKENS / 2);
        let hi = (token_idx + SNIPPET_TOKENS / 2).min(tokens.len() - 1);
        fragments.push((tokens[lo].0, tokens[hi].1));
    }

    let first_line = body[..positions[0].0].matches('\n').count() as u32 + 1;

    let rendered: Vec<String> = fragments
        .iter()
        .map(|&(s, e)| highlight_fragment(&body[s..e], &needles, body.is_ascii()))
        .collect();
    (rendered.join(ELLIPSIS), first_line)
}

/// Byte spans of whitespace-separated tokens.
fn token_spans(body: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (idx, ch) in body.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, idx));
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        spans.push((s, body.len()));
    }
    spans
}

/// Wrap each term occurrence in a fragment with highlight markers. Single
/// newlines inside the fragment collapse to spaces so a snippet stays one
/// line.
fn highlight_fragment(fragment: &str, needles: &[String], ascii: bool) -> String {
    let flattened: String = fragment
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut marked = flattened.clone();
    for needle in needles {
        if needle.is_empty() {
            continue;
        }
        let search_space: std::borrow::Cow<'_, str> = if ascii {
            std::borrow::Cow::Owned(marked.to_ascii_lowercase())
        } else {
            std::borrow::Cow::Borrowed(marked.as_str())
        };
        let mut rebuilt = String::with_capacity(marked.len() + 8);
        let mut from = 0;
        while let Some(found) = search_space[from..].find(needle.as_str()) {
            let abs = from + found;
            rebuilt.push_str(&marked[from..abs]);
            rebuilt.push_str(MARK_START);
            rebuilt.push_str(&marked[abs..abs + needle.len()]);
            rebuilt.push_str(MARK_END);
            from = abs + needle.len();
        }
        rebuilt.push_str(&marked[from..]);
        marked = rebuilt;
    }
    marked
}

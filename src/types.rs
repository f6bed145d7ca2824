// Core value types shared across the engine: repository identity, symbol
// classification, query hits, and change sets.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::errors::EngineError;

/// Length of the hex fingerprint used as a repository identifier.
pub const REPO_ID_LEN: usize = 12;

/// Stable repository identifier: a short hex fingerprint derived from the
/// remote URL when available, else from the canonical working-tree path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(String);

impl RepoId {
    /// Derive the fingerprint for a repository.
    ///
    /// The remote URL is preferred so that clones of the same repository on
    /// different machines agree on the identifier; the canonical root path is
    /// the fallback for repositories without a remote.
    pub fn derive(remote_url: Option<&str>, canonical_root: &std::path::Path) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        match remote_url {
            Some(url) if !url.is_empty() => hasher.update(url.as_bytes()),
            _ => hasher.update(canonical_root.to_string_lossy().as_bytes()),
        }
        let digest = hex::encode(hasher.finalize());
        RepoId(digest[..REPO_ID_LEN].to_string())
    }

    /// Parse an identifier supplied by a caller, validating shape.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() != REPO_ID_LEN || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EngineError::Invalid(format!(
                "repository id must be {REPO_ID_LEN} hex characters, got {raw:?}"
            ))
            .into());
        }
        Ok(RepoId(raw.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered repository as recorded in the registry document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub repo_id: RepoId,
    pub root_path: PathBuf,
    pub remote_url: Option<String>,
    pub current_commit: Option<String>,
    pub current_branch: Option<String>,
    pub last_indexed_commit: Option<String>,
    /// Directory holding this repository's snapshots.
    pub index_dir: PathBuf,
    pub auto_sync: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Classification of an extracted symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Class,
    Function,
    Method,
    Variable,
    Module,
    Type,
    Macro,
    Other,
}

impl SymbolKind {
    /// Ordering priority for symbol lookup results: definitions people
    /// usually want first rank lower.
    pub fn priority(self) -> u8 {
        match self {
            SymbolKind::Class => 0,
            SymbolKind::Function => 1,
            SymbolKind::Method => 2,
            SymbolKind::Type => 3,
            SymbolKind::Module => 4,
            SymbolKind::Variable => 5,
            SymbolKind::Macro => 6,
            SymbolKind::Other => 7,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "class" | "struct" | "enum" | "interface" | "trait" => Some(SymbolKind::Class),
            "function" | "fn" | "func" => Some(SymbolKind::Function),
            "method" => Some(SymbolKind::Method),
            "variable" | "var" | "const" | "constant" | "static" => Some(SymbolKind::Variable),
            "module" | "mod" | "namespace" => Some(SymbolKind::Module),
            "type" | "typedef" | "alias" => Some(SymbolKind::Type),
            "macro" => Some(SymbolKind::Macro),
            "other" => Some(SymbolKind::Other),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SymbolKind::Class => "class",
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Variable => "variable",
            SymbolKind::Module => "module",
            SymbolKind::Type => "type",
            SymbolKind::Macro => "macro",
            SymbolKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Classification of a cross-reference edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Call,
    Import,
    Inherit,
    Mention,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferenceKind::Call => "call",
            ReferenceKind::Import => "import",
            ReferenceKind::Inherit => "inherit",
            ReferenceKind::Mention => "mention",
        };
        f.write_str(s)
    }
}

impl ReferenceKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "call" => Some(ReferenceKind::Call),
            "import" => Some(ReferenceKind::Import),
            "inherit" => Some(ReferenceKind::Inherit),
            "mention" => Some(ReferenceKind::Mention),
            _ => None,
        }
    }
}

/// A symbol definition returned by `lookup_symbol`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolHit {
    pub repo_id: Option<RepoId>,
    pub rel_path: String,
    pub name: String,
    pub kind: SymbolKind,
    pub line: u32,
    pub signature: Option<String>,
    pub language: String,
}

/// A ranked content hit returned by `search_code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeHit {
    pub repo_id: Option<RepoId>,
    pub rel_path: String,
    /// Line of the first highlighted fragment.
    pub line: u32,
    pub snippet: String,
    pub language: String,
    /// BM25-derived relevance, higher is better.
    pub score: f64,
}

/// Aggregate counts for one snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub file_count: u64,
    pub symbol_count: u64,
    pub reference_count: u64,
    pub fulltext_row_count: u64,
    pub bytes: u64,
}

/// Four disjoint sets of files changed between two commits.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub old_commit: String,
    pub new_commit: String,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub renamed: Vec<(String, String)>,
    /// Whether an incremental update is worthwhile for this set.
    pub incremental_ok: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len() + self.renamed.len()
    }
}

/// Readiness of one repository's index, reported by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHealth {
    pub repo_id: RepoId,
    pub root_path: PathBuf,
    pub snapshot_present: bool,
    pub last_indexed_commit: Option<String>,
    pub file_count: u64,
    pub symbol_count: u64,
}

/// Full status report; always constructible while the process is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub repos: Vec<IndexHealth>,
    pub storage_ok: bool,
    pub plugins_loaded: usize,
    pub semantic_available: bool,
}

/// Sentinel language tag for files excluded from full-text indexing.
pub const LANG_BINARY_OR_OVERSIZED: &str = "binary-or-oversized";

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn repo_id_prefers_remote_url() {
        let by_url = RepoId::derive(Some("https://example.com/a/b.git"), Path::new("/x"));
        let by_url2 = RepoId::derive(Some("https://example.com/a/b.git"), Path::new("/y"));
        assert_eq!(by_url, by_url2);

        let by_path = RepoId::derive(None, Path::new("/x"));
        assert_ne!(by_url, by_path);
        assert_eq!(by_path.as_str().len(), REPO_ID_LEN);
    }

    #[test]
    fn repo_id_parse_rejects_bad_shapes() {
        assert!(RepoId::parse("abc").is_err());
        assert!(RepoId::parse("zzzzzzzzzzzz").is_err());
        assert!(RepoId::parse("0123456789ab").is_ok());
    }

    #[test]
    fn empty_remote_falls_back_to_path() {
        let a = RepoId::derive(Some(""), Path::new("/repo"));
        let b = RepoId::derive(None, Path::new("/repo"));
        assert_eq!(a, b);
    }

    #[test]
    fn symbol_kind_roundtrip_and_priority() {
        assert_eq!(SymbolKind::parse("struct"), Some(SymbolKind::Class));
        assert_eq!(SymbolKind::parse("fn"), Some(SymbolKind::Function));
        assert!(SymbolKind::Class.priority() < SymbolKind::Function.priority());
        assert!(SymbolKind::Function.priority() < SymbolKind::Method.priority());
        assert!(SymbolKind::Method.priority() < SymbolKind::Other.priority());
    }

    #[test]
    fn change_set_counts() {
        let mut set = ChangeSet::default();
        assert!(set.is_empty());
        set.added.push("a.rs".into());
        set.renamed.push(("b.rs".into(), "c.rs".into()));
        assert_eq!(set.len(), 2);
        assert!(!set.is_empty());
    }
}

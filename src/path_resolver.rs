//! Path canonicalization and translation between working-tree, container
//! mount, and index-internal forms.
//!
//! All paths stored in an index are repository-relative with forward
//! slashes, case-preserving, so snapshots stay portable across machines and
//! mount layouts. Inputs arriving on any interface pass through here first.

use anyhow::Result;
use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::config::TranslationRule;

/// Errors raised during path resolution.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("directory traversal detected in path: {0}")]
    DirectoryTraversal(String),

    #[error("path {path} is outside repository root {root}")]
    OutsideRepo { path: String, root: String },

    #[error("invalid unicode in path")]
    InvalidUnicode,

    #[error("empty path after normalization")]
    EmptyPath,
}

/// Which form a translated path should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationTarget {
    /// The host working-tree layout.
    WorkingTree,
    /// The container-mount layout.
    ContainerMount,
}

/// Resolves and translates paths using an ordered list of prefix pairs.
pub struct PathResolver {
    rules: Vec<TranslationRule>,
}

impl PathResolver {
    pub fn new(rules: Vec<TranslationRule>) -> Self {
        Self { rules }
    }

    /// Canonicalize a raw input path: resolve symlinks and redundant
    /// segments when the path exists, else normalize lexically.
    pub fn canonicalize(&self, raw: &Path) -> PathBuf {
        match raw.canonicalize() {
            Ok(resolved) => resolved,
            Err(_) => lexical_normalize(raw),
        }
    }

    /// Rewrite a path into the requested layout using the first matching
    /// prefix rule. Longer (more exact) prefixes are preferred over shorter
    /// ones; a path that matches no rule is returned unchanged, which makes
    /// translation idempotent.
    pub fn translate(&self, path: &Path, target: TranslationTarget) -> PathBuf {
        let mut best: Option<(&TranslationRule, usize)> = None;
        for rule in &self.rules {
            let (from, _) = self.rule_direction(rule, target);
            if path.strip_prefix(from).is_ok() {
                let matched_len = from.as_os_str().len();
                let better = match best {
                    Some((_, len)) => matched_len > len,
                    None => true,
                };
                if better {
                    best = Some((rule, matched_len));
                }
            }
        }

        match best {
            Some((rule, _)) => {
                let (from, to) = self.rule_direction(rule, target);
                let rest = path.strip_prefix(from).unwrap_or(path);
                let translated = to.join(rest);
                debug!(
                    "translated {} -> {} via prefix rule",
                    path.display(),
                    translated.display()
                );
                translated
            }
            None => path.to_path_buf(),
        }
    }

    fn rule_direction<'a>(
        &self,
        rule: &'a TranslationRule,
        target: TranslationTarget,
    ) -> (&'a Path, &'a Path) {
        match target {
            TranslationTarget::WorkingTree => (&rule.container_prefix, &rule.host_prefix),
            TranslationTarget::ContainerMount => (&rule.host_prefix, &rule.container_prefix),
        }
    }

    /// Normalize a path to repository-relative form, validating that it lies
    /// under the registered root. Container-mount inputs are translated to
    /// the working-tree layout first.
    pub fn repo_relative(&self, root: &Path, path: &Path) -> Result<String> {
        let candidate = if path.is_absolute() {
            let translated = self.translate(path, TranslationTarget::WorkingTree);
            let canonical = self.canonicalize(&translated);
            match canonical.strip_prefix(root) {
                Ok(rest) => rest.to_path_buf(),
                Err(_) => {
                    return Err(PathError::OutsideRepo {
                        path: path.display().to_string(),
                        root: root.display().to_string(),
                    }
                    .into())
                }
            }
        } else {
            path.to_path_buf()
        };

        resolve_relative(&candidate)
    }

    /// Whether `path` resolves under `root`.
    pub fn is_within(&self, root: &Path, path: &Path) -> bool {
        let translated = self.translate(path, TranslationTarget::WorkingTree);
        let canonical = self.canonicalize(&translated);
        canonical.starts_with(root)
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Normalize a relative path component-wise: reject traversal, drop `.`,
/// force forward slashes.
fn resolve_relative(path: &Path) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(s) => parts.push(s),
                None => return Err(PathError::InvalidUnicode.into()),
            },
            Component::ParentDir => {
                return Err(
                    PathError::DirectoryTraversal(path.to_string_lossy().to_string()).into(),
                );
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if parts.is_empty() {
        return Err(PathError::EmptyPath.into());
    }

    Ok(parts.join("/"))
}

/// Remove `.` segments and collapse `..` without touching the filesystem.
/// Used when the target does not exist yet (deleted files in a change set).
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Cheap normalization for already-relative stored paths. Borrows when the
/// input is already in stored form.
pub fn normalize_stored<'a>(path: &'a str) -> Cow<'a, str> {
    if !path.contains('\\') && !path.starts_with("./") && !path.contains("/./") {
        return Cow::Borrowed(path);
    }
    let mut normalized = path.replace('\\', "/");
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }
    normalized = normalized.replace("/./", "/");
    Cow::Owned(normalized)
}

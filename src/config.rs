//! Engine configuration: the closed set of externally-visible options.
//!
//! Defaults come from `EngineConfig::default()`; a TOML file can override any
//! subset of fields. Paths default to a user-scoped application root so that
//! indexes and the registry survive process restarts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::EngineError;

/// Name of the user-scoped application directory.
pub const APP_DIR: &str = ".repolens";

/// File name of the persistent repository registry.
pub const REGISTRY_FILE: &str = "repository_registry.json";

/// One container↔host prefix translation rule. Rules are ordered; earlier
/// rules win, and exact prefix matches are preferred over shorter ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRule {
    /// Prefix as seen inside the container mount.
    pub container_prefix: PathBuf,
    /// Equivalent prefix on the host working tree.
    pub host_prefix: PathBuf,
}

/// Externally-visible configuration surface (closed set).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base directory for all per-repository indexes.
    pub index_root: PathBuf,
    /// Location of the registry document.
    pub registry_path: PathBuf,
    /// Memory ceiling for the plugin manager, in bytes.
    pub plugin_memory_limit_bytes: u64,
    /// Per-plugin construction budget, in milliseconds.
    pub plugin_construction_timeout_ms: u64,
    /// Upper bound on total query time, in milliseconds.
    pub query_deadline_ms: u64,
    /// Debounce interval for filesystem events, in milliseconds.
    pub watcher_debounce_ms: u64,
    /// Commit-advance poll interval, in milliseconds.
    pub watcher_commit_poll_ms: u64,
    /// Files larger than this are full-text-skipped.
    pub max_file_bytes: u64,
    /// Indexer batch size.
    pub batch_size: usize,
    /// Indexer worker pool size; 0 selects min(cores, 8).
    pub worker_count: usize,
    /// Optional object-store root for prebuilt artifacts (a directory or URL).
    pub artifact_store_url: Option<String>,
    /// Whether to consult the semantic back end.
    pub semantic_enabled: bool,
    /// Ordered container↔host prefix pairs.
    pub path_translation_rules: Vec<TranslationRule>,
    /// Directory names whose churn the watcher suppresses.
    pub ignored_dirs: Vec<String>,
    /// Bounded fan-out for multi-repository queries.
    pub multi_repo_fanout: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let app_root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self {
            index_root: app_root.join("indexes"),
            registry_path: app_root.join(REGISTRY_FILE),
            plugin_memory_limit_bytes: 1024 * 1024 * 1024,
            plugin_construction_timeout_ms: 5_000,
            query_deadline_ms: 10_000,
            watcher_debounce_ms: 500,
            watcher_commit_poll_ms: 5_000,
            max_file_bytes: 10 * 1024 * 1024,
            batch_size: 100,
            worker_count: 0,
            artifact_store_url: None,
            semantic_enabled: false,
            path_translation_rules: Vec::new(),
            ignored_dirs: vec![
                ".git".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
                "build".to_string(),
                "dist".to_string(),
                "__pycache__".to_string(),
                ".venv".to_string(),
            ],
            multi_repo_fanout: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// field the file omits.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: EngineConfig = toml::from_str(&raw).map_err(|e| {
            EngineError::Invalid(format!("malformed config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolved worker pool size.
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            self.worker_count
        } else {
            num_cpus::get().min(8)
        }
    }

    /// Reject configurations the engine cannot operate under.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EngineError::Invalid("batch_size must be positive".into()).into());
        }
        if self.query_deadline_ms == 0 {
            return Err(EngineError::Invalid("query_deadline_ms must be positive".into()).into());
        }
        if self.plugin_construction_timeout_ms == 0 {
            return Err(EngineError::Invalid(
                "plugin_construction_timeout_ms must be positive".into(),
            )
            .into());
        }
        if self.multi_repo_fanout == 0 {
            return Err(EngineError::Invalid("multi_repo_fanout must be positive".into()).into());
        }
        for rule in &self.path_translation_rules {
            if rule.container_prefix.as_os_str().is_empty()
                || rule.host_prefix.as_os_str().is_empty()
            {
                return Err(EngineError::Invalid(
                    "path_translation_rules entries must not be empty".into(),
                )
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.plugin_construction_timeout_ms, 5_000);
        assert_eq!(config.query_deadline_ms, 10_000);
        assert_eq!(config.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(config.batch_size, 100);
        assert!(config.effective_worker_count() >= 1);
        assert!(config.effective_worker_count() <= 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_overrides_merge_with_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("repolens.toml");
        std::fs::write(
            &path,
            r#"
query_deadline_ms = 2500
batch_size = 10

[[path_translation_rules]]
container_prefix = "/workspace"
host_prefix = "/home/dev/src"
"#,
        )?;

        let config = EngineConfig::from_file(&path)?;
        assert_eq!(config.query_deadline_ms, 2_500);
        assert_eq!(config.batch_size, 10);
        // Untouched fields keep their defaults.
        assert_eq!(config.watcher_debounce_ms, 500);
        assert_eq!(config.path_translation_rules.len(), 1);
        assert_eq!(
            config.path_translation_rules[0].host_prefix,
            PathBuf::from("/home/dev/src")
        );
        Ok(())
    }

    #[test]
    fn zero_batch_size_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("repolens.toml");
        std::fs::write(&path, "batch_size = 0\n")?;
        let err = EngineConfig::from_file(&path).unwrap_err();
        assert_eq!(crate::errors::classify(&err), "Invalid");
        Ok(())
    }

    #[test]
    fn malformed_toml_is_invalid() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("repolens.toml");
        std::fs::write(&path, "batch_size = [not toml")?;
        let err = EngineConfig::from_file(&path).unwrap_err();
        assert_eq!(crate::errors::classify(&err), "Invalid");
        Ok(())
    }
}

//! Plugin lifecycle: discovery by extension, timeout-guarded construction,
//! and memory-bounded caching with LRU eviction.
//!
//! Construction runs on the blocking pool under a hard timeout so a slow
//! grammar can never stall a query: on expiry the attempt is abandoned, the
//! plugin is marked failed for the process lifetime, and callers proceed
//! with the generic text plugin.

#[cfg(test)]
use anyhow::Result;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::plugins::{builtin_specs, text::GenericTextPlugin, LanguagePlugin, PluginSpec};

/// Counters reported by `stats`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PluginManagerStats {
    pub loaded: usize,
    pub evicted: u64,
    pub failed: usize,
    pub memory_bytes: u64,
    pub lookups: u64,
}

struct CachedPlugin {
    plugin: Arc<dyn LanguagePlugin>,
    memory_bytes: u64,
}

struct CacheState {
    lru: LruCache<&'static str, CachedPlugin>,
    memory_bytes: u64,
}

/// Manages construction and caching of language plugins.
pub struct PluginManager {
    specs: Vec<PluginSpec>,
    by_extension: HashMap<&'static str, usize>,
    cache: Mutex<CacheState>,
    failed: Mutex<HashSet<&'static str>>,
    generic: Arc<dyn LanguagePlugin>,
    memory_limit_bytes: u64,
    construction_timeout: Duration,
    evicted: AtomicU64,
    lookups: AtomicU64,
}

impl PluginManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_specs(builtin_specs(), config)
    }

    pub fn with_specs(specs: Vec<PluginSpec>, config: &EngineConfig) -> Self {
        let mut by_extension = HashMap::new();
        for (idx, spec) in specs.iter().enumerate() {
            for ext in spec.extensions {
                // First registration wins: grammar specs precede fallbacks.
                by_extension.entry(*ext).or_insert(idx);
            }
        }
        Self {
            specs,
            by_extension,
            cache: Mutex::new(CacheState {
                lru: LruCache::unbounded(),
                memory_bytes: 0,
            }),
            failed: Mutex::new(HashSet::new()),
            generic: GenericTextPlugin::shared(),
            memory_limit_bytes: config.plugin_memory_limit_bytes,
            construction_timeout: Duration::from_millis(config.plugin_construction_timeout_ms),
            evicted: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
        }
    }

    /// Language a registered plugin claims for this path, if any.
    pub fn claimed_language(&self, path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.by_extension
            .get(ext.as_str())
            .map(|&idx| self.specs[idx].language)
    }

    /// Plugin serving `path`. Always returns a plugin: the generic text
    /// plugin stands in when no spec claims the extension, when construction
    /// failed earlier, or when construction exceeds its budget right now.
    pub async fn plugin_for(&self, path: &Path) -> Arc<dyn LanguagePlugin> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let Some(&spec_idx) = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|ext| self.by_extension.get(ext.as_str()))
        else {
            return Arc::clone(&self.generic);
        };
        let spec = &self.specs[spec_idx];

        if self.failed.lock().contains(spec.language) {
            return Arc::clone(&self.generic);
        }

        if let Some(cached) = self.cache.lock().lru.get(spec.language) {
            return Arc::clone(&cached.plugin);
        }

        self.construct(spec).await.unwrap_or_else(|| Arc::clone(&self.generic))
    }

    /// Plugin already in the cache for this path, never constructing.
    pub fn loaded_plugin_for(&self, path: &Path) -> Option<Arc<dyn LanguagePlugin>> {
        let language = self.claimed_language(path)?;
        self.cache
            .lock()
            .lru
            .get(language)
            .map(|cached| Arc::clone(&cached.plugin))
    }

    /// Pre-construct plugins for the given languages (e.g. the primary
    /// language of a repository about to be indexed).
    pub async fn warm(&self, languages: &[&str]) {
        for language in languages {
            let Some(idx) = self.specs.iter().position(|s| s.language == *language) else {
                continue;
            };
            let spec = &self.specs[idx];
            if self.failed.lock().contains(spec.language) {
                continue;
            }
            if self.cache.lock().lru.contains(spec.language) {
                continue;
            }
            let _ = self.construct(spec).await;
        }
    }

    /// Priority hint: raise the effective recency of a language so it
    /// outlives eviction pressure.
    pub fn promote(&self, language: &str) {
        let mut cache = self.cache.lock();
        let key = self
            .specs
            .iter()
            .find(|s| s.language == language)
            .map(|s| s.language);
        if let Some(key) = key {
            cache.lru.promote(&key);
        }
    }

    pub fn stats(&self) -> PluginManagerStats {
        let cache = self.cache.lock();
        PluginManagerStats {
            loaded: cache.lru.len(),
            evicted: self.evicted.load(Ordering::Relaxed),
            failed: self.failed.lock().len(),
            memory_bytes: cache.memory_bytes,
            lookups: self.lookups.load(Ordering::Relaxed),
        }
    }

    pub fn loaded_count(&self) -> usize {
        self.cache.lock().lru.len()
    }

    /// Release every cached plugin.
    pub fn shutdown(&self) {
        let mut cache = self.cache.lock();
        while let Some((language, cached)) = cache.lru.pop_lru() {
            debug!("releasing plugin {language}");
            cached.plugin.release();
        }
        cache.memory_bytes = 0;
    }

    /// Construct under the timeout guard and insert into the cache.
    /// Returns `None` on failure or timeout (already logged and recorded).
    async fn construct(&self, spec: &PluginSpec) -> Option<Arc<dyn LanguagePlugin>> {
        let language = spec.language;
        let constructor = spec.construct;
        let budget = self.construction_timeout;

        let built = tokio::time::timeout(budget, tokio::task::spawn_blocking(constructor)).await;

        let plugin: Arc<dyn LanguagePlugin> = match built {
            Ok(Ok(Ok(plugin))) => plugin,
            Ok(Ok(Err(e))) => {
                warn!("plugin {language} failed to construct: {e:#}; disabling for this process");
                self.failed.lock().insert(language);
                return None;
            }
            Ok(Err(join_err)) => {
                warn!("plugin {language} construction panicked: {join_err}; disabling");
                self.failed.lock().insert(language);
                return None;
            }
            Err(_elapsed) => {
                // The blocking task keeps running but its result is
                // discarded; the language is dead for this process.
                warn!(
                    "plugin {language} construction exceeded {budget:?}; abandoned and disabled"
                );
                self.failed.lock().insert(language);
                return None;
            }
        };

        let memory_bytes = plugin.memory_bytes();
        let mut cache = self.cache.lock();
        if let Some(previous) = cache.lru.put(
            language,
            CachedPlugin {
                plugin: Arc::clone(&plugin),
                memory_bytes,
            },
        ) {
            cache.memory_bytes = cache.memory_bytes.saturating_sub(previous.memory_bytes);
        }
        cache.memory_bytes += memory_bytes;
        info!("plugin {language} loaded ({memory_bytes} bytes)");

        // Enforce the ceiling, keeping at least the plugin just loaded.
        while cache.memory_bytes > self.memory_limit_bytes && cache.lru.len() > 1 {
            if let Some((evicted_language, evicted)) = cache.lru.pop_lru() {
                cache.memory_bytes = cache.memory_bytes.saturating_sub(evicted.memory_bytes);
                self.evicted.fetch_add(1, Ordering::Relaxed);
                debug!("evicted plugin {evicted_language} under memory pressure");
                evicted.plugin.release();
            } else {
                break;
            }
        }

        Some(plugin)
    }
}

// repolens - Repository indexing engine for AI coding assistants
// Root library module

pub mod artifact;
pub mod change_detector;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod errors;
pub mod index_manager;
pub mod indexer;
pub mod observability;
pub mod path_resolver;
pub mod plugin_manager;
pub mod plugins;
pub mod registry;
pub mod storage;
pub mod types;
pub mod vcs;
pub mod watcher;

// Re-export observability entry points
pub use observability::{
    get_metrics, init_logging, init_logging_with_level, log_operation, with_trace_id, Operation,
    OperationContext,
};

// Re-export the public error taxonomy
pub use errors::{classify, EngineError};

// Re-export core value types
pub use types::{
    ChangeSet, CodeHit, IndexHealth, ReferenceKind, RepoId, Repository, StatusReport,
    StorageStats, SymbolHit, SymbolKind, LANG_BINARY_OR_OVERSIZED,
};

// Re-export configuration
pub use config::{EngineConfig, TranslationRule};

// Re-export the registry
pub use registry::{RegistryUpdate, RepositoryRegistry};

// Re-export the storage engine
pub use storage::{
    FileMeta, FulltextHit, ReferenceRecord, SearchFilter, StorageEngine, SymbolFilter,
    SymbolRecord, SymbolRow, SCHEMA_VERSION,
};

// Re-export the plugin surface
pub use plugin_manager::{PluginManager, PluginManagerStats};
pub use plugins::{
    builtin_specs, Capabilities, LanguagePlugin, ParsedImport, ParsedReference, ParsedSymbol,
    PluginOutput, PluginSpec, PluginVariant,
};

// Re-export indexing components
pub use change_detector::ChangeDetector;
pub use index_manager::{IndexManager, SyncAction, SyncOutcome, CURRENT_POINTER};
pub use indexer::{IndexProgress, IndexReport, Indexer, ProgressCallback};

// Re-export the query surface
pub use coordinator::TaggedHits;
pub use dispatcher::{
    Dispatcher, RepoScope, SearchOptions, SearchResponse, SemanticBackend, SymbolQueryOptions,
};

// Re-export path handling
pub use path_resolver::{PathError, PathResolver, TranslationTarget};

// Re-export the watcher
pub use watcher::{SyncReason, SyncRequest, WatcherHandle};

use std::sync::Arc;

/// Everything a transport shell needs, wired together from one config.
pub struct Engine {
    pub config: EngineConfig,
    pub registry: Arc<RepositoryRegistry>,
    pub plugins: Arc<PluginManager>,
    pub index_manager: Arc<IndexManager>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the full engine stack. The semantic back end is optional and only
/// consulted when `semantic_enabled` is set.
pub fn create_engine(
    config: EngineConfig,
    semantic: Option<Arc<dyn SemanticBackend>>,
) -> anyhow::Result<Engine> {
    config.validate()?;
    let registry = Arc::new(RepositoryRegistry::open(
        &config.registry_path,
        &config.index_root,
    )?);
    let plugins = Arc::new(PluginManager::new(&config));
    let index_manager = Arc::new(IndexManager::new(
        Arc::clone(&registry),
        Arc::clone(&plugins),
        &config,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&index_manager),
        Arc::clone(&plugins),
        semantic,
        &config,
    ));
    Ok(Engine {
        config,
        registry,
        plugins,
        index_manager,
        dispatcher,
    })
}

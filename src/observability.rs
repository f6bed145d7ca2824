// Centralized observability for the indexing engine: structured logging
// setup, trace contexts, and lightweight process-wide counters.

use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

// Global atomic counters, exported through `get_metrics`.
static QUERY_COUNTER: AtomicU64 = AtomicU64::new(0);
static SYNC_COUNTER: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNTER: AtomicU64 = AtomicU64::new(0);
static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize the logging and tracing infrastructure.
/// Call once at process startup.
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity.
///
/// Quiet forces error-only output and ignores `RUST_LOG`; verbose enables
/// debug output for this crate. The default keeps dependencies at `error`
/// and this crate at `warn`.
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("repolens=debug,info")
    } else {
        EnvFilter::new("repolens=warn,error")
    };

    // Quiet takes precedence over the environment so that --quiet always
    // suppresses logs regardless of RUST_LOG.
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_thread_ids(false)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                debug!("repolens observability initialized");
            }
            Ok(())
        }
        // Already initialized, which is fine in test environments.
        Err(_) => Ok(()),
    }
}

/// Engine operations recorded through `log_operation`.
#[derive(Debug, Clone)]
pub enum Operation {
    SymbolLookup {
        name: String,
        result_count: usize,
    },
    CodeSearch {
        query: String,
        result_count: usize,
        partial: bool,
    },
    Status,
    IndexFull {
        repo_id: String,
        files: usize,
    },
    IndexIncremental {
        repo_id: String,
        changes: usize,
    },
    ArtifactRestore {
        repo_id: String,
        commit: String,
    },
    SnapshotSwap {
        repo_id: String,
        snapshot: String,
    },
    PluginLoad {
        language: String,
    },
    PluginEvict {
        language: String,
    },
}

/// Trace context carried through one externally-reachable operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub trace_id: Uuid,
    pub operation: String,
    pub start_time: Instant,
    pub attributes: Vec<(String, String)>,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            operation: operation.into(),
            start_time: Instant::now(),
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((key.into(), value.into()));
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Log a completed operation with its context and outcome.
pub fn log_operation(ctx: &OperationContext, op: &Operation, result: &Result<()>) {
    let elapsed = ctx.elapsed();
    let attrs = ctx
        .attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");

    match result {
        Ok(()) => {
            debug!(
                trace_id = %ctx.trace_id,
                operation = %ctx.operation,
                elapsed_ms = elapsed.as_millis(),
                attributes = %attrs,
                "operation completed: {:?}", op
            );
        }
        Err(e) => {
            error!(
                trace_id = %ctx.trace_id,
                operation = %ctx.operation,
                elapsed_ms = elapsed.as_millis(),
                attributes = %attrs,
                error = %e,
                "operation failed: {:?}", op
            );
            ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
    }

    match op {
        Operation::SymbolLookup { .. } | Operation::CodeSearch { .. } => {
            QUERY_COUNTER.fetch_add(1, Ordering::Relaxed);
            if let Operation::CodeSearch { partial: true, .. } = op {
                PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
            }
        }
        Operation::IndexFull { .. }
        | Operation::IndexIncremental { .. }
        | Operation::ArtifactRestore { .. } => {
            SYNC_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        _ => {}
    }
}

/// Execute a future under a fresh trace id, logging start, outcome, and
/// duration.
pub async fn with_trace_id<F, T>(operation: &str, f: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let trace_id = Uuid::new_v4();
    debug!(trace_id = %trace_id, "starting operation: {}", operation);

    let start = Instant::now();
    let result = f.await;
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => {
            debug!(
                trace_id = %trace_id,
                elapsed_ms = elapsed.as_millis(),
                "operation completed: {}", operation
            );
        }
        Err(e) => {
            error!(
                trace_id = %trace_id,
                elapsed_ms = elapsed.as_millis(),
                error = %e,
                "operation failed: {}", operation
            );
            ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
    }

    result
}

/// Snapshot of the process-wide counters.
pub fn get_metrics() -> serde_json::Value {
    serde_json::json!({
        "queries": QUERY_COUNTER.load(Ordering::Relaxed),
        "syncs": SYNC_COUNTER.load(Ordering::Relaxed),
        "errors": ERROR_COUNTER.load(Ordering::Relaxed),
        "partial_responses": PARTIAL_COUNTER.load(Ordering::Relaxed),
        "timestamp": Utc::now().to_rfc3339(),
    })
}

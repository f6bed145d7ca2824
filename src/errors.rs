//! Engine-wide error taxonomy surfaced to tool callers
//!
//! Every error that crosses the dispatcher boundary is one of these tags.
//! Module-local failures (plugin crashes, semantic backend outages) are
//! recovered where they occur and never reach this enum.

use std::time::Duration;

/// Errors surfaced to callers of the query and registry interfaces.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Registry entry, file, or symbol not present.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input: path outside a registered repository, bad configuration.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Registry collision or concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage not open, or a backing subsystem is down.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Deadline exceeded on a query or plugin construction.
    #[error("timeout after {elapsed:?}: {operation}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    /// Schema or registry integrity failure.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// Recoverable I/O failure; safe to retry.
    #[error("transient: {0}")]
    Transient(String),
}

impl EngineError {
    /// Short stable tag for the wire protocol.
    pub fn tag(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NotFound",
            EngineError::Invalid(_) => "Invalid",
            EngineError::Conflict(_) => "Conflict",
            EngineError::Unavailable(_) => "Unavailable",
            EngineError::Timeout { .. } => "Timeout",
            EngineError::Corrupt(_) => "Corrupt",
            EngineError::Transient(_) => "Transient",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Transient(_) | EngineError::Timeout { .. } | EngineError::Unavailable(_)
        )
    }

    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        EngineError::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }
}

/// Classify an arbitrary error chain into a taxonomy tag.
///
/// Used at the dispatcher boundary: typed `EngineError`s pass through, I/O
/// errors become `Transient`, everything else is reported as `Unavailable`
/// with a short diagnostic rather than a stack trace.
pub fn classify(err: &anyhow::Error) -> &'static str {
    if let Some(engine_err) = err.downcast_ref::<EngineError>() {
        return engine_err.tag();
    }
    if err.downcast_ref::<std::io::Error>().is_some() {
        return "Transient";
    }
    "Unavailable"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable() {
        assert_eq!(EngineError::NotFound("x".into()).tag(), "NotFound");
        assert_eq!(EngineError::Corrupt("x".into()).tag(), "Corrupt");
        assert_eq!(
            EngineError::timeout("search", Duration::from_secs(10)).tag(),
            "Timeout"
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(EngineError::Transient("io".into()).is_retryable());
        assert!(EngineError::timeout("q", Duration::from_millis(1)).is_retryable());
        assert!(!EngineError::Invalid("bad path".into()).is_retryable());
        assert!(!EngineError::Conflict("dup".into()).is_retryable());
    }

    #[test]
    fn classify_walks_the_chain() {
        let err = anyhow::Error::from(EngineError::NotFound("repo".into()));
        assert_eq!(classify(&err), "NotFound");

        let io = anyhow::Error::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert_eq!(classify(&io), "Transient");

        let other = anyhow::anyhow!("something else");
        assert_eq!(classify(&other), "Unavailable");
    }
}

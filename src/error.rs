//! Error types for the replication coordinator
//!
//! Every caller-facing operation returns [`ReplResult`]. Errors produced while
//! applying committed entries travel back to the originating caller through
//! its pending slot; errors the applier cannot attribute to a caller are
//! fatal and handled in the commit loop itself.

use thiserror::Error;

/// Boxed error returned by user [`Store`](crate::store::Store) implementations.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

pub type ReplResult<T> = Result<T, ReplError>;

/// Error surface of the replication coordinator.
#[derive(Error, Debug)]
pub enum ReplError {
    /// The operation's child deadline elapsed before commit/apply.
    #[error("operation '{operation}' timed out waiting for replication")]
    Timeout { operation: &'static str },

    /// The consensus engine refused the proposal (not leader, queue full,
    /// stopped).
    #[error("proposal rejected by consensus engine: {reason}")]
    ProposeRejected { reason: String },

    /// The target of an add-member request did not accept a TCP connection.
    #[error("preflight check for '{address}' failed: {reason}")]
    Preflight { address: String, reason: String },

    /// Envelope or conf-change encoding failed.
    #[error("serialization of {operation} failed")]
    Serialization {
        operation: &'static str,
        #[source]
        source: bincode::Error,
    },

    /// The operation raced with `stop()`, or the replicator was never started.
    #[error("replicator is shut down")]
    Shutdown,

    /// The user store rejected an operation; surfaced to the caller whose
    /// request produced it.
    #[error("store operation '{operation}' failed")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ReplError {
    /// True for errors a caller may retry after re-resolving the leader.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ReplError::Timeout { .. } | ReplError::ProposeRejected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(ReplError::Timeout { operation: "save" }.is_retriable());
        assert!(ReplError::ProposeRejected {
            reason: "not leader".to_string()
        }
        .is_retriable());
        assert!(!ReplError::Shutdown.is_retriable());
    }

    #[test]
    fn test_store_error_preserves_source() {
        let source: StoreError = "disk full".into();
        let err = ReplError::Store {
            operation: "save",
            source,
        };
        let chained = std::error::Error::source(&err).expect("source should be preserved");
        assert_eq!(chained.to_string(), "disk full");
    }
}

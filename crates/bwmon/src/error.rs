//! Error types for bwmon
//!
//! Per-tick failures (a counter poll that timed out or returned garbage) are
//! carried inside the measurement stream as [`crate::RateReading::Failed`].
//! Everything else is fatal at startup.

use thiserror::Error;

/// Bandwidth monitor errors
#[derive(Error, Debug)]
pub enum BwmonError {
    /// Transport-level failure talking to the device (timeout, socket error)
    #[error("Transport error: {operation}: {message}")]
    Transport {
        /// The operation that failed (e.g., "get", "walk")
        operation: String,
        /// Error message
        message: String,
    },

    /// Device answered with a value of the wrong type
    #[error("Unexpected value for {oid}: expected {expected}, got {got}")]
    UnexpectedValue {
        /// OID that was requested
        oid: String,
        /// Value type that was expected
        expected: &'static str,
        /// Value type the device returned
        got: &'static str,
    },

    /// Named interface does not exist on the device
    #[error("Interface {0} not found")]
    InterfaceNotFound(String),

    /// Delta requested across samples of different interfaces or directions
    #[error("Samples are not comparable: {old} vs {new}")]
    IncomparableSamples {
        /// Identity/direction of the older sample
        old: String,
        /// Identity/direction of the newer sample
        new: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation abandoned because monitoring was stopped
    #[error("Monitoring cancelled")]
    Cancelled,
}

impl BwmonError {
    /// Creates a transport error.
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an unexpected value error.
    pub fn unexpected_value(
        oid: impl Into<String>,
        expected: &'static str,
        got: &'static str,
    ) -> Self {
        Self::UnexpectedValue {
            oid: oid.into(),
            expected,
            got,
        }
    }

    /// Returns true if the error only degrades the current tick.
    ///
    /// The sampling loop never retries; a transient error is reported for the
    /// tick it happened on and the next tick polls again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BwmonError::Transport { .. } | BwmonError::UnexpectedValue { .. }
        )
    }
}

/// Result type for bwmon operations
pub type Result<T> = std::result::Result<T, BwmonError>;

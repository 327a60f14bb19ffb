//! Error types for the delivery and offload paths.

use thiserror::Error;

/// Errors raised while preparing or running webhook deliveries.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The outbound HTTP client could not be constructed.
    #[error("failed to build delivery client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// A destination's stored header configuration is unusable.
    ///
    /// Raised per destination at dispatch time so one bad row only skips
    /// its own delivery.
    #[error("malformed destination headers: {message}")]
    MalformedHeaders {
        /// What made the stored configuration unusable.
        message: String,
    },
}

impl DispatchError {
    /// Creates a malformed-headers error.
    pub fn malformed_headers(message: impl Into<String>) -> Self {
        Self::MalformedHeaders { message: message.into() }
    }
}

/// Errors raised by the background offload path.
#[derive(Debug, Error)]
pub enum OffloadError {
    /// No processor is registered under the configured name.
    ///
    /// The only offload error a caller sees before the request completes;
    /// everything after dispatch settles through the handle.
    #[error("no event processor registered as '{name}'")]
    WorkerUnavailable {
        /// The processor name that failed to resolve.
        name: String,
    },

    /// The processor reported an explicit failure.
    #[error("worker reported failure: {0}")]
    WorkerError(String),

    /// The processor terminated without reporting an outcome.
    #[error("worker terminated abnormally: {0}")]
    WorkerAbnormalExit(String),
}

//! Error types for session setup and backend fetches

use thiserror::Error;

/// Errors reported synchronously while opening a capture session
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid capture configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to open capture backend: {0}")]
    Open(String),

    #[error("capture source `{kind}` requires the `{feature}` feature")]
    Unsupported {
        kind: &'static str,
        feature: &'static str,
    },

    #[error("failed to spawn producer thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
}

/// Outcome of a single failed backend fetch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// This fetch failed but the backend remains usable
    #[error("transient capture failure: {0}")]
    Transient(String),

    /// The backend can no longer deliver frames
    #[error("fatal capture failure: {0}")]
    Fatal(String),

    /// `interrupt` was called while (or before) the fetch was pending
    #[error("fetch interrupted")]
    Interrupted,
}

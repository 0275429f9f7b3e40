//! Error type shared by every measurement operation.

use thiserror::Error;

use crate::server::TestKind;

/// Errors produced while measuring a server.
#[derive(Debug, Error)]
pub enum SpeedtestError {
    /// The HTTP client failed to send a request or read a response.
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// A transfer got a non-success response.
    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus {
        /// Numeric status code.
        status: u16,
        /// Requested URL.
        url: String,
    },
    /// A server or endpoint URL could not be parsed.
    #[error("bad server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The engine configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A configuration file or output event could not be (de)serialized.
    #[error("serialize/deserialize error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// A warm-up request failed, so the main phase could not be sized.
    #[error("{test:?} warm-up failed: {source}")]
    WarmUpFailed {
        /// Direction being measured.
        test: TestKind,
        /// The failed request's error.
        source: Box<SpeedtestError>,
    },
    /// Every transfer admitted by the main phase failed.
    #[error("all {attempts} {test:?} transfers failed, first error: {source}")]
    AllTransfersFailed {
        /// Direction being measured.
        test: TestKind,
        /// Transfers admitted.
        attempts: usize,
        /// Error of the first failed transfer.
        source: Box<SpeedtestError>,
    },
    /// A spawned transfer task panicked or was aborted.
    #[error("transfer task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
    /// Reading a configuration file or writing output failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SpeedtestError {
    /// Whether the error means the server could not be reached at all, as
    /// opposed to a single transfer going wrong.
    pub fn is_transport_fatal(&self) -> bool {
        match self {
            SpeedtestError::Transport(e) => e.is_connect() || e.is_timeout(),
            SpeedtestError::WarmUpFailed { source, .. }
            | SpeedtestError::AllTransfersFailed { source, .. } => source.is_transport_fatal(),
            _ => false,
        }
    }
}

/// Result alias using [`SpeedtestError`].
pub type Result<T> = std::result::Result<T, SpeedtestError>;

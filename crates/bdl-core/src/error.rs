//! Error types at the scheduler seams.

use crate::model::ErrorKind;
use crate::resolver::ResolveError;
use crate::transport::TransportError;

/// Failure of one bundle run. Converted into `ERROR_NET` / `ERROR_STORAGE`
/// by the task; never returned to orchestrator callers.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("network: {0}")]
    Network(#[from] NetworkError),
    #[error("storage: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Network(_) => ErrorKind::Network,
            TaskError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Everything that ends a run as `ERROR_NET`.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("resolution produced no items")]
    EmptyBundle,
    #[error("GET {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("GET {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u32 },
    #[error("reading body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{url}: body ended after {received} of {expected} bytes")]
    PartialTransfer {
        url: String,
        received: u64,
        expected: u64,
    },
    #[error("{url}: body longer than the expected {expected} bytes")]
    Overrun { url: String, expected: u64 },
    #[error("{url}: empty body")]
    EmptyBody { url: String },
}

/// Failures of caller-facing orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("orchestrator is not initialized")]
    NotInitialized,
    #[error("orchestrator is already initialized; shut it down first")]
    AlreadyInitialized,
    #[error("storage: {0:#}")]
    Storage(#[source] anyhow::Error),
}

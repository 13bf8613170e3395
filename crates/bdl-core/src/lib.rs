//! Resumable, queued download engine for composite downloads ("bundles").
//!
//! A bundle is resolved into ordered items (playlist segments, page assets)
//! which are fetched with resumable ranged GETs over a bounded worker pool,
//! with progress checkpointed to SQLite. Entry point: [`scheduler::Orchestrator`].

pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod model;
pub mod resolver;
pub mod resume_db;
pub mod scheduler;
pub mod storage;
pub mod transport;
pub mod url_model;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{NetworkError, OrchestratorError, TaskError};
pub use model::{Bundle, ErrorKind, Item, SourceDescriptor, TaskStatus};
pub use scheduler::{BundleFeed, BundleListener, Collaborators, Orchestrator};

//! Bundle scheduler.
//!
//! The [`Orchestrator`] owns a registry of per-bundle tasks and a fixed pool
//! of workers. Each task resolves its bundle into items, transfers them with
//! resumable ranged GETs, checkpoints progress to the store, and reports
//! status transitions to an optional [`BundleListener`].

mod feed;
mod notify;
mod orchestrator;
mod pool;
mod registry;
mod task;


pub use feed::BundleFeed;
pub use notify::BundleListener;
pub use orchestrator::{Collaborators, Orchestrator};

//! CLI command handlers, one file per command.

mod add;
mod cancel;
mod pause;
mod run;
mod status;

pub use add::run_add;
#[cfg(test)]
pub(crate) use add::bundle_dir;
pub use cancel::run_cancel;
pub use pause::run_pause;
pub use run::run_engine;
pub use status::run_status;

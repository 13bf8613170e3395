//! `bdl add <key>` – persist a new bundle for the next `bdl run`.

use anyhow::{bail, Result};
use bdl_core::config::BdlConfig;
use bdl_core::resume_db::ResumeDb;
use bdl_core::{Bundle, SourceDescriptor};
use std::path::{Path, PathBuf};

pub async fn run_add(
    db: &ResumeDb,
    cfg: &BdlConfig,
    key: &str,
    playlist: Option<String>,
    page: Option<String>,
    dir: Option<PathBuf>,
) -> Result<()> {
    let source = SourceDescriptor { playlist, page };
    if source.is_empty() {
        bail!("bundle {key} needs --playlist or --page");
    }
    if db.bundle_by_key(key).await?.is_some() {
        bail!("bundle {key} already exists (cancel it first)");
    }
    let cwd = std::env::current_dir()?;
    let dir = bundle_dir(dir, cfg.download_dir.as_deref(), &cwd, key);
    let bundle = Bundle::new(key, source, &dir);
    let id = db.insert_bundle(&bundle).await?;
    tracing::info!(key, id, dir = %dir.display(), "bundle added");
    println!("Added bundle {key} -> {}", dir.display());
    Ok(())
}

/// Explicit `--dir` wins; otherwise `<download_dir or cwd>/<key>`.
pub(crate) fn bundle_dir(
    explicit: Option<PathBuf>,
    download_dir: Option<&Path>,
    cwd: &Path,
    key: &str,
) -> PathBuf {
    explicit.unwrap_or_else(|| download_dir.unwrap_or(cwd).join(key))
}

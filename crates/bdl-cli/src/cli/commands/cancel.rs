//! `bdl cancel <key>` – forget a bundle and delete its directory.

use anyhow::{bail, Result};
use bdl_core::resume_db::ResumeDb;
use bdl_core::storage::{Filesystem, LocalFilesystem};

use crate::cli::control_socket::{self, ControlCommand};

pub async fn run_cancel(db: &ResumeDb, key: &str) -> Result<()> {
    if control_socket::send_to_running(&ControlCommand::Cancel(key.to_string())).await? {
        println!("Asked running bdl to cancel {key}");
        return Ok(());
    }
    let Some(bundle) = db.bundle_by_key(key).await? else {
        bail!("no bundle {key}");
    };
    db.delete_bundle_by_key(key).await?;
    LocalFilesystem.remove_dir_all(&bundle.dir).await?;
    tracing::info!(key, dir = %bundle.dir.display(), "bundle cancelled offline");
    println!("Cancelled bundle {key}; removed {}", bundle.dir.display());
    Ok(())
}

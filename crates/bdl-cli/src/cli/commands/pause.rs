//! `bdl pause <key>` – pause a bundle. If `bdl run` is active, signals it to stop the download.
//! Without a running engine the row is marked paused; the next `bdl run` resumes it.

use anyhow::{bail, Result};
use bdl_core::resume_db::ResumeDb;
use bdl_core::TaskStatus;

use crate::cli::control_socket::{self, ControlCommand};

pub async fn run_pause(db: &ResumeDb, key: &str) -> Result<()> {
    if control_socket::send_to_running(&ControlCommand::Pause(key.to_string())).await? {
        println!("Asked running bdl to pause {key}");
        return Ok(());
    }
    let Some(mut bundle) = db.bundle_by_key(key).await? else {
        bail!("no bundle {key}");
    };
    if bundle.is_finished() {
        println!("Bundle {key} is already finished");
        return Ok(());
    }
    bundle.status = TaskStatus::Pause;
    db.update_bundle(&bundle).await?;
    println!("Paused bundle {key} (resumes on the next `bdl run`)");
    Ok(())
}

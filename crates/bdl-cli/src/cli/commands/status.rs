//! `bdl status` – show status of all bundles.

use anyhow::Result;
use bdl_core::resume_db::ResumeDb;

pub async fn run_status(db: &ResumeDb) -> Result<()> {
    let bundles = db.all_bundles().await?;
    if bundles.is_empty() {
        println!("No bundles in database.");
        return Ok(());
    }
    println!("{:<20} {:<14} {:<11} {:>5} {}", "KEY", "STATUS", "ITEMS", "DONE", "DIR");
    for b in bundles {
        let (items, done) = if b.initialized {
            (
                format!("{}/{}", b.completed_count, b.total_count),
                format!("{:.0}%", b.fraction() * 100.0),
            )
        } else {
            ("-".to_string(), "-".to_string())
        };
        println!(
            "{:<20} {:<14} {:<11} {:>5} {}",
            b.key,
            b.status.as_str(),
            items,
            done,
            b.dir.display()
        );
    }
    Ok(())
}

//! CLI for the BDL bundle download manager.

mod commands;
mod control_socket;

use anyhow::Result;
use bdl_core::config;
use bdl_core::resume_db::ResumeDb;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{run_add, run_cancel, run_engine, run_pause, run_status};

/// Top-level CLI for the BDL bundle download manager.
#[derive(Debug, Parser)]
#[command(name = "bdl")]
#[command(about = "BDL: resumable, queued bundle downloads (HLS playlists, page assets)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a bundle. It is downloaded by the next `bdl run`.
    Add {
        /// Unique bundle key.
        key: String,
        /// HLS/M3U8 playlist URL; every segment becomes an item.
        #[arg(long, value_name = "URL")]
        playlist: Option<String>,
        /// HTML page URL; referenced images, scripts, styles and media become items.
        #[arg(long, value_name = "URL")]
        page: Option<String>,
        /// Directory for the bundle's files (default: <download_dir or cwd>/<key>).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// Download every unfinished bundle, N at a time.
    Run {
        /// Worker count (overrides `concurrency` from the config file).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
    },

    /// Show status of all bundles.
    Status,

    /// Pause a bundle. Signals a running `bdl run` when one is active;
    /// otherwise the bundle stays paused only until the next `bdl run`.
    Pause {
        /// Bundle key.
        key: String,
    },

    /// Cancel a bundle: stop it, forget it and delete its directory.
    Cancel {
        /// Bundle key.
        key: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db = ResumeDb::open_default().await?;

        match cli.command {
            CliCommand::Add {
                key,
                playlist,
                page,
                dir,
            } => run_add(&db, &cfg, &key, playlist, page, dir).await?,
            CliCommand::Run { jobs } => run_engine(db, &cfg, jobs).await?,
            CliCommand::Status => run_status(&db).await?,
            CliCommand::Pause { key } => run_pause(&db, &key).await?,
            CliCommand::Cancel { key } => run_cancel(&db, &key).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;

//! `bdl run` – download every unfinished bundle until none is left.

use anyhow::Result;
use bdl_core::config::BdlConfig;
use bdl_core::resume_db::ResumeDb;
use bdl_core::transport::CurlTransport;
use bdl_core::{Bundle, BundleListener, Collaborators, ErrorKind, Orchestrator};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::control_socket;

const IDLE_POLL: Duration = Duration::from_millis(500);

/// Prints one line per transition.
struct ProgressPrinter;

impl ProgressPrinter {
    fn line(bundle: &Bundle, what: &str) {
        println!(
            "  {:<20} {:<12} {}/{} ({:.0}%)",
            bundle.key,
            what,
            bundle.completed_count,
            bundle.total_count,
            bundle.fraction() * 100.0
        );
    }
}

impl BundleListener for ProgressPrinter {
    fn on_connecting(&self, bundle: &Bundle) {
        Self::line(bundle, bundle.status.as_str());
    }
    fn on_queue(&self, bundle: &Bundle) {
        Self::line(bundle, "queued");
    }
    fn on_pause(&self, bundle: &Bundle) {
        Self::line(bundle, "paused");
    }
    fn on_cancel(&self, bundle: &Bundle) {
        Self::line(bundle, "cancelled");
    }
    fn on_error(&self, bundle: &Bundle, kind: ErrorKind) {
        Self::line(bundle, kind.status().as_str());
    }
    fn on_finish(&self, bundle: &Bundle) {
        Self::line(bundle, "finished");
    }
}

pub async fn run_engine(db: ResumeDb, cfg: &BdlConfig, jobs: Option<usize>) -> Result<()> {
    let mut cfg = cfg.clone();
    if let Some(jobs) = jobs {
        cfg.concurrency = jobs;
    }
    let db = Arc::new(db);
    let transport = Arc::new(CurlTransport::new(cfg.transport.clone()));
    let orch = Arc::new(Orchestrator::new());
    orch.initialize(&cfg, Collaborators::new(db.clone(), transport))
        .await?;

    let socket_path = bdl_core::control::default_control_socket_path().ok();
    let control = socket_path.as_ref().and_then(|path| {
        match control_socket::spawn_control_listener(Arc::clone(&orch), path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!("control socket unavailable: {:#}", e);
                None
            }
        }
    });

    orch.start_all().await?;
    let printer: Arc<dyn BundleListener> = Arc::new(ProgressPrinter);
    let mut started = 0usize;
    for bundle in orch.all_bundles().await? {
        if orch.is_registered(&bundle.key).await? {
            orch.bind_listener(&bundle.key, Some(Arc::clone(&printer)))
                .await?;
            started += 1;
        }
    }

    if started == 0 {
        println!("No unfinished bundles.");
    } else {
        println!("Downloading {started} bundle(s) with {} worker(s)", cfg.concurrency.max(1));
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!("Interrupted; pausing.");
                    break;
                }
                _ = tokio::time::sleep(IDLE_POLL) => {
                    if orch.is_idle().await? {
                        break;
                    }
                }
            }
        }
    }

    orch.shutdown().await?;
    if let Some(handle) = control {
        handle.abort();
    }
    if let Some(path) = socket_path {
        let _ = std::fs::remove_file(path);
    }

    let bundles = db.all_bundles().await?;
    let mut by_status: BTreeMap<&'static str, usize> = BTreeMap::new();
    for bundle in &bundles {
        *by_status.entry(bundle.status.as_str()).or_default() += 1;
    }
    if !by_status.is_empty() {
        let summary: Vec<String> = by_status
            .iter()
            .map(|(status, n)| format!("{n} {status}"))
            .collect();
        println!("Bundles: {}", summary.join(", "));
    }
    let failed = bundles
        .iter()
        .filter(|b| b.status.error_kind().is_some())
        .count();
    if failed > 0 {
        tracing::warn!(failed, "run ended with failed bundles");
    }
    Ok(())
}

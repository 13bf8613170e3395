//! Integration tests: real curl transport against a local range server, with
//! progress in an on-disk SQLite database.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bdl_core::config::BdlConfig;
use bdl_core::resume_db::ResumeDb;
use bdl_core::transport::CurlTransport;
use bdl_core::{Bundle, BundleListener, Collaborators, ErrorKind, Orchestrator, SourceDescriptor, TaskStatus};
use common::range_server::{RangeServer, Route};
use tempfile::{tempdir, TempDir};

const ITEM_LEN: usize = 64 * 1024;

fn body(seed: u8) -> Vec<u8> {
    (0..ITEM_LEN).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn playlist(segments: &[&str]) -> String {
    let mut text = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:4\n");
    for segment in segments {
        text.push_str("#EXTINF:4.0,\n");
        text.push_str(segment);
        text.push('\n');
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}

/// Serves `/v1.m3u8` with three segments; `stall` makes segment 1 hang once.
fn serve_video(server: &RangeServer, stall: Option<usize>) -> Vec<Vec<u8>> {
    server.serve("/v1.m3u8", playlist(&["seg0.ts", "seg1.ts", "seg2.ts"]));
    let bodies: Vec<Vec<u8>> = (0..3).map(body).collect();
    server.serve("/seg0.ts", bodies[0].clone());
    server.serve_route(
        "/seg1.ts",
        Route {
            stall_after: stall,
            ..Route::new(bodies[1].clone())
        },
    );
    server.serve("/seg2.ts", bodies[2].clone());
    bodies
}

struct Env {
    server: RangeServer,
    orch: Orchestrator,
    db: Arc<ResumeDb>,
    downloads: TempDir,
    state: TempDir,
}

impl Env {
    async fn new(concurrency: usize) -> Self {
        let state = tempdir().unwrap();
        let db = Arc::new(ResumeDb::open_at(&state.path().join("bundles.db")).await.unwrap());
        let orch = Orchestrator::new();
        init(&orch, &db, concurrency).await;
        Self {
            server: RangeServer::start(),
            orch,
            db,
            downloads: tempdir().unwrap(),
            state,
        }
    }

    fn bundle(&self, key: &str, playlist_path: &str) -> Bundle {
        Bundle::new(
            key,
            SourceDescriptor::playlist(self.server.url(playlist_path)),
            self.downloads.path().join(key),
        )
    }

    async fn status(&self, key: &str) -> Option<TaskStatus> {
        self.db.bundle_by_key(key).await.unwrap().map(|b| b.status)
    }

    async fn wait_status(&self, key: &str, status: TaskStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        loop {
            let current = self.status(key).await;
            if current == Some(status) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "{} stuck at {:?}",
                key,
                current
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn wait_idle(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        while !self.orch.is_idle().await.unwrap() {
            assert!(tokio::time::Instant::now() < deadline, "pool never went idle");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait until item `seq` of `key` has a non-zero checkpoint.
    async fn wait_item_progress(&self, key: &str, seq: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        loop {
            if let Some(id) = self.db.bundle_by_key(key).await.unwrap().and_then(|b| b.id) {
                let items = self.db.items_by_bundle_id(id).await.unwrap();
                if items.get(seq).map_or(false, |i| i.completed_size > 0) {
                    return;
                }
            }
            assert!(tokio::time::Instant::now() < deadline, "no progress on item {}", seq);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait for the server to hang, from a blocking thread.
    async fn wait_stalls(&self, n: usize) {
        let server = &self.server;
        tokio::task::block_in_place(|| server.wait_stalls(n));
    }
}

async fn init(orch: &Orchestrator, db: &Arc<ResumeDb>, concurrency: usize) {
    let cfg = BdlConfig {
        concurrency,
        ..BdlConfig::default()
    };
    let transport = Arc::new(CurlTransport::new(cfg.transport.clone()));
    orch.initialize(&cfg, Collaborators::new(db.clone(), transport))
        .await
        .unwrap();
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(TaskStatus, u32)>>,
}

impl Recorder {
    fn push(&self, bundle: &Bundle) {
        self.events
            .lock()
            .unwrap()
            .push((bundle.status, bundle.completed_count));
    }

    fn events(&self) -> Vec<(TaskStatus, u32)> {
        self.events.lock().unwrap().clone()
    }
}

impl BundleListener for Recorder {
    fn on_connecting(&self, bundle: &Bundle) {
        self.push(bundle);
    }
    fn on_pause(&self, bundle: &Bundle) {
        self.push(bundle);
    }
    fn on_error(&self, bundle: &Bundle, _kind: ErrorKind) {
        self.push(bundle);
    }
    fn on_finish(&self, bundle: &Bundle) {
        self.push(bundle);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn playlist_bundle_reports_every_transition_in_order() {
    let env = Env::new(1).await;
    let bodies = serve_video(&env.server, None);
    env.server.serve("/hold.m3u8", playlist(&["hold.ts"]));
    env.server.serve_route(
        "/hold.ts",
        Route {
            stall_after: Some(1000),
            ..Route::new(body(9))
        },
    );

    // Occupy the only worker so the listener is bound before "v1" runs.
    env.orch.submit(env.bundle("hold", "/hold.m3u8")).await.unwrap();
    env.wait_stalls(1).await;
    env.orch.submit(env.bundle("v1", "/v1.m3u8")).await.unwrap();
    assert_eq!(env.status("v1").await, Some(TaskStatus::Queue));
    let recorder = Arc::new(Recorder::default());
    env.orch.bind_listener("v1", Some(recorder.clone())).await.unwrap();

    env.orch.pause("hold").await.unwrap();
    env.wait_status("v1", TaskStatus::Finished).await;
    env.wait_idle().await;
    env.orch.shutdown().await.unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            (TaskStatus::Init, 0),
            (TaskStatus::Connecting, 1),
            (TaskStatus::Connecting, 2),
            (TaskStatus::Connecting, 3),
            (TaskStatus::Finished, 3),
        ]
    );
    let dir = env.downloads.path().join("v1");
    for (i, expected) in bodies.iter().enumerate() {
        let name = format!("{:05}_seg{}.ts", i, i);
        assert_eq!(&std::fs::read(dir.join(name)).unwrap(), expected);
    }
    env.server.release();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn paused_bundle_resumes_from_its_checkpoint() {
    let env = Env::new(1).await;
    let bodies = serve_video(&env.server, Some(20_000));

    env.orch.submit(env.bundle("v1", "/v1.m3u8")).await.unwrap();
    env.wait_stalls(1).await;
    env.wait_item_progress("v1", 1).await;
    env.orch.pause("v1").await.unwrap();
    env.wait_status("v1", TaskStatus::Pause).await;
    env.wait_idle().await;

    let stored = env.db.bundle_by_key("v1").await.unwrap().unwrap();
    assert!(stored.initialized);
    let items = env.db.items_by_bundle_id(stored.id.unwrap()).await.unwrap();
    assert_eq!(items.len(), 3);
    assert!(items[0].finished);
    assert!(!items[1].finished);
    let checkpoint = items[1].completed_size;
    assert!(checkpoint > 0 && checkpoint < ITEM_LEN as u64, "checkpoint {}", checkpoint);
    assert_eq!(items[2].completed_size, 0);

    env.orch.submit(env.bundle("v1", "/v1.m3u8")).await.unwrap();
    env.wait_status("v1", TaskStatus::Finished).await;

    assert_eq!(env.server.request_count("/v1.m3u8"), 1);
    let seg1: Vec<Option<u64>> = env
        .server
        .requests()
        .into_iter()
        .filter(|(path, _)| path == "/seg1.ts")
        .map(|(_, start)| start)
        .collect();
    assert_eq!(seg1, vec![Some(0), Some(checkpoint)]);

    let dir = env.downloads.path().join("v1");
    assert_eq!(std::fs::read(dir.join("00001_seg1.ts")).unwrap(), bodies[1]);
    assert_eq!(std::fs::read(dir.join("00002_seg2.ts")).unwrap(), bodies[2]);
    env.orch.shutdown().await.unwrap();
    env.server.release();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_rehydrates_paused_bundles_from_disk() {
    let env = Env::new(1).await;
    let bodies = serve_video(&env.server, Some(30_000));

    env.orch.submit(env.bundle("v1", "/v1.m3u8")).await.unwrap();
    env.wait_stalls(1).await;
    env.orch.shutdown().await.unwrap();
    assert_eq!(env.status("v1").await, Some(TaskStatus::Pause));

    let db = Arc::new(
        ResumeDb::open_at(&env.state.path().join("bundles.db"))
            .await
            .unwrap(),
    );
    let orch = Orchestrator::new();
    init(&orch, &db, 2).await;
    orch.start_all().await.unwrap();
    assert!(orch.is_registered("v1").await.unwrap());
    env.wait_status("v1", TaskStatus::Finished).await;

    assert_eq!(env.server.request_count("/v1.m3u8"), 1);
    let dir = env.downloads.path().join("v1");
    for (i, expected) in bodies.iter().enumerate() {
        let name = format!("{:05}_seg{}.ts", i, i);
        assert_eq!(&std::fs::read(dir.join(name)).unwrap(), expected);
    }
    orch.shutdown().await.unwrap();
    env.server.release();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_removes_registry_entry_row_and_directory() {
    let env = Env::new(2).await;
    serve_video(&env.server, Some(10_000));

    env.orch.submit(env.bundle("v1", "/v1.m3u8")).await.unwrap();
    env.wait_stalls(1).await;
    let dir = env.downloads.path().join("v1");
    assert!(dir.join("00000_seg0.ts").exists());

    env.orch.cancel("v1").await.unwrap();
    assert!(!env.orch.is_registered("v1").await.unwrap());
    assert!(env.db.bundle_by_key("v1").await.unwrap().is_none());
    assert!(!dir.exists());
    env.orch.shutdown().await.unwrap();
    env.server.release();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_resolution_fails_and_stays_resubmittable() {
    let env = Env::new(1).await;
    env.server.serve("/v1.m3u8", "#EXTM3U\n#EXT-X-ENDLIST\n");

    env.orch.submit(env.bundle("v1", "/v1.m3u8")).await.unwrap();
    env.wait_status("v1", TaskStatus::ErrorNet).await;
    let stored = env.db.bundle_by_key("v1").await.unwrap().unwrap();
    assert!(!stored.initialized);
    assert!(!env.db.items_exist_for_bundle(stored.id.unwrap()).await.unwrap());

    let bodies = serve_video(&env.server, None);
    env.wait_idle().await;
    env.orch.submit(env.bundle("v1", "/v1.m3u8")).await.unwrap();
    env.wait_status("v1", TaskStatus::Finished).await;
    assert_eq!(env.server.request_count("/v1.m3u8"), 2);
    let dir = env.downloads.path().join("v1");
    assert_eq!(std::fs::read(dir.join("00002_seg2.ts")).unwrap(), bodies[2]);
    env.orch.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_item_ends_in_network_error() {
    let env = Env::new(1).await;
    env.server.serve("/v1.m3u8", playlist(&["seg0.ts", "gone.ts"]));
    env.server.serve("/seg0.ts", body(0));

    env.orch.submit(env.bundle("v1", "/v1.m3u8")).await.unwrap();
    env.wait_status("v1", TaskStatus::ErrorNet).await;
    let stored = env.orch.bundle("v1").await.unwrap().unwrap();
    assert_eq!((stored.completed_count, stored.total_count), (1, 2));
    env.orch.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn page_assets_are_downloaded_after_playlist_items() {
    let env = Env::new(1).await;
    let bodies = serve_video(&env.server, None);
    env.server.serve(
        "/index.html",
        r#"<html><head><link rel="stylesheet" href="/style.css"></head>
<body><img src="logo.png"><script src="/app.js"></script><img src="logo.png"></body></html>"#,
    );
    env.server.serve("/style.css", "body{}");
    env.server.serve("/logo.png", body(7));
    env.server.serve("/app.js", "console.log(1)");

    let bundle = Bundle::new(
        "mixed",
        SourceDescriptor {
            playlist: Some(env.server.url("/v1.m3u8")),
            page: Some(env.server.url("/index.html")),
        },
        env.downloads.path().join("mixed"),
    );
    env.orch.submit(bundle).await.unwrap();
    env.wait_status("mixed", TaskStatus::Finished).await;

    let dir = env.downloads.path().join("mixed");
    assert_eq!(std::fs::read(dir.join("00000_seg0.ts")).unwrap(), bodies[0]);
    assert_eq!(std::fs::read(dir.join("00003_style.css")).unwrap(), b"body{}");
    assert_eq!(std::fs::read(dir.join("00004_logo.png")).unwrap(), body(7));
    assert_eq!(std::fs::read(dir.join("00005_app.js")).unwrap(), b"console.log(1)");
    let stored = env.orch.bundle("mixed").await.unwrap().unwrap();
    assert_eq!(stored.total_count, 6);
    env.orch.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_without_range_support_restarts_resumed_item() {
    let env = Env::new(1).await;
    env.server.serve("/v1.m3u8", playlist(&["seg0.ts"]));
    let expected = body(4);
    env.server.serve_route(
        "/seg0.ts",
        Route {
            support_ranges: false,
            stall_after: Some(25_000),
            ..Route::new(expected.clone())
        },
    );

    env.orch.submit(env.bundle("v1", "/v1.m3u8")).await.unwrap();
    env.wait_stalls(1).await;
    env.orch.pause("v1").await.unwrap();
    env.wait_idle().await;

    env.orch.submit(env.bundle("v1", "/v1.m3u8")).await.unwrap();
    env.wait_status("v1", TaskStatus::Finished).await;
    assert_eq!(
        std::fs::read(env.downloads.path().join("v1").join("00000_seg0.ts")).unwrap(),
        expected
    );
    env.orch.shutdown().await.unwrap();
    env.server.release();
}

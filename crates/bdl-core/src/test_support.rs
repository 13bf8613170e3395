//! In-process fakes for unit tests: a scripted transport, a fixed resolver
//! and a listener that records what it was told.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify};

use crate::control::AbortSignal;
use crate::model::{Bundle, ErrorKind, SourceDescriptor};
use crate::resolver::{ResolveError, ResolvedItem, Resolver};
use crate::scheduler::BundleListener;
use crate::transport::{ChannelBody, Transport, TransportError, TransportResponse};
use crate::url_model::item_file_name;

const FAKE_CHUNK: usize = 64;

/// How one URL answers.
#[derive(Debug, Clone)]
pub(crate) struct Route {
    pub body: Vec<u8>,
    /// Answer with this status and an empty body.
    pub status: Option<u32>,
    /// 206 + Content-Range when true, full 200 otherwise.
    pub honor_range: bool,
    /// Send Content-Length / Content-Range.
    pub advertise_length: bool,
    /// Body ends at this absolute offset.
    pub cut_at: Option<u64>,
    /// One-shot: deliver up to this absolute offset, then hang until aborted.
    pub stall_at: Option<u64>,
    /// Fail before a response head.
    pub fail: bool,
}

impl Route {
    pub fn new(body: impl AsRef<[u8]>) -> Self {
        Self {
            body: body.as_ref().to_vec(),
            status: None,
            honor_range: true,
            advertise_length: true,
            cut_at: None,
            stall_at: None,
            fail: false,
        }
    }
}

/// Deterministic body of `len` bytes.
pub(crate) fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<(String, String)>>,
    stalled: Arc<Notify>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(self, url: &str, body: impl AsRef<[u8]>) -> Self {
        self.with_route(url, Route::new(body))
    }

    pub fn with_route(self, url: &str, route: Route) -> Self {
        self.set_route(url, route);
        self
    }

    pub fn set_route(&self, url: &str, route: Route) {
        self.routes.lock().unwrap().insert(url.to_string(), route);
    }

    /// `(url, range)` of every request so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|(u, _)| u == url).count()
    }

    /// Wait until a stalled body has delivered everything before its stall point.
    pub async fn wait_stalled(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.stalled.notified())
            .await
            .expect("transfer never reached its stall point");
    }
}

fn range_offset(range: &str) -> u64 {
    range
        .strip_prefix("bytes=")
        .and_then(|r| r.strip_suffix('-'))
        .and_then(|r| r.parse().ok())
        .unwrap_or(0)
}

fn empty_response(status: u32) -> TransportResponse {
    TransportResponse {
        status,
        content_length: Some(0),
        content_range_total: None,
        body: Box::new(tokio::io::empty()),
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn ranged_get(
        &self,
        url: &str,
        range: &str,
        abort: AbortSignal,
    ) -> Result<TransportResponse, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), range.to_string()));
        let (route, stall_at) = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(url) {
                None => return Ok(empty_response(404)),
                Some(route) => {
                    let stall_at = route.stall_at.take();
                    (route.clone(), stall_at)
                }
            }
        };
        if route.fail {
            return Err(TransportError::Join("connection refused".into()));
        }
        if let Some(status) = route.status {
            return Ok(empty_response(status));
        }

        let len = route.body.len() as u64;
        let offset = range_offset(range);
        let (status, start, content_length, total) = if route.honor_range {
            if offset > len {
                return Ok(empty_response(416));
            }
            (206, offset, len - offset, Some(len))
        } else {
            (200, 0, len, None)
        };
        let end = route.cut_at.map_or(len, |c| c.min(len));
        let payload = route.body[start.min(end) as usize..end as usize].to_vec();
        let stall = stall_at
            .filter(|s| *s > start && *s < end)
            .map(|s| (s - start) as usize);

        let (tx, rx) = mpsc::channel(4);
        let stalled = Arc::clone(&self.stalled);
        tokio::spawn(async move {
            let stop = stall.unwrap_or(payload.len());
            for chunk in payload[..stop].chunks(FAKE_CHUNK) {
                if tx.send(Ok(chunk.to_vec())).await.is_err() {
                    return;
                }
            }
            if stall.is_some() {
                stalled.notify_one();
                abort.aborted().await;
            }
        });

        Ok(TransportResponse {
            status,
            content_length: route.advertise_length.then_some(content_length),
            content_range_total: if route.advertise_length { total } else { None },
            body: Box::new(ChannelBody::new(rx)),
        })
    }
}

/// Resolver returning a fixed URL list, or a fixed error.
pub(crate) struct StaticResolver {
    urls: Result<Vec<String>, String>,
    calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new(urls: &[&str]) -> Self {
        Self {
            urls: Ok(urls.iter().map(|u| u.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            urls: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(
        &self,
        _source: &SourceDescriptor,
        dir: &Path,
        _abort: &AbortSignal,
    ) -> Result<Vec<ResolvedItem>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let urls = self.urls.clone().map_err(ResolveError::Format)?;
        Ok(urls
            .iter()
            .enumerate()
            .map(|(seq, url)| ResolvedItem {
                url: url.clone(),
                file_name: item_file_name(seq as u32, url),
                file_path: dir.to_path_buf(),
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Connecting,
    Queue,
    Pause,
    Cancel,
    Error(ErrorKind),
    Finish,
}

/// Records `(event, completed_count)` for every callback.
pub(crate) struct RecordingListener {
    log: watch::Sender<Vec<(Event, u32)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        let (log, _) = watch::channel(Vec::new());
        Arc::new(Self { log })
    }

    fn record(&self, event: Event, bundle: &Bundle) {
        self.log
            .send_modify(|log| log.push((event, bundle.completed_count)));
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().iter().map(|(e, _)| *e).collect()
    }

    /// `completed_count` reported with each event.
    pub fn counts(&self) -> Vec<u32> {
        self.log.borrow().iter().map(|(_, c)| *c).collect()
    }

    /// Wait (up to 5s) until `event` has been recorded.
    pub async fn wait_for(&self, event: Event) {
        let mut rx = self.log.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|log| log.iter().any(|(e, _)| *e == event)),
        )
        .await
        .unwrap_or_else(|_| panic!("{:?} not delivered; got {:?}", event, self.events()))
        .expect("listener dropped");
    }
}

impl BundleListener for RecordingListener {
    fn on_connecting(&self, bundle: &Bundle) {
        self.record(Event::Connecting, bundle);
    }
    fn on_queue(&self, bundle: &Bundle) {
        self.record(Event::Queue, bundle);
    }
    fn on_pause(&self, bundle: &Bundle) {
        self.record(Event::Pause, bundle);
    }
    fn on_cancel(&self, bundle: &Bundle) {
        self.record(Event::Cancel, bundle);
    }
    fn on_error(&self, bundle: &Bundle, kind: ErrorKind) {
        self.record(Event::Error(kind), bundle);
    }
    fn on_finish(&self, bundle: &Bundle) {
        self.record(Event::Finish, bundle);
    }
}

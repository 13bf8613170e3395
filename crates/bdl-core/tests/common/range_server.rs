//! Minimal threaded HTTP/1.1 server for integration tests.
//!
//! Serves static bodies by path. GET honors `Range: bytes=X-` with 206 Partial
//! Content unless the route disables ranges. A route can stall once after a
//! number of body bytes, holding the connection open until released.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Route {
    pub body: Vec<u8>,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Stop after this many body bytes on the next request only.
    pub stall_after: Option<usize>,
}

impl Route {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            support_ranges: true,
            stall_after: None,
        }
    }
}

#[derive(Default)]
struct State {
    routes: Mutex<HashMap<String, Route>>,
    /// (path, range start) of every GET.
    requests: Mutex<Vec<(String, Option<u64>)>>,
    stalls: AtomicUsize,
    released: AtomicBool,
}

pub struct RangeServer {
    base: String,
    state: Arc<State>,
}

impl RangeServer {
    /// Bind to an ephemeral port and serve until the process exits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(State::default());
        let accept_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&accept_state);
                thread::spawn(move || handle(stream, &state));
            }
        });
        Self {
            base: format!("http://127.0.0.1:{}", port),
            state,
        }
    }

    /// Absolute URL of `path` (which starts with '/').
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn serve(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.serve_route(path, Route::new(body));
    }

    pub fn serve_route(&self, path: &str, route: Route) {
        self.state
            .routes
            .lock()
            .unwrap()
            .insert(path.to_string(), route);
    }

    pub fn requests(&self) -> Vec<(String, Option<u64>)> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests().iter().filter(|(p, _)| p == path).count()
    }

    /// Block until `n` stalls have been reached.
    pub fn wait_stalls(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.state.stalls.load(Ordering::Acquire) < n {
            assert!(Instant::now() < deadline, "server never reached its stall point");
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Let stalled connections close.
    pub fn release(&self) {
        self.state.released.store(true, Ordering::Release);
    }
}

fn handle(mut stream: TcpStream, state: &State) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, path, range_start) = parse_request(request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }
    state
        .requests
        .lock()
        .unwrap()
        .push((path.to_string(), range_start));

    let route = {
        let mut routes = state.routes.lock().unwrap();
        match routes.get_mut(path) {
            Some(route) => {
                let snapshot = route.clone();
                route.stall_after = None;
                snapshot
            }
            None => {
                let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
                return;
            }
        }
    };

    let body = &route.body[..];
    let total = body.len() as u64;
    let (status, content_range, slice) = match range_start.filter(|_| route.support_ranges) {
        Some(start) if start >= total => {
            let response = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\n\r\n",
                total
            );
            let _ = stream.write_all(response.as_bytes());
            return;
        }
        Some(start) => (
            "206 Partial Content",
            format!(
                "Content-Range: bytes {}-{}/{}\r\n",
                start,
                total - 1,
                total
            ),
            &body[start as usize..],
        ),
        None => ("200 OK", String::new(), body),
    };
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
        status,
        slice.len(),
        content_range
    );
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }

    match route.stall_after {
        Some(cut) if cut < slice.len() => {
            let _ = stream.write_all(&slice[..cut]);
            let _ = stream.flush();
            state.stalls.fetch_add(1, Ordering::AcqRel);
            let deadline = Instant::now() + Duration::from_secs(10);
            while !state.released.load(Ordering::Acquire) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(20));
            }
        }
        _ => {
            let _ = stream.write_all(slice);
        }
    }
}

/// Returns (method, path, start of `Range: bytes=X-`).
fn parse_request(request: &str) -> (&str, &str, Option<u64>) {
    let mut lines = request.lines();
    let mut parts = lines.next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");
    let mut range = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                range = value
                    .trim()
                    .strip_prefix("bytes=")
                    .and_then(|v| v.split('-').next())
                    .and_then(|start| start.trim().parse::<u64>().ok());
            }
        }
    }
    (method, path, range)
}

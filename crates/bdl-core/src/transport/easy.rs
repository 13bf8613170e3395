//! libcurl transport. Each request runs on a blocking thread; the head is
//! handed back over a oneshot and the body streamed over a bounded channel.

use std::cell::RefCell;
use std::io;
use std::str;
use std::time::Duration;

use async_trait::async_trait;
use curl::easy::{Easy, List};
use tokio::sync::{mpsc, oneshot};

use super::body::ChannelBody;
use super::parse::{self, ResponseHead};
use super::{Transport, TransportError, TransportResponse};
use crate::config::TransportConfig;
use crate::control::AbortSignal;

/// Chunks buffered between the curl thread and the reader.
const BODY_CHANNEL_DEPTH: usize = 32;

type HeadSender = oneshot::Sender<Result<ResponseHead, TransportError>>;
type BodySender = mpsc::Sender<io::Result<Vec<u8>>>;

#[derive(Debug, Clone, Default)]
pub struct CurlTransport {
    cfg: TransportConfig,
}

impl CurlTransport {
    pub fn new(cfg: TransportConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Transport for CurlTransport {
    async fn ranged_get(
        &self,
        url: &str,
        range: &str,
        abort: AbortSignal,
    ) -> Result<TransportResponse, TransportError> {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_DEPTH);

        let handle = tokio::task::spawn_blocking({
            let url = url.to_string();
            let range = range.to_string();
            let cfg = self.cfg.clone();
            let abort = abort.clone();
            move || perform_ranged_get(&url, &range, &cfg, &abort, head_tx, body_tx)
        });

        tokio::select! {
            biased;
            _ = abort.aborted() => Err(TransportError::Aborted),
            head = head_rx => match head {
                Ok(Ok(head)) => Ok(TransportResponse {
                    status: head.status,
                    content_length: head.content_length,
                    content_range_total: head.content_range_total,
                    body: Box::new(ChannelBody::new(body_rx)),
                }),
                Ok(Err(e)) => Err(e),
                Err(_) => match handle.await {
                    Err(e) => Err(TransportError::Join(e.to_string())),
                    Ok(()) => Err(TransportError::Join("no response head".to_string())),
                },
            },
        }
    }
}

/// Blocking side of a request. Exactly one of: the head goes out on
/// `head_tx`, or the error does (before the head) / lands in the body stream (after).
fn perform_ranged_get(
    url: &str,
    range: &str,
    cfg: &TransportConfig,
    abort: &AbortSignal,
    head_tx: HeadSender,
    body_tx: BodySender,
) {
    let head_tx = RefCell::new(Some(head_tx));
    let result = run_easy(url, range, cfg, abort, &head_tx, &body_tx);
    let pending_head = head_tx.borrow_mut().take();
    match (result, pending_head) {
        (Ok(head), Some(tx)) => {
            let _ = tx.send(Ok(head));
        }
        (Ok(_), None) => {}
        (Err(e), Some(tx)) => {
            let _ = tx.send(Err(e));
        }
        (Err(e), None) => {
            tracing::debug!("transfer of {} ended with error: {}", url, e);
            let _ = body_tx.blocking_send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())));
        }
    }
}

fn run_easy(
    url: &str,
    range: &str,
    cfg: &TransportConfig,
    abort: &AbortSignal,
    head_tx: &RefCell<Option<HeadSender>>,
    body_tx: &BodySender,
) -> Result<ResponseHead, TransportError> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(cfg.max_redirections)?;
    easy.connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))?;
    easy.low_speed_limit(cfg.low_speed_limit_bytes)?;
    easy.low_speed_time(Duration::from_secs(cfg.low_speed_time_secs))?;
    easy.progress(true)?;

    let mut list = List::new();
    list.append(&format!("Range: {}", range))?;
    easy.http_headers(list)?;

    let mut block: Vec<String> = Vec::new();
    let performed = {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            let line = match str::from_utf8(data) {
                Ok(s) => s.trim_end().to_string(),
                Err(_) => return true,
            };
            if line.starts_with("HTTP/") {
                block.clear();
            }
            if !line.is_empty() {
                block.push(line);
                return true;
            }
            // Blank line ends a header block; only the final response's head is published.
            if let Some(head) = parse::parse_head(&block) {
                if head.is_final() {
                    if let Some(tx) = head_tx.borrow_mut().take() {
                        let _ = tx.send(Ok(head));
                    }
                }
            }
            true
        })?;
        transfer.write_function(|data| {
            if abort.is_aborted() {
                return Ok(0);
            }
            match body_tx.blocking_send(Ok(data.to_vec())) {
                Ok(()) => Ok(data.len()),
                // Reader dropped the body.
                Err(_) => Ok(0),
            }
        })?;
        transfer.progress_function(|_, _, _, _| !abort.is_aborted())?;
        transfer.perform()
    };

    if abort.is_aborted() {
        return Err(TransportError::Aborted);
    }
    performed?;

    let status = easy.response_code()?;
    let content_length = easy
        .content_length_download()
        .ok()
        .filter(|len| *len >= 0.0)
        .map(|len| len as u64);
    Ok(ResponseHead {
        status,
        content_length,
        content_range_total: None,
    })
}

//! Ranged GET transport.
//!
//! The scheduler only depends on the [`Transport`] trait: issue a GET with a
//! `Range` header, get back the status, the advertised length and an async
//! byte stream. [`CurlTransport`] is the libcurl implementation.

mod body;
mod easy;
mod parse;

pub use easy::CurlTransport;
#[cfg(test)]
pub(crate) use body::ChannelBody;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::control::AbortSignal;

/// Response body stream. Reads return 0 at end of body.
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// Errors raised before a response head is available.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request aborted")]
    Aborted,
    #[error("curl: {0}")]
    Curl(#[from] curl::Error),
    #[error("transfer thread ended without a response: {0}")]
    Join(String),
}

/// Status line, length headers and body of a ranged GET.
pub struct TransportResponse {
    pub status: u32,
    /// `Content-Length` of this response (the remaining bytes for a 206).
    pub content_length: Option<u64>,
    /// Total resource size from `Content-Range: bytes a-b/TOTAL`.
    pub content_range_total: Option<u64>,
    pub body: BodyReader,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True when the server answered a range request with a partial body.
    pub fn is_partial(&self) -> bool {
        self.status == 206
    }

    /// Size of the whole resource, given the offset the request started at.
    pub fn resource_size(&self, offset: u64) -> Option<u64> {
        self.content_range_total.or_else(|| {
            self.content_length.map(|len| {
                if self.is_partial() {
                    len + offset
                } else {
                    len
                }
            })
        })
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range_total", &self.content_range_total)
            .finish_non_exhaustive()
    }
}

/// Capability to issue a cancellable ranged GET.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` with `Range: <range>` (e.g. `bytes=1024-`). Tripping `abort`
    /// stops the transfer; a pending call returns [`TransportError::Aborted`].
    async fn ranged_get(
        &self,
        url: &str,
        range: &str,
        abort: AbortSignal,
    ) -> Result<TransportResponse, TransportError>;
}

/// Range header value asking for everything from `offset` on.
pub fn range_from(offset: u64) -> String {
    format!("bytes={}-", offset)
}

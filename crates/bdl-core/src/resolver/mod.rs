//! Resolver interface for turning a bundle's source descriptor into items.
//!
//! The scheduler only depends on the [`Resolver`] trait. [`SourceResolver`]
//! handles both descriptor kinds: playlist items first, page assets after.

mod page;
mod playlist;

pub use page::{parse_page_assets, PageResolver};
pub use playlist::{parse_playlist, Playlist, PlaylistResolver};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use url::Url;

use crate::control::AbortSignal;
use crate::model::SourceDescriptor;
use crate::transport::{range_from, Transport, TransportError};
use crate::url_model::item_file_name;

/// Playlists and pages larger than this are rejected.
const MAX_DOCUMENT_BYTES: u64 = 8 * 1024 * 1024;

/// One downloadable file produced by resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedItem {
    pub url: String,
    pub file_name: String,
    /// Directory the file is saved in.
    pub file_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("source descriptor has neither a playlist nor a page URL")]
    NoSource,
    #[error("invalid URL {0:?}")]
    InvalidUrl(String),
    #[error("fetch {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("GET {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u32 },
    #[error("read {url}: {source}")]
    Read {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("fetch {url}: aborted")]
    Aborted { url: String },
    #[error("{url} exceeds the document size limit")]
    TooLarge { url: String },
    #[error("{0}")]
    Format(String),
}

/// Turns a source descriptor into the ordered item list of a bundle.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Document fetches stop with [`ResolveError::Aborted`] once `abort` fires.
    async fn resolve(
        &self,
        source: &SourceDescriptor,
        dir: &Path,
        abort: &AbortSignal,
    ) -> Result<Vec<ResolvedItem>, ResolveError>;
}

/// Resolves whichever descriptors are set; playlist items come first.
pub struct SourceResolver {
    playlist: PlaylistResolver,
    page: PageResolver,
}

impl SourceResolver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            playlist: PlaylistResolver::new(Arc::clone(&transport)),
            page: PageResolver::new(transport),
        }
    }
}

#[async_trait]
impl Resolver for SourceResolver {
    async fn resolve(
        &self,
        source: &SourceDescriptor,
        dir: &Path,
        abort: &AbortSignal,
    ) -> Result<Vec<ResolvedItem>, ResolveError> {
        if source.is_empty() {
            return Err(ResolveError::NoSource);
        }
        let mut urls = Vec::new();
        if let Some(playlist) = non_empty(&source.playlist) {
            urls.extend(self.playlist.segment_urls(playlist, abort).await?);
        }
        if let Some(page) = non_empty(&source.page) {
            urls.extend(self.page.asset_urls(page, abort).await?);
        }
        Ok(into_items(urls, dir))
    }
}

fn non_empty(url: &Option<String>) -> Option<&str> {
    url.as_deref().filter(|u| !u.is_empty())
}

/// Number resolved URLs in order and name their files.
pub(crate) fn into_items(urls: Vec<Url>, dir: &Path) -> Vec<ResolvedItem> {
    urls.into_iter()
        .enumerate()
        .map(|(seq, url)| ResolvedItem {
            file_name: item_file_name(seq as u32, url.as_str()),
            url: url.into(),
            file_path: dir.to_path_buf(),
        })
        .collect()
}

pub(crate) fn parse_url(raw: &str) -> Result<Url, ResolveError> {
    Url::parse(raw).map_err(|_| ResolveError::InvalidUrl(raw.to_string()))
}

/// `reference` resolved against `base`; only http(s) targets are kept.
pub(crate) fn join_http(base: &Url, reference: &str) -> Option<Url> {
    let joined = base.join(reference).ok()?;
    matches!(joined.scheme(), "http" | "https").then_some(joined)
}

/// Drop repeated URLs, keeping first occurrences in order.
pub(crate) fn dedupe(urls: Vec<Url>) -> Vec<Url> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|u| seen.insert(u.as_str().to_string()))
        .collect()
}

/// GET a text document (playlist or page) in full.
pub(crate) async fn fetch_document(
    transport: &dyn Transport,
    url: &Url,
    abort: &AbortSignal,
) -> Result<String, ResolveError> {
    let aborted = || ResolveError::Aborted {
        url: url.to_string(),
    };
    if abort.is_aborted() {
        return Err(aborted());
    }
    let response = transport
        .ranged_get(url.as_str(), &range_from(0), abort.clone())
        .await
        .map_err(|source| ResolveError::Transport {
            url: url.to_string(),
            source,
        })?;
    if !response.is_success() {
        return Err(ResolveError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }
    let mut body = Vec::new();
    let mut reader = response.body.take(MAX_DOCUMENT_BYTES + 1);
    tokio::select! {
        biased;
        _ = abort.aborted() => return Err(aborted()),
        read = reader.read_to_end(&mut body) => {
            read.map_err(|source| ResolveError::Read {
                url: url.to_string(),
                source,
            })?;
        }
    }
    if body.len() as u64 > MAX_DOCUMENT_BYTES {
        return Err(ResolveError::TooLarge {
            url: url.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;

    const PLAYLIST: &str = "#EXTM3U\n#EXTINF:4,\nseg0.ts\n#EXTINF:4,\nseg1.ts\n";
    const PAGE: &str = r#"<html><img src="/img/a.png"><script src="app.js"></script></html>"#;

    #[tokio::test]
    async fn playlist_items_come_before_page_assets() {
        let transport = FakeTransport::new()
            .with_body("https://v.example.com/hls/index.m3u8", PLAYLIST)
            .with_body("https://v.example.com/watch", PAGE);
        let resolver = SourceResolver::new(Arc::new(transport));
        let source = SourceDescriptor {
            playlist: Some("https://v.example.com/hls/index.m3u8".into()),
            page: Some("https://v.example.com/watch".into()),
        };
        let items = resolver
            .resolve(&source, Path::new("/data/b1"), &AbortSignal::new())
            .await
            .unwrap();
        let urls: Vec<&str> = items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://v.example.com/hls/seg0.ts",
                "https://v.example.com/hls/seg1.ts",
                "https://v.example.com/img/a.png",
                "https://v.example.com/app.js",
            ]
        );
        assert_eq!(items[0].file_name, "00000_seg0.ts");
        assert_eq!(items[3].file_name, "00003_app.js");
        assert!(items.iter().all(|i| i.file_path == Path::new("/data/b1")));
    }

    #[tokio::test]
    async fn empty_descriptor_is_an_error() {
        let resolver = SourceResolver::new(Arc::new(FakeTransport::new()));
        let err = resolver
            .resolve(&SourceDescriptor::default(), Path::new("/tmp"), &AbortSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoSource));
    }

    #[tokio::test]
    async fn http_error_status_fails_resolution() {
        let transport = FakeTransport::new();
        let resolver = SourceResolver::new(Arc::new(transport));
        let err = resolver
            .resolve(
                &SourceDescriptor::playlist("https://v.example.com/missing.m3u8"),
                Path::new("/tmp"),
                &AbortSignal::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn tripped_signal_stops_document_fetch() {
        let transport = Arc::new(
            FakeTransport::new().with_body("https://v.example.com/hls/index.m3u8", PLAYLIST),
        );
        let resolver = SourceResolver::new(transport.clone());
        let signal = AbortSignal::new();
        signal.abort();
        let err = resolver
            .resolve(
                &SourceDescriptor::playlist("https://v.example.com/hls/index.m3u8"),
                Path::new("/tmp"),
                &signal,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Aborted { .. }));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn join_keeps_only_http_targets() {
        let base = Url::parse("https://example.com/a/b.html").unwrap();
        assert_eq!(
            join_http(&base, "c.png").unwrap().as_str(),
            "https://example.com/a/c.png"
        );
        assert_eq!(
            join_http(&base, "//cdn.example.com/x.js").unwrap().as_str(),
            "https://cdn.example.com/x.js"
        );
        assert!(join_http(&base, "data:image/png;base64,AAAA").is_none());
        assert!(join_http(&base, "mailto:a@example.com").is_none());
    }
}

//! HLS (M3U8) playlist resolution.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use super::{fetch_document, into_items, join_http, parse_url, ResolveError, ResolvedItem, Resolver};
use crate::control::AbortSignal;
use crate::model::SourceDescriptor;
use crate::transport::Transport;

/// Master playlists nested deeper than this are rejected.
const MAX_VARIANT_DEPTH: usize = 4;

/// Entries of a parsed playlist, in file order, unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playlist {
    /// Media playlist: segment URIs.
    Media(Vec<String>),
    /// Master playlist: variant stream URIs (`#EXT-X-STREAM-INF`).
    Master(Vec<String>),
}

/// Every non-blank line not starting with `#` is a URI. A playlist whose URIs
/// all follow `#EXT-X-STREAM-INF` tags is a master playlist.
pub fn parse_playlist(text: &str) -> Playlist {
    let mut segments = Vec::new();
    let mut variants = Vec::new();
    let mut variant_next = false;
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            if line.starts_with("#EXT-X-STREAM-INF") {
                variant_next = true;
            }
            continue;
        }
        if variant_next {
            variants.push(line.to_string());
        } else {
            segments.push(line.to_string());
        }
        variant_next = false;
    }
    if segments.is_empty() && !variants.is_empty() {
        Playlist::Master(variants)
    } else {
        Playlist::Media(segments)
    }
}

pub struct PlaylistResolver {
    transport: Arc<dyn Transport>,
}

impl PlaylistResolver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Absolute segment URLs of the playlist at `url`. A master playlist is
    /// followed to its first variant.
    pub async fn segment_urls(&self, url: &str, abort: &AbortSignal) -> Result<Vec<Url>, ResolveError> {
        let mut current = parse_url(url)?;
        for _ in 0..MAX_VARIANT_DEPTH {
            let text = fetch_document(self.transport.as_ref(), &current, abort).await?;
            match parse_playlist(&text) {
                Playlist::Media(segments) => {
                    let urls: Vec<Url> = segments
                        .iter()
                        .filter_map(|s| join_http(&current, s))
                        .collect();
                    tracing::debug!(playlist = %current, segments = urls.len(), "playlist resolved");
                    return Ok(urls);
                }
                Playlist::Master(variants) => {
                    let first = variants
                        .iter()
                        .find_map(|v| join_http(&current, v))
                        .ok_or_else(|| {
                            ResolveError::Format(format!("{}: no usable variant stream", current))
                        })?;
                    tracing::debug!(master = %current, variant = %first, "following first variant");
                    current = first;
                }
            }
        }
        Err(ResolveError::Format(format!(
            "{}: master playlists nested too deep",
            url
        )))
    }
}

#[async_trait]
impl Resolver for PlaylistResolver {
    async fn resolve(
        &self,
        source: &SourceDescriptor,
        dir: &Path,
        abort: &AbortSignal,
    ) -> Result<Vec<ResolvedItem>, ResolveError> {
        let url = source.playlist.as_deref().ok_or(ResolveError::NoSource)?;
        Ok(into_items(self.segment_urls(url, abort).await?, dir))
    }
}

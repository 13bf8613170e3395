//! HTML page asset resolution.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use super::{dedupe, fetch_document, into_items, join_http, parse_url, ResolveError, ResolvedItem, Resolver};
use crate::control::AbortSignal;
use crate::model::SourceDescriptor;
use crate::transport::Transport;

/// Asset references in document order: `src` of `img`, `script`, `source`,
/// `video` and `audio` tags, `href` of `<link rel="stylesheet">`.
/// References are returned raw (unresolved, duplicates kept).
pub fn parse_page_assets(html: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = html;
    while let Some(open) = rest.find('<') {
        rest = &rest[open + 1..];
        if let Some(comment) = rest.strip_prefix("!--") {
            match comment.find("-->") {
                Some(end) => {
                    rest = &comment[end + 3..];
                    continue;
                }
                None => break,
            }
        }
        let Some(close) = tag_end(rest) else {
            break;
        };
        let tag = &rest[..close];
        rest = &rest[close + 1..];
        if let Some(reference) = asset_reference(tag) {
            out.push(reference);
        }
    }
    out
}

/// Index of the `>` closing the tag, ignoring quoted attribute values.
fn tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

fn asset_reference(tag: &str) -> Option<String> {
    let name_len = tag
        .find(|c: char| c.is_whitespace() || c == '/')
        .unwrap_or(tag.len());
    let name = tag[..name_len].to_ascii_lowercase();
    let attrs = parse_attributes(&tag[name_len..]);
    let attr = |wanted: &str| {
        attrs
            .iter()
            .find(|(k, _)| k == wanted)
            .map(|(_, v)| v.as_str())
    };
    let value = match name.as_str() {
        "img" | "script" | "source" | "video" | "audio" => attr("src")?,
        "link" => {
            let stylesheet = attr("rel").map_or(false, |rel| {
                rel.split_whitespace()
                    .any(|r| r.eq_ignore_ascii_case("stylesheet"))
            });
            if !stylesheet {
                return None;
            }
            attr("href")?
        }
        _ => return None,
    };
    let value = value.trim().replace("&amp;", "&");
    if value.is_empty() || value.starts_with('#') {
        return None;
    }
    Some(value)
}

/// `name=value` pairs; names lowercased, values unquoted. Bare attributes get "".
fn parse_attributes(s: &str) -> Vec<(String, String)> {
    let chars: Vec<char> = s.chars().collect();
    let mut attrs = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == '/') {
            i += 1;
        }
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '=' && chars[i] != '/' {
            i += 1;
        }
        if start == i {
            break;
        }
        let name: String = chars[start..i].iter().collect::<String>().to_ascii_lowercase();
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if i < chars.len() && chars[i] == '=' {
            i += 1;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            if i < chars.len() && (chars[i] == '"' || chars[i] == '\'') {
                let q = chars[i];
                i += 1;
                while i < chars.len() && chars[i] != q {
                    value.push(chars[i]);
                    i += 1;
                }
                i += 1;
            } else {
                while i < chars.len() && !chars[i].is_whitespace() {
                    value.push(chars[i]);
                    i += 1;
                }
            }
        }
        attrs.push((name, value));
    }
    attrs
}

pub struct PageResolver {
    transport: Arc<dyn Transport>,
}

impl PageResolver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Absolute, de-duplicated asset URLs of the page at `url`.
    pub async fn asset_urls(&self, url: &str, abort: &AbortSignal) -> Result<Vec<Url>, ResolveError> {
        let base = parse_url(url)?;
        let html = fetch_document(self.transport.as_ref(), &base, abort).await?;
        let urls = dedupe(
            parse_page_assets(&html)
                .iter()
                .filter_map(|r| join_http(&base, r))
                .collect(),
        );
        tracing::debug!(page = %base, assets = urls.len(), "page resolved");
        Ok(urls)
    }
}

#[async_trait]
impl Resolver for PageResolver {
    async fn resolve(
        &self,
        source: &SourceDescriptor,
        dir: &Path,
        abort: &AbortSignal,
    ) -> Result<Vec<ResolvedItem>, ResolveError> {
        let url = source.page.as_deref().ok_or(ResolveError::NoSource)?;
        Ok(into_items(self.asset_urls(url, abort).await?, dir))
    }
}

//! Parse HTTP response header lines into a ResponseHead.

/// Status and length information of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub status: u32,
    pub content_length: Option<u64>,
    pub content_range_total: Option<u64>,
}

impl ResponseHead {
    /// False for interim (1xx) and redirect (3xx) blocks that libcurl follows.
    pub fn is_final(&self) -> bool {
        self.status >= 200 && !(300..400).contains(&self.status)
    }
}

/// Parse one header block; the first line must be the status line.
pub(crate) fn parse_head(lines: &[String]) -> Option<ResponseHead> {
    let status = parse_status_line(lines.first()?)?;
    let mut content_length = None;
    let mut content_range_total = None;

    for line in &lines[1..] {
        let line = line.trim();
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                if let Ok(n) = value.parse::<u64>() {
                    content_length = Some(n);
                }
            }
            if name.eq_ignore_ascii_case("content-range") {
                content_range_total = parse_content_range_total(value);
            }
        }
    }

    Some(ResponseHead {
        status,
        content_length,
        content_range_total,
    })
}

/// `HTTP/1.1 206 Partial Content` → 206.
pub(crate) fn parse_status_line(line: &str) -> Option<u32> {
    let mut parts = line.split_whitespace();
    let proto = parts.next()?;
    if !proto.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// `bytes 0-99/1000` → 1000; `bytes */1000` → 1000; unknown total (`/*`) → None.
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (_, total) = rest.split_once('/')?;
    total.trim().parse().ok()
}

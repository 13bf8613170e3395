//! Local file naming for resolved items.
//!
//! Every item is saved as `NNNNN_<name>` where `NNNNN` is its zero-padded
//! position in the bundle and `<name>` is the last URL path segment made safe
//! for Linux filesystems.

mod path;
mod sanitize;

pub use path::filename_from_url_path;
pub use sanitize::sanitize_filename_for_linux;

/// Used when the URL path yields nothing usable.
const DEFAULT_FILENAME: &str = "download.bin";

/// Linux NAME_MAX.
const NAME_MAX: usize = 255;

/// Width of the sequence prefix, including the `_` separator.
const SEQ_PREFIX_LEN: usize = 6;

/// Filename for the item at position `seq`, built from the last path segment
/// of `url` made safe for Linux.
///
/// - `item_file_name(3, "https://cdn.example.com/hls/seg-003.ts")` → `"00003_seg-003.ts"`
/// - `item_file_name(0, "https://example.com/")` → `"00000_download.bin"`
pub fn item_file_name(seq: u32, url: &str) -> String {
    let name = derive_with_limit(url, NAME_MAX - SEQ_PREFIX_LEN);
    format!("{:05}_{}", seq, name)
}

fn derive_with_limit(url: &str, max_len: usize) -> String {
    let Some(raw) = filename_from_url_path(url) else {
        return DEFAULT_FILENAME.to_string();
    };
    let sanitized = sanitize_filename_for_linux(&raw, max_len);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        DEFAULT_FILENAME.to_string()
    } else {
        sanitized
    }
}

//! Multipart framing helpers: boundary parsing and payload location.

use super::buffer::find_subslice;

/// Token substituted when a multipart response omits its boundary.
pub const DEFAULT_BOUNDARY: &str = "--myboundary";

/// Blank line terminating a part's headers.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// How the server framed its response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMode {
    /// `multipart/*` with the delimiter token, including its leading `--`.
    Multipart { boundary: Vec<u8> },
    /// A bare image per connection.
    SingleShot,
}

/// Decide the stream mode from a `Content-Type` value.
pub fn detect_mode(content_type: Option<&str>) -> StreamMode {
    let Some(content_type) = content_type else {
        return StreamMode::SingleShot;
    };
    if !content_type.to_ascii_lowercase().contains("multipart") {
        return StreamMode::SingleShot;
    }
    let boundary = parse_boundary(content_type).unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
    StreamMode::Multipart {
        boundary: boundary.into_bytes(),
    }
}

/// Extract the delimiter token from a multipart content type.
///
/// Returns `None` when the `boundary` parameter is absent or empty.
pub fn parse_boundary(content_type: &str) -> Option<String> {
    let lower = content_type.to_ascii_lowercase();
    let start = lower.find("boundary=")? + "boundary=".len();
    let raw = content_type[start..].split(';').next().unwrap_or("").trim();
    let value = raw.trim_matches('"').trim();
    if value.is_empty() {
        return None;
    }
    Some(format!("--{}", value))
}

/// Outcome of scanning the buffered bytes for one multipart frame.
#[derive(Debug, PartialEq, Eq)]
pub enum PartScan {
    /// Payload occupies `start..end`; `end` is where the next boundary begins.
    Frame { start: usize, end: usize },
    /// A part with no payload bytes; consume up to `next` and rescan.
    Empty { next: usize },
    /// No boundary anywhere in the buffer.
    NoBoundary,
    /// Boundary found but headers or the closing boundary are still missing.
    Incomplete { boundary_at: usize },
}

/// Locate the first complete part in `data`.
pub fn scan_part(data: &[u8], boundary: &[u8]) -> PartScan {
    let Some(boundary_at) = find_subslice(data, boundary, 0) else {
        return PartScan::NoBoundary;
    };
    let headers_from = boundary_at + boundary.len();
    let Some(terminator) = find_subslice(data, HEADER_TERMINATOR, headers_from) else {
        return PartScan::Incomplete { boundary_at };
    };
    let start = terminator + HEADER_TERMINATOR.len();
    match find_subslice(data, boundary, start) {
        Some(end) if end > start => PartScan::Frame { start, end },
        Some(end) => PartScan::Empty { next: end },
        None => PartScan::Incomplete { boundary_at },
    }
}

/// Find a bare JPEG: first start marker, last end marker after it.
///
/// The returned range includes both markers.
pub fn find_jpeg_bounds(data: &[u8]) -> Option<(usize, usize)> {
    let start = find_subslice(data, &JPEG_SOI, 0)?;
    let end = data
        .windows(2)
        .rposition(|window| window == JPEG_EOI)
        .map(|pos| pos + 2)?;
    if end > start + JPEG_SOI.len() {
        Some((start, end))
    } else {
        None
    }
}

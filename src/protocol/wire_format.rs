//! Wire format constants and frame building.
//!
//! Every message travels as a text frame:
//! ```text
//! [GLS]{"name":"temp","type":"publish","payload":42}[GLE]
//! └─┬─┘└──────────────────┬──────────────────────┘└─┬─┘
//! start            JSON message body               end
//! ```
//!
//! The markers must be identical on every peer of a deployment.

use bytes::{BufMut, Bytes, BytesMut};

/// Literal start-of-frame marker.
pub const START_MARKER: &str = "[GLS]";

/// Literal end-of-frame marker.
pub const END_MARKER: &str = "[GLE]";

/// Default cap on buffered, not yet framed bytes per socket (1 MB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1_000_000;

/// Default number of session slots per endpoint.
///
/// Session ids cycle through `1..=DEFAULT_MAX_SESSIONS`.
pub const DEFAULT_MAX_SESSIONS: u32 = 10_000;

/// Wrap a serialized message body in frame markers.
pub fn encode_frame(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(START_MARKER.len() + body.len() + END_MARKER.len());
    buf.put_slice(START_MARKER.as_bytes());
    buf.put_slice(body);
    buf.put_slice(END_MARKER.as_bytes());
    buf.freeze()
}

/// Strip the frame markers from `frame`, if present.
///
/// Bodies that were already isolated by the frame buffer pass through untouched.
pub fn strip_markers(frame: &str) -> &str {
    let body = frame.strip_prefix(START_MARKER).unwrap_or(frame);
    body.strip_suffix(END_MARKER).unwrap_or(body)
}

/// Find the first occurrence of `needle` in `haystack` at or after `from`.
pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_wraps_body() {
        let frame = encode_frame(br#"{"name":"x","type":"publish"}"#);
        assert_eq!(&frame[..], br#"[GLS]{"name":"x","type":"publish"}[GLE]"#);
    }

    #[test]
    fn test_encode_empty_body() {
        let frame = encode_frame(b"");
        assert_eq!(&frame[..], b"[GLS][GLE]");
    }

    #[test]
    fn test_strip_markers() {
        assert_eq!(strip_markers("[GLS]{}[GLE]"), "{}");
        assert_eq!(strip_markers("{}"), "{}");
        assert_eq!(strip_markers("[GLS]{}"), "{}");
    }

    #[test]
    fn test_find() {
        let data = b"ab[GLE]cd[GLE]";
        let end = END_MARKER.as_bytes();
        assert_eq!(find(data, end, 0), Some(2));
        assert_eq!(find(data, end, 3), Some(9));
        assert_eq!(find(data, end, 10), None);
        assert_eq!(find(data, START_MARKER.as_bytes(), 0), None);
        assert_eq!(find(b"", START_MARKER.as_bytes(), 0), None);
    }
}

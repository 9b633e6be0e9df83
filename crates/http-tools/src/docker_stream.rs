//! Docker Engine multiplexed log streams.
//!
//! Containers without a TTY return logs as frames: one byte stream id (0 stdin, 1 stdout,
//! 2 stderr), three zero bytes, a big-endian `u32` payload length, then the payload. Containers
//! with a TTY return plain text.

const HEADER_LEN: usize = 8;

/// True if `raw` starts with a plausible frame header.
#[must_use]
pub fn is_multiplexed(raw: &[u8]) -> bool {
    raw.len() >= HEADER_LEN && raw[0] <= 2 && raw[1..4] == [0, 0, 0]
}

/// Strip frame headers and concatenate payloads. Plain-text input is returned as is.
///
/// A truncated final frame keeps whatever payload bytes are present.
#[must_use]
pub fn demux(raw: &[u8]) -> String {
    if !is_multiplexed(raw) {
        return String::from_utf8_lossy(raw).into_owned();
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut rest = raw;
    while rest.len() >= HEADER_LEN {
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let body = &rest[HEADER_LEN..];
        let take = len.min(body.len());
        out.extend_from_slice(&body[..take]);
        rest = &body[take..];
    }
    String::from_utf8_lossy(&out).into_owned()
}

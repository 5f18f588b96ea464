use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PING_INTERVAL: Duration = Duration::from_secs(2);
pub const FRAME_PING: u8 = 0x01;
pub const FRAME_PONG: u8 = 0x02;

/// Builds a 9-byte ping frame: a tag byte followed by an 8-byte
/// little-endian monotonic-ish timestamp in milliseconds.
pub fn encode_ping() -> [u8; 9] {
    encode_frame(FRAME_PING, now_millis())
}

pub fn encode_pong(echoed_ts: u64) -> [u8; 9] {
    encode_frame(FRAME_PONG, echoed_ts)
}

fn encode_frame(tag: u8, ts_millis: u64) -> [u8; 9] {
    let mut frame = [0u8; 9];
    frame[0] = tag;
    frame[1..9].copy_from_slice(&ts_millis.to_le_bytes());
    frame
}

/// Decodes a 9-byte ping/pong frame into `(tag, timestamp_millis)`.
pub fn decode_frame(frame: &[u8]) -> Option<(u8, u64)> {
    if frame.len() != 9 {
        return None;
    }
    let ts = u64::from_le_bytes(frame[1..9].try_into().ok()?);
    Some((frame[0], ts))
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// RTT in milliseconds given an echoed ping timestamp, clamped to 0 to
/// tolerate clock skew between the two sides.
pub fn compute_rtt_ms(echoed_ts_millis: u64) -> f64 {
    let now = now_millis();
    now.saturating_sub(echoed_ts_millis) as f64
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;

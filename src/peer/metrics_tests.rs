use super::*;

#[test]
fn ping_frame_round_trips_through_decode() {
    let frame = encode_ping();
    let (tag, ts) = decode_frame(&frame).unwrap();
    assert_eq!(tag, FRAME_PING);
    assert!(ts > 0);
}

#[test]
fn pong_echoes_the_given_timestamp() {
    let frame = encode_pong(12345);
    let (tag, ts) = decode_frame(&frame).unwrap();
    assert_eq!(tag, FRAME_PONG);
    assert_eq!(ts, 12345);
}

#[test]
fn decode_rejects_wrong_length() {
    assert!(decode_frame(&[0x01, 0x02]).is_none());
}

#[test]
fn rtt_from_past_timestamp_is_nonnegative() {
    let ts = now_millis();
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert!(compute_rtt_ms(ts) >= 0.0);
}

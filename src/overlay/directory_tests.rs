use super::*;

#[test]
fn parses_offer_push() {
    let payload = serde_json::json!({ "from": "peer-1", "ufrag": "u", "pwd": "p" });
    let push = parse_signal(&payload, |from, ufrag, pwd| DirectoryPush::SignalOffer { from, ufrag, pwd })
        .unwrap();
    match push {
        DirectoryPush::SignalOffer { from, ufrag, pwd } => {
            assert_eq!(from.as_str(), "peer-1");
            assert_eq!(ufrag, "u");
            assert_eq!(pwd, "p");
        }
        _ => panic!("wrong variant"),
    }
}

#[test]
fn missing_fields_in_signal_payload_yield_none() {
    let payload = serde_json::json!({ "from": "peer-1" });
    assert!(parse_signal(&payload, |from, ufrag, pwd| DirectoryPush::SignalOffer { from, ufrag, pwd }).is_none());
}

#[test]
fn parses_voice_signal_push() {
    let payload = serde_json::json!({ "from": "a", "to": "b", "payload": { "sdp": "..." } });
    let push = parse_voice_push(&payload).unwrap();
    match push {
        DirectoryPush::VoiceSignal { from, to, .. } => {
            assert_eq!(from.as_str(), "a");
            assert_eq!(to.as_str(), "b");
        }
        _ => panic!("wrong variant"),
    }
}

#[tokio::test]
async fn directory_signaling_pushes_onto_outbound_channel() {
    let (tx, mut rx) = mpsc::channel(8);
    let signaling = DirectorySignaling::new(tx, "net-1");

    signaling
        .send_offer(&PeerId::new("peer-2"), "ufrag", "pwd")
        .await
        .unwrap();

    let frame = rx.recv().await.unwrap();
    assert_eq!(frame.topic, "network:net-1");
    assert_eq!(frame.event, "offer");
}

use super::*;
use crate::ids::PeerId;

fn session(sent: u64, size: u64, start: i64) -> TransferSession {
    TransferSession {
        id: "t1".to_string(),
        peer_id: PeerId::new("p1"),
        file_path: "/tmp/f".to_string(),
        file_name: "f".to_string(),
        file_size: size,
        sent_bytes: sent,
        status: TransferStatus::InProgress,
        is_sender: true,
        start_time: start,
        end_time: None,
        error: None,
    }
}

#[test]
fn speed_and_eta_mid_transfer() {
    let s = session(5000, 10000, 0);
    let speed = s.speed_bytes_per_sec(10);
    let eta = s.eta_secs(10);

    assert!((400.0..=600.0).contains(&speed), "speed={speed}");
    assert!((8.0..=12.0).contains(&eta), "eta={eta}");
}

#[test]
fn eta_zero_when_complete() {
    let s = session(10000, 10000, 0);
    assert_eq!(s.eta_secs(10), 0.0);
}

#[test]
fn speed_and_eta_zero_when_no_elapsed() {
    let s = session(5000, 10000, 10);
    assert_eq!(s.speed_bytes_per_sec(10), 0.0);
    assert_eq!(s.eta_secs(10), 0.0);
}

#[test]
fn host_entries_skip_peers_without_hostname() {
    let config = TunnelConfig {
        network_id: NetworkId::new("net-1"),
        interface_name: "goconnect0".to_string(),
        listen_port: 51820,
        addresses: vec!["10.0.0.2/24".to_string()],
        dns_servers: vec![],
        mtu: 1420,
        peers: vec![
            TunnelPeer {
                peer_id: PeerId::new("p1"),
                public_key: "pub1".to_string(),
                endpoint: Some("1.2.3.4:51820".to_string()),
                allowed_ips: vec!["10.0.0.3/32".to_string()],
                preshared_key: None,
                keepalive_interval_secs: Some(25),
                friendly_name: "laptop".to_string(),
                hostname: Some("laptop.goconnect".to_string()),
            },
            TunnelPeer {
                peer_id: PeerId::new("p2"),
                public_key: "pub2".to_string(),
                endpoint: None,
                allowed_ips: vec!["10.0.0.4/32".to_string()],
                preshared_key: None,
                keepalive_interval_secs: None,
                friendly_name: "phone".to_string(),
                hostname: None,
            },
        ],
    };

    let entries = config.host_entries();
    assert_eq!(entries, vec![("10.0.0.3".to_string(), "laptop.goconnect".to_string())]);
}

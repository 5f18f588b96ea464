use super::*;
use crate::ids::NetworkId;

#[test]
fn configurator_is_default_constructible() {
    let _configurator = TunnelConfigurator::new();
    let _default = TunnelConfigurator::default();
}

#[test]
fn empty_tunnel_config_has_no_host_entries() {
    let config = TunnelConfig {
        network_id: NetworkId::new("net-1"),
        interface_name: "goconnect0".to_string(),
        listen_port: 0,
        addresses: vec![],
        dns_servers: vec![],
        mtu: 1420,
        peers: vec![],
    };
    assert!(config.host_entries().is_empty());
}

//! Configuration reload and the operational surface

mod common;

use std::net::SocketAddr;

use common::*;

use mgcp_call_agent::{AgentConfig, CallEvent, EndpointConfig, GatewayConfig, HangupCause};

fn two_gateway_config() -> AgentConfig {
    default_config().with_gateway(
        GatewayConfig::new("gw2", "10.0.0.6").with_endpoint(EndpointConfig::new("aaln/1")),
    )
}

fn endpoint_names(h: &Harness, gateway: usize) -> Vec<String> {
    h.agent.list_gateways()[gateway]
        .endpoints
        .iter()
        .map(|e| e.name.clone())
        .collect()
}

#[tokio::test]
async fn test_list_gateways() {
    let h = Harness::with_config(two_gateway_config()).await;

    let gateways = h.agent.list_gateways();
    assert_eq!(gateways.len(), 2);
    assert_eq!(gateways[0].name, "gw1");
    assert_eq!(gateways[0].address, Some(gateway_addr()));
    assert!(!gateways[0].dynamic);
    assert_eq!(gateways[0].outstanding, 0);
    assert_eq!(gateways[0].endpoints[0].name, "aaln/1");
    assert_eq!(gateways[0].endpoints[0].context, "local");
    assert_eq!(gateways[0].endpoints[0].subchannels.len(), 2);
    assert_eq!(gateways[1].name, "gw2");

    // Summaries are what an operator tool would print
    let json = serde_json::to_value(&gateways).unwrap();
    assert_eq!(json[1]["endpoints"][0]["name"], "aaln/1");
}

#[tokio::test]
async fn test_reload_audits_only_new_endpoints() {
    let mut h = Harness::new().await;

    let config = AgentConfig::default().with_gateway(
        GatewayConfig::new(GATEWAY, "10.0.0.5")
            .with_endpoint(line_config())
            .with_endpoint(EndpointConfig::new("aaln/2")),
    );
    h.agent.reload(config).await.unwrap();
    let sent = h.take_sent();
    let audits = requests_with_verb(&sent, "AUEP");
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].endpoint, "aaln/2@gw1");
    assert_eq!(endpoint_names(&h, 0), vec!["aaln/1", "aaln/2"]);
}

#[tokio::test]
async fn test_removed_endpoint_survives_until_idle() {
    let mut h = Harness::new().await;
    let leg = h.go_off_hook();

    let config = config_with_line(EndpointConfig::new("aaln/2"));
    h.agent.reload(config).await.unwrap();
    h.answer_all();

    let gateways = h.agent.list_gateways();
    let summary = &gateways[0];
    assert_eq!(summary.endpoints.len(), 2);
    let old = summary.endpoints.iter().find(|e| e.name == "aaln/1").unwrap();
    assert!(old.delete);

    h.notify("L/hu");
    assert_eq!(
        h.drain_events(),
        vec![CallEvent::Hangup {
            leg,
            cause: HangupCause::OnHook
        }]
    );
    h.agent.hangup(leg).unwrap();

    assert_eq!(endpoint_names(&h, 0), vec!["aaln/2"]);
    assert_eq!(h.agent.list_gateways()[0].outstanding, 0);
    assert!(h.agent.request_call(LINE, Default::default()).is_err());
}

#[tokio::test]
async fn test_reload_removes_idle_gateway() {
    let mut h = Harness::with_config(two_gateway_config()).await;

    h.agent.reload(default_config()).await.unwrap();

    let gateways = h.agent.list_gateways();
    assert_eq!(gateways.len(), 1);
    assert_eq!(gateways[0].name, "gw1");
    assert!(h.take_sent().is_empty());
}

#[tokio::test]
async fn test_invalid_reload_keeps_configuration() {
    let h = Harness::new().await;

    // Neither a host nor dynamic
    let mut gateway = GatewayConfig::dynamic("gw9");
    gateway.dynamic = false;
    let broken = AgentConfig::default().with_gateway(gateway);

    assert!(h.agent.reload(broken).await.is_err());
    assert_eq!(h.agent.list_gateways()[0].name, "gw1");
}

#[tokio::test]
async fn test_trace_toggle() {
    let h = Harness::new().await;

    assert!(!h.agent.is_tracing());
    h.agent.set_trace(true);
    assert!(h.agent.is_tracing());

    // Traced traffic is still handled
    h.from_gateway(&format!("RSIP 4001 {} MGCP 1.0\r\nRM: X-KeepAlive\r\n", LINE));
    assert_eq!(h.transport.sent().last().unwrap().message().verb, "200");

    h.agent.set_trace(false);
    assert!(!h.agent.is_tracing());
}

#[tokio::test]
async fn test_dynamic_gateway_learns_address() {
    let config = default_config().with_gateway(
        GatewayConfig::dynamic("gw3").with_endpoint(EndpointConfig::new("aaln/1")),
    );
    let mut h = Harness::with_config(config).await;

    let gateways = h.agent.list_gateways();
    let summary = &gateways[1];
    assert!(summary.dynamic);
    assert_eq!(summary.address, None);

    let source: SocketAddr = "10.0.0.9:2427".parse().unwrap();
    let before = h.transport.sent().len();
    h.agent.handle_datagram(
        b"NTFY 5001 aaln/1@gw3 MGCP 1.0\r\nX: 1\r\nO: L/hd\r\n",
        source,
    );

    assert_eq!(h.agent.list_gateways()[1].address, Some(source));
    let sent: Vec<Sent> = h.transport.sent().into_iter().skip(before).collect();
    assert!(sent.iter().all(|s| s.destination == source));
    assert_eq!(sent[0].message().verb, "200");
    assert_eq!(sent[0].message().identifier, "5001");
    assert!(sent.iter().any(|s| s.message().verb == "CRCX"));
    assert!(matches!(
        h.drain_events().as_slice(),
        [CallEvent::NewChannel { endpoint, .. }] if endpoint == "aaln/1@gw3"
    ));
}

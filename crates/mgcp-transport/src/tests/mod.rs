use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::transport::{Transport, TransportEvent};
use crate::{bind_udp, Error};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[tokio::test]
async fn test_receive_parses_datagram() {
    let (transport, mut events) = bind_udp(loopback()).await.unwrap();
    let agent_addr = transport.local_addr().unwrap();

    let gateway = UdpSocket::bind(loopback()).await.unwrap();
    gateway
        .send_to(b"NTFY 12 aaln/1@gw1 MGCP 1.0\r\nO: L/hd\r\n", agent_addr)
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    match event {
        TransportEvent::MessageReceived { message, raw, source } => {
            assert_eq!(message.verb, "NTFY");
            assert_eq!(message.header("O"), "L/hd");
            assert_eq!(source, gateway.local_addr().unwrap());
            assert!(raw.starts_with(b"NTFY 12"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_send_reaches_peer() {
    let (transport, _events) = bind_udp(loopback()).await.unwrap();
    let gateway = UdpSocket::bind(loopback()).await.unwrap();

    transport
        .send_datagram(b"200 12 OK\r\n", gateway.local_addr().unwrap())
        .unwrap();

    let mut buf = [0u8; 64];
    let (len, from) = timeout(Duration::from_secs(2), gateway.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..len], b"200 12 OK\r\n");
    assert_eq!(from, transport.local_addr().unwrap());
}

#[tokio::test]
async fn test_close_stops_loop_and_rejects_sends() {
    let (transport, mut events) = bind_udp(loopback()).await.unwrap();
    transport.close();
    assert!(transport.is_closed());

    let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap();
    assert!(matches!(event, Some(TransportEvent::Closed)));

    let err = transport
        .send_datagram(b"x", "127.0.0.1:2427".parse().unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::TransportClosed));
}

//! Integration tests for the proxy relay loop.
//!
//! Each test starts a real proxy on loopback between a fake viewer
//! socket and a fake simulator socket.

use std::net::SocketAddr;
use std::time::Duration;

use lludp_protocol::{Block, Direction, Message, PacketFlags, UdpCodec, Value};
use lludp_proxy::{MessageHook, ProxyServer, Session, Verdict};
use tokio::net::UdpSocket;

// =========================================================================
// Helpers
// =========================================================================

struct Harness {
    viewer: UdpSocket,
    simulator: UdpSocket,
    proxy_addr: SocketAddr,
}

async fn loopback() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.expect("should bind")
}

async fn recv(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = [0u8; 2048];
    let (n, from) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("should receive in time")
        .expect("recv should succeed");
    (buf[..n].to_vec(), from)
}

async fn nothing_arrives(socket: &UdpSocket) -> bool {
    let mut buf = [0u8; 2048];
    tokio::time::timeout(Duration::from_millis(200), socket.recv_from(&mut buf))
        .await
        .is_err()
}

fn chat(text: &str, packet_id: u32) -> Vec<u8> {
    let mut message = Message::with_blocks(
        "ChatFromViewer",
        Direction::Out,
        [
            Block::new("AgentData")
                .with("AgentID", uuid::Uuid::nil())
                .with("SessionID", uuid::Uuid::nil()),
            Block::new("ChatData")
                .with("Message", text)
                .with("Type", 1u8)
                .with("Channel", 0i32),
        ],
    );
    message.set_packet_id(Some(packet_id)).unwrap();
    message.set_flags(PacketFlags::RELIABLE).unwrap();
    UdpCodec::default().encode(&message).unwrap()
}

fn ping(packet_id: u32) -> Vec<u8> {
    let mut message = Message::with_blocks(
        "CompletePingCheck",
        Direction::In,
        [Block::new("PingID").with("PingID", 9u8)],
    );
    message.set_packet_id(Some(packet_id)).unwrap();
    UdpCodec::default().encode(&message).unwrap()
}

async fn start(server: ProxyServer, simulator: UdpSocket, viewer: UdpSocket) -> Harness {
    let proxy_addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    Harness {
        viewer,
        simulator,
        proxy_addr,
    }
}

struct DropSecrets;

impl MessageHook for DropSecrets {
    fn wants(&self, name: &str) -> bool {
        name == "ChatFromViewer"
    }

    fn on_message(&mut self, _session: &mut Session, message: &mut Message) -> Verdict {
        let text = message
            .block("ChatData")
            .and_then(|b| b.get("Message"))
            .and_then(Value::as_str);
        if text == Some("secret") {
            Verdict::Drop
        } else {
            Verdict::Forward
        }
    }
}

// =========================================================================
// Relay
// =========================================================================

#[tokio::test]
async fn test_proxy_relays_both_directions_unchanged() {
    let simulator = loopback().await;
    let viewer = loopback().await;
    let server = ProxyServer::builder()
        .listen("127.0.0.1:0")
        .upstream(&simulator.local_addr().unwrap().to_string())
        .build()
        .await
        .unwrap();
    let h = start(server, simulator, viewer).await;

    let outbound = chat("hello", 1);
    h.viewer.send_to(&outbound, h.proxy_addr).await.unwrap();
    let (data, proxy_upstream) = recv(&h.simulator).await;
    assert_eq!(data, outbound);

    let inbound = ping(1);
    h.simulator.send_to(&inbound, proxy_upstream).await.unwrap();
    let (data, from) = recv(&h.viewer).await;
    assert_eq!(data, inbound);
    assert_eq!(from, h.proxy_addr);
}

#[tokio::test]
async fn test_proxy_hook_drop_acks_viewer() {
    let simulator = loopback().await;
    let viewer = loopback().await;
    let server = ProxyServer::builder()
        .listen("127.0.0.1:0")
        .upstream(&simulator.local_addr().unwrap().to_string())
        .hook(DropSecrets)
        .build()
        .await
        .unwrap();
    let h = start(server, simulator, viewer).await;

    h.viewer.send_to(&chat("secret", 1), h.proxy_addr).await.unwrap();

    let (data, _) = recv(&h.viewer).await;
    let ack = UdpCodec::default().decode(&data, Direction::In).unwrap();
    assert_eq!(ack.name(), "PacketAck");
    let ids: Vec<u32> = ack
        .blocks_named("Packets")
        .iter()
        .filter_map(|b| b.get("ID").and_then(Value::as_u32))
        .collect();
    assert_eq!(ids, [1]);
    assert!(nothing_arrives(&h.simulator).await);

    // The next real packet keeps its id.
    h.viewer.send_to(&chat("public", 2), h.proxy_addr).await.unwrap();
    let (data, _) = recv(&h.simulator).await;
    assert_eq!(&data[1..5], [0, 0, 0, 2]);
}

#[tokio::test]
async fn test_proxy_injector_and_subscription() {
    let simulator = loopback().await;
    let viewer = loopback().await;
    let mut server = ProxyServer::builder()
        .listen("127.0.0.1:0")
        .upstream(&simulator.local_addr().unwrap().to_string())
        .build()
        .await
        .unwrap();
    let mut chats = server.subscribe("ChatFromViewer");
    let injector = server.injector();
    let h = start(server, simulator, viewer).await;

    h.viewer.send_to(&chat("one", 1), h.proxy_addr).await.unwrap();
    recv(&h.simulator).await;
    let seen = tokio::time::timeout(Duration::from_secs(2), chats.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.packet_id(), Some(1));

    let injected = Message::with_blocks(
        "CompletePingCheck",
        Direction::Out,
        [Block::new("PingID").with("PingID", 3u8)],
    );
    injector.inject(injected).unwrap();
    let (data, _) = recv(&h.simulator).await;
    assert_eq!(&data[1..5], [0, 0, 0, 2]);

    // The viewer's next packet moves past the injection.
    h.viewer.send_to(&chat("two", 2), h.proxy_addr).await.unwrap();
    let (data, _) = recv(&h.simulator).await;
    assert_eq!(&data[1..5], [0, 0, 0, 3]);
}

//! End-to-end signaling over loopback TCP.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use pqc_signaling::protocol::{frame, read_frame, write_frame};
use pqc_signaling::{GrantAuthority, RoomGrant, ServerConfig, SignalingServer};

const MAX: usize = 64 * 1024;
const WAIT: Duration = Duration::from_secs(5);

async fn start(config: ServerConfig) -> (Arc<SignalingServer>, SocketAddr, JoinHandle<anyhow::Result<()>>) {
    let server = Arc::new(SignalingServer::new(config).unwrap());
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });
    (server, addr, handle)
}

fn local_config() -> ServerConfig {
    ServerConfig {
        signaling_host: "127.0.0.1".to_string(),
        signaling_port: 0,
        ..Default::default()
    }
}

struct Client {
    stream: TcpStream,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    async fn send(&mut self, message: Value) {
        self.send_raw(&serde_json::to_vec(&message).unwrap()).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        write_frame(&mut self.stream, bytes).await.unwrap();
    }

    async fn recv_raw(&mut self) -> Option<Vec<u8>> {
        timeout(WAIT, read_frame(&mut self.stream, MAX))
            .await
            .expect("timed out waiting for a frame")
            .unwrap_or(None)
    }

    async fn recv(&mut self) -> Value {
        let frame = self.recv_raw().await.expect("connection closed");
        serde_json::from_slice(&frame).unwrap()
    }

    async fn register(&mut self, user_id: &str, public_key: &str) {
        self.send(json!({"type": "register", "userId": user_id, "publicKey": public_key}))
            .await;
        assert_eq!(
            self.recv().await,
            json!({"type": "registered", "success": true, "userId": user_id})
        );
    }
}

#[tokio::test]
async fn alice_and_bob_exchange_offer() {
    let (server, addr, handle) = start(local_config()).await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;

    alice.register("alice", "pkA").await;
    bob.register("bob", "pkB").await;

    alice.send(json!({"type": "discover", "userId": "bob"})).await;
    assert_eq!(
        alice.recv().await,
        json!({"type": "discover-response", "userId": "bob", "online": true, "publicKey": "pkB"})
    );

    let offer = br#"{"type":"offer","from":"alice","to":"bob","offer":{"type":"offer","sdp":"v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"}}"#;
    alice.send_raw(offer).await;
    assert_eq!(bob.recv_raw().await.unwrap(), offer.to_vec());

    drop(bob);
    // Wait for the server to notice bob's transport is gone
    let mut online = true;
    for _ in 0..50 {
        if !server.router().registry().is_online("bob") {
            online = false;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!online);

    alice.send_raw(offer).await;
    assert_eq!(
        alice.recv().await,
        json!({"type": "error", "message": "User bob is not online"})
    );

    server.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_message_keeps_connection_open() {
    let (server, addr, handle) = start(local_config()).await;
    let mut alice = Client::connect(addr).await;

    alice.send_raw(b"this is not json").await;
    assert_eq!(
        alice.recv().await,
        json!({"type": "error", "message": "Invalid message format"})
    );

    alice.send(json!({"type": "register", "userId": "alice"})).await;
    assert_eq!(
        alice.recv().await,
        json!({"type": "error", "message": "Missing required field(s) for register: publicKey"})
    );

    alice.register("alice", "pkA").await;

    server.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn newest_registration_receives_relays() {
    let (server, addr, handle) = start(local_config()).await;
    let mut alice = Client::connect(addr).await;
    let mut bob_laptop = Client::connect(addr).await;
    let mut bob_phone = Client::connect(addr).await;

    alice.register("alice", "pkA").await;
    bob_laptop.register("bob", "pkB-laptop").await;
    bob_phone.register("bob", "pkB-phone").await;

    let candidate = json!({"type": "ice-candidate", "from": "alice", "to": "bob", "candidate": {"sdpMid": "0"}});
    alice.send(candidate.clone()).await;
    assert_eq!(bob_phone.recv().await, candidate);

    // The laptop gets nothing; a discover round-trip proves its queue is empty
    bob_laptop.send(json!({"type": "discover", "userId": "bob"})).await;
    assert_eq!(
        bob_laptop.recv().await,
        json!({"type": "discover-response", "userId": "bob", "online": true, "publicKey": "pkB-phone"})
    );

    server.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn token_required_for_registration() {
    let mut config = local_config();
    config.auth.api_secret = Some("integration-secret".to_string());
    config.auth.require_token = true;
    let authority = GrantAuthority::new(config.auth.api_key.clone(), "integration-secret").unwrap();
    let (server, addr, handle) = start(config).await;

    let mut alice = Client::connect(addr).await;
    alice
        .send(json!({"type": "register", "userId": "alice", "publicKey": "pkA"}))
        .await;
    let reply = alice.recv().await;
    assert_eq!(reply["type"], "error");

    let token = authority
        .issue(
            "alice",
            RoomGrant::join("lobby"),
            Duration::from_secs(300),
            Some(b"kyber-public-key"),
            Some("ML-KEM-768"),
        )
        .unwrap();
    alice
        .send(json!({"type": "register", "userId": "alice", "publicKey": "pkA", "token": token}))
        .await;
    assert_eq!(
        alice.recv().await,
        json!({"type": "registered", "success": true, "userId": "alice"})
    );

    let mut bob = Client::connect(addr).await;
    bob.send(json!({"type": "discover", "userId": "alice"})).await;
    let reply = bob.recv().await;
    assert_eq!(reply["online"], true);
    assert_eq!(reply["pqAlgorithm"], "ML-KEM-768");

    server.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_closes_live_transports() {
    let (server, addr, handle) = start(local_config()).await;
    let mut alice = Client::connect(addr).await;
    alice.register("alice", "pkA").await;

    server.stop();
    handle.await.unwrap().unwrap();

    assert_eq!(alice.recv_raw().await, None);
    assert!(server.router().registry().is_empty());
    assert!(server.router().directory().is_empty());
    server.stop();
}

#[tokio::test]
async fn oversized_frame_closes_connection() {
    let mut config = local_config();
    config.max_message_size = 128;
    let (server, addr, handle) = start(config).await;
    let mut alice = Client::connect(addr).await;

    let huge = frame(&vec![b' '; 1024]);
    tokio::io::AsyncWriteExt::write_all(&mut alice.stream, &huge)
        .await
        .unwrap();
    assert_eq!(alice.recv_raw().await, None);

    server.stop();
    handle.await.unwrap().unwrap();
}

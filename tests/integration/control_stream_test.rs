// tests/integration/control_stream_test.rs

//! End-to-end control-stream tests: a real TCP listener running
//! `ControlConnection` on one side and a framed node client on the other.

use super::fixtures::*;
use super::test_helpers::{TestContext, healthy_metrics};
use foghorn::connection::ControlConnection;
use foghorn::core::directory::OwnerDirectory;
use foghorn::core::protocol::{
    ControllerMessage, Fingerprint, NodeMessage, NodeSideCodec, OperationalMode,
};
use foghorn::server::AnyStream;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;

/// Spawns a minimal accept loop running `ControlConnection` per stream.
async fn spawn_control_listener(ctx: &TestContext) -> (SocketAddr, broadcast::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, _) = broadcast::channel(1);
    let state = ctx.state.clone();
    let accept_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        while let Ok((socket, peer)) = listener.accept().await {
            let session_id = state.next_session_id();
            let mut handler = ControlConnection::new(
                AnyStream::Tcp(socket),
                peer,
                state.clone(),
                session_id,
                accept_shutdown.subscribe(),
            );
            tokio::spawn(async move {
                let _ = handler.run().await;
            });
        }
    });
    (addr, shutdown_tx)
}

async fn connect_client(addr: SocketAddr) -> Framed<TcpStream, NodeSideCodec> {
    let socket = TcpStream::connect(addr).await.unwrap();
    Framed::new(socket, NodeSideCodec::new())
}

fn register_message(node_id: &str, machine_id: &str) -> NodeMessage {
    NodeMessage::Register {
        node_id: node_id.to_string(),
        fingerprint: Some(Fingerprint {
            local_ipv4: vec!["10.0.0.5".to_string()],
            local_ipv6: vec![],
            macs_sha256: String::new(),
            machine_id_sha256: machine_id.to_string(),
        }),
        enrollment_token: None,
        cpu_cores: 8,
        memory_gb: 16,
        disk_gb: 500,
        requested_mode: None,
        roles: vec!["edge".to_string()],
    }
}

/// Polls until the condition holds or the deadline passes.
async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within the deadline");
}

#[tokio::test]
async fn test_register_with_known_fingerprint_replaces_node_id() {
    let ctx = TestContext::new();
    ctx.tenants.seed_machine_id(KNOWN_MACHINE_ID, TENANT_A, NODE_A);
    let (addr, _shutdown) = spawn_control_listener(&ctx).await;

    let mut client = connect_client(addr).await;
    client
        .send(register_message("self-chosen-id", KNOWN_MACHINE_ID))
        .await
        .unwrap();

    // The canonical id from the tenant service wins over the client's.
    let seed = client.next().await.unwrap().unwrap();
    match seed {
        ControllerMessage::ConfigSeed { mode, .. } => {
            assert_eq!(mode, OperationalMode::Normal);
        }
        other => panic!("expected ConfigSeed, got {other:?}"),
    }
    wait_until(|| ctx.state.connections.contains(NODE_A)).await;
    assert!(!ctx.state.connections.contains("self-chosen-id"));

    // Registration wrote the owner record for this instance.
    let record = ctx
        .directory
        .lookup("test-cluster", NODE_A)
        .await
        .unwrap()
        .expect("owner record written");
    assert_eq!(record.instance_id, "test-instance");
    assert!(record.addr.is_some());
}

#[tokio::test]
async fn test_register_without_fingerprint_or_token_is_rejected() {
    let ctx = TestContext::new();
    let (addr, _shutdown) = spawn_control_listener(&ctx).await;

    let mut client = connect_client(addr).await;
    client
        .send(NodeMessage::Register {
            node_id: "nobody".to_string(),
            fingerprint: None,
            enrollment_token: None,
            cpu_cores: 0,
            memory_gb: 0,
            disk_gb: 0,
            requested_mode: None,
            roles: vec![],
        })
        .await
        .unwrap();

    let reply = client.next().await.unwrap().unwrap();
    match reply {
        ControllerMessage::ControlError { code, .. } => {
            assert_eq!(code, "ENROLLMENT_REQUIRED");
        }
        other => panic!("expected ControlError, got {other:?}"),
    }
    // The stream closes after the error.
    assert!(client.next().await.is_none());
}

#[tokio::test]
async fn test_register_with_invalid_token_fails() {
    let ctx = TestContext::new();
    let (addr, _shutdown) = spawn_control_listener(&ctx).await;

    let mut client = connect_client(addr).await;
    client
        .send(NodeMessage::Register {
            node_id: "newcomer".to_string(),
            fingerprint: None,
            enrollment_token: Some("bogus-token".to_string()),
            cpu_cores: 0,
            memory_gb: 0,
            disk_gb: 0,
            requested_mode: None,
            roles: vec![],
        })
        .await
        .unwrap();

    let reply = client.next().await.unwrap().unwrap();
    match reply {
        ControllerMessage::ControlError { code, .. } => assert_eq!(code, "ENROLLMENT_FAILED"),
        other => panic!("expected ControlError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_register_when_tenant_service_down_is_unavailable() {
    let ctx = TestContext::new();
    ctx.tenants
        .unreachable
        .store(true, std::sync::atomic::Ordering::Relaxed);
    let (addr, _shutdown) = spawn_control_listener(&ctx).await;

    let mut client = connect_client(addr).await;
    client
        .send(register_message(NODE_A, KNOWN_MACHINE_ID))
        .await
        .unwrap();

    let reply = client.next().await.unwrap().unwrap();
    match reply {
        ControllerMessage::ControlError { code, .. } => {
            assert_eq!(code, "ENROLLMENT_UNAVAILABLE");
        }
        other => panic!("expected ControlError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_node_update_and_heartbeat_feed_the_store() {
    let ctx = TestContext::new();
    ctx.tenants.seed_machine_id(KNOWN_MACHINE_ID, TENANT_A, NODE_A);
    let (addr, _shutdown) = spawn_control_listener(&ctx).await;

    let mut client = connect_client(addr).await;
    client
        .send(register_message(NODE_A, KNOWN_MACHINE_ID))
        .await
        .unwrap();
    let _seed = client.next().await.unwrap().unwrap();

    client
        .send(NodeMessage::NodeUpdate {
            base_url: "http://edge-1.example:8080".to_string(),
            metrics: healthy_metrics(),
            location: None,
            tags: vec!["ssd".to_string()],
            capabilities: Default::default(),
            storage: None,
            streams: HashMap::new(),
            artifacts: vec![],
            outputs_json: r#"{"DTSC":"dtsc://HOST/$"}"#.to_string(),
            configured_streams: vec![],
        })
        .await
        .unwrap();

    wait_until(|| {
        ctx.state
            .store
            .get_node(NODE_A)
            .is_some_and(|n| n.base_url == "http://edge-1.example:8080")
    })
    .await;

    let node = ctx.state.store.get_node(NODE_A).unwrap();
    assert_eq!(node.tags, vec!["ssd".to_string()]);
    assert_eq!(node.metrics.bw_limit, 1_000_000_000);
    assert_eq!(
        node.output_url("DTSC", "live+demo").as_deref(),
        Some("dtsc://edge-1.example:8080/live+demo")
    );
    assert_eq!(node.tenant_id.as_deref(), Some(TENANT_A));
}

#[tokio::test]
async fn test_disconnect_clears_owner_record_and_liveness() {
    let ctx = TestContext::new();
    ctx.tenants.seed_machine_id(KNOWN_MACHINE_ID, TENANT_A, NODE_A);
    let (addr, _shutdown) = spawn_control_listener(&ctx).await;

    let mut client = connect_client(addr).await;
    client
        .send(register_message(NODE_A, KNOWN_MACHINE_ID))
        .await
        .unwrap();
    let _seed = client.next().await.unwrap().unwrap();
    wait_until(|| ctx.state.connections.contains(NODE_A)).await;

    drop(client);

    wait_until(|| !ctx.state.connections.contains(NODE_A)).await;
    wait_until(|| {
        // The owner record release runs on a spawned task after teardown.
        futures::executor::block_on(async {
            ctx.directory
                .lookup("test-cluster", NODE_A)
                .await
                .unwrap()
                .is_none()
        })
    })
    .await;
    let node = ctx.state.store.get_node(NODE_A).unwrap();
    assert!(!node.is_active);
}

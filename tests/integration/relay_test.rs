// tests/integration/relay_test.rs

//! Relay tests: the peer listener dispatching onto local streams, the pooled
//! client, and the full two-controller forward through the owner directory.

use super::fixtures::*;
use super::test_helpers::TestContext;
use foghorn::core::FoghornError;
use foghorn::core::directory::{OwnerDirectory, OwnerRecord};
use foghorn::core::protocol::ControllerMessage;
use foghorn::core::relay::{PeerPool, server};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Runs a relay listener over the context's connection registry.
async fn spawn_relay(ctx: &TestContext) -> (SocketAddr, broadcast::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let connections = ctx.state.connections.clone();
    tokio::spawn(async move {
        server::run(listener, connections, shutdown_rx).await;
    });
    (addr, shutdown_tx)
}

#[tokio::test]
async fn test_forward_delivers_to_locally_connected_node() {
    let ctx = TestContext::new();
    let mut node_rx = ctx.connect_node(NODE_A);
    let (addr, _shutdown) = spawn_relay(&ctx).await;

    let pool = PeerPool::new();
    pool.forward(
        &addr.to_string(),
        "other-instance",
        NODE_A,
        ControllerMessage::StopSessionsRequest {
            internal_name: STREAM_MAIN.to_string(),
        },
    )
    .await
    .unwrap();

    let delivered = node_rx.recv().await.unwrap();
    assert!(matches!(
        delivered,
        ControllerMessage::StopSessionsRequest { internal_name } if internal_name == STREAM_MAIN
    ));
}

#[tokio::test]
async fn test_forward_to_unknown_node_reports_not_delivered() {
    let ctx = TestContext::new();
    let (addr, _shutdown) = spawn_relay(&ctx).await;

    let pool = PeerPool::new();
    let err = pool
        .forward(
            &addr.to_string(),
            "other-instance",
            "ghost-node",
            ControllerMessage::DvrStopRequest {
                dvr_hash: "h".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FoghornError::PeerRejected(_)));
}

#[tokio::test]
async fn test_forward_with_missing_target_is_invalid_argument() {
    let ctx = TestContext::new();
    let (addr, _shutdown) = spawn_relay(&ctx).await;

    let pool = PeerPool::new();
    let err = pool
        .forward(
            &addr.to_string(),
            "other-instance",
            "",
            ControllerMessage::DvrStopRequest {
                dvr_hash: "h".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FoghornError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_forwarding_a_response_frame_is_invalid_argument() {
    let ctx = TestContext::new();
    let _node_rx = ctx.connect_node(NODE_A);
    let (addr, _shutdown) = spawn_relay(&ctx).await;

    let pool = PeerPool::new();
    let err = pool
        .forward(
            &addr.to_string(),
            "other-instance",
            NODE_A,
            ControllerMessage::CanDeleteResponse {
                request_id: "r".to_string(),
                safe_to_delete: true,
                warm_duration_ms: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FoghornError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_send_to_node_transparently_crosses_instances() {
    // Controller B holds the node's stream; controller A only has the owner
    // record. A's send must look local to its caller.
    let ctx_b = TestContext::new();
    let mut node_rx = ctx_b.connect_node(NODE_B);
    let (relay_addr, _shutdown) = spawn_relay(&ctx_b).await;

    let ctx_a = TestContext::new();
    ctx_a
        .directory
        .claim(
            "test-cluster",
            NODE_B,
            &OwnerRecord::new("instance-b", relay_addr.to_string()),
        )
        .await
        .unwrap();

    ctx_a
        .state
        .relay
        .send_to_node(
            NODE_B,
            ControllerMessage::ClipDeleteRequest {
                hash: "clip01".to_string(),
            },
        )
        .await
        .unwrap();

    let delivered = node_rx.recv().await.unwrap();
    assert!(matches!(
        delivered,
        ControllerMessage::ClipDeleteRequest { hash } if hash == "clip01"
    ));
}

#[tokio::test]
async fn test_send_to_unowned_node_is_not_connected() {
    let ctx = TestContext::new();
    let err = ctx
        .state
        .relay
        .send_to_node(
            "nowhere-node",
            ControllerMessage::DvrStopRequest {
                dvr_hash: "h".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FoghornError::NotConnected(_)));
}

#[tokio::test]
async fn test_stale_self_owner_record_is_not_connected() {
    // The directory still names this instance, but no stream is present.
    let ctx = TestContext::new();
    ctx.directory
        .claim(
            "test-cluster",
            NODE_A,
            &OwnerRecord::new("test-instance", "127.0.0.1:1"),
        )
        .await
        .unwrap();

    let err = ctx
        .state
        .relay
        .send_to_node(
            NODE_A,
            ControllerMessage::DvrStopRequest {
                dvr_hash: "h".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FoghornError::NotConnected(_)));
}

#[tokio::test]
async fn test_legacy_owner_record_without_address_fails_with_no_address() {
    let ctx = TestContext::new();
    let legacy = OwnerRecord {
        instance_id: "instance-elsewhere".to_string(),
        addr: None,
    };
    ctx.directory
        .claim("test-cluster", NODE_A, &legacy)
        .await
        .unwrap();

    let err = ctx
        .state
        .relay
        .send_to_node(
            NODE_A,
            ControllerMessage::DvrStopRequest {
                dvr_hash: "h".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FoghornError::NoPeerAddress(_)));
}

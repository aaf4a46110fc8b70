// tests/integration/dvr_flow_test.rs

//! The DVR three-party flow: start orchestration, the readiness handshake
//! decision table, progress, and terminal reports.

use super::fixtures::*;
use super::test_helpers::{TestContext, healthy_metrics};
use foghorn::core::artifacts::{Artifact, ArtifactKind, ArtifactStatus};
use foghorn::core::protocol::{
    BufferState, Capabilities, ControllerMessage, DvrNotReadyReason, StorageInfo, StreamStats,
    StreamStatus,
};

/// Seeds an ingest source with a DTSC output template and a storage node
/// with capacity, returning the storage node's command receiver.
fn seed_dvr_fleet(ctx: &TestContext) -> tokio::sync::mpsc::Receiver<ControllerMessage> {
    ctx.seed_node(NODE_A, SITE_NEAR.0, SITE_NEAR.1);
    ctx.state.store.set_node_info(
        NODE_A,
        "http://ingest-1.example:8080",
        true,
        None,
        r#"{"DTSC":"dtsc://HOST/$"}"#,
    );
    ctx.seed_source(NODE_A, STREAM_MAIN);

    ctx.state.store.touch_node(NODE_STORAGE, true);
    ctx.state
        .store
        .update_node_metrics(NODE_STORAGE, healthy_metrics());
    ctx.state.store.update_node_attributes(
        NODE_STORAGE,
        Capabilities {
            storage: true,
            ..Default::default()
        },
        vec![],
        vec![],
        Some(StorageInfo {
            capacity_bytes: 2_000_000_000_000,
            used_bytes: 500_000_000_000,
            local_path: "/mnt/warm".to_string(),
            s3_bucket: String::new(),
            s3_prefix: String::new(),
        }),
    );
    ctx.connect_node(NODE_STORAGE)
}

fn push_health(ctx: &TestContext, status: StreamStatus, buffer: BufferState, has_issues: bool) {
    ctx.state.store.update_stream_from_buffer(
        NODE_A,
        STREAM_MAIN,
        status,
        buffer,
        has_issues,
        "",
        &StreamStats {
            total: 3,
            inputs: 1,
            bytes_up: 1000,
            bytes_down: 0,
            bandwidth: 0,
            replicated: false,
        },
    );
}

#[tokio::test]
async fn test_start_dvr_dispatches_to_best_storage_node() {
    let ctx = TestContext::new();
    let mut storage_rx = seed_dvr_fleet(&ctx);
    push_health(&ctx, StreamStatus::Live, BufferState::Full, false);

    let hash = ctx
        .state
        .dvr
        .start_dvr(NODE_A, STREAM_MAIN, TENANT_A, "user-1", None)
        .await
        .unwrap();

    let command = storage_rx.recv().await.unwrap();
    match command {
        ControllerMessage::DvrStartRequest {
            dvr_hash,
            source_url,
            config,
        } => {
            assert_eq!(dvr_hash, hash);
            assert_eq!(
                source_url,
                format!("dtsc://ingest-1.example:8080/live+{STREAM_MAIN}")
            );
            assert!(config.enabled);
            assert_eq!(config.retention_days, 30);
            assert_eq!(config.format, "ts");
            assert_eq!(config.segment_duration, 6);
        }
        other => panic!("expected DvrStartRequest, got {other:?}"),
    }

    let artifact = ctx.state.artifacts.get(&hash).unwrap();
    assert_eq!(artifact.kind, ArtifactKind::Dvr);
    assert_eq!(artifact.status, ArtifactStatus::Requested);
    assert!(artifact.retention_until.is_some());
}

#[tokio::test]
async fn test_readiness_for_unknown_hash_is_request_not_found() {
    let ctx = TestContext::new();
    let reply = ctx.state.dvr.on_ready_request("no-such-hash");
    match reply {
        ControllerMessage::DvrReadyResponse { ready, reason, .. } => {
            assert!(!ready);
            assert_eq!(reason, Some(DvrNotReadyReason::DvrRequestNotFound));
        }
        other => panic!("expected DvrReadyResponse, got {other:?}"),
    }
}

#[tokio::test]
async fn test_readiness_decision_table_tracks_stream_state() {
    let ctx = TestContext::new();
    let _storage_rx = seed_dvr_fleet(&ctx);
    push_health(&ctx, StreamStatus::Live, BufferState::Full, false);
    let hash = ctx
        .state
        .dvr
        .start_dvr(NODE_A, STREAM_MAIN, TENANT_A, "user-1", None)
        .await
        .unwrap();

    let reason_for = |reply: ControllerMessage| match reply {
        ControllerMessage::DvrReadyResponse { ready, reason, .. } => {
            assert!(!ready);
            reason.unwrap()
        }
        other => panic!("expected DvrReadyResponse, got {other:?}"),
    };

    // Live but with an empty buffer: the stream is still booting.
    push_health(&ctx, StreamStatus::Live, BufferState::Empty, false);
    assert_eq!(
        reason_for(ctx.state.dvr.on_ready_request(&hash)),
        DvrNotReadyReason::StreamBooting
    );

    push_health(&ctx, StreamStatus::Offline, BufferState::Empty, false);
    assert_eq!(
        reason_for(ctx.state.dvr.on_ready_request(&hash)),
        DvrNotReadyReason::StreamOffline
    );

    push_health(&ctx, StreamStatus::Live, BufferState::Full, true);
    assert_eq!(
        reason_for(ctx.state.dvr.on_ready_request(&hash)),
        DvrNotReadyReason::StreamUnhealthy
    );

    // Healthy again: ready, with the source URI and recording config.
    push_health(&ctx, StreamStatus::Live, BufferState::Full, false);
    match ctx.state.dvr.on_ready_request(&hash) {
        ControllerMessage::DvrReadyResponse {
            ready,
            source_uri,
            config,
            ..
        } => {
            assert!(ready);
            assert_eq!(
                source_uri,
                format!("dtsc://ingest-1.example:8080/live+{STREAM_MAIN}")
            );
            let config = config.unwrap();
            assert_eq!(config.retention_days, 30);
            assert_eq!(config.segment_duration, 6);
        }
        other => panic!("expected DvrReadyResponse, got {other:?}"),
    }
}

#[tokio::test]
async fn test_recover_buffer_counts_as_ready() {
    let ctx = TestContext::new();
    let _storage_rx = seed_dvr_fleet(&ctx);
    push_health(&ctx, StreamStatus::Live, BufferState::Full, false);
    let hash = ctx
        .state
        .dvr
        .start_dvr(NODE_A, STREAM_MAIN, TENANT_A, "user-1", None)
        .await
        .unwrap();

    push_health(&ctx, StreamStatus::Live, BufferState::Recover, false);
    match ctx.state.dvr.on_ready_request(&hash) {
        ControllerMessage::DvrReadyResponse { ready, .. } => assert!(ready),
        other => panic!("expected DvrReadyResponse, got {other:?}"),
    }
}

#[tokio::test]
async fn test_progress_and_terminal_status_mapping() {
    let ctx = TestContext::new();
    let _storage_rx = seed_dvr_fleet(&ctx);
    push_health(&ctx, StreamStatus::Live, BufferState::Full, false);
    let hash = ctx
        .state
        .dvr
        .start_dvr(NODE_A, STREAM_MAIN, TENANT_A, "user-1", None)
        .await
        .unwrap();

    ctx.state.dvr.on_progress(&hash, "recording", 12, 34_000_000);
    let row = ctx.state.artifacts.get(&hash).unwrap();
    assert_eq!(row.status, ArtifactStatus::Recording);
    assert_eq!(row.segment_count, 12);

    ctx.state
        .dvr
        .on_stopped(&hash, "success", "/mnt/warm/dvr/index.m3u8", 3600, 64_000_000, "");
    let row = ctx.state.artifacts.get(&hash).unwrap();
    assert_eq!(row.status, ArtifactStatus::Completed);
    assert_eq!(row.duration_seconds, 3600);
    assert_eq!(row.manifest_path, "/mnt/warm/dvr/index.m3u8");
}

#[tokio::test]
async fn test_stop_arriving_before_registration_is_deferred() {
    let ctx = TestContext::new();
    let _storage_rx = seed_dvr_fleet(&ctx);
    push_health(&ctx, StreamStatus::Live, BufferState::Full, false);

    // The stream ended before the DVR row existed; the report waits.
    ctx.state
        .dvr
        .on_stopped("early-hash", "success", "", 120, 1_000, "");
    assert!(ctx.state.artifacts.get("early-hash").is_none());

    // Registration with that hash replays the deferred stop.
    ctx.state
        .dvr
        .start_dvr(NODE_A, STREAM_MAIN, TENANT_A, "user-1", Some("early-hash".to_string()))
        .await
        .unwrap();
    let row = ctx.state.artifacts.get("early-hash").unwrap();
    assert_eq!(row.status, ArtifactStatus::Completed);
    assert_eq!(row.duration_seconds, 120);
}

#[tokio::test]
async fn test_start_dvr_without_source_marks_row_failed() {
    let ctx = TestContext::new();
    let _storage_rx = seed_dvr_fleet(&ctx);
    // No health update and no inputs for this stream.
    let err = ctx
        .state
        .dvr
        .start_dvr(NODE_A, "ghost-stream", TENANT_A, "user-1", Some("h-fail".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err, foghorn::core::FoghornError::NoStreamSource);
    let row = ctx.state.artifacts.get("h-fail").unwrap();
    assert_eq!(row.status, ArtifactStatus::Failed);
}

#[tokio::test]
async fn test_storage_node_pick_prefers_headroom() {
    let ctx = TestContext::new();
    let _storage_rx = seed_dvr_fleet(&ctx);

    // A second storage node with far less free disk.
    ctx.state.store.touch_node("node-storage-small", true);
    let mut tight = healthy_metrics();
    tight.cpu_tenths = 950;
    ctx.state
        .store
        .update_node_metrics("node-storage-small", tight);
    ctx.state.store.update_node_attributes(
        "node-storage-small",
        Capabilities {
            storage: true,
            ..Default::default()
        },
        vec![],
        vec![],
        Some(StorageInfo {
            capacity_bytes: 100_000_000_000,
            used_bytes: 99_000_000_000,
            local_path: "/mnt/warm".to_string(),
            s3_bucket: String::new(),
            s3_prefix: String::new(),
        }),
    );

    let picked = ctx.state.dvr.find_storage_node_for_dvr().unwrap();
    assert_eq!(picked.id, NODE_STORAGE);
}

#[tokio::test]
async fn test_deleted_report_emits_no_completed_row() {
    let ctx = TestContext::new();
    let _storage_rx = seed_dvr_fleet(&ctx);
    push_health(&ctx, StreamStatus::Live, BufferState::Full, false);

    let mut artifact = Artifact::new("gone-hash", ArtifactKind::Dvr, STREAM_MAIN, TENANT_A);
    artifact.status = ArtifactStatus::Recording;
    ctx.state.artifacts.insert(artifact);

    ctx.state.dvr.on_stopped("gone-hash", "deleted", "", 0, 0, "");
    let row = ctx.state.artifacts.get("gone-hash").unwrap();
    assert_eq!(row.status, ArtifactStatus::Deleted);
}

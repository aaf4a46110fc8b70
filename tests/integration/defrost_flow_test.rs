// tests/integration/defrost_flow_test.rs

//! The defrost critical section end-to-end: admission race, presigned GET
//! construction, waiter rendezvous, and dispatch-failure rollback.

use super::fixtures::*;
use super::test_helpers::TestContext;
use foghorn::core::FoghornError;
use foghorn::core::artifacts::{Artifact, ArtifactKind, ArtifactStatus, StorageLocation};
use foghorn::core::protocol::{AssetType, ControllerMessage};
use std::time::Duration;

/// Inserts a completed DVR artifact resident in cold storage.
fn seed_cold_dvr(ctx: &TestContext, hash: &str) {
    let mut artifact = Artifact::new(hash, ArtifactKind::Dvr, STREAM_MAIN, TENANT_A);
    artifact.status = ArtifactStatus::Completed;
    artifact.storage_location = StorageLocation::S3;
    artifact.segment_count = 2;
    artifact.format = "ts".to_string();
    artifact.manifest_path = "/mnt/warm/dvr/index.m3u8".to_string();
    ctx.state.artifacts.insert(artifact);
}

#[tokio::test]
async fn test_defrost_race_admits_exactly_one_caller() {
    let ctx = TestContext::new();
    seed_cold_dvr(&ctx, "frozen01");
    let mut node_rx = ctx.connect_node(NODE_STORAGE);

    // Winner starts the transfer and parks on the waiter list.
    let state = ctx.state.clone();
    let winner = tokio::spawn(async move {
        state
            .defrost
            .start_defrost(
                AssetType::Dvr,
                "frozen01",
                NODE_STORAGE,
                Some(Duration::from_secs(5)),
            )
            .await
    });

    // Exactly one DefrostRequest reaches the node.
    let command = node_rx.recv().await.unwrap();
    let ControllerMessage::DefrostRequest {
        hash,
        presigned_get_url,
        segment_urls,
        local_path,
        ..
    } = command
    else {
        panic!("expected DefrostRequest");
    };
    assert_eq!(hash, "frozen01");
    assert!(presigned_get_url.is_none());
    // Two segments plus the manifest, each with a signed GET.
    assert_eq!(segment_urls.len(), 3);
    assert!(segment_urls.contains_key("index.m3u8"));
    assert!(segment_urls.values().all(|u| u.contains("X-Signature=")));
    assert_eq!(local_path, format!("/var/lib/frameworks/dvr/{STREAM_MAIN}/frozen01"));

    // The loser gets the typed back-off error in non-wait mode.
    let lost = ctx
        .state
        .defrost
        .start_defrost(AssetType::Dvr, "frozen01", NODE_STORAGE, None)
        .await
        .unwrap_err();
    assert_eq!(
        lost,
        FoghornError::Defrosting {
            retry_after_seconds: 10
        }
    );

    // Completion unparks the winner with the warm path.
    ctx.state.defrost.on_defrost_complete(
        NODE_STORAGE,
        "frozen01",
        true,
        "/mnt/warm/dvr/frozen01",
        "",
    );
    let outcome = winner.await.unwrap().unwrap().unwrap();
    assert!(outcome.ok);
    assert_eq!(outcome.local_path, "/mnt/warm/dvr/frozen01");

    // The row ended warm, with a placement for the reporting node.
    let row = ctx.state.artifacts.get("frozen01").unwrap();
    assert_eq!(row.storage_location, StorageLocation::Local);
    assert!(row.defrost_node_id.is_none());
    let placements = ctx.state.artifacts.find_nodes_by_artifact_hash("frozen01");
    assert_eq!(placements.len(), 1);
    assert_eq!(placements[0].node_id, NODE_STORAGE);
}

#[tokio::test]
async fn test_defrost_of_warm_artifact_is_a_no_op() {
    let ctx = TestContext::new();
    let mut artifact = Artifact::new("warm01", ArtifactKind::Clip, STREAM_MAIN, TENANT_A);
    artifact.storage_location = StorageLocation::Local;
    artifact.local_path = Some("/mnt/warm/clips/warm01.mp4".to_string());
    ctx.state.artifacts.insert(artifact);

    let outcome = ctx
        .state
        .defrost
        .start_defrost(AssetType::Clip, "warm01", NODE_STORAGE, None)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.ok);
    assert_eq!(outcome.local_path, "/mnt/warm/clips/warm01.mp4");
}

#[tokio::test]
async fn test_dispatch_failure_rolls_the_admission_back() {
    let ctx = TestContext::new();
    seed_cold_dvr(&ctx, "frozen02");
    // No node connected and no owner record: the send must fail.

    let err = ctx
        .state
        .defrost
        .start_defrost(AssetType::Dvr, "frozen02", NODE_STORAGE, None)
        .await
        .unwrap_err();
    assert!(matches!(err, FoghornError::NotConnected(_)));

    // The row reverted to S3 so a later caller can win the admission again.
    let row = ctx.state.artifacts.get("frozen02").unwrap();
    assert_eq!(row.storage_location, StorageLocation::S3);
    assert!(row.defrost_node_id.is_none());
}

#[tokio::test]
async fn test_completion_from_wrong_node_is_ignored() {
    let ctx = TestContext::new();
    seed_cold_dvr(&ctx, "frozen03");
    let _node_rx = ctx.connect_node(NODE_STORAGE);

    ctx.state
        .defrost
        .start_defrost(AssetType::Dvr, "frozen03", NODE_STORAGE, None)
        .await
        .unwrap();

    // A different node claims success; the admission token does not match.
    ctx.state
        .defrost
        .on_defrost_complete("impostor-node", "frozen03", true, "/tmp/x", "");
    let row = ctx.state.artifacts.get("frozen03").unwrap();
    assert_eq!(row.storage_location, StorageLocation::Defrosting);
    assert_eq!(row.defrost_node_id.as_deref(), Some(NODE_STORAGE));

    // The admitted node's report lands.
    ctx.state.defrost.on_defrost_complete(
        NODE_STORAGE,
        "frozen03",
        true,
        "/mnt/warm/dvr/frozen03",
        "",
    );
    let row = ctx.state.artifacts.get("frozen03").unwrap();
    assert_eq!(row.storage_location, StorageLocation::Local);
}

#[tokio::test]
async fn test_failed_defrost_reverts_and_wakes_waiters_negatively() {
    let ctx = TestContext::new();
    seed_cold_dvr(&ctx, "frozen04");
    let _node_rx = ctx.connect_node(NODE_STORAGE);

    let state = ctx.state.clone();
    let waiter = tokio::spawn(async move {
        state
            .defrost
            .start_defrost(
                AssetType::Dvr,
                "frozen04",
                NODE_STORAGE,
                Some(Duration::from_secs(5)),
            )
            .await
    });
    // Give the winner time to dispatch and park.
    tokio::time::sleep(Duration::from_millis(50)).await;

    ctx.state
        .defrost
        .on_defrost_complete(NODE_STORAGE, "frozen04", false, "", "disk full");

    let outcome = waiter.await.unwrap().unwrap().unwrap();
    assert!(!outcome.ok);
    assert!(outcome.local_path.is_empty());

    let row = ctx.state.artifacts.get("frozen04").unwrap();
    assert_eq!(row.storage_location, StorageLocation::S3);
}

#[tokio::test]
async fn test_waiter_timeout_leaves_the_transfer_running() {
    let ctx = TestContext::new();
    seed_cold_dvr(&ctx, "frozen05");
    let _node_rx = ctx.connect_node(NODE_STORAGE);

    ctx.state
        .defrost
        .start_defrost(AssetType::Dvr, "frozen05", NODE_STORAGE, None)
        .await
        .unwrap();

    // A joining caller times out without disturbing the in-flight defrost.
    let err = ctx
        .state
        .defrost
        .start_defrost(
            AssetType::Dvr,
            "frozen05",
            NODE_STORAGE,
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FoghornError::Timeout(_)));

    let row = ctx.state.artifacts.get("frozen05").unwrap();
    assert_eq!(row.storage_location, StorageLocation::Defrosting);

    // The transfer can still complete normally afterwards.
    ctx.state.defrost.on_defrost_complete(
        NODE_STORAGE,
        "frozen05",
        true,
        "/mnt/warm/dvr/frozen05",
        "",
    );
    assert_eq!(
        ctx.state.artifacts.get("frozen05").unwrap().storage_location,
        StorageLocation::Local
    );
}

#[tokio::test]
async fn test_clip_defrost_uses_single_url_and_clip_path() {
    let ctx = TestContext::new();
    let mut artifact = Artifact::new("clip-cold", ArtifactKind::Clip, STREAM_MAIN, TENANT_A);
    artifact.storage_location = StorageLocation::S3;
    ctx.state.artifacts.insert(artifact);
    let mut node_rx = ctx.connect_node(NODE_STORAGE);

    ctx.state
        .defrost
        .start_defrost(AssetType::Clip, "clip-cold", NODE_STORAGE, None)
        .await
        .unwrap();

    let command = node_rx.recv().await.unwrap();
    let ControllerMessage::DefrostRequest {
        presigned_get_url,
        segment_urls,
        local_path,
        ..
    } = command
    else {
        panic!("expected DefrostRequest");
    };
    let url = presigned_get_url.expect("single URL for a clip");
    assert!(url.contains("/artifacts/clips/"));
    assert!(url.contains("X-Expires="));
    assert!(segment_urls.is_empty());
    assert_eq!(local_path, "/var/lib/frameworks/clips/clip-cold.mp4");
}

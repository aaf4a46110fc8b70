// tests/unit_freeze_test.rs

//! Freeze permission brokering: URL shapes per asset type, storage-location
//! mutations, completion handling, and delete safety.

use foghorn::core::artifacts::{
    Artifact, ArtifactKind, ArtifactStore, StorageLocation, SyncStatus,
};
use foghorn::core::clients::StaticBusinessRegistry;
use foghorn::core::presign::Presigner;
use foghorn::core::protocol::{AssetType, ControllerMessage};
use foghorn::core::workflows::FreezeEngine;
use std::sync::Arc;
use std::time::Duration;

fn engine() -> (FreezeEngine, Arc<ArtifactStore>) {
    let artifacts = Arc::new(ArtifactStore::new());
    let registry = Arc::new(StaticBusinessRegistry::new());
    let presigner = Presigner::new(
        "https://s3.test.example",
        "artifacts",
        b"secret",
        Duration::from_secs(1800),
    );
    let engine = FreezeEngine::new(
        artifacts.clone(),
        registry,
        presigner,
        "https://s3.test.example".to_string(),
        "artifacts".to_string(),
    );
    (engine, artifacts)
}

fn seed_clip(artifacts: &ArtifactStore, hash: &str) {
    let mut artifact = Artifact::new(hash, ArtifactKind::Clip, "stream-x", "tenant-x");
    artifact.storage_location = StorageLocation::Local;
    artifacts.insert(artifact);
}

fn seed_dvr(artifacts: &ArtifactStore, hash: &str) {
    let mut artifact = Artifact::new(hash, ArtifactKind::Dvr, "stream-x", "tenant-x");
    artifact.storage_location = StorageLocation::Local;
    artifacts.insert(artifact);
}

#[tokio::test]
async fn test_clip_freeze_gets_a_single_put_url_and_marks_freezing() {
    let (engine, artifacts) = engine();
    seed_clip(&artifacts, "clip1");

    let reply = engine
        .on_permission_request("req1", AssetType::Clip, "clip1", "/mnt/warm/clips/clip1.mp4", &[])
        .await;
    let ControllerMessage::FreezePermissionResponse {
        approved,
        url_expiry_seconds,
        presigned_put_url,
        segment_urls,
        ..
    } = reply
    else {
        panic!("expected FreezePermissionResponse");
    };
    assert!(approved);
    assert_eq!(url_expiry_seconds, 1800);
    let url = presigned_put_url.unwrap();
    assert!(url.contains("/artifacts/clips/tenant-x/clip1.mp4"));
    assert!(segment_urls.is_empty());

    let row = artifacts.get("clip1").unwrap();
    assert_eq!(row.storage_location, StorageLocation::Freezing);
    assert_eq!(row.sync_status, SyncStatus::InProgress);
}

#[tokio::test]
async fn test_segment_freeze_is_incremental() {
    let (engine, artifacts) = engine();
    seed_dvr(&artifacts, "dvr1");

    let reply = engine
        .on_permission_request(
            "req2",
            AssetType::DvrSegment,
            "dvr1",
            "/mnt/warm/dvr/stream-x/dvr1/segment_00004.ts",
            &[],
        )
        .await;
    let ControllerMessage::FreezePermissionResponse {
        approved,
        presigned_put_url,
        ..
    } = reply
    else {
        panic!("expected FreezePermissionResponse");
    };
    assert!(approved);
    assert!(
        presigned_put_url
            .unwrap()
            .contains("/artifacts/dvr/stream-x/dvr1/segment_00004.ts")
    );

    // Incremental uploads never flip the storage location.
    let row = artifacts.get("dvr1").unwrap();
    assert_eq!(row.storage_location, StorageLocation::Local);
    assert_eq!(row.sync_status, SyncStatus::Pending);
}

#[tokio::test]
async fn test_whole_dvr_freeze_maps_every_file() {
    let (engine, artifacts) = engine();
    seed_dvr(&artifacts, "dvr2");

    let files = vec![
        "segment_00000.ts".to_string(),
        "segment_00001.ts".to_string(),
        "index.m3u8".to_string(),
    ];
    let reply = engine
        .on_permission_request("req3", AssetType::Dvr, "dvr2", "/mnt/warm/dvr/stream-x/dvr2", &files)
        .await;
    let ControllerMessage::FreezePermissionResponse {
        approved,
        presigned_put_url,
        segment_urls,
        ..
    } = reply
    else {
        panic!("expected FreezePermissionResponse");
    };
    assert!(approved);
    assert!(presigned_put_url.is_none());
    assert_eq!(segment_urls.len(), 3);
    for file in &files {
        assert!(
            segment_urls[file].contains(&format!("/artifacts/dvr/stream-x/dvr2/{file}")),
            "bad url for {file}: {}",
            segment_urls[file]
        );
    }
    assert_eq!(
        artifacts.get("dvr2").unwrap().storage_location,
        StorageLocation::Freezing
    );
}

#[tokio::test]
async fn test_whole_dvr_freeze_without_file_list_is_denied() {
    let (engine, artifacts) = engine();
    seed_dvr(&artifacts, "dvr3");

    let reply = engine
        .on_permission_request("req4", AssetType::Dvr, "dvr3", "", &[])
        .await;
    let ControllerMessage::FreezePermissionResponse { approved, reason, .. } = reply else {
        panic!("expected FreezePermissionResponse");
    };
    assert!(!approved);
    assert!(!reason.is_empty());
}

#[tokio::test]
async fn test_unknown_artifact_with_unknown_hash_is_denied() {
    let (engine, _artifacts) = engine();
    let reply = engine
        .on_permission_request("req5", AssetType::Clip, "mystery", "/x.mp4", &[])
        .await;
    let ControllerMessage::FreezePermissionResponse { approved, .. } = reply else {
        panic!("expected FreezePermissionResponse");
    };
    assert!(!approved);
}

#[tokio::test]
async fn test_freeze_complete_keeps_the_warm_copy() {
    let (engine, artifacts) = engine();
    seed_clip(&artifacts, "clip2");

    engine.on_complete("clip2", true, "s3://artifacts/clips/tenant-x/clip2.mp4", "");
    let row = artifacts.get("clip2").unwrap();
    assert_eq!(row.sync_status, SyncStatus::Synced);
    assert_eq!(row.storage_location, StorageLocation::Local);
    assert_eq!(
        row.s3_url.as_deref(),
        Some("s3://artifacts/clips/tenant-x/clip2.mp4")
    );
}

#[tokio::test]
async fn test_freeze_failure_marks_sync_failed() {
    let (engine, artifacts) = engine();
    seed_clip(&artifacts, "clip3");
    engine.on_complete("clip3", false, "", "upload interrupted");
    assert_eq!(artifacts.get("clip3").unwrap().sync_status, SyncStatus::Failed);
}

#[tokio::test]
async fn test_sync_complete_computes_missing_s3_url() {
    let (engine, artifacts) = engine();
    seed_clip(&artifacts, "clip4");
    engine.on_sync_complete("clip4", None, 1024, false);
    let row = artifacts.get("clip4").unwrap();
    assert_eq!(row.sync_status, SyncStatus::Synced);
    assert_eq!(
        row.s3_url.as_deref(),
        Some("https://s3.test.example/artifacts/clips/tenant-x/clip4")
    );
}

#[tokio::test]
async fn test_can_delete_requires_synced_state() {
    let (engine, artifacts) = engine();
    seed_clip(&artifacts, "clip5");

    let reply = engine.on_can_delete("req6", "clip5");
    let ControllerMessage::CanDeleteResponse { safe_to_delete, .. } = reply else {
        panic!("expected CanDeleteResponse");
    };
    assert!(!safe_to_delete);

    artifacts.set_sync_status("clip5", SyncStatus::Synced, None);
    let mut row = artifacts.get("clip5").unwrap();
    row.duration_seconds = 90;
    artifacts.insert(row);

    let reply = engine.on_can_delete("req7", "clip5");
    let ControllerMessage::CanDeleteResponse {
        safe_to_delete,
        warm_duration_ms,
        ..
    } = reply
    else {
        panic!("expected CanDeleteResponse");
    };
    assert!(safe_to_delete);
    assert_eq!(warm_duration_ms, Some(90_000));
}

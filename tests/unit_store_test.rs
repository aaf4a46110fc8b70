// tests/unit_store_test.rs

//! State-store behavior: heartbeat shells, metric decay, viewer penalties,
//! stream instance bookkeeping, and the staleness sweep.

use foghorn::core::protocol::{BufferState, LoadMetrics, StreamStats, StreamStatus};
use foghorn::core::state::StateStore;
use std::collections::HashMap;
use std::time::Duration;

fn metrics(bw_limit: u64) -> LoadMetrics {
    LoadMetrics {
        cpu_tenths: 200,
        ram_max_mib: 8192,
        ram_used_mib: 1024,
        up_speed: 1_000_000,
        down_speed: 500_000,
        bw_limit,
        disk_used_bytes: 0,
        disk_total_bytes: 0,
    }
}

#[test]
fn test_touch_creates_a_node_shell() {
    let store = StateStore::new();
    store.touch_node("fresh", true);
    let node = store.get_node("fresh").unwrap();
    assert!(node.is_active);
    assert!(node.is_healthy);
    assert!(node.last_update.is_some());
}

#[test]
fn test_metrics_update_decays_the_admission_penalty() {
    let store = StateStore::new();
    store.touch_node("n1", true);
    store.update_node_metrics("n1", metrics(100_000_000));
    // Build a penalty through two selections.
    let mut streams = HashMap::new();
    streams.insert("s".to_string(), StreamStats::default());
    store.update_node_stats("n1", &streams);
    store.add_viewer("n1", "s");
    store.add_viewer("n1", "s");
    let before = store.get_node("n1").unwrap().add_bandwidth;
    assert_eq!(before, 2 * 131_072);

    store.update_node_metrics("n1", metrics(100_000_000));
    let after = store.get_node("n1").unwrap().add_bandwidth;
    assert_eq!(after, before * 3 / 4);
}

#[test]
fn test_viewer_penalty_uses_measured_bandwidth_clamped() {
    let store = StateStore::new();
    store.touch_node("n1", true);
    store.update_node_metrics("n1", metrics(100_000_000));

    // A measured per-viewer bandwidth beyond the cap clamps down.
    let mut streams = HashMap::new();
    streams.insert(
        "big".to_string(),
        StreamStats {
            bandwidth: 50_000_000,
            ..Default::default()
        },
    );
    store.update_node_stats("n1", &streams);
    store.add_viewer("n1", "big");
    assert_eq!(store.get_node("n1").unwrap().add_bandwidth, 1024 * 1024);

    // A tiny measured bandwidth clamps up to the floor.
    let mut streams = HashMap::new();
    streams.insert(
        "small".to_string(),
        StreamStats {
            bandwidth: 1000,
            ..Default::default()
        },
    );
    store.update_node_stats("n1", &streams);
    let before = store.get_node("n1").unwrap().add_bandwidth;
    store.add_viewer("n1", "small");
    assert_eq!(
        store.get_node("n1").unwrap().add_bandwidth - before,
        64 * 1024
    );
}

#[test]
fn test_disconnect_clears_instances_and_liveness() {
    let store = StateStore::new();
    store.touch_node("n1", true);
    let mut streams = HashMap::new();
    streams.insert(
        "s".to_string(),
        StreamStats {
            inputs: 1,
            ..Default::default()
        },
    );
    store.update_node_stats("n1", &streams);
    assert_eq!(store.get_stream_instances("s").len(), 1);

    store.mark_node_disconnected("n1");
    let node = store.get_node("n1").unwrap();
    assert!(!node.is_active);
    assert!(store.get_stream_instances("s").is_empty());
}

#[test]
fn test_unreported_instances_are_dropped_on_update() {
    let store = StateStore::new();
    let mut streams = HashMap::new();
    streams.insert("s1".to_string(), StreamStats::default());
    streams.insert("s2".to_string(), StreamStats::default());
    store.update_node_stats("n1", &streams);

    let mut streams = HashMap::new();
    streams.insert("s1".to_string(), StreamStats::default());
    store.update_node_stats("n1", &streams);

    assert_eq!(store.get_stream_instances("s1").len(), 1);
    assert!(store.get_stream_instances("s2").is_empty());
}

#[test]
fn test_buffer_updates_union_viewers_across_nodes() {
    let store = StateStore::new();
    let stats_a = StreamStats {
        total: 7,
        inputs: 1,
        ..Default::default()
    };
    let stats_b = StreamStats {
        total: 5,
        ..Default::default()
    };
    store.update_stream_from_buffer(
        "node-a",
        "s",
        StreamStatus::Live,
        BufferState::Full,
        false,
        "",
        &stats_a,
    );
    store.update_stream_from_buffer(
        "node-b",
        "s",
        StreamStatus::Live,
        BufferState::Full,
        false,
        "",
        &stats_b,
    );

    let unified = store.get_unified_stream("s").unwrap();
    assert_eq!(unified.viewers, 12);
    assert_eq!(unified.status, StreamStatus::Live);
    assert_eq!(unified.buffer_state, BufferState::Full);
    // The first node with inputs became the primary.
    assert_eq!(unified.primary_node.as_deref(), Some("node-a"));
}

#[test]
fn test_instance_info_tags_merge() {
    let store = StateStore::new();
    let mut info = HashMap::new();
    info.insert("dvr_status".to_string(), "recording".to_string());
    store.update_stream_instance_info("n1", "s", &info);
    let mut info = HashMap::new();
    info.insert("dvr_source_uri".to_string(), "dtsc://x/live+s".to_string());
    store.update_stream_instance_info("n1", "s", &info);

    let instances = store.get_stream_instances("s");
    assert_eq!(instances.len(), 1);
    assert_eq!(
        instances[0].info.get("dvr_status").map(String::as_str),
        Some("recording")
    );
    assert_eq!(
        instances[0].info.get("dvr_source_uri").map(String::as_str),
        Some("dtsc://x/live+s")
    );
}

#[test]
fn test_sweep_ignores_nodes_without_a_baseline() {
    let store = StateStore::new();
    // Known through descriptive info only; no update has ever arrived.
    store.set_node_info("never-updated", "http://x.example", true, None, "");
    let outcome = store.sweep_stale_nodes(Duration::from_secs(0), Duration::from_secs(0));
    assert!(outcome.removed.is_empty());
    assert!(store.get_node("never-updated").is_some());
}

#[test]
fn test_sweep_marks_inactive_then_removes() {
    let store = StateStore::new();
    store.touch_node("n1", true);

    // Inactive threshold of zero trips immediately; removal stays far off.
    let outcome = store.sweep_stale_nodes(Duration::from_secs(0), Duration::from_secs(3600));
    assert_eq!(outcome.marked_inactive, vec!["n1".to_string()]);
    assert!(!store.get_node("n1").unwrap().is_active);

    // Removal threshold of zero evicts.
    let outcome = store.sweep_stale_nodes(Duration::from_secs(0), Duration::from_secs(0));
    assert_eq!(outcome.removed, vec!["n1".to_string()]);
    assert!(store.get_node("n1").is_none());
}

#[test]
fn test_find_source_prefers_primary_node() {
    let store = StateStore::new();
    let source_stats = StreamStats {
        inputs: 1,
        ..Default::default()
    };
    store.update_stream_from_buffer(
        "node-b",
        "s",
        StreamStatus::Live,
        BufferState::Full,
        false,
        "",
        &source_stats,
    );
    // A second source appears; the primary keeps winning.
    store.update_stream_from_buffer(
        "node-a",
        "s",
        StreamStatus::Live,
        BufferState::Full,
        false,
        "",
        &source_stats,
    );
    assert_eq!(store.find_source_node("s").as_deref(), Some("node-b"));
}

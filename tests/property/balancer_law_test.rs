// tests/property/balancer_law_test.rs

//! Laws of the admission penalty and tag matching.

use foghorn::core::balancer::apply_adjustment;
use foghorn::core::protocol::LoadMetrics;
use foghorn::core::state::StateStore;
use proptest::prelude::*;

fn metrics() -> LoadMetrics {
    LoadMetrics {
        cpu_tenths: 100,
        ram_max_mib: 8192,
        ram_used_mib: 1024,
        up_speed: 1_000_000,
        down_speed: 0,
        bw_limit: 1_000_000_000,
        disk_used_bytes: 0,
        disk_total_bytes: 0,
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// After k metric updates with no selections, the penalty is bounded by
    /// 0.75^k of the initial value.
    #[test]
    fn penalty_decays_geometrically(
        selections in 1usize..=8,
        updates in 0usize..=10,
    ) {
        let store = StateStore::new();
        store.touch_node("n", true);
        store.update_node_metrics("n", metrics());
        for _ in 0..selections {
            store.add_viewer("n", "s");
        }
        let initial = store.get_node("n").unwrap().add_bandwidth;

        for _ in 0..updates {
            store.update_node_metrics("n", metrics());
        }
        let decayed = store.get_node("n").unwrap().add_bandwidth;

        let bound = (initial as f64) * 0.75f64.powi(updates as i32);
        prop_assert!(
            decayed as f64 <= bound + 1.0,
            "decayed {} exceeds bound {} after {} updates",
            decayed,
            bound,
            updates
        );
    }

    /// A matcher and its inversion are complementary: exactly one applies.
    #[test]
    fn tag_match_inversion_is_complementary(
        node_tags in proptest::collection::vec("[a-z]{1,6}", 0..5),
        wanted in proptest::collection::vec("[a-z]{1,6}", 1..4),
        delta in 1i64..=10_000,
    ) {
        let expr = wanted.join(",");
        let inverted = format!("-{expr}");
        let straight = apply_adjustment(&node_tags, &expr, delta);
        let negated = apply_adjustment(&node_tags, &inverted, delta);
        prop_assert_eq!(straight + negated, delta);
    }

    /// The penalty never goes negative and never jumps past the clamp ceiling
    /// in a single selection.
    #[test]
    fn penalty_growth_is_clamped(selections in 1usize..=16) {
        let store = StateStore::new();
        store.touch_node("n", true);
        store.update_node_metrics("n", metrics());
        let mut last = 0u64;
        for _ in 0..selections {
            store.add_viewer("n", "s");
            let now = store.get_node("n").unwrap().add_bandwidth;
            let step = now - last;
            prop_assert!((64 * 1024..=1024 * 1024).contains(&step));
            last = now;
        }
    }
}

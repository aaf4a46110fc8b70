// tests/property/geo_law_test.rs

//! Laws of the normalized great-circle distance.

use foghorn::core::balancer::geo::normalized_distance;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    #[test]
    fn geo_distance_is_bounded(
        lat1 in -90.0f64..=90.0,
        lon1 in -180.0f64..=180.0,
        lat2 in -90.0f64..=90.0,
        lon2 in -180.0f64..=180.0,
    ) {
        let d = normalized_distance(lat1, lon1, lat2, lon2);
        prop_assert!((0.0..=1.0).contains(&d), "distance {} out of [0, 1]", d);
    }

    #[test]
    fn geo_distance_is_symmetric(
        lat1 in -90.0f64..=90.0,
        lon1 in -180.0f64..=180.0,
        lat2 in -90.0f64..=90.0,
        lon2 in -180.0f64..=180.0,
    ) {
        let forward = normalized_distance(lat1, lon1, lat2, lon2);
        let backward = normalized_distance(lat2, lon2, lat1, lon1);
        prop_assert!((forward - backward).abs() < 1e-12);
    }

    #[test]
    fn geo_distance_to_self_is_zero(
        lat in -90.0f64..=90.0,
        lon in -180.0f64..=180.0,
    ) {
        let d = normalized_distance(lat, lon, lat, lon);
        prop_assert!(d.abs() < 1e-6, "self distance was {}", d);
    }
}

// src/core/balancer/geo.rs

//! Great-circle distance, normalized to [0, 1] for the geo score component.

/// Normalized spherical distance between two coordinates:
/// `acos(sin phi1 sin phi2 + cos phi1 cos phi2 cos(lambda1 - lambda2)) / pi`.
/// Symmetric, bounded in [0, 1]; antipodal points score 1.
pub fn normalized_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lambda = (lon1 - lon2).to_radians();

    // Floating error can push the cosine a hair outside [-1, 1].
    let cos_angle =
        (phi1.sin() * phi2.sin() + phi1.cos() * phi2.cos() * d_lambda.cos()).clamp(-1.0, 1.0);
    cos_angle.acos() / std::f64::consts::PI
}

/// Whether a coordinate pair carries usable data. A zero lat or lon means the
/// side never reported a location, and the geo component is skipped entirely.
pub fn has_coordinates(lat: f64, lon: f64) -> bool {
    lat != 0.0 && lon != 0.0
}

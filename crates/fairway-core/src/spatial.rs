//! Spatial math shared by the lane and graph stages.
//!
//! All lane geometry lives in a planar web-mercator projection (meters),
//! with y growing north. Bearings are degrees clockwise from north, the
//! same frame as vessel course-over-ground.

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const METERS_PER_NM: f64 = 1_852.0;

/// A point in the projected plane, meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projected {
    pub x: f64,
    pub y: f64,
}

/// Great-circle distance between two lat/lon points in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Great-circle distance in nautical miles.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine_m(lat1, lon1, lat2, lon2) / METERS_PER_NM
}

/// Forward web-mercator projection, lat/lon degrees to meters.
pub fn project(lat: f64, lon: f64) -> Projected {
    let x = EARTH_RADIUS_M * lon.to_radians();
    let y = EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0)
        .tan()
        .ln();
    Projected { x, y }
}

/// Inverse web-mercator projection, meters back to (lat, lon) degrees.
pub fn unproject(p: Projected) -> (f64, f64) {
    let lon = (p.x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (p.y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2)
        .to_degrees();
    (lat, lon)
}

/// Bearing from `a` to `b` in the projected plane, degrees clockwise
/// from north, normalized to [0, 360).
pub fn bearing_deg(a: Projected, b: Projected) -> f64 {
    let theta = (b.x - a.x).atan2(b.y - a.y).to_degrees();
    normalize_deg(theta)
}

/// Normalize an angle in degrees to [0, 360).
pub fn normalize_deg(deg: f64) -> f64 {
    let d = deg % 360.0;
    if d < 0.0 {
        d + 360.0
    } else {
        d
    }
}

/// Signed angular difference `a - b`, wrapped to [-180, 180].
pub fn angle_diff_deg(a: f64, b: f64) -> f64 {
    let mut d = (a - b) % 360.0;
    if d > 180.0 {
        d -= 360.0;
    } else if d < -180.0 {
        d += 360.0;
    }
    d
}

/// Circular mean of course angles in degrees, normalized to [0, 360).
///
/// Returns 0.0 for an empty slice; callers only reach this with
/// non-empty clusters.
pub fn circular_mean_deg(angles: &[f64]) -> f64 {
    if angles.is_empty() {
        return 0.0;
    }
    let (sin_sum, cos_sum) = angles.iter().fold((0.0_f64, 0.0_f64), |(s, c), a| {
        let r = a.to_radians();
        (s + r.sin(), c + r.cos())
    });
    normalize_deg(sin_sum.atan2(cos_sum).to_degrees())
}

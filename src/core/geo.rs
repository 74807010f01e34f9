//! Geodesic Helpers
//!
//! Great-circle distance on a spherical Earth. Good to well under a meter
//! at the short ranges the duplicate and motion filters care about.

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two `(latitude, longitude)` pairs in degrees.
///
/// # Example
///
/// ```
/// use location_bridge::core::geo::haversine_m;
///
/// // One degree of latitude is roughly 111 km
/// let d = haversine_m((0.0, 0.0), (1.0, 0.0));
/// assert!((d - 111_195.0).abs() < 10.0);
/// ```
pub fn haversine_m(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lng1) = from;
    let (lat2, lng2) = to;

    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    EARTH_RADIUS_M * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Offset a position by a distance due north, in meters.
///
/// Handy for building fixes a known distance apart.
pub fn offset_north(from: (f64, f64), meters: f64) -> (f64, f64) {
    let d_lat = (meters / EARTH_RADIUS_M).to_degrees();
    (from.0 + d_lat, from.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_distance() {
        assert_eq!(haversine_m((31.2, 121.5), (31.2, 121.5)), 0.0);
    }

    #[test]
    fn test_offset_north_round_trip() {
        let origin = (31.2304, 121.4737);
        for meters in [0.5, 1.0, 3.0, 5.0, 250.0] {
            let moved = offset_north(origin, meters);
            let d = haversine_m(origin, moved);
            assert!((d - meters).abs() < 0.01, "expected {meters}, got {d}");
        }
    }

    proptest! {
        #[test]
        fn prop_symmetric(lat1 in -80.0f64..80.0, lng1 in -179.0f64..179.0,
                          lat2 in -80.0f64..80.0, lng2 in -179.0f64..179.0) {
            let a = haversine_m((lat1, lng1), (lat2, lng2));
            let b = haversine_m((lat2, lng2), (lat1, lng1));
            prop_assert!((a - b).abs() < 1e-6);
            prop_assert!(a >= 0.0);
            prop_assert!(a <= std::f64::consts::PI * EARTH_RADIUS_M + 1.0);
        }
    }
}

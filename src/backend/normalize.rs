//! Coordinate Normalization
//!
//! The fallback backend reports WGS-84 while the rest of the system works
//! in the native backend's datum. The datum shift itself is an external
//! pure function supplied by the host as a [`CoordinateTransform`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::fix::{CoordinateSystem, Fix};

/// Pure datum transform.
pub trait CoordinateTransform: Send + Sync {
    /// Convert `(latitude, longitude)` from one system to another.
    fn transform(&self, lat_lng: (f64, f64), from: CoordinateSystem, to: CoordinateSystem) -> (f64, f64);
}

impl<F> CoordinateTransform for F
where
    F: Fn((f64, f64), CoordinateSystem, CoordinateSystem) -> (f64, f64) + Send + Sync,
{
    fn transform(&self, lat_lng: (f64, f64), from: CoordinateSystem, to: CoordinateSystem) -> (f64, f64) {
        self(lat_lng, from, to)
    }
}

/// Converts fixes to the target datum.
pub struct CoordinateNormalizer {
    target: CoordinateSystem,
    transform: Option<Arc<dyn CoordinateTransform>>,
    warned: AtomicBool,
}

impl CoordinateNormalizer {
    /// Normalize to `target` using `transform`. Without a transform, fixes
    /// keep their source datum label.
    pub fn new(target: CoordinateSystem, transform: Option<Arc<dyn CoordinateTransform>>) -> Self {
        Self {
            target,
            transform,
            warned: AtomicBool::new(false),
        }
    }

    /// Datum fixes are converted to.
    pub fn target(&self) -> CoordinateSystem {
        self.target
    }

    /// Return `fix` expressed in the target datum when possible.
    pub fn normalize(&self, fix: Fix) -> Fix {
        if fix.coordinate_system == self.target {
            return fix;
        }

        let Some(transform) = &self.transform else {
            if !self.warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    from = %fix.coordinate_system,
                    to = %self.target,
                    "No coordinate transform available, leaving fixes untransformed"
                );
            }
            return fix;
        };

        let (latitude, longitude) =
            transform.transform((fix.latitude, fix.longitude), fix.coordinate_system, self.target);
        Fix {
            latitude,
            longitude,
            coordinate_system: self.target,
            ..fix
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fix::FixSource;

    fn wgs_fix() -> Fix {
        Fix {
            latitude: 31.0,
            longitude: 121.0,
            accuracy_m: 30.0,
            heading_deg: Some(90.0),
            speed_mps: None,
            timestamp_ms: 0,
            source: FixSource::FallbackNetwork,
            coordinate_system: CoordinateSystem::Wgs84,
        }
    }

    #[test]
    fn test_applies_transform_and_relabels() {
        let shift = |(lat, lng): (f64, f64), _: CoordinateSystem, _: CoordinateSystem| (lat + 0.002, lng + 0.004);
        let normalizer = CoordinateNormalizer::new(CoordinateSystem::Gcj02, Some(Arc::new(shift)));

        let out = normalizer.normalize(wgs_fix());
        assert_eq!(out.coordinate_system, CoordinateSystem::Gcj02);
        assert!((out.latitude - 31.002).abs() < 1e-9);
        assert!((out.longitude - 121.004).abs() < 1e-9);
        assert_eq!(out.heading_deg, Some(90.0));
    }

    #[test]
    fn test_without_transform_keeps_source_label() {
        let normalizer = CoordinateNormalizer::new(CoordinateSystem::Gcj02, None);
        let out = normalizer.normalize(wgs_fix());
        assert_eq!(out, wgs_fix());
    }

    #[test]
    fn test_target_datum_passes_through() {
        let normalizer = CoordinateNormalizer::new(CoordinateSystem::Wgs84, None);
        assert_eq!(normalizer.normalize(wgs_fix()), wgs_fix());
    }
}

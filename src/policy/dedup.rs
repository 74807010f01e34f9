//! Duplicate & Motion Filtering
//!
//! Two independent checks against the last accepted fix:
//!
//! - **Duplicate**: closer than `min_time_diff_ms` in time *and*
//!   `min_distance_m` in space. Applies to every fix.
//! - **Motion**: a continuous-watch fix that moved less than the mode's
//!   minimum movement. Never applies to one-shot fixes.

use crate::config::DedupConfig;
use crate::core::fix::Fix;
use crate::core::mode::WatchMode;

/// Outcome of the duplicate and motion checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DedupVerdict {
    /// New information.
    Fresh,
    /// Near-identical to the last accepted fix.
    Duplicate {
        /// Time between the two fixes.
        dt_ms: i64,
        /// Distance between the two fixes.
        distance_m: f64,
    },
    /// Watch fix that did not move far enough.
    BelowMotion {
        /// Distance moved.
        distance_m: f64,
        /// Minimum for the active mode.
        min_m: f64,
    },
}

/// Remembers the last accepted fix and filters against it.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    config: DedupConfig,
    last: Option<Fix>,
}

impl Deduplicator {
    /// Create from configuration.
    pub fn new(config: DedupConfig) -> Self {
        Self { config, last: None }
    }

    /// Last accepted fix.
    pub fn last(&self) -> Option<&Fix> {
        self.last.as_ref()
    }

    /// Minimum movement for a watch mode.
    pub fn min_movement_m(&self, mode: WatchMode) -> f64 {
        match mode {
            WatchMode::Browse => self.config.browse_min_movement_m,
            WatchMode::Running => self.config.running_min_movement_m,
        }
    }

    /// Check a candidate. `watch` is the active mode when the fix arrived
    /// through a continuous watch, `None` for one-shot fixes.
    pub fn check(&self, fix: &Fix, watch: Option<WatchMode>) -> DedupVerdict {
        let Some(last) = &self.last else {
            return DedupVerdict::Fresh;
        };

        let distance_m = last.distance_to(fix);
        let dt_ms = fix.timestamp_ms.saturating_sub(last.timestamp_ms).saturating_abs();

        if dt_ms < self.config.min_time_diff_ms && distance_m < self.config.min_distance_m {
            return DedupVerdict::Duplicate { dt_ms, distance_m };
        }

        if let Some(mode) = watch {
            let min_m = self.min_movement_m(mode);
            if distance_m < min_m {
                return DedupVerdict::BelowMotion { distance_m, min_m };
            }
        }

        DedupVerdict::Fresh
    }

    /// Remember an accepted fix.
    pub fn record(&mut self, fix: &Fix) {
        self.last = Some(fix.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fix::{CoordinateSystem, FixSource};
    use crate::core::geo::offset_north;

    const ORIGIN: (f64, f64) = (31.2304, 121.4737);

    fn fix(pos: (f64, f64), timestamp_ms: i64) -> Fix {
        Fix {
            latitude: pos.0,
            longitude: pos.1,
            accuracy_m: 8.0,
            heading_deg: None,
            speed_mps: None,
            timestamp_ms,
            source: FixSource::NativeFresh,
            coordinate_system: CoordinateSystem::Gcj02,
        }
    }

    #[test]
    fn test_first_fix_is_fresh() {
        let dedup = Deduplicator::new(DedupConfig::default());
        assert_eq!(dedup.check(&fix(ORIGIN, 0), Some(WatchMode::Running)), DedupVerdict::Fresh);
    }

    #[test]
    fn test_identical_fix_is_duplicate() {
        let mut dedup = Deduplicator::new(DedupConfig::default());
        let first = fix(ORIGIN, 1_000);
        dedup.record(&first);
        assert!(matches!(dedup.check(&first, None), DedupVerdict::Duplicate { .. }));
    }

    #[test]
    fn test_same_place_later_is_not_duplicate_for_one_shot() {
        let mut dedup = Deduplicator::new(DedupConfig::default());
        dedup.record(&fix(ORIGIN, 1_000));
        assert_eq!(dedup.check(&fix(ORIGIN, 1_600), None), DedupVerdict::Fresh);
    }

    #[test]
    fn test_motion_filter_per_mode() {
        let mut dedup = Deduplicator::new(DedupConfig::default());
        dedup.record(&fix(ORIGIN, 0));
        let four_m = fix(offset_north(ORIGIN, 4.0), 5_000);

        // 4m clears the running minimum (3m) but not the browse one (5m)
        assert_eq!(dedup.check(&four_m, Some(WatchMode::Running)), DedupVerdict::Fresh);
        assert!(matches!(
            dedup.check(&four_m, Some(WatchMode::Browse)),
            DedupVerdict::BelowMotion { .. }
        ));
        // One-shot fixes skip the motion filter
        assert_eq!(dedup.check(&four_m, None), DedupVerdict::Fresh);
    }

    #[test]
    fn test_extreme_timestamps_saturate() {
        let mut dedup = Deduplicator::new(DedupConfig::default());
        dedup.record(&fix(ORIGIN, 1_700_000_000_000));

        let garbage = fix(offset_north(ORIGIN, 100.0), i64::MIN);
        assert_eq!(dedup.check(&garbage, Some(WatchMode::Running)), DedupVerdict::Fresh);

        dedup.record(&garbage);
        let same_place = fix(offset_north(ORIGIN, 100.0), i64::MAX);
        assert_eq!(dedup.check(&same_place, None), DedupVerdict::Fresh);
        let later = fix(offset_north(ORIGIN, 200.0), 1_700_000_001_000);
        assert_eq!(dedup.check(&later, Some(WatchMode::Running)), DedupVerdict::Fresh);
    }
}

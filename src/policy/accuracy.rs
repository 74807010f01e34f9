//! Accuracy Admission
//!
//! Decides whether a raw fix is trustworthy enough to surface.
//!
//! - Before the first acceptance the wide cold-start threshold applies,
//!   afterwards the narrow warm threshold, for the rest of the bridge's life.
//! - During cold start a backend *cache* entry gets a separate, more
//!   permissive test ([`InitialCacheAcceptor`]). Failing it only means the
//!   fix falls through to the generic threshold.
//! - After a cache entry was accepted that way, repeated warm-threshold
//!   misses ask the bridge for a corrective precise fix.
//!
//! Rejections are routine and never reported as errors.

use thiserror::Error;

use crate::config::{AccuracyConfig, InitialCacheConfig};
use crate::core::fix::{AcceptanceMeta, FixKind, Observation};

/// Why a cached fix was refused as an initial position.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CacheRejection {
    /// Cache category too old to trust even approximately.
    #[error("location kind {0:?} is a long-lived cache")]
    LongLivedKind(FixKind),
    /// Fix timestamp and device time disagree too much.
    #[error("device clock drift {drift_ms}ms exceeds {max_ms}ms")]
    ClockDrift {
        /// Absolute difference.
        drift_ms: i64,
        /// Allowed difference.
        max_ms: i64,
    },
    /// Cache entry is too old.
    #[error("cache age {age_ms}ms exceeds {max_ms}ms")]
    TooOld {
        /// Age of the entry.
        age_ms: i64,
        /// Allowed age.
        max_ms: i64,
    },
    /// Cache entry is too coarse.
    #[error("accuracy {accuracy_m}m exceeds {max_m}m")]
    TooCoarse {
        /// Reported accuracy radius.
        accuracy_m: f64,
        /// Allowed radius.
        max_m: f64,
    },
}

/// Cold-start test for backend cache entries.
#[derive(Debug, Clone)]
pub struct InitialCacheAcceptor {
    config: InitialCacheConfig,
}

impl InitialCacheAcceptor {
    /// Create from configuration.
    pub fn new(config: InitialCacheConfig) -> Self {
        Self { config }
    }

    /// Run the four checks in order: kind, clock drift, age, accuracy.
    pub fn check(&self, observation: &Observation, now_ms: i64) -> Result<AcceptanceMeta, CacheRejection> {
        let fix = &observation.fix;

        if observation.kind.is_long_lived_cache() {
            return Err(CacheRejection::LongLivedKind(observation.kind));
        }

        let age_ms = now_ms.saturating_sub(fix.timestamp_ms);
        let drift_ms = age_ms.saturating_abs();
        if drift_ms > self.config.max_clock_drift_ms {
            return Err(CacheRejection::ClockDrift {
                drift_ms,
                max_ms: self.config.max_clock_drift_ms,
            });
        }

        if age_ms > self.config.max_age_ms {
            return Err(CacheRejection::TooOld {
                age_ms,
                max_ms: self.config.max_age_ms,
            });
        }

        if fix.accuracy_m > self.config.accuracy_threshold_m {
            return Err(CacheRejection::TooCoarse {
                accuracy_m: fix.accuracy_m,
                max_m: self.config.accuracy_threshold_m,
            });
        }

        Ok(AcceptanceMeta::initial_cache(format!(
            "cached {:?} fix age={}ms accuracy={}m",
            observation.kind, age_ms, fix.accuracy_m
        )))
    }
}

/// Result of running a fix through the filter.
#[derive(Debug, Clone, PartialEq)]
pub enum AccuracyVerdict {
    /// Good enough to surface, pending duplicate checks.
    Admit {
        /// Present when the fix was let in as a cold-start cache entry.
        meta: Option<AcceptanceMeta>,
    },
    /// Too coarse for the threshold in force.
    Reject {
        /// Threshold that was missed.
        threshold_m: f64,
        /// Why the cold-start cache path did not apply, if it was tried.
        cache_rejection: Option<CacheRejection>,
        /// The bridge should force a precise, non-cached fix.
        corrective: bool,
    },
}

/// Threshold policy plus the cold-start cache heuristic.
#[derive(Debug, Clone)]
pub struct AccuracyFilter {
    thresholds: AccuracyConfig,
    acceptor: InitialCacheAcceptor,
    fail_limit: u32,
    has_accepted: bool,
    cold_start_cache_accepted: bool,
    /// The only accepted fix so far came from the cold-start cache path.
    provisional: bool,
    consecutive_post_cache_failures: u32,
}

impl AccuracyFilter {
    /// Create from configuration.
    pub fn new(thresholds: AccuracyConfig, initial_cache: InitialCacheConfig) -> Self {
        Self {
            thresholds,
            fail_limit: initial_cache.consecutive_fail_limit,
            acceptor: InitialCacheAcceptor::new(initial_cache),
            has_accepted: false,
            cold_start_cache_accepted: false,
            provisional: false,
            consecutive_post_cache_failures: 0,
        }
    }

    /// Threshold in force right now.
    pub fn threshold_m(&self) -> f64 {
        if self.has_accepted {
            self.thresholds.warm_threshold_m
        } else {
            self.thresholds.cold_start_threshold_m
        }
    }

    /// Whether any fix has been accepted yet.
    pub fn has_accepted(&self) -> bool {
        self.has_accepted
    }

    /// Whether a cold-start cache entry was ever let in.
    pub fn cold_start_cache_accepted(&self) -> bool {
        self.cold_start_cache_accepted
    }

    /// Current run of warm-threshold misses after an initial cache fix.
    pub fn consecutive_post_cache_failures(&self) -> u32 {
        self.consecutive_post_cache_failures
    }

    /// Judge an observation. `now_ms` is device wall-clock time.
    pub fn evaluate(&mut self, observation: &Observation, now_ms: i64) -> AccuracyVerdict {
        let mut cache_rejection = None;

        if !self.has_accepted && observation.kind.is_cached() {
            match self.acceptor.check(observation, now_ms) {
                Ok(meta) => return AccuracyVerdict::Admit { meta: Some(meta) },
                Err(rejection) => cache_rejection = Some(rejection),
            }
        }

        let threshold_m = self.threshold_m();
        if observation.fix.accuracy_m > threshold_m {
            let corrective = self.note_threshold_miss();
            return AccuracyVerdict::Reject {
                threshold_m,
                cache_rejection,
                corrective,
            };
        }

        self.consecutive_post_cache_failures = 0;
        AccuracyVerdict::Admit { meta: None }
    }

    /// Commit an acceptance after the fix also cleared duplicate checks.
    pub fn record_acceptance(&mut self, as_initial_cache: bool) {
        self.has_accepted = true;
        self.consecutive_post_cache_failures = 0;
        if as_initial_cache {
            self.cold_start_cache_accepted = true;
            self.provisional = true;
        } else {
            self.provisional = false;
        }
    }

    fn note_threshold_miss(&mut self) -> bool {
        if !self.provisional {
            return false;
        }
        self.consecutive_post_cache_failures += 1;
        if self.consecutive_post_cache_failures >= self.fail_limit {
            self.consecutive_post_cache_failures = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fix::{CoordinateSystem, Fix, FixSource};
    use proptest::prelude::*;

    const NOW: i64 = 1_700_000_000_000;

    fn observation(kind: FixKind, accuracy_m: f64, age_ms: i64) -> Observation {
        let source = if kind.is_cached() { FixSource::NativeCache } else { FixSource::NativeFresh };
        Observation::new(
            Fix {
                latitude: 31.2304,
                longitude: 121.4737,
                accuracy_m,
                heading_deg: None,
                speed_mps: None,
                timestamp_ms: NOW - age_ms,
                source,
                coordinate_system: CoordinateSystem::Gcj02,
            },
            kind,
        )
    }

    fn filter() -> AccuracyFilter {
        AccuracyFilter::new(AccuracyConfig::default(), InitialCacheConfig::default())
    }

    #[test]
    fn test_initial_cache_accepted_when_young_and_tight() {
        let mut f = filter();
        let verdict = f.evaluate(&observation(FixKind::CellCache, 200.0, 30_000), NOW);
        match verdict {
            AccuracyVerdict::Admit { meta: Some(meta) } => assert!(meta.accepted_as_initial_cache),
            other => panic!("expected initial cache admit, got {other:?}"),
        }
    }

    #[test]
    fn test_initial_cache_too_old_falls_through() {
        let mut f = filter();
        let verdict = f.evaluate(&observation(FixKind::CellCache, 200.0, 90_000), NOW);
        // Not initial, but still inside the cold-start threshold
        assert_eq!(verdict, AccuracyVerdict::Admit { meta: None });
    }

    #[test]
    fn test_initial_cache_rejection_reasons() {
        let acceptor = InitialCacheAcceptor::new(InitialCacheConfig::default());

        let long_lived = observation(FixKind::LastKnown, 50.0, 1_000);
        assert!(matches!(acceptor.check(&long_lived, NOW), Err(CacheRejection::LongLivedKind(_))));

        let drifted = observation(FixKind::CellCache, 50.0, -2 * 60 * 60 * 1000);
        assert!(matches!(acceptor.check(&drifted, NOW), Err(CacheRejection::ClockDrift { .. })));

        let coarse = observation(FixKind::CellCache, 600.0, 1_000);
        assert!(matches!(acceptor.check(&coarse, NOW), Err(CacheRejection::TooCoarse { .. })));
    }

    #[test]
    fn test_threshold_switches_after_first_acceptance() {
        let mut f = filter();
        assert_eq!(f.threshold_m(), 1500.0);
        assert!(matches!(f.evaluate(&observation(FixKind::Gps, 1200.0, 0), NOW), AccuracyVerdict::Admit { .. }));
        f.record_acceptance(false);
        assert_eq!(f.threshold_m(), 500.0);
        assert!(matches!(f.evaluate(&observation(FixKind::Gps, 1200.0, 0), NOW), AccuracyVerdict::Reject { .. }));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let mut f = filter();
        f.record_acceptance(false);
        assert!(matches!(f.evaluate(&observation(FixKind::Gps, 500.0, 0), NOW), AccuracyVerdict::Admit { .. }));
        assert!(matches!(f.evaluate(&observation(FixKind::Gps, 501.0, 0), NOW), AccuracyVerdict::Reject { .. }));
    }

    #[test]
    fn test_corrective_after_consecutive_misses() {
        let mut f = filter();
        f.record_acceptance(true);

        let coarse = observation(FixKind::Wifi, 800.0, 0);
        assert!(matches!(f.evaluate(&coarse, NOW), AccuracyVerdict::Reject { corrective: false, .. }));
        assert_eq!(f.consecutive_post_cache_failures(), 1);
        assert!(matches!(f.evaluate(&coarse, NOW), AccuracyVerdict::Reject { corrective: true, .. }));
        assert_eq!(f.consecutive_post_cache_failures(), 0);
    }

    #[test]
    fn test_success_resets_miss_counter() {
        let mut f = filter();
        f.record_acceptance(true);

        let coarse = observation(FixKind::Wifi, 800.0, 0);
        let fine = observation(FixKind::Gps, 20.0, 0);
        f.evaluate(&coarse, NOW);
        f.evaluate(&fine, NOW);
        assert_eq!(f.consecutive_post_cache_failures(), 0);
        assert!(matches!(f.evaluate(&coarse, NOW), AccuracyVerdict::Reject { corrective: false, .. }));
    }

    #[test]
    fn test_no_corrective_without_initial_cache() {
        let mut f = filter();
        f.record_acceptance(false);
        let coarse = observation(FixKind::Wifi, 800.0, 0);
        for _ in 0..5 {
            assert!(matches!(f.evaluate(&coarse, NOW), AccuracyVerdict::Reject { corrective: false, .. }));
        }
    }

    proptest! {
        #[test]
        fn prop_warm_threshold_gate(accuracy in 0.0f64..2000.0) {
            let mut f = filter();
            f.record_acceptance(false);
            let admitted = matches!(
                f.evaluate(&observation(FixKind::Gps, accuracy, 0), NOW),
                AccuracyVerdict::Admit { .. }
            );
            prop_assert_eq!(admitted, accuracy <= 500.0);
        }
    }
}

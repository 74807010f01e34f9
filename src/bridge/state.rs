//! Bridge State
//!
//! Everything the orchestrator mutates, kept behind one lock that is never
//! held across an `.await`.

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::callbacks::LocationStatus;
use crate::backend::WatchSession;
use crate::config::BridgeConfig;
use crate::core::fix::{AcceptanceMeta, Fix, Observation};
use crate::core::mode::WatchMode;
use crate::core::request::{RequestArbiter, RequestId};
use crate::error::BridgeFault;
use crate::policy::{AccuracyFilter, AccuracyVerdict, DedupVerdict, Deduplicator};

/// Counters describing what the bridge has done so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Fixes emitted to the consumer.
    pub fixes_accepted: u64,
    /// Of those, cold-start cache entries.
    pub initial_cache_accepted: u64,
    /// Structurally invalid fixes dropped.
    pub invalid_rejected: u64,
    /// Fixes over the accuracy threshold.
    pub accuracy_rejected: u64,
    /// Near-identical repeats of the last accepted fix.
    pub duplicates_suppressed: u64,
    /// Watch fixes that did not move far enough.
    pub motion_suppressed: u64,
    /// Push events from a superseded watch.
    pub stale_events_dropped: u64,
    /// One-shot results discarded because a newer request was issued.
    pub superseded_results: u64,
    /// Watchdog-triggered recoveries.
    pub recoveries_started: u64,
    /// Recovery windows opened.
    pub recovery_windows_opened: u64,
    /// Recoveries that ended with a good fix.
    pub recoveries_succeeded: u64,
    /// Recovery windows that ran out of retries.
    pub recoveries_exhausted: u64,
    /// Stops the backend failed to confirm in time.
    pub forced_stops: u64,
    /// A fix has been accepted, so the warm threshold is in force.
    pub warm: bool,
    /// A cold-start cache entry was let in at some point.
    pub cold_start_cache_accepted: bool,
}

/// The single active recovery window.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RecoveryRequest {
    pub id: RequestId,
    pub window_started: Instant,
    pub retry_count: u32,
    pub mode_before: WatchMode,
}

/// Owned background tasks.
#[derive(Default)]
pub(crate) struct Tasks {
    pub pump: Option<JoinHandle<()>>,
    pub watchdog: Option<JoinHandle<()>>,
    pub recovery: Option<JoinHandle<()>>,
    pub corrective: Option<JoinHandle<()>>,
}

impl Tasks {
    pub fn drain(&mut self) -> Vec<JoinHandle<()>> {
        [
            self.pump.take(),
            self.watchdog.take(),
            self.recovery.take(),
            self.corrective.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn running(&self) -> usize {
        [&self.pump, &self.watchdog, &self.recovery, &self.corrective]
            .into_iter()
            .flatten()
            .filter(|h| !h.is_finished())
            .count()
    }

    pub fn recovery_running(&self) -> bool {
        self.recovery.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn corrective_running(&self) -> bool {
        self.corrective.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Deferred consumer callback, delivered once the lock is released.
#[derive(Debug, Clone)]
pub(crate) enum Notice {
    Update(Fix, Option<AcceptanceMeta>),
    Fault(BridgeFault),
    Status(LocationStatus),
}

/// Outcome of running an observation through the admission pipeline.
#[derive(Debug, Clone)]
pub(crate) enum Admission {
    Accepted {
        fix: Fix,
        meta: Option<AcceptanceMeta>,
    },
    /// Repeat of the last accepted fix; nothing emitted.
    Duplicate(Fix),
    Rejected {
        /// Force a precise fix next.
        corrective: bool,
    },
}

impl Admission {
    /// The fix, when it was good enough to hand back to a caller.
    pub fn usable_fix(&self) -> Option<&Fix> {
        match self {
            Admission::Accepted { fix, .. } | Admission::Duplicate(fix) => Some(fix),
            Admission::Rejected { .. } => None,
        }
    }
}

pub(crate) struct BridgeState {
    pub arbiter: RequestArbiter,
    pub accuracy: AccuracyFilter,
    pub dedup: Deduplicator,
    pub watch_mode: Option<WatchMode>,
    pub session: Option<WatchSession>,
    next_session: u64,
    pub listeners_attached: bool,
    pub last_accepted_at: Option<Instant>,
    pub status: Option<LocationStatus>,
    pub recovery: Option<RecoveryRequest>,
    pub tasks: Tasks,
    pub diagnostics: Diagnostics,
    /// Host-restored fix, reported until a live fix is accepted.
    pub restored: Option<Fix>,
}

impl BridgeState {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            arbiter: RequestArbiter::new(),
            accuracy: AccuracyFilter::new(config.accuracy.clone(), config.initial_cache.clone()),
            dedup: Deduplicator::new(config.dedup.clone()),
            watch_mode: None,
            session: None,
            next_session: 0,
            listeners_attached: false,
            last_accepted_at: None,
            status: None,
            recovery: None,
            tasks: Tasks::default(),
            diagnostics: Diagnostics::default(),
            restored: None,
        }
    }

    /// Counters plus the accuracy filter's warm-up flags.
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            warm: self.accuracy.has_accepted(),
            cold_start_cache_accepted: self.accuracy.cold_start_cache_accepted(),
            ..self.diagnostics
        }
    }

    /// Last accepted fix, else the host-restored one.
    pub fn last_fix(&self) -> Option<&Fix> {
        self.dedup.last().or(self.restored.as_ref())
    }

    /// Open a new watch session; older push events become stale.
    pub fn open_session(&mut self) -> WatchSession {
        self.next_session += 1;
        let session = WatchSession(self.next_session);
        self.session = Some(session);
        session
    }

    /// Status notice, only when the status actually changes.
    pub fn set_status(&mut self, status: LocationStatus) -> Option<Notice> {
        if self.status == Some(status) {
            return None;
        }
        self.status = Some(status);
        Some(Notice::Status(status))
    }

    /// Whether `id` is still the active recovery window.
    pub fn recovery_is(&self, id: RequestId) -> bool {
        self.recovery.is_some_and(|r| r.id == id)
    }

    /// Validity, accuracy, then duplicate and motion checks. Commits the
    /// fix as the last accepted one when it passes.
    pub fn admit(
        &mut self,
        observation: Observation,
        watch: Option<WatchMode>,
        now_ms: i64,
        now: Instant,
    ) -> Admission {
        let source = observation.fix.source;

        if let Err(reason) = observation.fix.validate() {
            self.diagnostics.invalid_rejected += 1;
            debug!(%source, %reason, "Dropping invalid fix");
            return Admission::Rejected { corrective: false };
        }

        let meta = match self.accuracy.evaluate(&observation, now_ms) {
            AccuracyVerdict::Admit { meta } => meta,
            AccuracyVerdict::Reject {
                threshold_m,
                cache_rejection,
                corrective,
            } => {
                self.diagnostics.accuracy_rejected += 1;
                debug!(
                    %source,
                    accuracy = observation.fix.accuracy_m,
                    threshold = threshold_m,
                    cache = ?cache_rejection,
                    "Fix over accuracy threshold"
                );
                if corrective {
                    warn!(%source, "Warm threshold missed repeatedly after an initial cache fix");
                }
                return Admission::Rejected { corrective };
            }
        };

        let fix = observation.fix;
        match self.dedup.check(&fix, watch) {
            DedupVerdict::Fresh => {}
            DedupVerdict::Duplicate { dt_ms, distance_m } => {
                self.diagnostics.duplicates_suppressed += 1;
                debug!(%source, dt_ms, distance_m, "Duplicate fix suppressed");
                return Admission::Duplicate(fix);
            }
            DedupVerdict::BelowMotion { distance_m, min_m } => {
                self.diagnostics.motion_suppressed += 1;
                debug!(%source, distance_m, min_m, "Fix below minimum movement");
                return Admission::Rejected { corrective: false };
            }
        }

        self.accuracy.record_acceptance(meta.is_some());
        self.dedup.record(&fix);
        self.last_accepted_at = Some(now);
        self.diagnostics.fixes_accepted += 1;
        if meta.is_some() {
            self.diagnostics.initial_cache_accepted += 1;
        }
        debug!(%source, accuracy = fix.accuracy_m, "Fix accepted");

        Admission::Accepted { fix, meta }
    }

    /// Callbacks owed for an admission.
    pub fn notices_for(&mut self, admission: &Admission) -> Vec<Notice> {
        let mut notices = Vec::new();
        if let Admission::Accepted { fix, meta } = admission {
            notices.push(Notice::Update(fix.clone(), meta.clone()));
            notices.extend(self.set_status(LocationStatus::Locked));
        }
        notices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fix::{CoordinateSystem, FixKind, FixSource};

    const NOW_MS: i64 = 1_700_000_000_000;

    fn obs(accuracy_m: f64, timestamp_ms: i64, kind: FixKind) -> Observation {
        let source = if kind.is_cached() { FixSource::NativeCache } else { FixSource::NativeFresh };
        Observation::new(
            Fix {
                latitude: 31.2304,
                longitude: 121.4737,
                accuracy_m,
                heading_deg: None,
                speed_mps: None,
                timestamp_ms,
                source,
                coordinate_system: CoordinateSystem::Gcj02,
            },
            kind,
        )
    }

    #[tokio::test]
    async fn test_admit_commits_last_fix() {
        let mut state = BridgeState::new(&BridgeConfig::default());
        let now = Instant::now();

        let admission = state.admit(obs(20.0, NOW_MS, FixKind::Gps), None, NOW_MS, now);
        assert!(matches!(admission, Admission::Accepted { meta: None, .. }));
        assert_eq!(state.dedup.last().map(|f| f.accuracy_m), Some(20.0));
        assert_eq!(state.last_accepted_at, Some(now));
        assert_eq!(state.diagnostics.fixes_accepted, 1);
    }

    #[tokio::test]
    async fn test_diagnostics_track_warm_up() {
        let mut state = BridgeState::new(&BridgeConfig::default());
        let now = Instant::now();
        let snapshot = state.diagnostics();
        assert!(!snapshot.warm);
        assert!(!snapshot.cold_start_cache_accepted);

        let cached = obs(200.0, NOW_MS - 30_000, FixKind::CellCache);
        let admission = state.admit(cached, None, NOW_MS, now);
        assert!(matches!(admission, Admission::Accepted { meta: Some(_), .. }));

        let snapshot = state.diagnostics();
        assert!(snapshot.warm);
        assert!(snapshot.cold_start_cache_accepted);
        assert_eq!(snapshot.initial_cache_accepted, 1);
    }

    #[tokio::test]
    async fn test_restored_fix_yields_to_live_fix() {
        let mut state = BridgeState::new(&BridgeConfig::default());
        let mut restored = obs(30.0, NOW_MS - 600_000, FixKind::Gps).fix;
        restored.source = FixSource::Cache;
        state.restored = Some(restored);
        assert_eq!(state.last_fix().map(|f| f.source), Some(FixSource::Cache));
        assert!(!state.diagnostics().warm);

        state.admit(obs(20.0, NOW_MS, FixKind::Gps), None, NOW_MS, Instant::now());
        assert_eq!(state.last_fix().map(|f| f.source), Some(FixSource::NativeFresh));
    }

    #[tokio::test]
    async fn test_duplicate_is_usable_but_not_counted() {
        let mut state = BridgeState::new(&BridgeConfig::default());
        let now = Instant::now();

        state.admit(obs(20.0, NOW_MS, FixKind::Gps), None, NOW_MS, now);
        let again = state.admit(obs(20.0, NOW_MS, FixKind::Gps), None, NOW_MS, now);

        assert!(matches!(again, Admission::Duplicate(_)));
        assert!(again.usable_fix().is_some());
        assert_eq!(state.diagnostics.fixes_accepted, 1);
        assert_eq!(state.diagnostics.duplicates_suppressed, 1);
    }

    #[tokio::test]
    async fn test_initial_cache_meta_counted() {
        let mut state = BridgeState::new(&BridgeConfig::default());
        let admission = state.admit(
            obs(200.0, NOW_MS - 30_000, FixKind::CellCache),
            None,
            NOW_MS,
            Instant::now(),
        );

        assert!(matches!(admission, Admission::Accepted { meta: Some(_), .. }));
        assert_eq!(state.diagnostics.initial_cache_accepted, 1);
    }

    #[test]
    fn test_status_notices_only_on_change() {
        let mut state = BridgeState::new(&BridgeConfig::default());
        assert!(state.set_status(LocationStatus::Locating).is_some());
        assert!(state.set_status(LocationStatus::Locating).is_none());
        assert!(state.set_status(LocationStatus::Locked).is_some());
    }

    #[test]
    fn test_sessions_increase() {
        let mut state = BridgeState::new(&BridgeConfig::default());
        let a = state.open_session();
        let b = state.open_session();
        assert!(b > a);
        assert_eq!(state.session, Some(b));
    }
}

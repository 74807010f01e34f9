//! Stale Recovery
//!
//! ```text
//! Idle ──stale──► FastFixAttempt ──ok──► restart same mode ──► Idle
//!                      │ failed
//!          browse ◄────┴────► running
//!            │                   │
//!   restart watch ──► Idle    WindowOpen (assist profile)
//!                              │  every retry interval: fast attempt
//!                              ├─ fix ≤ recovery accuracy ─► restore running ─► Idle
//!                              ├─ window elapsed, retries left ─► extend
//!                              └─ retries exhausted ─► restore running + RECOVERY_FAILED
//! ```
//!
//! The task holds only a weak bridge reference between steps. Each step
//! re-checks the recovery id (or, before the window opens, the switch id
//! current when the watchdog fired) and stops without side effects when
//! superseded.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::state::{Admission, Notice, RecoveryRequest};
use super::switch::{SwitchGuard, WatchTarget};
use super::{fast_request, millis, BridgeInner};
use crate::core::mode::WatchMode;
use crate::core::request::{RequestId, RequestKind};
use crate::error::{codes, BridgeFault};

/// What the window loop does next.
enum Step {
    /// Sleep, then attempt again.
    Continue(Duration),
    /// Recovery ended (success, exhaustion or supersession).
    Done,
}

/// Entry point spawned by the watchdog.
pub(crate) async fn run(weak: Weak<BridgeInner>, mode: WatchMode, guard: Option<RequestId>) {
    let id = {
        let Some(inner) = weak.upgrade() else {
            return;
        };

        match inner.fast_fix_attempt(guard).await {
            None => return,
            Some(true) => {
                info!(phase = "stale-fastfix-success", %mode, "Fast fix recovered, restarting watch");
                inner.restart_watch(mode, guard).await;
                return;
            }
            Some(false) => {}
        }

        if mode == WatchMode::Browse {
            info!(phase = "stale-restart-watch", %mode, "Fast fix failed, restarting watch");
            inner.restart_watch(mode, guard).await;
            return;
        }

        let Some(id) = inner.open_window(mode, guard).await else {
            return;
        };

        let assist = WatchTarget::from_profile(WatchMode::Browse, inner.config.recovery.assist_profile);
        let switched = inner.transition(Some(assist), SwitchGuard::Expect(guard)).await;
        info!(request = %id, phase = "recovery-assist", switched, "Assist profile requested");
        id
    };

    let mut pause = Duration::ZERO;
    loop {
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match inner.window_step(id).await {
            Step::Continue(next) => pause = next,
            Step::Done => return,
        }
    }
}

impl BridgeInner {
    /// `None` when superseded, otherwise whether a usable fix arrived.
    async fn fast_fix_attempt(self: &Arc<Self>, guard: Option<RequestId>) -> Option<bool> {
        info!(phase = "stale-fastfix", "Attempting fast fix before restart");
        let result = self.fetch(fast_request(self.config.recovery.fast_fix)).await;

        let (recovered, notices) = {
            let mut state = self.state.lock().await;
            if self.is_destroyed()
                || state.watch_mode.is_none()
                || state.arbiter.current(RequestKind::ModeSwitch) != guard
            {
                info!(phase = "stale-fastfix", "Watch changed during fast fix, abandoning recovery");
                return None;
            }
            match result {
                Ok(observation) => {
                    let now_ms = self.now_ms();
                    let admission = state.admit(observation, None, now_ms, Instant::now());
                    let notices = self.settle(&mut state, &admission);
                    (admission.usable_fix().is_some(), notices)
                }
                Err(err) => {
                    warn!(phase = "stale-fastfix-failed", %err, "No fix obtained");
                    (false, Vec::new())
                }
            }
        };
        self.notify(notices);
        Some(recovered)
    }

    async fn restart_watch(self: &Arc<Self>, mode: WatchMode, guard: Option<RequestId>) {
        let target = WatchTarget::from_profile(mode, self.profile_for(mode)).restarting();
        self.transition(Some(target), SwitchGuard::Expect(guard)).await;
    }

    /// Register the single recovery request.
    async fn open_window(&self, mode: WatchMode, guard: Option<RequestId>) -> Option<RequestId> {
        let mut state = self.state.lock().await;
        if self.is_destroyed() || state.arbiter.current(RequestKind::ModeSwitch) != guard {
            return None;
        }
        if let Some(existing) = state.recovery {
            error!(request = %existing.id, "Recovery window already active, refusing a second one");
            return None;
        }

        let id = state.arbiter.next_id();
        state.recovery = Some(RecoveryRequest {
            id,
            window_started: Instant::now(),
            retry_count: 0,
            mode_before: mode,
        });
        state.diagnostics.recovery_windows_opened += 1;
        info!(request = %id, phase = "recovery-begin", "Opening recovery window");
        Some(id)
    }

    async fn window_step(self: &Arc<Self>, id: RequestId) -> Step {
        let window = millis(self.config.recovery.window_ms);

        let remaining = {
            let state = self.state.lock().await;
            let Some(request) = state.recovery.filter(|r| r.id == id && !self.is_destroyed()) else {
                debug!(request = %id, phase = "recovery-superseded", "Recovery cleared");
                return Step::Done;
            };
            window.saturating_sub(request.window_started.elapsed())
        };

        let result = if remaining.is_zero() {
            None
        } else {
            let mut attempt = fast_request(self.config.recovery.attempt);
            attempt.timeout = attempt.timeout.min(remaining);
            Some(self.fetch(attempt).await)
        };

        let mut state = self.state.lock().await;
        if self.is_destroyed() || !state.recovery_is(id) {
            warn!(request = %id, phase = "recovery-superseded", "Recovery superseded during attempt");
            return Step::Done;
        }

        let mut notices: Vec<Notice> = Vec::new();
        match result {
            Some(Ok(observation)) => {
                let accuracy = observation.fix.accuracy_m;
                let now_ms = self.now_ms();
                let admission = state.admit(observation, None, now_ms, Instant::now());
                notices = self.settle(&mut state, &admission);

                let threshold = self.config.recovery.accuracy_threshold_m;
                if !matches!(admission, Admission::Rejected { .. }) && accuracy <= threshold {
                    let mode = state.recovery.map_or(WatchMode::Running, |r| r.mode_before);
                    state.recovery = None;
                    state.diagnostics.recoveries_succeeded += 1;
                    let guard = state.arbiter.current(RequestKind::ModeSwitch);
                    info!(request = %id, accuracy, phase = "recovery-success", "Recovery fix accepted, restoring watch");
                    drop(state);

                    self.notify(notices);
                    self.restore(mode, guard).await;
                    return Step::Done;
                }
                debug!(request = %id, accuracy, threshold, "Recovery attempt not accurate enough");
            }
            Some(Err(err)) => debug!(request = %id, %err, "Recovery attempt failed"),
            None => {}
        }

        let Some(mut request) = state.recovery else {
            return Step::Done;
        };
        if request.window_started.elapsed() >= window {
            request.retry_count += 1;
            if request.retry_count > self.config.recovery.max_retries {
                state.recovery = None;
                state.diagnostics.recoveries_exhausted += 1;
                let guard = state.arbiter.current(RequestKind::ModeSwitch);
                error!(
                    request = %id,
                    retries = request.retry_count,
                    phase = "recovery-failed",
                    "Recovery retries exhausted, restoring watch"
                );
                drop(state);

                self.notify(notices);
                self.restore(request.mode_before, guard).await;
                self.notify(vec![Notice::Fault(BridgeFault::new(
                    codes::RECOVERY_FAILED,
                    format!("stale recovery failed after {} windows", request.retry_count),
                ))]);
                return Step::Done;
            }
            request.window_started = Instant::now();
            info!(request = %id, retries = request.retry_count, "Recovery window extended");
        }
        state.recovery = Some(request);
        drop(state);

        self.notify(notices);
        let until_window_end = window.saturating_sub(request.window_started.elapsed());
        Step::Continue(millis(self.config.recovery.retry_interval_ms).min(until_window_end))
    }

    async fn restore(self: &Arc<Self>, mode: WatchMode, guard: Option<RequestId>) {
        let profile = match mode {
            WatchMode::Running => self.config.recovery.restore_profile,
            WatchMode::Browse => self.profile_for(WatchMode::Browse),
        };
        let target = WatchTarget::from_profile(mode, profile).restarting();
        self.transition(Some(target), SwitchGuard::Expect(guard)).await;
    }
}

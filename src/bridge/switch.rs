//! Watch Mode Transitions
//!
//! Every watch change is stop-then-start under one transition lock:
//!
//! 1. issue a switch id (supersedes any transition still in flight)
//! 2. wait for the transition lock, re-check the id
//! 3. bounded stop; on timeout force-reset the backend listeners
//! 4. re-check the id, then start the new watch under a fresh session

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use super::state::Notice;
use super::{millis, BridgeInner, LocationStatus, WatchOptions};
use crate::backend::{ContinuousRequest, PositionBackend};
use crate::config::WatchProfile;
use crate::core::mode::WatchMode;
use crate::core::request::{RequestId, RequestKind};

/// Who asked for a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SwitchGuard {
    /// The consumer. Supersedes recovery and any in-flight switch.
    Consumer,
    /// Internal. Abort unless the current switch id is still `expected`.
    Expect(Option<RequestId>),
}

/// Watch to run after a transition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct WatchTarget {
    pub mode: WatchMode,
    pub interval: Duration,
    pub min_distance_m: f64,
    /// Stop and start even when already in `mode`.
    pub restart: bool,
}

impl WatchTarget {
    pub fn from_profile(mode: WatchMode, profile: WatchProfile) -> Self {
        Self {
            mode,
            interval: millis(profile.interval_ms),
            min_distance_m: profile.min_distance_m,
            restart: false,
        }
    }

    pub fn restarting(mut self) -> Self {
        self.restart = true;
        self
    }
}

impl BridgeInner {
    pub(crate) fn profile_for(&self, mode: WatchMode) -> WatchProfile {
        match mode {
            WatchMode::Browse => self.config.watch.browse,
            WatchMode::Running => self.config.watch.running,
        }
    }

    pub(crate) async fn start_watch(self: &Arc<Self>, options: WatchOptions) {
        let profile = self.profile_for(options.mode);
        let target = WatchTarget {
            mode: options.mode,
            interval: millis(options.interval_ms.unwrap_or(profile.interval_ms)),
            min_distance_m: options.min_distance_m.unwrap_or(profile.min_distance_m),
            restart: false,
        };
        self.transition(Some(target), SwitchGuard::Consumer).await;
    }

    pub(crate) async fn stop_watch(self: &Arc<Self>) {
        self.transition(None, SwitchGuard::Consumer).await;
    }

    /// Stop whatever runs, then start `target` if given. Returns whether
    /// the requested end state was reached.
    pub(crate) async fn transition(self: &Arc<Self>, target: Option<WatchTarget>, guard: SwitchGuard) -> bool {
        let Some(backend) = self.backend.get().cloned() else {
            warn!("Watch control called before init");
            return false;
        };

        let id = {
            let mut state = self.state.lock().await;
            if self.is_destroyed() {
                return false;
            }
            match guard {
                SwitchGuard::Consumer => {
                    if let Some(recovery) = state.recovery.take() {
                        info!(request = %recovery.id, "Consumer watch change supersedes recovery");
                    }
                }
                SwitchGuard::Expect(expected) => {
                    if state.arbiter.current(RequestKind::ModeSwitch) != expected {
                        debug!("Internal watch change superseded before it began");
                        return false;
                    }
                }
            }
            state.arbiter.issue(RequestKind::ModeSwitch)
        };

        let _serial = self.transition_lock.lock().await;

        let was_watching = {
            let mut state = self.state.lock().await;
            if self.is_destroyed() || !state.arbiter.is_current(RequestKind::ModeSwitch, id) {
                debug!(request = %id, "Watch change superseded while queued");
                return false;
            }
            if let Some(target) = &target {
                if !target.restart && state.watch_mode == Some(target.mode) {
                    debug!(request = %id, mode = %target.mode, "Already watching in this mode");
                    return true;
                }
            }
            if let Some(watchdog) = state.tasks.watchdog.take() {
                watchdog.abort();
            }
            let had_mode = state.watch_mode.take().is_some();
            let had_session = state.session.take().is_some();
            had_mode || had_session
        };

        if was_watching {
            self.halt(backend.as_ref()).await;
        }

        let Some(target) = target else {
            info!(request = %id, "Watch stopped");
            return true;
        };

        let (session, need_attach) = {
            let mut state = self.state.lock().await;
            if self.is_destroyed() || !state.arbiter.is_current(RequestKind::ModeSwitch, id) {
                warn!(request = %id, mode = %target.mode, "Watch change superseded after stop, not starting");
                return false;
            }
            (state.open_session(), !state.listeners_attached)
        };

        if need_attach {
            if let Err(err) = backend.attach(self.events_tx.clone()).await {
                error!(request = %id, %err, "Re-attaching backend listeners failed");
                let notices = {
                    let mut state = self.state.lock().await;
                    state.session = None;
                    Self::fault_notices(&mut state, &err)
                };
                self.notify(notices);
                return false;
            }
            self.state.lock().await.listeners_attached = true;
        }

        let request = ContinuousRequest {
            mode: target.mode,
            interval: target.interval,
            min_distance_m: target.min_distance_m,
            session,
        };

        match backend.start_continuous(request).await {
            Ok(()) => {
                let notices: Vec<Notice> = {
                    let mut state = self.state.lock().await;
                    if self.is_destroyed() {
                        return false;
                    }
                    state.watch_mode = Some(target.mode);
                    state.last_accepted_at = Some(Instant::now());
                    self.spawn_watchdog(&mut state, session);
                    if state.status == Some(LocationStatus::Locked) {
                        Vec::new()
                    } else {
                        state.set_status(LocationStatus::Locating).into_iter().collect()
                    }
                };
                info!(
                    request = %id,
                    mode = %target.mode,
                    %session,
                    interval_ms = target.interval.as_millis() as u64,
                    distance_m = target.min_distance_m,
                    "Watch started"
                );
                self.notify(notices);
                true
            }
            Err(err) => {
                let notices = {
                    let mut state = self.state.lock().await;
                    if state.session == Some(session) {
                        state.session = None;
                    }
                    if err.is_hard() {
                        error!(request = %id, mode = %target.mode, %err, "Starting watch failed");
                        Self::fault_notices(&mut state, &err)
                    } else {
                        warn!(request = %id, mode = %target.mode, %err, "Starting watch failed");
                        Vec::new()
                    }
                };
                self.notify(notices);
                false
            }
        }
    }

    /// Bounded stop; force-resets listeners when the backend stays silent.
    async fn halt(&self, backend: &dyn PositionBackend) {
        let confirmed = match timeout(millis(self.config.stop_timeout_ms), backend.stop_continuous()).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(%err, "Backend stop failed, forcing reset");
                false
            }
            Err(_) => {
                warn!(timeout_ms = self.config.stop_timeout_ms, "Backend did not confirm stop, forcing reset");
                false
            }
        };

        if !confirmed {
            backend.force_reset().await;
            let mut state = self.state.lock().await;
            state.listeners_attached = false;
            state.diagnostics.forced_stops += 1;
        }
    }
}

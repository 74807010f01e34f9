//! Stale Watchdog
//!
//! Ticks while a watch runs. When nothing has been accepted for the stale
//! timeout, and no one-shot or recovery is already busy, it hands over to
//! the recovery task.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::recovery;
use super::state::BridgeState;
use super::{millis, BridgeInner};
use crate::backend::WatchSession;
use crate::core::request::RequestKind;

impl BridgeInner {
    /// Replace the watchdog with one bound to `session`.
    pub(crate) fn spawn_watchdog(self: &Arc<Self>, state: &mut BridgeState, session: WatchSession) {
        if let Some(old) = state.tasks.watchdog.take() {
            old.abort();
        }
        let period = millis(self.config.watchdog.check_interval_ms);
        state.tasks.watchdog = Some(self.spawn(run(Arc::downgrade(self), session, period)));
    }

    /// One check. Returns false once the watch it belongs to is gone.
    async fn watchdog_tick(self: &Arc<Self>, session: WatchSession) -> bool {
        let mut state = self.state.lock().await;
        if self.is_destroyed() || state.session != Some(session) {
            return false;
        }
        let Some(mode) = state.watch_mode else {
            return true;
        };

        let idle = state
            .last_accepted_at
            .map(|at| at.elapsed())
            .unwrap_or_default();
        if idle < millis(self.config.watchdog.stale_timeout_ms) {
            return true;
        }

        let idle_ms = idle.as_millis() as u64;
        if self.one_shots_in_flight() > 0 {
            info!(phase = "stale-watchdog-skip", idle_ms, "One-shot already in flight");
            return true;
        }
        if let Some(recovery) = state.recovery {
            info!(phase = "stale-watchdog-skip", request = %recovery.id, "Recovery already in progress");
            return true;
        }
        if state.tasks.recovery_running() {
            info!(phase = "stale-watchdog-skip", idle_ms, "Recovery already in progress");
            return true;
        }

        state.diagnostics.recoveries_started += 1;
        warn!(phase = "stale-watchdog", idle_ms, %mode, "Watch stale, starting recovery");

        let guard = state.arbiter.current(RequestKind::ModeSwitch);
        state.tasks.recovery = Some(self.spawn(recovery::run(Arc::downgrade(self), mode, guard)));
        true
    }
}

async fn run(weak: Weak<BridgeInner>, session: WatchSession, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.watchdog_tick(session).await {
            return;
        }
    }
}

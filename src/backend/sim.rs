//! Simulated Host APIs
//!
//! Scriptable stand-ins for the native plugin and the platform geolocation
//! API. Replies are queued with a delay and resolve on the tokio clock,
//! so a paused test runtime can drive them deterministically. Watch fixes
//! are pushed by hand.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::fallback::{PlatformError, PlatformGeolocation, PlatformOptions, PlatformPosition, PlatformWatchHandler, PlatformWatchId};
use super::native::{NativeError, NativeEvent, NativeFixOptions, NativeListener, NativePlugin, NativePosition, NativeWatchOptions};
use super::BackendFuture;

type Reply<T, E> = (Duration, Result<T, E>);

async fn resolve<T, E>(reply: Option<Reply<T, E>>) -> Result<T, E> {
    match reply {
        Some((delay, result)) => {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
        // Nothing scripted: the request never answers
        None => std::future::pending().await,
    }
}

// =============================================================================
// NATIVE PLUGIN
// =============================================================================

/// Call counters of [`SimNativePlugin`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimCalls {
    /// `update_privacy_show` calls.
    pub privacy_show: usize,
    /// `update_privacy_agree` calls.
    pub privacy_agree: usize,
    /// `get_current_position` calls.
    pub one_shots: usize,
    /// `start_watch` calls.
    pub start_watch: usize,
    /// `stop_watch` calls.
    pub stop_watch: usize,
    /// `remove_all_listeners` calls.
    pub remove_all_listeners: usize,
    /// `force_destroy` calls.
    pub force_destroy: usize,
}

#[derive(Default)]
struct SimNativeState {
    replies: VecDeque<Reply<NativePosition, NativeError>>,
    listeners: Vec<NativeListener>,
    watch: Option<NativeWatchOptions>,
    last_fix_options: Option<NativeFixOptions>,
    hang_on_stop: bool,
    refuse_privacy: bool,
    fail_next_start: Option<NativeError>,
    calls: SimCalls,
}

/// In-memory [`NativePlugin`].
#[derive(Default)]
pub struct SimNativePlugin {
    state: Mutex<SimNativeState>,
}

impl SimNativePlugin {
    /// Plugin with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimNativeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer the next single-fix request with `position` after `delay`.
    pub fn queue_fix(&self, delay: Duration, position: NativePosition) {
        self.state().replies.push_back((delay, Ok(position)));
    }

    /// Fail the next single-fix request after `delay`.
    pub fn queue_error(&self, delay: Duration, error: NativeError) {
        self.state().replies.push_back((delay, Err(error)));
    }

    /// Make `stop_watch` hang forever.
    pub fn hang_on_stop(&self, hang: bool) {
        self.state().hang_on_stop = hang;
    }

    /// Make the consent calls fail.
    pub fn refuse_privacy(&self, refuse: bool) {
        self.state().refuse_privacy = refuse;
    }

    /// Fail the next `start_watch`.
    pub fn fail_next_start(&self, error: NativeError) {
        self.state().fail_next_start = Some(error);
    }

    /// Deliver a watch fix to every listener. False when nobody heard it.
    pub fn push(&self, position: NativePosition) -> bool {
        self.deliver(NativeEvent::Location(position))
    }

    /// Deliver a watch error to every listener.
    pub fn push_error(&self, error: NativeError) -> bool {
        self.deliver(NativeEvent::Error(error))
    }

    fn deliver(&self, event: NativeEvent) -> bool {
        let listeners = {
            let state = self.state();
            if state.watch.is_none() {
                return false;
            }
            state.listeners.clone()
        };
        for listener in &listeners {
            listener(event.clone());
        }
        !listeners.is_empty()
    }

    /// Call counters.
    pub fn calls(&self) -> SimCalls {
        self.state().calls
    }

    /// Options of the running watch.
    pub fn watch_options(&self) -> Option<NativeWatchOptions> {
        self.state().watch
    }

    /// Options of the latest single-fix request.
    pub fn last_fix_options(&self) -> Option<NativeFixOptions> {
        self.state().last_fix_options
    }

    /// Registered listeners.
    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }
}

impl NativePlugin for SimNativePlugin {
    fn update_privacy_show(&self, _contains_location: bool, _shown: bool) -> BackendFuture<'_, Result<(), NativeError>> {
        let mut state = self.state();
        state.calls.privacy_show += 1;
        let result = if state.refuse_privacy {
            Err(NativeError::new(555, "privacy compliance check failed"))
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn update_privacy_agree(&self, _agreed: bool) -> BackendFuture<'_, Result<(), NativeError>> {
        let mut state = self.state();
        state.calls.privacy_agree += 1;
        let result = if state.refuse_privacy {
            Err(NativeError::new(555, "privacy compliance check failed"))
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn get_current_position(&self, options: NativeFixOptions) -> BackendFuture<'_, Result<NativePosition, NativeError>> {
        let reply = {
            let mut state = self.state();
            state.calls.one_shots += 1;
            state.last_fix_options = Some(options);
            state.replies.pop_front()
        };
        Box::pin(resolve(reply))
    }

    fn start_watch(&self, options: NativeWatchOptions) -> BackendFuture<'_, Result<(), NativeError>> {
        let mut state = self.state();
        state.calls.start_watch += 1;
        let result = match state.fail_next_start.take() {
            Some(err) => Err(err),
            None => {
                state.watch = Some(options);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn stop_watch(&self) -> BackendFuture<'_, Result<(), NativeError>> {
        let hang = {
            let mut state = self.state();
            state.calls.stop_watch += 1;
            if !state.hang_on_stop {
                state.watch = None;
            }
            state.hang_on_stop
        };
        Box::pin(async move {
            if hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        })
    }

    fn add_listener(&self, listener: NativeListener) {
        self.state().listeners.push(listener);
    }

    fn remove_all_listeners(&self) {
        let mut state = self.state();
        state.calls.remove_all_listeners += 1;
        state.listeners.clear();
    }

    fn force_destroy(&self) -> BackendFuture<'_, ()> {
        {
            let mut state = self.state();
            state.calls.force_destroy += 1;
            state.watch = None;
        }
        Box::pin(async {})
    }
}

// =============================================================================
// PLATFORM GEOLOCATION
// =============================================================================

#[derive(Default)]
struct SimGeoState {
    replies: VecDeque<Reply<PlatformPosition, PlatformError>>,
    watches: HashMap<PlatformWatchId, PlatformWatchHandler>,
    next_watch_id: PlatformWatchId,
    last_options: Option<PlatformOptions>,
    one_shots: usize,
}

/// In-memory [`PlatformGeolocation`].
#[derive(Default)]
pub struct SimGeolocation {
    state: Mutex<SimGeoState>,
}

impl SimGeolocation {
    /// API with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimGeoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer the next single-position request after `delay`.
    pub fn queue_fix(&self, delay: Duration, position: PlatformPosition) {
        self.state().replies.push_back((delay, Ok(position)));
    }

    /// Fail the next single-position request after `delay`.
    pub fn queue_error(&self, delay: Duration, error: PlatformError) {
        self.state().replies.push_back((delay, Err(error)));
    }

    /// Deliver a position to every active watch.
    pub fn push(&self, position: PlatformPosition) -> bool {
        self.deliver(Ok(position))
    }

    /// Deliver an error to every active watch.
    pub fn push_error(&self, error: PlatformError) -> bool {
        self.deliver(Err(error))
    }

    fn deliver(&self, result: Result<PlatformPosition, PlatformError>) -> bool {
        let handlers: Vec<_> = self.state().watches.values().cloned().collect();
        for handler in &handlers {
            handler(result.clone());
        }
        !handlers.is_empty()
    }

    /// Number of active watches.
    pub fn active_watches(&self) -> usize {
        self.state().watches.len()
    }

    /// Single-position requests made so far.
    pub fn one_shot_calls(&self) -> usize {
        self.state().one_shots
    }

    /// Options of the latest request.
    pub fn last_options(&self) -> Option<PlatformOptions> {
        self.state().last_options
    }
}

impl PlatformGeolocation for SimGeolocation {
    fn get_current_position(&self, options: PlatformOptions) -> BackendFuture<'_, Result<PlatformPosition, PlatformError>> {
        let reply = {
            let mut state = self.state();
            state.one_shots += 1;
            state.last_options = Some(options);
            state.replies.pop_front()
        };
        Box::pin(resolve(reply))
    }

    fn watch_position(&self, options: PlatformOptions, handler: PlatformWatchHandler) -> Result<PlatformWatchId, PlatformError> {
        let mut state = self.state();
        state.next_watch_id += 1;
        let id = state.next_watch_id;
        state.last_options = Some(options);
        state.watches.insert(id, handler);
        Ok(id)
    }

    fn clear_watch(&self, id: PlatformWatchId) {
        self.state().watches.remove(&id);
    }
}

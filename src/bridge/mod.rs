//! Location Bridge
//!
//! The orchestrator: owns the chosen backend, the admission policy, the
//! watchdog and the recovery window, and exposes the consumer contract.
//!
//! ```text
//!  consumer ──► Bridge ──► PositionBackend ──push──► mpsc ──► pump task
//!                 │                                              │
//!                 │          BridgeState (one tokio Mutex)       │
//!                 ├──────► arbiter · accuracy · dedup ◄──────────┘
//!                 │
//!                 ├──────► watchdog task ──stale──► recovery task
//!                 └──────► LocationListener (no lock held)
//! ```
//!
//! Every `.await` is a point where a newer request may commit first. Code
//! resuming after one re-checks its request id, recovery id or watch
//! session before touching state.

mod callbacks;
mod recovery;
mod state;
mod switch;
mod watchdog;


pub use callbacks::{BridgeEvent, ChannelListener, LocationListener, LocationStatus, NullListener};
pub use state::Diagnostics;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::backend::{
    BackendEvent, BackendKind, ComplianceGate, CoordinateNormalizer, CoordinateTransform, FallbackBackend,
    NativeBackend, NativePlugin, OneShotRequest, PlatformDetector, PlatformGeolocation, PlatformProbe,
    PositionBackend, StaticProbe,
};
use crate::config::{BridgeConfig, OneShotProfile};
use crate::core::clock::{DeviceClock, SystemClock};
use crate::core::fix::{CoordinateSystem, Fix, FixSource, Observation};
use crate::core::mode::{OneShotMode, WatchMode};
use crate::core::request::RequestKind;
use crate::error::{BackendError, BridgeError, BridgeFault};
use state::{Admission, BridgeState, Notice};

// =============================================================================
// OPTIONS
// =============================================================================

/// Options for [`Bridge::get_current_position`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOptions {
    /// Fast or precise.
    pub mode: OneShotMode,
    /// Override of the configured timeout (ms).
    pub timeout_ms: Option<u64>,
    /// Override of the configured cache age (ms). Ignored in precise mode.
    pub cache_max_age_ms: Option<u64>,
}

impl PositionOptions {
    /// Fast fix with configured defaults.
    pub fn fast() -> Self {
        Self {
            mode: OneShotMode::Fast,
            timeout_ms: None,
            cache_max_age_ms: None,
        }
    }

    /// Precise, never-cached fix with configured defaults.
    pub fn precise() -> Self {
        Self {
            mode: OneShotMode::Precise,
            ..Self::fast()
        }
    }

    /// Override the timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self::fast()
    }
}

/// Options for [`Bridge::start_watch`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatchOptions {
    /// Power profile.
    pub mode: WatchMode,
    /// Override of the profile interval (ms).
    pub interval_ms: Option<u64>,
    /// Override of the profile distance filter (m).
    pub min_distance_m: Option<f64>,
}

impl WatchOptions {
    /// Watch with the configured profile for `mode`.
    pub fn new(mode: WatchMode) -> Self {
        Self {
            mode,
            interval_ms: None,
            min_distance_m: None,
        }
    }
}

pub(crate) fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

pub(crate) fn fast_request(profile: OneShotProfile) -> OneShotRequest {
    OneShotRequest {
        mode: OneShotMode::Fast,
        timeout: millis(profile.timeout_ms),
        cache_max_age: millis(profile.cache_max_age_ms),
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Assembles a [`Bridge`] from its host collaborators.
pub struct BridgeBuilder {
    config: BridgeConfig,
    native: Option<Arc<dyn NativePlugin>>,
    geolocation: Option<Arc<dyn PlatformGeolocation>>,
    probe: Option<Arc<dyn PlatformProbe>>,
    transform: Option<Arc<dyn CoordinateTransform>>,
    clock: Option<Arc<dyn DeviceClock>>,
    listener: Option<Arc<dyn LocationListener>>,
    restored: Option<Fix>,
}

impl BridgeBuilder {
    /// Start from a configuration.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            native: None,
            geolocation: None,
            probe: None,
            transform: None,
            clock: None,
            listener: None,
            restored: None,
        }
    }

    /// Native positioning plugin.
    pub fn native_plugin(mut self, plugin: Arc<dyn NativePlugin>) -> Self {
        self.native = Some(plugin);
        self
    }

    /// Platform geolocation API.
    pub fn geolocation(mut self, geolocation: Arc<dyn PlatformGeolocation>) -> Self {
        self.geolocation = Some(geolocation);
        self
    }

    /// Platform probe. Defaults to "native whenever a plugin is supplied".
    pub fn probe(mut self, probe: Arc<dyn PlatformProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// WGS-84 → GCJ-02 transform for the fallback backend.
    pub fn transform(mut self, transform: Arc<dyn CoordinateTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Device wall clock. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn DeviceClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Consumer callbacks. Defaults to [`NullListener`].
    pub fn listener(mut self, listener: Arc<dyn LocationListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Fix the host kept from an earlier run. Reported by
    /// [`Bridge::last_fix`] as [`FixSource::Cache`] until a live fix is
    /// accepted; it is never emitted and never warms the accuracy filter.
    pub fn restored_fix(mut self, fix: Fix) -> Self {
        self.restored = Some(fix);
        self
    }

    /// Build the bridge. Nothing runs until [`Bridge::init`].
    pub fn build(self) -> Bridge {
        let id = Uuid::new_v4();
        let (events_tx, events_rx) = mpsc::channel(self.config.event_queue_depth.max(1));
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(StaticProbe(self.native.is_some())));

        let mut state = BridgeState::new(&self.config);
        state.restored = self.restored.and_then(|mut fix| match fix.validate() {
            Ok(()) => {
                fix.source = FixSource::Cache;
                Some(fix)
            }
            Err(reason) => {
                warn!(%reason, "Ignoring invalid restored fix");
                None
            }
        });

        let inner = BridgeInner {
            id,
            span: info_span!("location_bridge", bridge = %id),
            state: Mutex::new(state),
            config: self.config,
            native: self.native,
            geolocation: self.geolocation,
            probe,
            transform: self.transform,
            backend: OnceLock::new(),
            init_lock: Mutex::new(()),
            transition_lock: Mutex::new(()),
            listener: self.listener.unwrap_or_else(|| Arc::new(NullListener)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            in_flight: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
            events_tx,
            events_rx: StdMutex::new(Some(events_rx)),
        };

        Bridge {
            inner: Arc::new(inner),
        }
    }
}

// =============================================================================
// BRIDGE
// =============================================================================

/// Handle to a location bridge. Cheap to clone; all clones share one bridge.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

pub(crate) struct BridgeInner {
    id: Uuid,
    span: Span,
    pub(crate) config: BridgeConfig,
    native: Option<Arc<dyn NativePlugin>>,
    geolocation: Option<Arc<dyn PlatformGeolocation>>,
    probe: Arc<dyn PlatformProbe>,
    transform: Option<Arc<dyn CoordinateTransform>>,
    pub(crate) backend: OnceLock<Arc<dyn PositionBackend>>,
    init_lock: Mutex<()>,
    /// Serializes stop-then-start transitions.
    pub(crate) transition_lock: Mutex<()>,
    pub(crate) state: Mutex<BridgeState>,
    listener: Arc<dyn LocationListener>,
    clock: Arc<dyn DeviceClock>,
    /// One-shot fetches currently awaiting the backend.
    in_flight: AtomicUsize,
    destroyed: AtomicBool,
    pub(crate) events_tx: mpsc::Sender<BackendEvent>,
    events_rx: StdMutex<Option<mpsc::Receiver<BackendEvent>>>,
}

/// Counts a fetch as in flight until dropped, even when its task is aborted.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Bridge {
    /// Builder with `config`.
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder::new(config)
    }

    /// Instance id, also attached to every log line of this bridge.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Detect the backend, run consent gating and register push listeners.
    ///
    /// The backend choice is final. A native backend that fails gating or
    /// listener registration degrades to the fallback backend.
    pub async fn init(&self) -> Result<BackendKind, BridgeError> {
        let span = self.inner.span.clone();
        self.inner.init().instrument(span).await
    }

    /// Single fix. `None` on timeout, rejection, soft failure or supersession.
    pub async fn get_current_position(&self, options: PositionOptions) -> Option<Fix> {
        let config = &self.inner.config.one_shot;
        let request = OneShotRequest {
            mode: options.mode,
            timeout: millis(options.timeout_ms.unwrap_or(config.timeout_ms)),
            cache_max_age: match options.mode {
                OneShotMode::Fast => millis(options.cache_max_age_ms.unwrap_or(config.cache_max_age_ms)),
                OneShotMode::Precise => Duration::ZERO,
            },
        };
        let span = self.inner.span.clone();
        self.inner.current_position(request).instrument(span).await
    }

    /// Fast fix for "host came back to the foreground" style triggers.
    pub async fn force_fast_fix(&self) -> Option<Fix> {
        let request = fast_request(self.inner.config.recovery.fast_fix);
        let span = self.inner.span.clone();
        self.inner.current_position(request).instrument(span).await
    }

    /// Start a continuous watch. A no-op when already watching in `options.mode`.
    pub async fn start_watch(&self, options: WatchOptions) {
        let span = self.inner.span.clone();
        self.inner.start_watch(options).instrument(span).await
    }

    /// Stop the continuous watch.
    pub async fn stop_watch(&self) {
        let span = self.inner.span.clone();
        self.inner.stop_watch().instrument(span).await
    }

    /// Stop-then-start into `mode` with its configured profile.
    pub async fn switch_watch_mode(&self, mode: WatchMode) {
        let span = self.inner.span.clone();
        self.inner.start_watch(WatchOptions::new(mode)).instrument(span).await
    }

    /// Stop everything and release every listener and timer. Idempotent.
    pub async fn destroy(&self) {
        let span = self.inner.span.clone();
        self.inner.destroy().instrument(span).await
    }

    /// Backend chosen by `init()`.
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.inner.backend.get().map(|b| b.kind())
    }

    /// Whether `init()` has completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.backend.get().is_some()
    }

    /// Whether the native backend is in use.
    pub fn is_native(&self) -> bool {
        self.backend_kind() == Some(BackendKind::Native)
    }

    /// Whether `destroy()` has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Whether a continuous watch is running.
    pub async fn is_watching(&self) -> bool {
        self.inner.state.lock().await.watch_mode.is_some()
    }

    /// Active watch mode.
    pub async fn current_watch_mode(&self) -> Option<WatchMode> {
        self.inner.state.lock().await.watch_mode
    }

    /// Last accepted fix.
    pub async fn last_fix(&self) -> Option<Fix> {
        self.inner.state.lock().await.last_fix().cloned()
    }

    /// Whether a recovery window is open.
    pub async fn recovery_active(&self) -> bool {
        self.inner.state.lock().await.recovery.is_some()
    }

    /// Counter snapshot.
    pub async fn diagnostics(&self) -> Diagnostics {
        self.inner.state.lock().await.diagnostics()
    }

    /// Background tasks (pump, watchdog, recovery, corrective) still alive.
    pub async fn background_tasks(&self) -> usize {
        self.inner.state.lock().await.tasks.running()
    }
}

// =============================================================================
// ORCHESTRATION
// =============================================================================

impl BridgeInner {
    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub(crate) fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(task.instrument(self.span.clone()))
    }

    /// Deliver callbacks. Must be called with no state lock held.
    pub(crate) fn notify(&self, notices: Vec<Notice>) {
        if self.is_destroyed() {
            return;
        }
        for notice in notices {
            match notice {
                Notice::Update(fix, meta) => self.listener.on_location_update(&fix, meta.as_ref()),
                Notice::Fault(fault) => self.listener.on_error(&fault),
                Notice::Status(status) => self.listener.on_status_change(status),
            }
        }
    }

    /// Notices for a hard backend failure.
    pub(crate) fn fault_notices(state: &mut BridgeState, err: &BackendError) -> Vec<Notice> {
        let mut notices = vec![Notice::Fault(BridgeFault::from(err))];
        notices.extend(state.set_status(LocationStatus::Error));
        notices
    }

    /// Callbacks for an admission, scheduling a corrective fix when asked.
    pub(crate) fn settle(self: &Arc<Self>, state: &mut BridgeState, admission: &Admission) -> Vec<Notice> {
        if let Admission::Rejected { corrective: true } = admission {
            self.schedule_corrective(state);
        }
        state.notices_for(admission)
    }

    /// One bounded single-fix call against the backend.
    pub(crate) async fn fetch(&self, request: OneShotRequest) -> Result<Observation, BackendError> {
        let Some(backend) = self.backend.get() else {
            return Err(BackendError::Reset);
        };
        let _in_flight = InFlight::enter(&self.in_flight);
        match timeout(request.timeout, backend.one_shot_fix(request)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        }
    }

    pub(crate) fn one_shots_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn init(self: &Arc<Self>) -> Result<BackendKind, BridgeError> {
        if self.is_destroyed() {
            return Err(BridgeError::Destroyed);
        }
        if let Err(err) = self.config.validate() {
            error!(%err, "Refusing to start with invalid configuration");
            return Err(err.into());
        }
        let _init = self.init_lock.lock().await;
        if let Some(backend) = self.backend.get() {
            debug!("Bridge already initialized");
            return Ok(backend.kind());
        }

        let detected = PlatformDetector::detect(self.probe.as_ref(), self.native.is_some());
        let mut chosen: Option<Arc<dyn PositionBackend>> = None;

        if let (BackendKind::Native, Some(plugin)) = (detected, &self.native) {
            let native: Arc<dyn PositionBackend> = Arc::new(NativeBackend::new(
                Arc::clone(plugin),
                ComplianceGate::new(self.config.consent.clone()),
            ));
            match self.bring_up(native.as_ref()).await {
                Ok(()) => chosen = Some(native),
                Err(err) => warn!(%err, "Native backend unusable, degrading to fallback"),
            }
        }

        let backend = match chosen {
            Some(backend) => backend,
            None => {
                let Some(geolocation) = &self.geolocation else {
                    error!("No positioning backend available");
                    return Err(BridgeError::NoBackend);
                };
                let normalizer = CoordinateNormalizer::new(CoordinateSystem::Gcj02, self.transform.clone());
                let fallback: Arc<dyn PositionBackend> =
                    Arc::new(FallbackBackend::new(Arc::clone(geolocation), normalizer));
                self.bring_up(fallback.as_ref()).await?;
                fallback
            }
        };

        let kind = backend.kind();
        if self.backend.set(Arc::clone(&backend)).is_err() {
            return Ok(kind);
        }

        {
            let mut state = self.state.lock().await;
            state.listeners_attached = true;
            let rx = self.events_rx.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(rx) = rx {
                state.tasks.pump = Some(self.spawn(pump(Arc::downgrade(self), rx)));
            }
        }

        if self.is_destroyed() {
            backend.force_reset().await;
            return Err(BridgeError::Destroyed);
        }

        info!(backend = %kind, "Location bridge initialized");
        Ok(kind)
    }

    async fn bring_up(&self, backend: &dyn PositionBackend) -> Result<(), BackendError> {
        backend.prepare().await?;
        backend.attach(self.events_tx.clone()).await
    }

    async fn current_position(self: &Arc<Self>, request: OneShotRequest) -> Option<Fix> {
        if self.backend.get().is_none() {
            warn!("Position requested before init");
            return None;
        }

        let (id, notices) = {
            let mut state = self.state.lock().await;
            if self.is_destroyed() {
                return None;
            }
            let id = state.arbiter.issue(RequestKind::OneShot);
            let notices: Vec<Notice> = if state.status == Some(LocationStatus::Locked) {
                Vec::new()
            } else {
                state.set_status(LocationStatus::Locating).into_iter().collect()
            };
            (id, notices)
        };
        self.notify(notices);
        debug!(request = %id, mode = %request.mode, timeout_ms = request.timeout.as_millis() as u64, "One-shot fix requested");

        let result = self.fetch(request).await;

        let mut state = self.state.lock().await;
        if self.is_destroyed() {
            return None;
        }
        if !state.arbiter.is_current(RequestKind::OneShot, id) {
            state.diagnostics.superseded_results += 1;
            warn!(request = %id, phase = "one-shot", "Result superseded by a newer request, discarding");
            return None;
        }

        let (fix, notices) = match result {
            Ok(observation) => {
                let now_ms = self.now_ms();
                let admission = state.admit(observation, None, now_ms, Instant::now());
                let notices = self.settle(&mut state, &admission);
                (admission.usable_fix().cloned(), notices)
            }
            Err(err) if err.is_hard() => {
                error!(request = %id, %err, "One-shot fix failed");
                (None, Self::fault_notices(&mut state, &err))
            }
            Err(err) => {
                debug!(request = %id, %err, "One-shot fix produced nothing");
                (None, Vec::new())
            }
        };
        drop(state);

        self.notify(notices);
        fix
    }

    async fn handle_event(self: &Arc<Self>, event: BackendEvent) {
        let notices = {
            let mut state = self.state.lock().await;
            if self.is_destroyed() {
                return;
            }
            if state.session != Some(event.session()) {
                state.diagnostics.stale_events_dropped += 1;
                debug!(session = %event.session(), "Dropping event from a superseded watch");
                return;
            }

            match event {
                BackendEvent::Fix { observation, .. } => {
                    #[cfg(feature = "debug-tracing")]
                    tracing::trace!(?observation, "Raw watch fix");
                    let mode = state.watch_mode;
                    let now_ms = self.now_ms();
                    let admission = state.admit(observation, mode, now_ms, Instant::now());
                    self.settle(&mut state, &admission)
                }
                BackendEvent::Error { error: err, session } if err.is_hard() => {
                    error!(%session, %err, "Watch failed");
                    Self::fault_notices(&mut state, &err)
                }
                BackendEvent::Error { error: err, session } => {
                    warn!(%session, %err, "Transient watch error");
                    Vec::new()
                }
            }
        };
        self.notify(notices);
    }

    /// Spawn a precise, cache-free fix unless one is already running.
    fn schedule_corrective(self: &Arc<Self>, state: &mut BridgeState) {
        if state.tasks.corrective_running() {
            return;
        }
        let request = OneShotRequest {
            mode: OneShotMode::Precise,
            timeout: millis(self.config.recovery.fast_fix.timeout_ms),
            cache_max_age: Duration::ZERO,
        };
        info!(phase = "corrective", "Forcing a precise non-cached fix");
        let weak = Arc::downgrade(self);
        state.tasks.corrective = Some(self.spawn(async move {
            if let Some(inner) = weak.upgrade() {
                inner.corrective_fix(request).await;
            }
        }));
    }

    async fn corrective_fix(self: &Arc<Self>, request: OneShotRequest) {
        let result = self.fetch(request).await;

        let notices = {
            let mut state = self.state.lock().await;
            if self.is_destroyed() {
                return;
            }
            match result {
                Ok(observation) => {
                    let now_ms = self.now_ms();
                    let admission = state.admit(observation, None, now_ms, Instant::now());
                    state.notices_for(&admission)
                }
                Err(err) => {
                    debug!(phase = "corrective", %err, "Corrective fix failed");
                    Vec::new()
                }
            }
        };
        self.notify(notices);
    }

    async fn destroy(self: &Arc<Self>) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            debug!("Bridge already destroyed");
            return;
        }

        let (handles, was_watching) = {
            let mut state = self.state.lock().await;
            if let Some(recovery) = state.recovery.take() {
                info!(request = %recovery.id, "Destroy cancels recovery window");
            }
            state.arbiter.invalidate(RequestKind::OneShot);
            state.arbiter.invalidate(RequestKind::ModeSwitch);
            let had_mode = state.watch_mode.take().is_some();
            let had_session = state.session.take().is_some();
            (state.tasks.drain(), had_mode || had_session)
        };
        for handle in &handles {
            handle.abort();
        }

        let _serial = self.transition_lock.lock().await;
        if let Some(backend) = self.backend.get() {
            if was_watching {
                match timeout(millis(self.config.stop_timeout_ms), backend.stop_continuous()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(%err, "Backend stop failed during destroy"),
                    Err(_) => warn!(timeout_ms = self.config.stop_timeout_ms, "Backend did not confirm stop during destroy"),
                }
            }
            backend.force_reset().await;
        }

        info!(tasks_aborted = handles.len(), "Location bridge destroyed");
    }
}

/// Drains backend push events into the bridge.
async fn pump(weak: Weak<BridgeInner>, mut rx: mpsc::Receiver<BackendEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        inner.handle_event(event).await;
    }
    debug!("Push queue closed");
}

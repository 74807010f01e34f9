//! Native Positioning Backend
//!
//! Adapter over the on-device positioning plugin. The plugin itself is a
//! host-provided black box described by [`NativePlugin`]; this module
//! turns its raw records into [`Observation`]s and its listener callbacks
//! into session-tagged [`BackendEvent`]s.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::compliance::ComplianceGate;
use super::{
    forward, BackendEvent, BackendFuture, BackendKind, ContinuousRequest, EventSink, OneShotRequest,
    PositionBackend, WatchSession,
};
use crate::core::fix::{CoordinateSystem, Fix, FixKind, FixSource, Observation};
use crate::core::mode::{OneShotMode, WatchMode};
use crate::error::BackendError;

// Vendor codes: missing permission, no positioning source (GPS off, no network)
const NATIVE_CODE_NO_PERMISSION: i32 = 12;
const NATIVE_CODE_NO_SOURCE: i32 = 13;

// =============================================================================
// PLUGIN CONTRACT
// =============================================================================

/// Raw position record produced by the native plugin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativePosition {
    /// Latitude, GCJ-02.
    pub latitude: f64,
    /// Longitude, GCJ-02.
    pub longitude: f64,
    /// Accuracy radius in meters.
    pub accuracy: f64,
    /// Bearing in degrees, `-1` when absent.
    pub bearing: f64,
    /// Speed in m/s, `-1` when absent.
    pub speed: f64,
    /// Device wall-clock time in ms.
    pub timestamp: i64,
    /// Vendor location type code.
    pub location_type: i32,
}

impl NativePosition {
    /// Fresh satellite fix without bearing or speed.
    pub fn gps(latitude: f64, longitude: f64, accuracy: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            bearing: -1.0,
            speed: -1.0,
            timestamp,
            location_type: 1,
        }
    }

    /// Same record with another location type.
    pub fn with_location_type(mut self, location_type: i32) -> Self {
        self.location_type = location_type;
        self
    }

    /// Convert into an observation.
    pub fn into_observation(self) -> Observation {
        let kind = FixKind::from_native_code(self.location_type);
        let source = if kind.is_cached() {
            FixSource::NativeCache
        } else {
            FixSource::NativeFresh
        };
        let fix = Fix {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy_m: self.accuracy,
            heading_deg: (self.bearing >= 0.0).then_some(self.bearing),
            speed_mps: (self.speed >= 0.0).then_some(self.speed),
            timestamp_ms: self.timestamp,
            source,
            coordinate_system: CoordinateSystem::Gcj02,
        };
        Observation::new(fix, kind)
    }
}

/// Error reported by the native plugin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeError {
    /// Vendor error code.
    pub code: i32,
    /// Vendor message.
    pub message: String,
}

impl NativeError {
    /// Build a native error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<NativeError> for BackendError {
    fn from(err: NativeError) -> Self {
        match err.code {
            NATIVE_CODE_NO_PERMISSION => BackendError::PermissionDenied(err.message),
            NATIVE_CODE_NO_SOURCE => BackendError::Unavailable(err.message),
            code => BackendError::Native {
                code,
                message: err.message,
            },
        }
    }
}

/// Options for a native single fix.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeFixOptions {
    /// Fast or precise.
    pub mode: OneShotMode,
    /// Timeout in ms.
    pub timeout_ms: u64,
    /// Oldest acceptable cache entry in ms; always 0 in precise mode.
    pub cache_max_age_ms: u64,
}

/// Options for a native continuous watch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeWatchOptions {
    /// Power profile.
    pub mode: WatchMode,
    /// Push interval in ms.
    pub interval_ms: u64,
    /// Distance filter in meters.
    pub distance_filter_m: f64,
}

/// Event delivered to plugin listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum NativeEvent {
    /// Continuous-watch position.
    Location(NativePosition),
    /// Continuous-watch failure.
    Error(NativeError),
}

/// Plugin listener callback.
pub type NativeListener = Arc<dyn Fn(NativeEvent) + Send + Sync>;

/// The native positioning plugin.
///
/// Positioning calls are refused until both consent calls have been made.
pub trait NativePlugin: Send + Sync {
    /// Report whether the privacy policy mentions location and was shown.
    fn update_privacy_show(&self, contains_location: bool, shown: bool) -> BackendFuture<'_, Result<(), NativeError>>;

    /// Report whether the user agreed to the privacy policy.
    fn update_privacy_agree(&self, agreed: bool) -> BackendFuture<'_, Result<(), NativeError>>;

    /// Single fix.
    fn get_current_position(&self, options: NativeFixOptions) -> BackendFuture<'_, Result<NativePosition, NativeError>>;

    /// Begin pushing fixes to listeners. Restarting replaces the previous watch.
    fn start_watch(&self, options: NativeWatchOptions) -> BackendFuture<'_, Result<(), NativeError>>;

    /// Stop pushing fixes. May never resolve if the client is wedged.
    fn stop_watch(&self) -> BackendFuture<'_, Result<(), NativeError>>;

    /// Register a listener.
    fn add_listener(&self, listener: NativeListener);

    /// Drop every listener.
    fn remove_all_listeners(&self);

    /// Tear down the native client without waiting for confirmation.
    fn force_destroy(&self) -> BackendFuture<'_, ()>;
}

// =============================================================================
// ADAPTER
// =============================================================================

#[derive(Default)]
struct ListenerState {
    sink: Option<EventSink>,
    session: Option<WatchSession>,
    mode: Option<WatchMode>,
}

/// [`PositionBackend`] over a [`NativePlugin`].
pub struct NativeBackend {
    plugin: Arc<dyn NativePlugin>,
    gate: ComplianceGate,
    listener: Arc<Mutex<ListenerState>>,
}

impl NativeBackend {
    /// Wrap a plugin; `gate` runs in [`PositionBackend::prepare`].
    pub fn new(plugin: Arc<dyn NativePlugin>, gate: ComplianceGate) -> Self {
        Self {
            plugin,
            gate,
            listener: Arc::new(Mutex::new(ListenerState::default())),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ListenerState> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_compliant(&self) -> Result<(), BackendError> {
        if self.gate.is_satisfied() {
            Ok(())
        } else {
            Err(BackendError::ConsentRequired("privacy consent not completed".into()))
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl PositionBackend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn prepare(&self) -> BackendFuture<'_, Result<(), BackendError>> {
        Box::pin(async move { self.gate.satisfy(self.plugin.as_ref()).await })
    }

    fn attach(&self, sink: EventSink) -> BackendFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            self.ensure_compliant()?;

            let shared = Arc::clone(&self.listener);
            self.state().sink = Some(sink);

            self.plugin.add_listener(Arc::new(move |event: NativeEvent| {
                let state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                let (Some(sink), Some(session)) = (&state.sink, state.session) else {
                    tracing::debug!("Native event outside a watch, ignoring");
                    return;
                };
                let event = match event {
                    NativeEvent::Location(position) => BackendEvent::Fix {
                        session,
                        observation: position.into_observation(),
                    },
                    NativeEvent::Error(err) => BackendEvent::Error {
                        session,
                        error: err.into(),
                    },
                };
                forward(sink, event);
            }));

            tracing::debug!("Native listener attached");
            Ok(())
        })
    }

    fn one_shot_fix(&self, request: OneShotRequest) -> BackendFuture<'_, Result<Observation, BackendError>> {
        Box::pin(async move {
            self.ensure_compliant()?;

            let cache_max_age_ms = match request.mode {
                OneShotMode::Fast => millis(request.cache_max_age),
                OneShotMode::Precise => 0,
            };
            let options = NativeFixOptions {
                mode: request.mode,
                timeout_ms: millis(request.timeout),
                cache_max_age_ms,
            };

            let position = self.plugin.get_current_position(options).await?;
            Ok(position.into_observation())
        })
    }

    fn start_continuous(&self, request: ContinuousRequest) -> BackendFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            self.ensure_compliant()?;

            {
                let mut state = self.state();
                if state.mode == Some(request.mode) && state.session.is_some() {
                    tracing::debug!(mode = %request.mode, session = %request.session, "Watch already running, re-tagging");
                    state.session = Some(request.session);
                    return Ok(());
                }
            }

            self.plugin
                .start_watch(NativeWatchOptions {
                    mode: request.mode,
                    interval_ms: millis(request.interval),
                    distance_filter_m: request.min_distance_m,
                })
                .await?;

            let mut state = self.state();
            state.mode = Some(request.mode);
            state.session = Some(request.session);
            Ok(())
        })
    }

    fn stop_continuous(&self) -> BackendFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            {
                let mut state = self.state();
                state.session = None;
                state.mode = None;
            }
            self.plugin.stop_watch().await?;
            Ok(())
        })
    }

    fn force_reset(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            {
                let mut state = self.state();
                state.sink = None;
                state.session = None;
                state.mode = None;
            }
            self.plugin.remove_all_listeners();
            self.plugin.force_destroy().await;
            tracing::warn!("Native client force-destroyed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::SimNativePlugin;
    use crate::config::ConsentConfig;
    use tokio::sync::mpsc;

    async fn ready_backend() -> (Arc<SimNativePlugin>, NativeBackend) {
        let plugin = Arc::new(SimNativePlugin::new());
        let backend = NativeBackend::new(plugin.clone(), ComplianceGate::new(ConsentConfig::default()));
        backend.prepare().await.unwrap();
        (plugin, backend)
    }

    fn running(session: u64) -> ContinuousRequest {
        ContinuousRequest {
            mode: WatchMode::Running,
            interval: Duration::from_millis(1000),
            min_distance_m: 3.0,
            session: WatchSession(session),
        }
    }

    #[test]
    fn test_absent_bearing_and_speed() {
        let obs = NativePosition::gps(31.2, 121.4, 12.0, 1_000).into_observation();
        assert_eq!(obs.fix.heading_deg, None);
        assert_eq!(obs.fix.speed_mps, None);
        assert_eq!(obs.fix.source, FixSource::NativeFresh);
        assert_eq!(obs.fix.coordinate_system, CoordinateSystem::Gcj02);
    }

    #[test]
    fn test_cached_types_tagged_native_cache() {
        let obs = NativePosition::gps(31.2, 121.4, 40.0, 1_000)
            .with_location_type(4)
            .into_observation();
        assert_eq!(obs.kind, FixKind::CellCache);
        assert_eq!(obs.fix.source, FixSource::NativeCache);
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            BackendError::from(NativeError::new(12, "no perm")),
            BackendError::PermissionDenied(_)
        ));
        assert_eq!(BackendError::from(NativeError::new(4, "net")).code(), "NATIVE_4");
    }

    #[tokio::test]
    async fn test_refuses_before_consent() {
        let plugin = Arc::new(SimNativePlugin::new());
        let backend = NativeBackend::new(plugin.clone(), ComplianceGate::new(ConsentConfig::default()));

        let err = backend.start_continuous(running(1)).await.unwrap_err();
        assert!(matches!(err, BackendError::ConsentRequired(_)));
        assert_eq!(plugin.calls().start_watch, 0);
    }

    #[tokio::test]
    async fn test_precise_mode_bypasses_cache() {
        let (plugin, backend) = ready_backend().await;
        plugin.queue_fix(Duration::ZERO, NativePosition::gps(31.2, 121.4, 5.0, 1_000));

        backend
            .one_shot_fix(OneShotRequest {
                mode: OneShotMode::Precise,
                timeout: Duration::from_secs(6),
                cache_max_age: Duration::from_secs(3),
            })
            .await
            .unwrap();

        let options = plugin.last_fix_options().unwrap();
        assert_eq!(options.cache_max_age_ms, 0);
        assert_eq!(options.timeout_ms, 6000);
    }

    #[tokio::test]
    async fn test_events_tagged_with_current_session() {
        let (plugin, backend) = ready_backend().await;
        let (tx, mut rx) = mpsc::channel(8);
        backend.attach(tx).await.unwrap();
        backend.start_continuous(running(7)).await.unwrap();

        assert!(plugin.push(NativePosition::gps(31.2, 121.4, 5.0, 1_000)));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.session(), WatchSession(7));
    }

    #[tokio::test]
    async fn test_same_mode_restart_only_retags() {
        let (plugin, backend) = ready_backend().await;
        let (tx, _rx) = mpsc::channel(8);
        backend.attach(tx).await.unwrap();

        backend.start_continuous(running(1)).await.unwrap();
        backend.start_continuous(running(2)).await.unwrap();
        assert_eq!(plugin.calls().start_watch, 1);
    }

    #[tokio::test]
    async fn test_force_reset_detaches_listeners() {
        let (plugin, backend) = ready_backend().await;
        let (tx, mut rx) = mpsc::channel(8);
        backend.attach(tx).await.unwrap();
        backend.start_continuous(running(1)).await.unwrap();

        backend.force_reset().await;
        assert!(!plugin.push(NativePosition::gps(31.2, 121.4, 5.0, 1_000)));
        assert!(rx.try_recv().is_err());
        assert_eq!(plugin.calls().force_destroy, 1);
    }
}

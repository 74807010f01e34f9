//! Fallback Geolocation Backend
//!
//! Adapter over the platform geolocation API (browser-style
//! `getCurrentPosition` / `watchPosition` / `clearWatch`). Fixes arrive in
//! WGS-84 and are passed through a [`CoordinateNormalizer`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::normalize::CoordinateNormalizer;
use super::{
    forward, BackendEvent, BackendFuture, BackendKind, ContinuousRequest, EventSink, OneShotRequest,
    PositionBackend, WatchSession,
};
use crate::core::fix::{CoordinateSystem, Fix, FixKind, FixSource, Observation};
use crate::error::BackendError;

// =============================================================================
// PLATFORM CONTRACT
// =============================================================================

/// Position reported by the platform API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlatformPosition {
    /// Latitude (WGS-84).
    pub latitude: f64,
    /// Longitude (WGS-84).
    pub longitude: f64,
    /// Accuracy radius in meters.
    pub accuracy_m: f64,
    /// Heading in degrees.
    pub heading_deg: Option<f64>,
    /// Speed in m/s.
    pub speed_mps: Option<f64>,
    /// Wall-clock time in ms.
    pub timestamp_ms: i64,
}

impl PlatformPosition {
    /// Position without heading or speed.
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            heading_deg: None,
            speed_mps: None,
            timestamp_ms,
        }
    }

    fn into_fix(self) -> Fix {
        Fix {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy_m: self.accuracy_m,
            heading_deg: self.heading_deg.filter(|h| h.is_finite()),
            speed_mps: self.speed_mps.filter(|s| s.is_finite()),
            timestamp_ms: self.timestamp_ms,
            source: FixSource::FallbackNetwork,
            coordinate_system: CoordinateSystem::Wgs84,
        }
    }
}

/// Platform API error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformErrorCode {
    /// User denied the permission prompt.
    PermissionDenied,
    /// No position source available.
    PositionUnavailable,
    /// No answer within the timeout.
    Timeout,
}

/// Error reported by the platform API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformError {
    /// Error category.
    pub code: PlatformErrorCode,
    /// Platform message.
    pub message: String,
}

impl PlatformError {
    /// Build a platform error.
    pub fn new(code: PlatformErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<PlatformError> for BackendError {
    fn from(err: PlatformError) -> Self {
        match err.code {
            PlatformErrorCode::PermissionDenied => BackendError::PermissionDenied(err.message),
            PlatformErrorCode::PositionUnavailable => BackendError::Unavailable(err.message),
            PlatformErrorCode::Timeout => BackendError::Timeout,
        }
    }
}

/// Options passed to the platform API.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlatformOptions {
    /// Ask for the best available source.
    pub high_accuracy: bool,
    /// Timeout.
    pub timeout: Duration,
    /// Oldest cached position the platform may answer with.
    pub maximum_age: Duration,
}

/// Platform watch identifier.
pub type PlatformWatchId = u64;

/// Callback for platform watch results.
pub type PlatformWatchHandler = Arc<dyn Fn(Result<PlatformPosition, PlatformError>) + Send + Sync>;

/// The platform geolocation API.
pub trait PlatformGeolocation: Send + Sync {
    /// Single position.
    fn get_current_position(&self, options: PlatformOptions) -> BackendFuture<'_, Result<PlatformPosition, PlatformError>>;

    /// Start a watch delivering results to `handler`.
    fn watch_position(&self, options: PlatformOptions, handler: PlatformWatchHandler) -> Result<PlatformWatchId, PlatformError>;

    /// Cancel a watch.
    fn clear_watch(&self, id: PlatformWatchId);
}

// =============================================================================
// ADAPTER
// =============================================================================

#[derive(Default)]
struct WatchState {
    sink: Option<EventSink>,
    active: Option<PlatformWatchId>,
}

/// [`PositionBackend`] over a [`PlatformGeolocation`].
pub struct FallbackBackend {
    geolocation: Arc<dyn PlatformGeolocation>,
    normalizer: Arc<CoordinateNormalizer>,
    state: Mutex<WatchState>,
}

impl FallbackBackend {
    /// Wrap a platform API.
    pub fn new(geolocation: Arc<dyn PlatformGeolocation>, normalizer: CoordinateNormalizer) -> Self {
        Self {
            geolocation,
            normalizer: Arc::new(normalizer),
            state: Mutex::new(WatchState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_active(&self) {
        if let Some(id) = self.state().active.take() {
            self.geolocation.clear_watch(id);
        }
    }
}

fn observe(normalizer: &CoordinateNormalizer, position: PlatformPosition) -> Observation {
    Observation::new(normalizer.normalize(position.into_fix()), FixKind::Platform)
}

impl PositionBackend for FallbackBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fallback
    }

    fn prepare(&self) -> BackendFuture<'_, Result<(), BackendError>> {
        Box::pin(async { Ok(()) })
    }

    fn attach(&self, sink: EventSink) -> BackendFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            self.state().sink = Some(sink);
            Ok(())
        })
    }

    fn one_shot_fix(&self, request: OneShotRequest) -> BackendFuture<'_, Result<Observation, BackendError>> {
        Box::pin(async move {
            let options = PlatformOptions {
                high_accuracy: true,
                timeout: request.timeout,
                maximum_age: request.cache_max_age,
            };
            let position = self.geolocation.get_current_position(options).await?;
            Ok(observe(&self.normalizer, position))
        })
    }

    fn start_continuous(&self, request: ContinuousRequest) -> BackendFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            self.clear_active();

            let Some(sink) = self.state().sink.clone() else {
                return Err(BackendError::Reset);
            };
            let normalizer = Arc::clone(&self.normalizer);
            let session: WatchSession = request.session;
            let handler: PlatformWatchHandler = Arc::new(move |result| {
                let event = match result {
                    Ok(position) => BackendEvent::Fix {
                        session,
                        observation: observe(&normalizer, position),
                    },
                    Err(err) => BackendEvent::Error {
                        session,
                        error: err.into(),
                    },
                };
                forward(&sink, event);
            });

            // The platform API has no distance filter; the interval doubles
            // as the cache age so repeated pushes can reuse a position.
            let options = PlatformOptions {
                high_accuracy: true,
                timeout: request.interval.saturating_mul(2).max(Duration::from_secs(5)),
                maximum_age: request.interval,
            };
            let id = self.geolocation.watch_position(options, handler)?;
            self.state().active = Some(id);
            tracing::debug!(mode = %request.mode, session = %session, watch_id = id, "Platform watch started");
            Ok(())
        })
    }

    fn stop_continuous(&self) -> BackendFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            self.clear_active();
            Ok(())
        })
    }

    fn force_reset(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.clear_active();
            self.state().sink = None;
        })
    }
}

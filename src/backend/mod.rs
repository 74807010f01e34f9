//! Positioning Backends
//!
//! Two implementations of one capability set, chosen once at `init()`:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ PositionBackend (trait object, fixed after init)             │
//! ├──────────────────────────────┬───────────────────────────────┤
//! │ NativeBackend                │ FallbackBackend               │
//! │  compliance gate first       │  no gating                    │
//! │  GCJ-02 by contract          │  WGS-84 → normalizer          │
//! │  cached location types       │  platform maximum-age cache   │
//! │  unconfirmed stop possible   │  stop is synchronous          │
//! └──────────────────────────────┴───────────────────────────────┘
//!            │ push events tagged with a WatchSession │
//!            └──────────────► bounded mpsc ◄───────────┘
//! ```
//!
//! Push events travel through one bounded channel registered with
//! [`PositionBackend::attach`]; every event carries the [`WatchSession`]
//! it was produced for so the bridge can discard events from superseded
//! watches.

pub mod compliance;
pub mod fallback;
pub mod native;
pub mod normalize;
pub mod platform;
pub mod sim;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::core::fix::Observation;
use crate::core::mode::{OneShotMode, WatchMode};
use crate::error::BackendError;

pub use compliance::ComplianceGate;
pub use fallback::{
    FallbackBackend, PlatformError, PlatformErrorCode, PlatformGeolocation, PlatformOptions, PlatformPosition,
};
pub use native::{NativeBackend, NativeError, NativeEvent, NativeFixOptions, NativePlugin, NativePosition, NativeWatchOptions};
pub use normalize::{CoordinateNormalizer, CoordinateTransform};
pub use platform::{PlatformDetector, PlatformProbe, StaticProbe};
pub use sim::{SimCalls, SimGeolocation, SimNativePlugin};

/// Boxed future returned by backend trait objects.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sender half of the bridge's push-event queue.
pub type EventSink = mpsc::Sender<BackendEvent>;

/// Which backend implementation is in use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// On-device native positioning service.
    Native,
    /// Platform geolocation API.
    Fallback,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Native => f.write_str("native"),
            BackendKind::Fallback => f.write_str("fallback"),
        }
    }
}

/// Identifies one continuous watch from start to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchSession(pub u64);

impl fmt::Display for WatchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// Parameters of a single fix request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OneShotRequest {
    /// Fast or precise.
    pub mode: OneShotMode,
    /// Answer or fail within this time.
    pub timeout: Duration,
    /// Oldest cache entry the backend may answer with.
    pub cache_max_age: Duration,
}

/// Parameters of a continuous watch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContinuousRequest {
    /// Power profile.
    pub mode: WatchMode,
    /// Push interval.
    pub interval: Duration,
    /// Backend-side distance filter.
    pub min_distance_m: f64,
    /// Session to tag pushed events with.
    pub session: WatchSession,
}

/// Event pushed by a backend.
#[derive(Clone, Debug)]
pub enum BackendEvent {
    /// A continuous-watch fix.
    Fix {
        /// Watch that produced it.
        session: WatchSession,
        /// The fix.
        observation: Observation,
    },
    /// A continuous-watch failure.
    Error {
        /// Watch that produced it.
        session: WatchSession,
        /// The failure.
        error: BackendError,
    },
}

impl BackendEvent {
    /// Session the event belongs to.
    pub fn session(&self) -> WatchSession {
        match self {
            BackendEvent::Fix { session, .. } | BackendEvent::Error { session, .. } => *session,
        }
    }
}

/// Capability set shared by both backends.
pub trait PositionBackend: Send + Sync {
    /// Implementation in use.
    fn kind(&self) -> BackendKind;

    /// Perform any gating the backend needs before positioning calls.
    fn prepare(&self) -> BackendFuture<'_, Result<(), BackendError>>;

    /// Register the push-event listener.
    fn attach(&self, sink: EventSink) -> BackendFuture<'_, Result<(), BackendError>>;

    /// Get a single fix. Failure covers both errors and "no fix".
    fn one_shot_fix(&self, request: OneShotRequest) -> BackendFuture<'_, Result<Observation, BackendError>>;

    /// Start pushing fixes. A call in the mode already running only
    /// re-tags the session.
    fn start_continuous(&self, request: ContinuousRequest) -> BackendFuture<'_, Result<(), BackendError>>;

    /// Stop pushing fixes. Resolves once the backend confirms.
    fn stop_continuous(&self) -> BackendFuture<'_, Result<(), BackendError>>;

    /// Tear down every listener and watch without waiting for
    /// confirmation. [`PositionBackend::attach`] must be called again
    /// before the next watch.
    fn force_reset(&self) -> BackendFuture<'_, ()>;
}

/// Forward an event without blocking a backend callback.
///
/// The queue is bounded; when it is full the event is dropped.
pub(crate) fn forward(sink: &EventSink, event: BackendEvent) {
    match sink.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::warn!(session = %event.session(), "Push queue full, dropping backend event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!("Push queue closed, dropping backend event");
        }
    }
}

//! Position Fix Model
//!
//! The unit of data flowing through the bridge, plus the metadata the
//! admission policy needs to judge it.

use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use super::geo::haversine_m;

/// Half-width of the box around (0, 0) treated as a bogus "Null Island" fix.
pub const NULL_ISLAND_TOLERANCE_DEG: f64 = 0.001;

// =============================================================================
// SOURCE & COORDINATE SYSTEM
// =============================================================================

/// Where a fix came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixSource {
    /// Restored by the host from its own storage.
    Cache,
    /// Live sensor fix from the native positioning service.
    NativeFresh,
    /// Fix the native service answered from its internal cache.
    NativeCache,
    /// Fix from the platform geolocation API.
    FallbackNetwork,
}

impl FixSource {
    /// Stable label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FixSource::Cache => "cache",
            FixSource::NativeFresh => "native-fresh",
            FixSource::NativeCache => "native-cache",
            FixSource::FallbackNetwork => "fallback-network",
        }
    }
}

impl fmt::Display for FixSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geodetic reference a coordinate pair is expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSystem {
    /// GPS datum, reported by platform geolocation APIs.
    Wgs84,
    /// Obfuscated datum required by the native service and the map layer.
    Gcj02,
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinateSystem::Wgs84 => f.write_str("wgs84"),
            CoordinateSystem::Gcj02 => f.write_str("gcj02"),
        }
    }
}

// =============================================================================
// FIX KIND
// =============================================================================

/// How the backend produced a fix.
///
/// Native backends report a numeric location type; the platform API only
/// ever yields [`FixKind::Platform`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixKind {
    /// Satellite fix (native type 1).
    Gps,
    /// Cached fix carried over from a previous session (native type 2).
    PreviousSessionCache,
    /// Cached cell-tower fix (native type 4).
    CellCache,
    /// Wi-Fi positioning (native type 5).
    Wifi,
    /// Cell-tower positioning (native type 6).
    Cell,
    /// Offline positioning (native type 8).
    Offline,
    /// Last known position, only served after a stop (native type 9).
    LastKnown,
    /// Platform geolocation API fix.
    Platform,
    /// Native type this crate does not know about.
    Other(i32),
}

impl FixKind {
    /// Map a native location type code.
    pub fn from_native_code(code: i32) -> Self {
        match code {
            1 => FixKind::Gps,
            2 => FixKind::PreviousSessionCache,
            4 => FixKind::CellCache,
            5 => FixKind::Wifi,
            6 => FixKind::Cell,
            8 => FixKind::Offline,
            9 => FixKind::LastKnown,
            other => FixKind::Other(other),
        }
    }

    /// Native location type code, if this kind has one.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            FixKind::Gps => Some(1),
            FixKind::PreviousSessionCache => Some(2),
            FixKind::CellCache => Some(4),
            FixKind::Wifi => Some(5),
            FixKind::Cell => Some(6),
            FixKind::Offline => Some(8),
            FixKind::LastKnown => Some(9),
            FixKind::Platform => None,
            FixKind::Other(code) => Some(*code),
        }
    }

    /// True when the backend answered from a cache instead of a sensor.
    pub fn is_cached(&self) -> bool {
        matches!(
            self,
            FixKind::PreviousSessionCache | FixKind::CellCache | FixKind::LastKnown
        )
    }

    /// True for cache categories too old to trust even as a rough start.
    pub fn is_long_lived_cache(&self) -> bool {
        matches!(self, FixKind::PreviousSessionCache | FixKind::LastKnown)
    }
}

// =============================================================================
// FIX
// =============================================================================

/// A single reported position.
///
/// Built once by a backend adapter and never modified afterwards; the
/// bridge hands out clones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Horizontal accuracy radius in meters.
    pub accuracy_m: f64,
    /// Course over ground in degrees, if known.
    pub heading_deg: Option<f64>,
    /// Ground speed in m/s, if known.
    pub speed_mps: Option<f64>,
    /// Device wall-clock time of the fix (ms since the Unix epoch).
    pub timestamp_ms: i64,
    /// Producing backend.
    pub source: FixSource,
    /// Datum of `latitude`/`longitude`.
    pub coordinate_system: CoordinateSystem,
}

/// Reasons a fix is structurally unusable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InvalidFix {
    /// A coordinate or the accuracy is NaN or infinite.
    #[error("non-finite coordinate or accuracy")]
    NonFinite,
    /// Latitude or longitude outside the valid range.
    #[error("coordinate out of range")]
    OutOfRange,
    /// Position at (0, 0), a classic uninitialised-sensor artefact.
    #[error("null island coordinate")]
    NullIsland,
    /// Negative accuracy radius.
    #[error("negative accuracy radius")]
    NegativeAccuracy,
}

impl Fix {
    /// Great-circle distance to another fix in meters.
    pub fn distance_to(&self, other: &Fix) -> f64 {
        haversine_m(
            (self.latitude, self.longitude),
            (other.latitude, other.longitude),
        )
    }

    /// Reject fixes no consumer should ever see.
    pub fn validate(&self) -> Result<(), InvalidFix> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() || !self.accuracy_m.is_finite() {
            return Err(InvalidFix::NonFinite);
        }
        if self.latitude.abs() > 90.0 || self.longitude.abs() > 180.0 {
            return Err(InvalidFix::OutOfRange);
        }
        if self.latitude.abs() < NULL_ISLAND_TOLERANCE_DEG
            && self.longitude.abs() < NULL_ISLAND_TOLERANCE_DEG
        {
            return Err(InvalidFix::NullIsland);
        }
        if self.accuracy_m < 0.0 {
            return Err(InvalidFix::NegativeAccuracy);
        }
        Ok(())
    }
}

/// A fix together with how the backend produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    /// The fix itself.
    pub fix: Fix,
    /// Production kind, drives the cold-start cache heuristic.
    pub kind: FixKind,
}

impl Observation {
    /// Pair a fix with its kind.
    pub fn new(fix: Fix, kind: FixKind) -> Self {
        Self { fix, kind }
    }
}

/// Why an emitted fix was let through, when that needs explaining.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceMeta {
    /// The fix was a backend cache entry accepted during cold start.
    pub accepted_as_initial_cache: bool,
    /// Human-readable explanation.
    pub reason: String,
}

impl AcceptanceMeta {
    /// Meta for a cold-start cache acceptance.
    pub fn initial_cache(reason: impl Into<String>) -> Self {
        Self {
            accepted_as_initial_cache: true,
            reason: reason.into(),
        }
    }
}

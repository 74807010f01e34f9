//! Core primitives.
//!
//! Plain data and pure helpers shared by every other layer: the fix model,
//! geodesic distance, device time, and request identifiers.

pub mod clock;
pub mod fix;
pub mod geo;
pub mod mode;
pub mod request;

// Re-export core types
pub use clock::{AnchoredClock, DeviceClock, SystemClock};
pub use fix::{AcceptanceMeta, CoordinateSystem, Fix, FixKind, FixSource, InvalidFix, Observation};
pub use geo::{haversine_m, EARTH_RADIUS_M};
pub use mode::{OneShotMode, WatchMode};
pub use request::{RequestArbiter, RequestId, RequestKind};

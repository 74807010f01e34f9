//! # Location Bridge
//!
//! Fuses a native positioning plugin and the platform geolocation API into
//! one filtered, de-duplicated fix stream for a game client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      LOCATION BRIDGE                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Plain data and pure helpers               │
//! │  ├── fix.rs      - Fix, observation and source model         │
//! │  ├── geo.rs      - Haversine distance                        │
//! │  ├── clock.rs    - Device wall clock                         │
//! │  └── request.rs  - Request ids and supersession              │
//! │                                                              │
//! │  policy/         - Admission filters (synchronous)           │
//! │  ├── accuracy.rs - Thresholds + cold-start cache heuristic   │
//! │  └── dedup.rs    - Duplicate and motion suppression          │
//! │                                                              │
//! │  backend/        - Host API adapters                         │
//! │  ├── native.rs   - Native plugin (consent gated, GCJ-02)     │
//! │  ├── fallback.rs - Platform geolocation (normalized)         │
//! │  └── sim.rs      - Scriptable host APIs                      │
//! │                                                              │
//! │  bridge/         - Orchestrator                              │
//! │  ├── switch.rs   - Stop-then-start watch transitions         │
//! │  ├── watchdog.rs - Stale stream detection                    │
//! │  └── recovery.rs - Bounded-retry recovery window             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Every consumer-visible fix passed validity, accuracy and duplicate checks
//! - A one-shot result is delivered only if no newer one-shot was issued
//! - At most one recovery window is open at a time
//! - After `destroy()` no callback fires and no task survives

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod backend;
pub mod bridge;
pub mod config;
pub mod core;
pub mod error;
pub mod policy;

// Re-export commonly used types
pub use backend::{BackendKind, CoordinateTransform, NativePlugin, PlatformGeolocation, PlatformProbe};
pub use bridge::{
    Bridge, BridgeBuilder, BridgeEvent, ChannelListener, Diagnostics, LocationListener, LocationStatus,
    NullListener, PositionOptions, WatchOptions,
};
pub use config::{BridgeConfig, ConfigError};
pub use self::core::{AcceptanceMeta, CoordinateSystem, Fix, FixSource, OneShotMode, WatchMode};
pub use error::{BackendError, BridgeError, BridgeFault};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Platform Detection
//!
//! One-shot check, run by `init()`, of whether the native positioning
//! plugin can be used. The answer is never re-evaluated.

use super::BackendKind;

/// Answers whether the host runs on a platform with native positioning.
pub trait PlatformProbe: Send + Sync {
    /// True on a native (mobile) platform.
    fn is_native_platform(&self) -> bool;
}

/// Probe with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

impl PlatformProbe for StaticProbe {
    fn is_native_platform(&self) -> bool {
        self.0
    }
}

/// Picks the backend kind.
pub struct PlatformDetector;

impl PlatformDetector {
    /// Native only when the platform says so *and* a plugin was supplied.
    pub fn detect(probe: &dyn PlatformProbe, plugin_present: bool) -> BackendKind {
        if probe.is_native_platform() && plugin_present {
            BackendKind::Native
        } else {
            BackendKind::Fallback
        }
    }
}

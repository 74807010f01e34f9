//! Positioning Modes

use std::fmt;
use serde::{Serialize, Deserialize};

/// Power profile of a continuous watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Low-power profile for map browsing.
    Browse,
    /// High-frequency sensor profile for an active run.
    Running,
}

impl fmt::Display for WatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMode::Browse => f.write_str("browse"),
            WatchMode::Running => f.write_str("running"),
        }
    }
}

/// Flavor of a one-shot request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OneShotMode {
    /// High accuracy, short-lived backend cache allowed.
    Fast,
    /// High accuracy, backend cache never allowed.
    Precise,
}

impl fmt::Display for OneShotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OneShotMode::Fast => f.write_str("fast"),
            OneShotMode::Precise => f.write_str("precise"),
        }
    }
}

//! Bridge Configuration
//!
//! Every product-tuning constant of the bridge. Defaults reproduce the
//! shipped behavior; hosts override them from JSON or environment
//! variables.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// JSON could not be parsed.
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
    /// An environment override could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    Env {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Values are individually fine but inconsistent together.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Accuracy admission thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccuracyConfig {
    /// Maximum accuracy radius before any fix has been accepted (m).
    pub cold_start_threshold_m: f64,
    /// Maximum accuracy radius once a fix has been accepted (m).
    pub warm_threshold_m: f64,
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            cold_start_threshold_m: 1500.0,
            warm_threshold_m: 500.0,
        }
    }
}

/// Cold-start cache acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialCacheConfig {
    /// Maximum age of a cached fix accepted during cold start (ms).
    pub max_age_ms: i64,
    /// Maximum accuracy radius of that fix (m).
    pub accuracy_threshold_m: f64,
    /// Maximum difference between fix timestamp and device time (ms).
    pub max_clock_drift_ms: i64,
    /// Consecutive warm-threshold misses after an initial cache acceptance
    /// that trigger a corrective precise fix.
    pub consecutive_fail_limit: u32,
}

impl Default for InitialCacheConfig {
    fn default() -> Self {
        Self {
            max_age_ms: 60_000,
            accuracy_threshold_m: 500.0,
            max_clock_drift_ms: 60 * 60 * 1000,
            consecutive_fail_limit: 2,
        }
    }
}

/// Duplicate and motion filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Fixes closer in time than this may be duplicates (ms).
    pub min_time_diff_ms: i64,
    /// Fixes closer in space than this may be duplicates (m).
    pub min_distance_m: f64,
    /// Minimum movement for a browse-mode watch fix (m).
    pub browse_min_movement_m: f64,
    /// Minimum movement for a running-mode watch fix (m).
    pub running_min_movement_m: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            min_time_diff_ms: 500,
            min_distance_m: 1.0,
            browse_min_movement_m: 5.0,
            running_min_movement_m: 3.0,
        }
    }
}

/// Liveness watchdog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// How often the watchdog looks at the stream (ms).
    pub check_interval_ms: u64,
    /// Silence after which the stream counts as stale (ms).
    pub stale_timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            stale_timeout_ms: 15_000,
        }
    }
}

/// Interval and distance filter handed to a continuous watch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatchProfile {
    /// Push interval (ms).
    pub interval_ms: u64,
    /// Backend-side distance filter (m).
    pub min_distance_m: f64,
}

/// One-shot parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OneShotProfile {
    /// Give up after this long (ms).
    pub timeout_ms: u64,
    /// Oldest backend cache entry acceptable (ms).
    pub cache_max_age_ms: u64,
}

/// Default watch profiles per mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Low-power browsing profile.
    pub browse: WatchProfile,
    /// High-frequency running profile.
    pub running: WatchProfile,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            browse: WatchProfile { interval_ms: 5_000, min_distance_m: 10.0 },
            running: WatchProfile { interval_ms: 1_000, min_distance_m: 3.0 },
        }
    }
}

/// Stale recovery protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Length of one recovery window (ms).
    pub window_ms: u64,
    /// Pause between fast-fix attempts inside a window (ms).
    pub retry_interval_ms: u64,
    /// Windows that may be re-opened before giving up.
    pub max_retries: u32,
    /// A fix at least this accurate ends recovery (m).
    pub accuracy_threshold_m: f64,
    /// Fast fix tried before opening a window.
    pub fast_fix: OneShotProfile,
    /// Fast fix tried on every retry inside a window.
    pub attempt: OneShotProfile,
    /// Watch profile used while the window is open.
    pub assist_profile: WatchProfile,
    /// Watch profile restored when the window closes.
    pub restore_profile: WatchProfile,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            window_ms: 10_000,
            retry_interval_ms: 2_000,
            max_retries: 2,
            accuracy_threshold_m: 100.0,
            fast_fix: OneShotProfile { timeout_ms: 6_000, cache_max_age_ms: 3_000 },
            attempt: OneShotProfile { timeout_ms: 5_000, cache_max_age_ms: 2_000 },
            assist_profile: WatchProfile { interval_ms: 2_000, min_distance_m: 3.0 },
            restore_profile: WatchProfile { interval_ms: 1_000, min_distance_m: 3.0 },
        }
    }
}

/// Consent state handed to the native compliance calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentConfig {
    /// The privacy policy mentions location collection.
    pub policy_contains_location: bool,
    /// The disclosure was shown to the user.
    pub disclosure_shown: bool,
    /// The user agreed.
    pub user_agreed: bool,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            policy_contains_location: true,
            disclosure_shown: true,
            user_agreed: true,
        }
    }
}

/// Full bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Accuracy thresholds.
    pub accuracy: AccuracyConfig,
    /// Cold-start cache acceptance.
    pub initial_cache: InitialCacheConfig,
    /// Duplicate and motion filtering.
    pub dedup: DedupConfig,
    /// Liveness watchdog.
    pub watchdog: WatchdogConfig,
    /// Stale recovery.
    pub recovery: RecoveryConfig,
    /// Default watch profiles.
    pub watch: WatchConfig,
    /// Default one-shot parameters.
    pub one_shot: OneShotProfile,
    /// Bound on waiting for a backend to confirm a stop (ms).
    pub stop_timeout_ms: u64,
    /// Capacity of the backend push-event queue.
    pub event_queue_depth: usize,
    /// Consent state.
    pub consent: ConsentConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            accuracy: AccuracyConfig::default(),
            initial_cache: InitialCacheConfig::default(),
            dedup: DedupConfig::default(),
            watchdog: WatchdogConfig::default(),
            recovery: RecoveryConfig::default(),
            watch: WatchConfig::default(),
            one_shot: OneShotProfile { timeout_ms: 8_000, cache_max_age_ms: 5_000 },
            stop_timeout_ms: 2_000,
            event_queue_depth: 64,
            consent: ConsentConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Parse from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `LOCATION_BRIDGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_parse("LOCATION_BRIDGE_COLD_START_THRESHOLD_M")? {
            config.accuracy.cold_start_threshold_m = v;
        }
        if let Some(v) = env_parse("LOCATION_BRIDGE_WARM_THRESHOLD_M")? {
            config.accuracy.warm_threshold_m = v;
        }
        if let Some(v) = env_parse("LOCATION_BRIDGE_INITIAL_CACHE_MAX_AGE_MS")? {
            config.initial_cache.max_age_ms = v;
        }
        if let Some(v) = env_parse("LOCATION_BRIDGE_STALE_TIMEOUT_MS")? {
            config.watchdog.stale_timeout_ms = v;
        }
        if let Some(v) = env_parse("LOCATION_BRIDGE_RECOVERY_WINDOW_MS")? {
            config.recovery.window_ms = v;
        }
        if let Some(v) = env_parse("LOCATION_BRIDGE_RECOVERY_MAX_RETRIES")? {
            config.recovery.max_retries = v;
        }
        if let Some(v) = env_parse("LOCATION_BRIDGE_RECOVERY_ACCURACY_M")? {
            config.recovery.accuracy_threshold_m = v;
        }
        if let Some(v) = env_parse("LOCATION_BRIDGE_STOP_TIMEOUT_MS")? {
            config.stop_timeout_ms = v;
        }
        config.consent.user_agreed = std::env::var("LOCATION_BRIDGE_CONSENT")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(config.consent.user_agreed);

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accuracy.warm_threshold_m > self.accuracy.cold_start_threshold_m {
            return Err(ConfigError::Invalid("warm threshold wider than cold-start threshold"));
        }
        if self.recovery.accuracy_threshold_m > self.accuracy.warm_threshold_m {
            return Err(ConfigError::Invalid("recovery accuracy wider than warm threshold"));
        }
        if self.watchdog.check_interval_ms == 0 || self.recovery.retry_interval_ms == 0 {
            return Err(ConfigError::Invalid("intervals must be non-zero"));
        }
        if self.recovery.window_ms == 0 || self.stop_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero"));
        }
        if self.event_queue_depth == 0 {
            return Err(ConfigError::Invalid("event queue depth must be non-zero"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { key: key.to_string(), value }),
        Err(_) => Ok(None),
    }
}

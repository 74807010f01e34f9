//! Location Bridge Simulator
//!
//! Drives a bridge against the simulated native plugin through a scripted
//! session: cold-start cache fix, a running watch, a signal dropout and the
//! recovery that follows. Every consumer callback is printed as one JSON line.
//!
//! Usage: `location-bridge-sim [config.json]`. Without a file the defaults
//! (plus `LOCATION_BRIDGE_*` overrides) are used with compressed timings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use location_bridge::{
    backend::{NativeError, NativePosition, SimNativePlugin},
    core::geo::offset_north,
    Bridge, BridgeConfig, ChannelListener, PositionOptions, WatchMode, WatchOptions, VERSION,
};

const START: (f64, f64) = (31.2304, 121.4737);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    info!("Location Bridge Simulator v{}", VERSION);

    let config = load_config()?;
    info!(
        stale_timeout_ms = config.watchdog.stale_timeout_ms,
        window_ms = config.recovery.window_ms,
        max_retries = config.recovery.max_retries,
        "Configuration loaded"
    );

    demo_session(config).await
}

fn load_config() -> anyhow::Result<BridgeConfig> {
    if let Some(path) = std::env::args().nth(1) {
        let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
        return BridgeConfig::from_json(&json).with_context(|| format!("parsing {path}"));
    }

    let mut config = BridgeConfig::from_env()?;
    config.watchdog.check_interval_ms = 500;
    config.watchdog.stale_timeout_ms = 2_000;
    config.recovery.fast_fix.timeout_ms = 800;
    config.recovery.attempt.timeout_ms = 600;
    config.recovery.window_ms = 1_500;
    config.recovery.retry_interval_ms = 300;
    config.stop_timeout_ms = 500;
    config.validate()?;
    Ok(config)
}

/// Scripted session against the simulated plugin.
async fn demo_session(config: BridgeConfig) -> anyhow::Result<()> {
    let plugin = Arc::new(SimNativePlugin::new());
    let (listener, mut events) = ChannelListener::new();
    let bridge = Bridge::builder(config.clone())
        .native_plugin(plugin.clone())
        .listener(Arc::new(listener))
        .build();

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(%err, "Unprintable event"),
            }
        }
    });

    let backend = bridge.init().await?;
    info!(%backend, bridge = %bridge.id(), "=== Bridge ready ===");

    // Cold start: the plugin answers from a 20s old cell cache
    info!("=== Cold start ===");
    let cached = NativePosition::gps(START.0, START.1, 350.0, now_ms() - 20_000).with_location_type(4);
    plugin.queue_fix(Duration::from_millis(150), cached);
    let first = bridge.get_current_position(PositionOptions::fast()).await;
    info!(accepted = first.is_some(), "Cold-start fix");

    // Running: one fix every 300ms, 8m apart
    info!("=== Running watch ===");
    bridge.start_watch(WatchOptions::new(WatchMode::Running)).await;
    let mut position = START;
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        position = offset_north(position, 8.0);
        plugin.push(NativePosition::gps(position.0, position.1, 6.0, now_ms()));
    }

    // Dropout: no pushes. The fast fix fails, the first window attempt lands.
    info!("=== Signal dropout ===");
    plugin.queue_error(Duration::from_millis(200), NativeError::new(4, "no network"));
    let recovered = offset_north(position, 40.0);
    plugin.queue_fix(
        Duration::from_millis(250),
        NativePosition::gps(recovered.0, recovered.1, 25.0, now_ms()),
    );
    let dropout = Duration::from_millis(config.watchdog.stale_timeout_ms + config.watchdog.check_interval_ms + 2_000);
    tokio::time::sleep(dropout).await;

    info!(
        mode = ?bridge.current_watch_mode().await,
        recovering = bridge.recovery_active().await,
        "=== After dropout ==="
    );
    let diagnostics = bridge.diagnostics().await;
    println!("{}", serde_json::to_string_pretty(&diagnostics)?);

    bridge.destroy().await;
    info!(tasks = bridge.background_tasks().await, "=== Bridge destroyed ===");

    // Nothing is delivered after destroy; give the printer a moment to flush
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    Ok(())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

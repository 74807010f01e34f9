//! Consumer Callback Contract
//!
//! What the bridge calls back into. Callbacks always run with no bridge
//! lock held, so a listener may call straight back into the bridge.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::fix::{AcceptanceMeta, Fix};
use crate::error::BridgeFault;

/// Coarse positioning status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationStatus {
    /// Waiting for a fix.
    Locating,
    /// Fixes are flowing.
    Locked,
    /// A hard failure was reported.
    Error,
}

impl fmt::Display for LocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationStatus::Locating => f.write_str("locating"),
            LocationStatus::Locked => f.write_str("locked"),
            LocationStatus::Error => f.write_str("error"),
        }
    }
}

/// Implemented by the consumer.
pub trait LocationListener: Send + Sync {
    /// A fix passed every filter.
    fn on_location_update(&self, fix: &Fix, meta: Option<&AcceptanceMeta>);

    /// A failure crossed the public boundary.
    fn on_error(&self, fault: &BridgeFault);

    /// Status changed.
    fn on_status_change(&self, status: LocationStatus);
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl LocationListener for NullListener {
    fn on_location_update(&self, _fix: &Fix, _meta: Option<&AcceptanceMeta>) {}
    fn on_error(&self, _fault: &BridgeFault) {}
    fn on_status_change(&self, _status: LocationStatus) {}
}

/// One callback invocation as a value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// `on_location_update`.
    LocationUpdate {
        /// Accepted fix.
        fix: Fix,
        /// Why it was let through, if notable.
        #[serde(skip_serializing_if = "Option::is_none")]
        meta: Option<AcceptanceMeta>,
    },
    /// `on_error`.
    Error(BridgeFault),
    /// `on_status_change`.
    StatusChange {
        /// New status.
        status: LocationStatus,
    },
}

/// Forwards every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl ChannelListener {
    /// Listener plus the receiving end of its stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: BridgeEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

impl LocationListener for ChannelListener {
    fn on_location_update(&self, fix: &Fix, meta: Option<&AcceptanceMeta>) {
        self.send(BridgeEvent::LocationUpdate {
            fix: fix.clone(),
            meta: meta.cloned(),
        });
    }

    fn on_error(&self, fault: &BridgeFault) {
        self.send(BridgeEvent::Error(fault.clone()));
    }

    fn on_status_change(&self, status: LocationStatus) {
        self.send(BridgeEvent::StatusChange { status });
    }
}

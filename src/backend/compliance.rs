//! Privacy Compliance Gate
//!
//! The native plugin refuses positioning calls until the host has told it
//! that the privacy policy was shown and agreed to. The gate makes those
//! two calls once, in order, and remembers the outcome.

use std::sync::atomic::{AtomicBool, Ordering};

use super::native::NativePlugin;
use crate::config::ConsentConfig;
use crate::error::BackendError;

/// One-time consent handshake with the native plugin.
#[derive(Debug)]
pub struct ComplianceGate {
    consent: ConsentConfig,
    satisfied: AtomicBool,
}

impl ComplianceGate {
    /// Gate driven by the host's consent answers.
    pub fn new(consent: ConsentConfig) -> Self {
        Self {
            consent,
            satisfied: AtomicBool::new(false),
        }
    }

    /// Whether the handshake has completed.
    pub fn is_satisfied(&self) -> bool {
        self.satisfied.load(Ordering::Acquire)
    }

    /// Run the handshake: show, then agree.
    pub async fn satisfy(&self, plugin: &dyn NativePlugin) -> Result<(), BackendError> {
        if self.is_satisfied() {
            return Ok(());
        }
        if !self.consent.user_agreed {
            return Err(BackendError::ConsentRequired("user has not agreed to the privacy policy".into()));
        }

        plugin
            .update_privacy_show(self.consent.policy_contains_location, self.consent.disclosure_shown)
            .await
            .map_err(|e| BackendError::ConsentRequired(format!("privacy show refused: {}", e.message)))?;
        plugin
            .update_privacy_agree(self.consent.user_agreed)
            .await
            .map_err(|e| BackendError::ConsentRequired(format!("privacy agree refused: {}", e.message)))?;

        self.satisfied.store(true, Ordering::Release);
        tracing::info!("Native privacy consent completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::SimNativePlugin;

    #[tokio::test]
    async fn test_show_then_agree_once() {
        let plugin = SimNativePlugin::new();
        let gate = ComplianceGate::new(ConsentConfig::default());

        gate.satisfy(&plugin).await.unwrap();
        gate.satisfy(&plugin).await.unwrap();

        let calls = plugin.calls();
        assert_eq!(calls.privacy_show, 1);
        assert_eq!(calls.privacy_agree, 1);
        assert!(gate.is_satisfied());
    }

    #[tokio::test]
    async fn test_no_agreement_skips_plugin() {
        let plugin = SimNativePlugin::new();
        let gate = ComplianceGate::new(ConsentConfig {
            user_agreed: false,
            ..ConsentConfig::default()
        });

        assert!(matches!(gate.satisfy(&plugin).await, Err(BackendError::ConsentRequired(_))));
        assert_eq!(plugin.calls().privacy_show, 0);
    }

    #[tokio::test]
    async fn test_plugin_refusal() {
        let plugin = SimNativePlugin::new();
        plugin.refuse_privacy(true);
        let gate = ComplianceGate::new(ConsentConfig::default());

        assert!(gate.satisfy(&plugin).await.is_err());
        assert!(!gate.is_satisfied());
    }
}

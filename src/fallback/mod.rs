//! Long-range / short-range fallback control.
//!
//! Polls channel diagnostics supplied by the host and switches the handshake
//! engine between operating modes. A `Connected` session is captured before
//! the switch and restored on recovery when its TTL still permits; an expired
//! snapshot always forces a fresh handshake.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, SignedAuditLog};
use crate::channel::ChannelDiagnostics;
use crate::config::LinkConfig;
use crate::pairing::{
    HandshakePhase, ProtocolError, SessionSnapshot, SharedProtocolEngine,
};

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("no preserved session to restore")]
    NoSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkMode {
    LongRange,
    ShortRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackReason {
    AlignmentLost,
    PresenceLost,
    HardwareUnavailable,
    Manual(String),
}

impl FallbackReason {
    pub fn as_label(&self) -> String {
        match self {
            FallbackReason::AlignmentLost => "alignment_lost".to_string(),
            FallbackReason::PresenceLost => "presence_lost".to_string(),
            FallbackReason::HardwareUnavailable => "hardware_unavailable".to_string(),
            FallbackReason::Manual(reason) => format!("manual:{reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Consecutive unhealthy polls before falling back.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive healthy polls before attempting recovery.
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,
}

fn default_failure_threshold() -> u32 { 3 }
fn default_recovery_threshold() -> u32 { 3 }

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_threshold: default_recovery_threshold(),
        }
    }
}

impl FallbackConfig {
    pub fn from_link_config(config: &LinkConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recovery_threshold: config.recovery_threshold,
        }
    }
}

/// Status snapshot for hosts and metrics. The session snapshot itself stays
/// opaque; only its presence is reported.
#[derive(Debug, Clone, Serialize)]
pub struct FallbackStatus {
    pub active: bool,
    pub current_mode: LinkMode,
    pub reason: Option<FallbackReason>,
    pub has_snapshot: bool,
}

struct Inner {
    active: bool,
    mode: LinkMode,
    reason: Option<FallbackReason>,
    snapshot: Option<SessionSnapshot>,
    failure_streak: u32,
    recovery_streak: u32,
}

/// Watches both channels and drives the handshake engine across mode
/// switches. Transition requests are linearized against application-driven
/// transitions through the shared engine's mutex.
pub struct FallbackController {
    engine: SharedProtocolEngine,
    config: FallbackConfig,
    audit: Option<Arc<SignedAuditLog>>,
    inner: Mutex<Inner>,
}

impl FallbackController {
    pub fn new(engine: SharedProtocolEngine, config: FallbackConfig) -> Self {
        Self {
            engine,
            config,
            audit: None,
            inner: Mutex::new(Inner {
                active: false,
                mode: LinkMode::LongRange,
                reason: None,
                snapshot: None,
                failure_streak: 0,
                recovery_streak: 0,
            }),
        }
    }

    pub fn with_audit_log(mut self, audit: Arc<SignedAuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn audit_event(&self, event: AuditEvent) {
        if let Some(log) = &self.audit {
            if log.append(event).is_err() {
                warn!("audit append failed");
            }
        }
    }

    pub fn status(&self) -> FallbackStatus {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        FallbackStatus {
            active: inner.active,
            current_mode: inner.mode,
            reason: inner.reason.clone(),
            has_snapshot: inner.snapshot.is_some(),
        }
    }

    pub fn current_mode(&self) -> LinkMode {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .mode
    }

    fn classify(
        optical: &ChannelDiagnostics,
        ultrasonic: &ChannelDiagnostics,
    ) -> FallbackReason {
        if !optical.is_active || !ultrasonic.is_active {
            FallbackReason::HardwareUnavailable
        } else if !optical.locked {
            FallbackReason::AlignmentLost
        } else {
            FallbackReason::PresenceLost
        }
    }

    /// Feed one diagnostics sample per channel. Sustained failure engages
    /// short-range mode; sustained recovery restores long-range operation,
    /// resuming the preserved session when its TTL still allows.
    pub fn poll(
        &self,
        optical: &ChannelDiagnostics,
        ultrasonic: &ChannelDiagnostics,
    ) -> LinkMode {
        let healthy = optical.healthy() && ultrasonic.healthy();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.active {
            if healthy {
                inner.failure_streak = 0;
            } else {
                inner.failure_streak += 1;
                if inner.failure_streak >= self.config.failure_threshold {
                    let reason = Self::classify(optical, ultrasonic);
                    self.engage(&mut inner, reason);
                }
            }
        } else if healthy {
            inner.recovery_streak += 1;
            if inner.recovery_streak >= self.config.recovery_threshold {
                self.recover(&mut inner);
            }
        } else {
            inner.recovery_streak = 0;
        }
        inner.mode
    }

    /// Operator-initiated fallback with a named reason; takes effect
    /// immediately, bypassing the failure threshold.
    pub fn manual_fallback(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.active {
            return;
        }
        self.engage(&mut inner, FallbackReason::Manual(reason.into()));
    }

    /// Drop the preserved session. Recovery after this always requires a
    /// fresh handshake; key material in the snapshot is zeroed.
    pub fn discard_snapshot(&self) -> Result<(), FallbackError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.snapshot.take() {
            Some(_) => Ok(()),
            None => Err(FallbackError::NoSnapshot),
        }
    }

    fn engage(&self, inner: &mut Inner, reason: FallbackReason) {
        let snapshot = {
            let mut engine = self.engine.lock();
            let snap = if engine.state() == HandshakePhase::Connected {
                engine.snapshot()
            } else {
                None
            };
            engine.abort();
            snap
        };
        info!(reason = %reason.as_label(), preserved = snapshot.is_some(), "fallback engaged");
        self.audit_event(AuditEvent::FallbackActivated {
            reason: reason.as_label(),
        });
        inner.active = true;
        inner.mode = LinkMode::ShortRange;
        inner.reason = Some(reason);
        inner.snapshot = snapshot;
        inner.failure_streak = 0;
        inner.recovery_streak = 0;
    }

    fn recover(&self, inner: &mut Inner) {
        let resumed = match inner.snapshot.take() {
            Some(snapshot) => {
                let mut engine = self.engine.lock();
                match engine.restore_snapshot(&snapshot) {
                    Ok(()) => true,
                    Err(ProtocolError::SessionExpired) => {
                        debug!("preserved session expired, fresh handshake required");
                        false
                    }
                    Err(_) => false,
                }
            }
            None => false,
        };
        info!(resumed, "fallback recovered, long-range mode restored");
        self.audit_event(AuditEvent::FallbackRecovered {
            session_resumed: resumed,
        });
        inner.active = false;
        inner.mode = LinkMode::LongRange;
        inner.reason = None;
        inner.failure_streak = 0;
        inner.recovery_streak = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::ProtocolEngine;
    use std::time::Duration;

    const NONCE: [u8; 16] = [0x21u8; 16];

    fn connected_engine(ttl: Duration) -> (SharedProtocolEngine, ProtocolEngine) {
        let mut a = ProtocolEngine::with_ttl(ttl);
        let mut b = ProtocolEngine::with_ttl(ttl);
        let pa = a.receive_nonce(NONCE).unwrap();
        let pb = b.receive_nonce(NONCE).unwrap();
        a.process_key_payload(&pb).unwrap();
        b.process_key_payload(&pa).unwrap();
        a.receive_ack().unwrap();
        b.receive_ack().unwrap();
        (SharedProtocolEngine::new(a), b)
    }

    fn bad_optical() -> ChannelDiagnostics {
        ChannelDiagnostics {
            is_active: true,
            locked: false,
            signal_strength: 0.1,
            failures: vec!["alignment_lost".to_string()],
        }
    }

    #[test]
    fn starts_long_range_and_inactive() {
        let (engine, _peer) = connected_engine(Duration::from_secs(5));
        let fc = FallbackController::new(engine, FallbackConfig::default());
        let status = fc.status();
        assert!(!status.active);
        assert_eq!(status.current_mode, LinkMode::LongRange);
    }

    #[test]
    fn sustained_alignment_loss_engages_short_range_with_snapshot() {
        let (engine, _peer) = connected_engine(Duration::from_secs(5));
        let fc = FallbackController::new(engine.clone(), FallbackConfig::default());

        let good = ChannelDiagnostics::nominal();
        for _ in 0..3 {
            fc.poll(&bad_optical(), &good);
        }
        let status = fc.status();
        assert!(status.active);
        assert_eq!(status.current_mode, LinkMode::ShortRange);
        assert_eq!(status.reason, Some(FallbackReason::AlignmentLost));
        assert!(status.has_snapshot);
        assert_eq!(engine.lock().state(), HandshakePhase::Idle);
    }

    #[test]
    fn transient_glitch_below_threshold_does_not_engage() {
        let (engine, _peer) = connected_engine(Duration::from_secs(5));
        let fc = FallbackController::new(engine, FallbackConfig::default());
        let good = ChannelDiagnostics::nominal();
        fc.poll(&bad_optical(), &good);
        fc.poll(&bad_optical(), &good);
        fc.poll(&good, &good); // streak broken
        assert!(!fc.status().active);
    }

    #[test]
    fn recovery_restores_connected_without_rehandshake() {
        let (engine, mut peer) = connected_engine(Duration::from_secs(5));
        let fc = FallbackController::new(engine.clone(), FallbackConfig::default());
        let good = ChannelDiagnostics::nominal();

        for _ in 0..3 {
            fc.poll(&bad_optical(), &good);
        }
        assert_eq!(engine.lock().state(), HandshakePhase::Idle);

        for _ in 0..3 {
            fc.poll(&good, &good);
        }
        let status = fc.status();
        assert!(!status.active);
        assert_eq!(status.current_mode, LinkMode::LongRange);
        assert_eq!(engine.lock().state(), HandshakePhase::Connected);

        // the resumed session still talks to the original peer
        let ct = engine.lock().encrypt_message(b"back online").unwrap();
        assert_eq!(peer.decrypt_message(&ct).unwrap(), b"back online");
    }

    #[test]
    fn expired_snapshot_forces_fresh_handshake() {
        let (engine, _peer) = connected_engine(Duration::from_millis(30));
        let fc = FallbackController::new(engine.clone(), FallbackConfig::default());
        let good = ChannelDiagnostics::nominal();

        for _ in 0..3 {
            fc.poll(&bad_optical(), &good);
        }
        assert!(fc.status().has_snapshot);
        std::thread::sleep(Duration::from_millis(50));

        for _ in 0..3 {
            fc.poll(&good, &good);
        }
        let status = fc.status();
        assert!(!status.active);
        assert_eq!(status.current_mode, LinkMode::LongRange);
        // TTL was not bypassed: the engine must handshake again
        assert_eq!(engine.lock().state(), HandshakePhase::Idle);
    }

    #[test]
    fn manual_trigger_engages_immediately_with_named_reason() {
        let (engine, _peer) = connected_engine(Duration::from_secs(5));
        let fc = FallbackController::new(engine, FallbackConfig::default());
        fc.manual_fallback("operator_drill");
        let status = fc.status();
        assert!(status.active);
        assert_eq!(
            status.reason,
            Some(FallbackReason::Manual("operator_drill".to_string()))
        );
    }

    #[test]
    fn hardware_loss_is_classified_over_alignment() {
        let (engine, _peer) = connected_engine(Duration::from_secs(5));
        let fc = FallbackController::new(engine, FallbackConfig::default());
        let dead = ChannelDiagnostics {
            is_active: false,
            locked: false,
            signal_strength: 0.0,
            failures: vec!["power".to_string()],
        };
        for _ in 0..3 {
            fc.poll(&dead, &ChannelDiagnostics::nominal());
        }
        assert_eq!(
            fc.status().reason,
            Some(FallbackReason::HardwareUnavailable)
        );
    }

    #[test]
    fn discard_snapshot_aborts_pending_resume() {
        let (engine, _peer) = connected_engine(Duration::from_secs(5));
        let fc = FallbackController::new(engine.clone(), FallbackConfig::default());
        let good = ChannelDiagnostics::nominal();
        for _ in 0..3 {
            fc.poll(&bad_optical(), &good);
        }
        fc.discard_snapshot().unwrap();
        assert!(fc.discard_snapshot().is_err());

        for _ in 0..3 {
            fc.poll(&good, &good);
        }
        assert_eq!(engine.lock().state(), HandshakePhase::Idle);
    }

    #[test]
    fn fallback_without_connected_session_has_no_snapshot() {
        let engine = SharedProtocolEngine::new(ProtocolEngine::new());
        let fc = FallbackController::new(engine, FallbackConfig::default());
        fc.manual_fallback("pre_session");
        let status = fc.status();
        assert!(status.active);
        assert!(!status.has_snapshot);
    }
}

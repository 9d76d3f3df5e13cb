//! Cross-channel coupling validator.
//!
//! Frames arriving on the optical and ultrasonic channels must correspond to
//! the same real-world event: delivered within a bounded time window, carrying
//! sequence ids that have never validated before, and (when a session key is
//! supplied) each independently decryptable under it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::audit::{AuditEvent, SignedAuditLog};
use crate::crypto::engine::{open_sealed, EphemeralKeySession};
use crate::crypto::stdcrypto::StdCrypto;

pub const DEFAULT_COUPLING_TOLERANCE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    Optical,
    Ultrasonic,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Optical => "optical",
            ChannelType::Ultrasonic => "ultrasonic",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame delivered by an external channel driver. `timestamp_ns` is
/// monotonic; `(sequence_id, channel)` is the anti-replay key.
#[derive(Debug, Clone)]
pub struct ChannelFrame {
    pub channel: ChannelType,
    pub payload: Vec<u8>,
    pub timestamp_ns: u64,
    pub sequence_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    Empty,
    OneChannelReceived,
    Validated,
    Rejected,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("temporal coupling failure: channels {delta_ms} ms apart")]
    TemporalCoupling { delta_ms: u64 },
    #[error("replay detected on {channel} sequence {sequence_id}")]
    Replay { sequence_id: u64, channel: ChannelType },
    #[error("channel payload failed authentication")]
    Auth,
}

impl ValidationError {
    fn channel_label(channel: ChannelType) -> String {
        channel.as_str().to_string()
    }
}

/// Counter snapshot, taken atomically enough for metrics export.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ValidatorMetrics {
    pub successful_validations: u64,
    pub temporal_coupling_failures: u64,
    pub replay_failures: u64,
    pub auth_failures: u64,
}

#[derive(Default)]
struct Counters {
    successful_validations: AtomicU64,
    temporal_coupling_failures: AtomicU64,
    replay_failures: AtomicU64,
    auth_failures: AtomicU64,
}

struct Attempt {
    pending: Option<ChannelFrame>,
    state: ValidationState,
    accepted: HashSet<(u64, ChannelType)>,
}

/// Validates coupling of one (Optical, Ultrasonic) frame pair at a time.
///
/// The accept-and-check step is serialized behind one mutex; payload
/// decryption for cryptographic binding runs outside it on owned copies.
/// `reset` clears the per-attempt state but never the replay history, so an
/// already-validated pair can never validate twice.
pub struct ChannelValidator {
    tolerance: Duration,
    require_binding: bool,
    crypto: StdCrypto,
    attempt: Mutex<Attempt>,
    counters: Counters,
    audit: Option<Arc<SignedAuditLog>>,
}

impl Default for ChannelValidator {
    fn default() -> Self {
        Self::new(DEFAULT_COUPLING_TOLERANCE)
    }
}

impl ChannelValidator {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            tolerance,
            require_binding: false,
            crypto: StdCrypto,
            attempt: Mutex::new(Attempt {
                pending: None,
                state: ValidationState::Empty,
                accepted: HashSet::new(),
            }),
            counters: Counters::default(),
            audit: None,
        }
    }

    pub fn from_config(config: &crate::config::LinkConfig) -> Self {
        let mut v = Self::new(config.coupling_tolerance());
        v.require_binding = config.require_crypto_binding;
        v
    }

    pub fn with_audit_log(mut self, audit: Arc<SignedAuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    pub fn state(&self) -> ValidationState {
        self.attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    pub fn metrics(&self) -> ValidatorMetrics {
        ValidatorMetrics {
            successful_validations: self.counters.successful_validations.load(Ordering::Relaxed),
            temporal_coupling_failures: self
                .counters
                .temporal_coupling_failures
                .load(Ordering::Relaxed),
            replay_failures: self.counters.replay_failures.load(Ordering::Relaxed),
            auth_failures: self.counters.auth_failures.load(Ordering::Relaxed),
        }
    }

    fn audit_event(&self, event: AuditEvent) {
        if let Some(log) = &self.audit {
            if log.append(event).is_err() {
                warn!("audit append failed");
            }
        }
    }

    /// Clear the current attempt. Replay history is retained.
    pub fn reset(&self) {
        let mut attempt = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
        attempt.pending = None;
        attempt.state = ValidationState::Empty;
    }

    /// Accept one frame. Returns the attempt state after this frame; a
    /// completed pair either validates or yields the specific rejection.
    ///
    /// When `binding_key` is supplied, both payloads must decrypt under it
    /// (cryptographic binding).
    pub fn accept_frame(
        &self,
        frame: ChannelFrame,
        binding_key: Option<&EphemeralKeySession>,
    ) -> Result<ValidationState, ValidationError> {
        let (first, second) = {
            let mut attempt = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(
                attempt.state,
                ValidationState::Validated | ValidationState::Rejected
            ) {
                attempt.pending = None;
                attempt.state = ValidationState::Empty;
            }

            match attempt.pending.take() {
                None => {
                    attempt.pending = Some(frame);
                    attempt.state = ValidationState::OneChannelReceived;
                    return Ok(ValidationState::OneChannelReceived);
                }
                Some(pending) if pending.channel == frame.channel => {
                    // re-delivery on the same channel: latest frame wins
                    attempt.pending = Some(frame);
                    attempt.state = ValidationState::OneChannelReceived;
                    return Ok(ValidationState::OneChannelReceived);
                }
                Some(pending) => (pending, frame),
            }
        };

        match self.check_pair(&first, &second, binding_key) {
            Ok(()) => {
                let mut attempt = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
                // re-check replay under the lock: another pair may have
                // committed while the payloads were being decrypted
                for f in [&first, &second] {
                    if attempt.accepted.contains(&(f.sequence_id, f.channel)) {
                        attempt.state = ValidationState::Rejected;
                        return Err(self.reject_replay(f));
                    }
                }
                attempt.accepted.insert((first.sequence_id, first.channel));
                attempt.accepted.insert((second.sequence_id, second.channel));
                attempt.state = ValidationState::Validated;
                self.counters
                    .successful_validations
                    .fetch_add(1, Ordering::Relaxed);
                debug!(
                    sequence_a = first.sequence_id,
                    sequence_b = second.sequence_id,
                    "channel pair validated"
                );
                Ok(ValidationState::Validated)
            }
            Err(err) => {
                let mut attempt = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
                attempt.state = ValidationState::Rejected;
                Err(err)
            }
        }
    }

    fn reject_replay(&self, frame: &ChannelFrame) -> ValidationError {
        self.counters.replay_failures.fetch_add(1, Ordering::Relaxed);
        self.audit_event(AuditEvent::ReplayDetected {
            sequence_id: frame.sequence_id,
            channel: ValidationError::channel_label(frame.channel),
        });
        warn!(
            sequence_id = frame.sequence_id,
            channel = frame.channel.as_str(),
            "replay detected"
        );
        ValidationError::Replay {
            sequence_id: frame.sequence_id,
            channel: frame.channel,
        }
    }

    fn check_pair(
        &self,
        a: &ChannelFrame,
        b: &ChannelFrame,
        binding_key: Option<&EphemeralKeySession>,
    ) -> Result<(), ValidationError> {
        let delta_ns = a.timestamp_ns.abs_diff(b.timestamp_ns);
        let delta_ms = delta_ns / 1_000_000;
        if delta_ns > self.tolerance.as_nanos() as u64 {
            self.counters
                .temporal_coupling_failures
                .fetch_add(1, Ordering::Relaxed);
            self.audit_event(AuditEvent::TemporalCouplingFailure { delta_ms });
            warn!(delta_ms, "temporal coupling failure");
            return Err(ValidationError::TemporalCoupling { delta_ms });
        }

        {
            let attempt = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
            for f in [a, b] {
                if attempt.accepted.contains(&(f.sequence_id, f.channel)) {
                    drop(attempt);
                    return Err(self.reject_replay(f));
                }
            }
        }

        match binding_key {
            Some(key) => {
                for f in [a, b] {
                    if open_sealed(&self.crypto, key, &f.payload).is_err() {
                        self.counters.auth_failures.fetch_add(1, Ordering::Relaxed);
                        self.audit_event(AuditEvent::AuthenticationFailed {
                            context: format!("channel_binding:{}", f.channel.as_str()),
                        });
                        warn!(channel = f.channel.as_str(), "channel binding check failed");
                        return Err(ValidationError::Auth);
                    }
                }
            }
            None if self.require_binding => {
                self.counters.auth_failures.fetch_add(1, Ordering::Relaxed);
                self.audit_event(AuditEvent::AuthenticationFailed {
                    context: "channel_binding:no_session_key".to_string(),
                });
                warn!("binding required but no session key supplied");
                return Err(ValidationError::Auth);
            }
            None => {}
        }

        Ok(())
    }
}

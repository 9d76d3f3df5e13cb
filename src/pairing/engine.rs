use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use zeroize::Zeroize;

use super::constants::*;
use super::session::{HandshakePhase, Session, SessionError, SessionSnapshot};
use super::types::KeyExchangePayload;
use crate::audit::{hex_encode, AuditEvent, SignedAuditLog};
use crate::codec::CodecError;
use crate::config::LinkConfig;
use crate::crypto::engine::{constant_time_eq, CryptoEngine};
use crate::crypto::stdcrypto::StdCrypto;
use crate::crypto::traits::{CryptoError, X25519Pub};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("operation {op} not valid in state {state}")]
    InvalidStateTransition {
        op: &'static str,
        state: &'static str,
    },
    #[error("session expired")]
    SessionExpired,
    #[error("session id mismatch")]
    SessionMismatch,
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("session snapshot rejected")]
    SnapshotRejected,
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
}

struct PendingHandshake {
    session_id: [u8; SZ_SESSION_ID],
    handshake_nonce: [u8; SZ_HANDSHAKE_NONCE],
    our_nonce: [u8; SZ_PAYLOAD_NONCE],
    started_at: Instant,
}

/// Handshake state machine for one device.
///
/// `Idle → WaitingForKeyPayload → SendingAck → Connected`, with terminal
/// `Error` reachable from any phase. Every operation enforces the session TTL
/// at the point of use; expiry forces the machine back to `Idle` with key
/// material zeroed.
pub struct ProtocolEngine {
    crypto: CryptoEngine,
    hash: StdCrypto,
    phase: HandshakePhase,
    pending: Option<PendingHandshake>,
    session: Option<Session>,
    ttl: Duration,
    audit: Option<Arc<SignedAuditLog>>,
}

impl Default for ProtocolEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolEngine {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            crypto: CryptoEngine::new(),
            hash: StdCrypto,
            phase: HandshakePhase::Idle,
            pending: None,
            session: None,
            ttl: ttl.min(MAX_SESSION_TTL),
            audit: None,
        }
    }

    pub fn with_config(config: &LinkConfig) -> Self {
        Self::with_ttl(config.session_ttl())
    }

    pub fn set_audit_log(&mut self, audit: Arc<SignedAuditLog>) {
        self.audit = Some(audit);
    }

    pub fn state(&self) -> HandshakePhase {
        self.phase
    }

    /// Session id of the in-flight or established session.
    pub fn session_id(&self) -> Option<[u8; SZ_SESSION_ID]> {
        self.session
            .as_ref()
            .map(|s| *s.session_id())
            .or_else(|| self.pending.as_ref().map(|p| p.session_id))
    }

    /// Established session key, available while `Connected`. Used by the
    /// channel validator for cryptographic binding checks.
    pub fn session_key(&self) -> Option<&crate::crypto::engine::EphemeralKeySession> {
        if self.phase != HandshakePhase::Connected {
            return None;
        }
        self.session.as_ref().map(|s| s.key())
    }

    fn audit_event(&self, event: AuditEvent) {
        if let Some(log) = &self.audit {
            if log.append(event).is_err() {
                warn!("audit append failed");
            }
        }
    }

    fn invalid(&self, op: &'static str) -> ProtocolError {
        ProtocolError::InvalidStateTransition {
            op,
            state: self.phase.as_str(),
        }
    }

    /// Zero all key material and return to `Idle`. The advertised ephemeral
    /// key pair is also discarded so an aborted handshake leaves nothing to
    /// resume.
    fn teardown(&mut self, next: HandshakePhase) {
        if let Some(mut s) = self.session.take() {
            s.invalidate();
        }
        self.pending = None;
        self.crypto.regenerate_dh();
        self.phase = next;
    }

    fn expire_session(&mut self) -> ProtocolError {
        let id = self.session_id();
        self.teardown(HandshakePhase::Idle);
        if let Some(id) = id {
            self.audit_event(AuditEvent::SessionExpired {
                session_id: hex_encode(&id),
            });
        }
        info!("session expired, handshake reset");
        ProtocolError::SessionExpired
    }

    fn fail_auth(&mut self, context: &'static str) -> ProtocolError {
        self.teardown(HandshakePhase::Error);
        self.audit_event(AuditEvent::AuthenticationFailed {
            context: context.to_string(),
        });
        warn!(context, "authentication failed, session torn down");
        ProtocolError::AuthenticationFailed
    }

    fn derive_session_id(&self, handshake_nonce: &[u8; SZ_HANDSHAKE_NONCE]) -> [u8; SZ_SESSION_ID] {
        let mut m = LABEL_SESSION_ID.to_vec();
        m.extend_from_slice(handshake_nonce);
        let digest = self.crypto.sha256(&m);
        let mut id = [0u8; SZ_SESSION_ID];
        id.copy_from_slice(&digest[..SZ_SESSION_ID]);
        id
    }

    /// `Idle → WaitingForKeyPayload`. Consumes the handshake nonce heard on
    /// the ultrasonic channel and returns the encoded key-exchange payload to
    /// transmit on the optical channel.
    pub fn receive_nonce(
        &mut self,
        handshake_nonce: [u8; SZ_HANDSHAKE_NONCE],
    ) -> Result<Vec<u8>, ProtocolError> {
        if self.phase != HandshakePhase::Idle {
            return Err(self.invalid("receive_nonce"));
        }

        let session_id = self.derive_session_id(&handshake_nonce);
        self.crypto.regenerate_dh();
        let public_key = self.crypto.dh_public().0;
        let mut our_nonce = [0u8; SZ_PAYLOAD_NONCE];
        our_nonce.copy_from_slice(&self.crypto.random_bytes(SZ_PAYLOAD_NONCE));

        let mut payload = KeyExchangePayload {
            session_id,
            public_key,
            nonce: our_nonce,
            signature: [0u8; SZ_BINDING_TAG],
        };
        payload.signature = payload.binding_tag(&self.hash, &handshake_nonce);

        self.pending = Some(PendingHandshake {
            session_id,
            handshake_nonce,
            our_nonce,
            started_at: Instant::now(),
        });
        self.phase = HandshakePhase::WaitingForKeyPayload;
        self.audit_event(AuditEvent::HandshakeInitiated {
            session_id: hex_encode(&session_id),
        });
        debug!(session_id = %hex_encode(&session_id), "handshake initiated");
        Ok(payload.encode())
    }

    /// `WaitingForKeyPayload → SendingAck`. Strict decode runs before any
    /// cryptographic check; a session-id mismatch or bad binding tag tears
    /// the session down into `Error`.
    pub fn process_key_payload(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if self.phase != HandshakePhase::WaitingForKeyPayload {
            return Err(self.invalid("process_key_payload"));
        }
        let started_at = match &self.pending {
            Some(p) => p.started_at,
            None => return Err(self.invalid("process_key_payload")),
        };
        if started_at.elapsed() > self.ttl {
            return Err(self.expire_session());
        }

        // Malformed input is a local, recoverable reject: state unchanged.
        let payload = KeyExchangePayload::decode(bytes)?;

        let (session_id, handshake_nonce, our_nonce) = match self.pending.as_ref() {
            Some(p) => (p.session_id, p.handshake_nonce, p.our_nonce),
            None => return Err(self.invalid("process_key_payload")),
        };
        if payload.session_id != session_id {
            let expected = hex_encode(&session_id);
            let received = hex_encode(&payload.session_id);
            self.teardown(HandshakePhase::Error);
            self.audit_event(AuditEvent::SessionMismatch { expected, received });
            warn!("key payload carried a foreign session id");
            return Err(ProtocolError::SessionMismatch);
        }

        let expected_tag = payload.binding_tag(&self.hash, &handshake_nonce);
        if !constant_time_eq(&expected_tag, &payload.signature) {
            return Err(self.fail_auth("key_exchange_payload"));
        }

        let mut shared = self.crypto.diffie_hellman(&X25519Pub(payload.public_key));
        let mut context = Vec::with_capacity(SZ_SESSION_ID + 2 * SZ_PAYLOAD_NONCE);
        context.extend_from_slice(&session_id);
        let (lo, hi) = if our_nonce <= payload.nonce {
            (our_nonce, payload.nonce)
        } else {
            (payload.nonce, our_nonce)
        };
        context.extend_from_slice(&lo);
        context.extend_from_slice(&hi);
        let key = self.crypto.kdf(&shared, LABEL_SESSION_KEY, &context);
        shared.zeroize();

        self.session = Some(Session::new(
            session_id,
            crate::crypto::engine::EphemeralKeySession::new(key, self.ttl),
        ));
        self.pending = None;
        self.phase = HandshakePhase::SendingAck;
        debug!(session_id = %hex_encode(&session_id), "shared secret derived");
        Ok(())
    }

    /// `SendingAck → Connected`. Finalizes the session and starts the TTL
    /// clock.
    pub fn receive_ack(&mut self) -> Result<(), ProtocolError> {
        if self.phase != HandshakePhase::SendingAck {
            return Err(self.invalid("receive_ack"));
        }
        let expired = self.session.as_ref().map(|s| s.is_expired()).unwrap_or(true);
        if expired {
            return Err(self.expire_session());
        }
        let missing = self.invalid("receive_ack");
        let session = match self.session.as_mut() {
            Some(s) => s,
            None => return Err(missing),
        };
        session.key_mut().restart_clock();
        let id = *session.session_id();
        self.phase = HandshakePhase::Connected;
        self.audit_event(AuditEvent::SessionEstablished {
            session_id: hex_encode(&id),
        });
        info!(session_id = %hex_encode(&id), "session established");
        Ok(())
    }

    /// Encrypt an application message under the session key. `Connected`
    /// only.
    pub fn encrypt_message(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if self.phase != HandshakePhase::Connected {
            return Err(self.invalid("encrypt_message"));
        }
        let expired = self.session.as_ref().map(|s| s.is_expired()).unwrap_or(true);
        if expired {
            return Err(self.expire_session());
        }
        let session = match self.session.as_ref() {
            Some(s) => s,
            None => return Err(self.invalid("encrypt_message")),
        };
        let key = session.key().clone();
        match self.crypto.encrypt(&key, plaintext) {
            Ok(ct) => Ok(ct),
            Err(CryptoError::KeyUnusable) => Err(self.expire_session()),
            Err(_) => Err(self.fail_auth("message_encrypt")),
        }
    }

    /// Decrypt an application message. A failed tag check is
    /// security-relevant: the session is torn down and never retried.
    pub fn decrypt_message(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if self.phase != HandshakePhase::Connected {
            return Err(self.invalid("decrypt_message"));
        }
        let expired = self.session.as_ref().map(|s| s.is_expired()).unwrap_or(true);
        if expired {
            return Err(self.expire_session());
        }
        let session = match self.session.as_ref() {
            Some(s) => s,
            None => return Err(self.invalid("decrypt_message")),
        };
        match self.crypto.decrypt(session.key(), ciphertext) {
            Ok(pt) => Ok(pt),
            Err(CryptoError::KeyUnusable) => Err(self.expire_session()),
            Err(_) => Err(self.fail_auth("message_decrypt")),
        }
    }

    /// Abort whatever is in flight: keys are invalidated, never left
    /// half-applied. Also the only way out of `Error`.
    pub fn abort(&mut self) {
        let from = self.phase;
        self.teardown(HandshakePhase::Idle);
        if from != HandshakePhase::Idle {
            self.audit_event(AuditEvent::HandshakeAborted {
                from_state: from.as_str().to_string(),
            });
            debug!(from = from.as_str(), "handshake aborted");
        }
    }

    /// Capture the current `Connected` session for fallback preservation.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        if self.phase != HandshakePhase::Connected {
            return None;
        }
        let session = self.session.as_ref()?;
        SessionSnapshot::capture(session).ok()
    }

    /// Resume a previously captured session without a fresh handshake.
    /// Only legal from `Idle`; an expired snapshot fails with
    /// `SessionExpired` and a fresh handshake is required.
    pub fn restore_snapshot(&mut self, snapshot: &SessionSnapshot) -> Result<(), ProtocolError> {
        if self.phase != HandshakePhase::Idle {
            return Err(self.invalid("restore_snapshot"));
        }
        let session = snapshot.restore().map_err(|e| match e {
            SessionError::Expired => ProtocolError::SessionExpired,
            SessionError::BadSnapshot => ProtocolError::SnapshotRejected,
        })?;
        let id = *session.session_id();
        self.session = Some(session);
        self.phase = HandshakePhase::Connected;
        self.audit_event(AuditEvent::SessionResumed {
            session_id: hex_encode(&id),
        });
        info!(session_id = %hex_encode(&id), "session resumed from snapshot");
        Ok(())
    }
}

/// Linearizes engine access: application-driven and fallback-driven
/// transitions serialize on one mutex, so the state machine is never
/// reentered mid-transition.
#[derive(Clone)]
pub struct SharedProtocolEngine {
    inner: Arc<Mutex<ProtocolEngine>>,
}

impl SharedProtocolEngine {
    pub fn new(engine: ProtocolEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ProtocolEngine> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

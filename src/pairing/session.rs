use std::time::{Duration, Instant};

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::constants::*;
use crate::codec::{Reader, Writer};
use crate::crypto::engine::EphemeralKeySession;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("bad snapshot")]
    BadSnapshot,
    #[error("session expired")]
    Expired,
}

/// Handshake phases. `Error` is terminal until an explicit abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Idle,
    WaitingForKeyPayload,
    SendingAck,
    Connected,
    Error,
}

impl HandshakePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakePhase::Idle => "idle",
            HandshakePhase::WaitingForKeyPayload => "waiting_for_key_payload",
            HandshakePhase::SendingAck => "sending_ack",
            HandshakePhase::Connected => "connected",
            HandshakePhase::Error => "error",
        }
    }
}

/// An established (or establishing) session: id plus TTL-bound key material.
/// Owned exclusively by the handshake engine; key bytes are zeroed when the
/// session is dropped or torn down.
pub struct Session {
    session_id: [u8; SZ_SESSION_ID],
    key: EphemeralKeySession,
}

impl Session {
    pub fn new(session_id: [u8; SZ_SESSION_ID], key: EphemeralKeySession) -> Self {
        Self { session_id, key }
    }

    pub fn session_id(&self) -> &[u8; SZ_SESSION_ID] {
        &self.session_id
    }

    pub fn key(&self) -> &EphemeralKeySession {
        &self.key
    }

    pub fn key_mut(&mut self) -> &mut EphemeralKeySession {
        &mut self.key
    }

    pub fn is_expired(&self) -> bool {
        self.key.is_expired()
    }

    pub fn invalidate(&mut self) {
        self.key.invalidate();
    }
}

const SNAPSHOT_MAGIC: &[u8; 4] = b"BLSS";
const SNAPSHOT_VERSION: u8 = 1;

/// Opaque capture of a `Connected` session, used by the fallback controller
/// to resume without a fresh handshake. Carries the remaining TTL at capture
/// time; restoring after that window has elapsed fails with `Expired`, so a
/// snapshot can never extend a session's life.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionSnapshot {
    bytes: Vec<u8>,
    #[zeroize(skip)]
    captured_at: Instant,
}

impl SessionSnapshot {
    pub fn capture(session: &Session) -> Result<Self, SessionError> {
        let key = session.key.key().map_err(|_| SessionError::Expired)?;
        let remaining = session.key.remaining_ttl();
        if remaining.is_zero() {
            return Err(SessionError::Expired);
        }
        let mut w = Writer::new();
        w.write_bytes(SNAPSHOT_MAGIC);
        w.write_u8(SNAPSHOT_VERSION);
        w.write_bytes(&session.session_id);
        w.write_bytes(key);
        w.write_u64(remaining.as_millis() as u64);
        Ok(Self {
            bytes: w.into_vec(),
            captured_at: Instant::now(),
        })
    }

    /// Rebuild the session. The remaining TTL recorded at capture is reduced
    /// by the time spent in fallback; a fully elapsed window is `Expired`.
    pub fn restore(&self) -> Result<Session, SessionError> {
        let mut r = Reader::new(&self.bytes);
        let magic = r.read_exact::<4>().map_err(|_| SessionError::BadSnapshot)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(SessionError::BadSnapshot);
        }
        let version = r.read_u8().map_err(|_| SessionError::BadSnapshot)?;
        if version != SNAPSHOT_VERSION {
            return Err(SessionError::BadSnapshot);
        }
        let session_id = r
            .read_exact::<SZ_SESSION_ID>()
            .map_err(|_| SessionError::BadSnapshot)?;
        let key = r.read_exact::<32>().map_err(|_| SessionError::BadSnapshot)?;
        let remaining_ms = r.read_u64().map_err(|_| SessionError::BadSnapshot)?;
        r.finish().map_err(|_| SessionError::BadSnapshot)?;

        let remaining = Duration::from_millis(remaining_ms)
            .saturating_sub(self.captured_at.elapsed());
        if remaining.is_zero() {
            return Err(SessionError::Expired);
        }
        Ok(Session::new(
            session_id,
            EphemeralKeySession::new(key, remaining),
        ))
    }
}

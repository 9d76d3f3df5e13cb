//! Append-only, cryptographically signed audit log.
//!
//! Every security-relevant event is recorded with a strictly increasing
//! sequence number, a hash link to the previous entry, and an Ed25519
//! signature over (content, sequence, previous hash). Altering any single
//! historical entry breaks verification even if only that entry changes.

use std::ops::Range;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::codec::Writer;
use crate::crypto::stdcrypto::{StdCrypto, StdEd25519, StdRng};
use crate::crypto::traits::{Hash, SecureRng, SigEd25519};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("event serialization failed")]
    Serialization,
    #[error("signing failed")]
    Signing,
}

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Security-relevant events mirrored into the log by the protocol engine,
/// channel validator, and fallback controller. Hosts may append their own
/// via `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEvent {
    HandshakeInitiated { session_id: String },
    SessionEstablished { session_id: String },
    SessionResumed { session_id: String },
    SessionExpired { session_id: String },
    SessionMismatch { expected: String, received: String },
    AuthenticationFailed { context: String },
    HandshakeAborted { from_state: String },
    ReplayDetected { sequence_id: u64, channel: String },
    TemporalCouplingFailure { delta_ms: u64 },
    FallbackActivated { reason: String },
    FallbackRecovered { session_resumed: bool },
    Custom { code: String, detail: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub event: AuditEvent,
    pub prev_hash: [u8; 32],
    pub signature: Vec<u8>,
}

pub struct SignedAuditLog {
    entries: Mutex<Vec<LogEntry>>,
    crypto: StdCrypto,
    ed25519: StdEd25519,
    sign_priv: [u8; 32],
    sign_pub: [u8; 32],
}

impl Default for SignedAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SignedAuditLog {
    pub fn new() -> Self {
        let mut rng = StdRng;
        let mut sign_priv = [0u8; 32];
        rng.fill(&mut sign_priv);
        Self::with_signing_key(sign_priv)
    }

    pub fn with_signing_key(sign_priv: [u8; 32]) -> Self {
        let ed25519 = StdEd25519;
        let mut sign_pub = [0u8; 32];
        let derived = ed25519.derive_public(&sign_priv);
        if derived.len() == 32 {
            sign_pub.copy_from_slice(&derived);
        }
        Self {
            entries: Mutex::new(Vec::new()),
            crypto: StdCrypto,
            ed25519,
            sign_priv,
            sign_pub,
        }
    }

    pub fn verifying_key(&self) -> [u8; 32] {
        self.sign_pub
    }

    fn signing_bytes(
        sequence: u64,
        timestamp_ms: u64,
        content: &[u8],
        prev_hash: &[u8; 32],
    ) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u64(sequence);
        w.write_u64(timestamp_ms);
        w.write_varbytes_u32(content);
        w.write_bytes(prev_hash);
        w.into_vec()
    }

    fn entry_hash(&self, entry: &LogEntry, content: &[u8]) -> [u8; 32] {
        let mut m = Self::signing_bytes(
            entry.sequence,
            entry.timestamp_ms,
            content,
            &entry.prev_hash,
        );
        m.extend_from_slice(&entry.signature);
        self.crypto.sha256(&m)
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Append an event, assigning the next sequence number. Returns the
    /// assigned sequence.
    pub fn append(&self, event: AuditEvent) -> Result<u64, AuditError> {
        let content = serde_json::to_vec(&event).map_err(|_| AuditError::Serialization)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let sequence = entries.len() as u64;
        let prev_hash = match entries.last() {
            Some(prev) => {
                let prev_content =
                    serde_json::to_vec(&prev.event).map_err(|_| AuditError::Serialization)?;
                self.entry_hash(prev, &prev_content)
            }
            None => [0u8; 32],
        };
        let timestamp_ms = Self::now_ms();
        let msg = Self::signing_bytes(sequence, timestamp_ms, &content, &prev_hash);
        let signature = self.ed25519.sign(&self.sign_priv, &msg);
        if signature.len() != 64 {
            return Err(AuditError::Signing);
        }

        entries.push(LogEntry {
            sequence,
            timestamp_ms,
            event,
            prev_hash,
            signature,
        });
        Ok(sequence)
    }

    /// Walk the full chain: sequence numbers strictly increasing with no
    /// gaps, every previous-hash link intact, every signature valid.
    pub fn verify_log_integrity(&self) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut expected_prev = [0u8; 32];
        for (i, entry) in entries.iter().enumerate() {
            if entry.sequence != i as u64 {
                warn!(sequence = entry.sequence, "audit sequence out of order");
                return false;
            }
            if entry.prev_hash != expected_prev {
                warn!(sequence = entry.sequence, "audit hash link broken");
                return false;
            }
            let content = match serde_json::to_vec(&entry.event) {
                Ok(c) => c,
                Err(_) => return false,
            };
            let msg = Self::signing_bytes(
                entry.sequence,
                entry.timestamp_ms,
                &content,
                &entry.prev_hash,
            );
            if !self.ed25519.verify(&self.sign_pub, &msg, &entry.signature) {
                warn!(sequence = entry.sequence, "audit signature invalid");
                return false;
            }
            expected_prev = self.entry_hash(entry, &content);
        }
        true
    }

    /// Entries with sequence numbers in `range`, clamped to what exists.
    pub fn get_entries(&self, range: Range<u64>) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let start = (range.start as usize).min(entries.len());
        let end = (range.end as usize).min(entries.len());
        entries[start..end].to_vec()
    }

    pub fn len(&self) -> u64 {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

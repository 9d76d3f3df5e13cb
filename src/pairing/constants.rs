//! Constants from BLP v1.0.

use std::time::Duration;

// Fixed wire sizes (BLP §2)
pub const SZ_SESSION_ID: usize = 16;
pub const SZ_X25519_PUB: usize = 32;
pub const SZ_PAYLOAD_NONCE: usize = 12;
pub const SZ_BINDING_TAG: usize = 32;
pub const SZ_KEY_EXCHANGE_PAYLOAD: usize =
    SZ_SESSION_ID + SZ_X25519_PUB + SZ_PAYLOAD_NONCE + SZ_BINDING_TAG;

pub const SZ_HANDSHAKE_NONCE: usize = 16;

// Session lifetime bounds (BLP §3)
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(5);
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(5);

// Derivation labels (BLP §4)
pub const LABEL_SESSION_ID: &[u8] = b"BLP1/SID";
pub const LABEL_BINDING_TAG: &[u8] = b"BLP1/KX";
pub const LABEL_SESSION_KEY: &str = "BLP1/SK";

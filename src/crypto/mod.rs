//! Cryptographic interfaces and standard implementations.
//!
//! BLP v1.0 requires:
//! - SHA-256 (fingerprints, session ids, binding tags, audit hash links)
//! - KMAC-256 (key derivation, timestamp-bound channel MACs)
//! - AES-256-GCM
//! - X25519 (ephemeral key agreement)
//! - Ed25519 (audit log signatures)

pub mod engine;
pub mod stdcrypto;
pub mod traits;

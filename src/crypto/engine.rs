//! Owning crypto engine: ephemeral X25519 agreement, authenticated payload
//! encryption, timestamp-bound channel MACs, audit signing, fingerprints.

use std::time::{Duration, Instant};

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::stdcrypto::{StdCrypto, StdEd25519, StdRng};
use super::traits::*;

pub const AEAD_NONCE_LEN: usize = 12;
pub const AEAD_TAG_LEN: usize = 16;

const TS_MAC_LABEL: &str = "BLP1/TSMAC";

/// Symmetric key material derived for one session.
///
/// All use fails closed once the TTL elapses or the key is invalidated; the
/// key bytes are zeroed on drop and on invalidation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EphemeralKeySession {
    key: [u8; 32],
    #[zeroize(skip)]
    derived_at: Instant,
    #[zeroize(skip)]
    ttl: Duration,
    #[zeroize(skip)]
    invalidated: bool,
}

impl EphemeralKeySession {
    pub fn new(key: [u8; 32], ttl: Duration) -> Self {
        Self {
            key,
            derived_at: Instant::now(),
            ttl,
            invalidated: false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.invalidated || self.derived_at.elapsed() > self.ttl
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn remaining_ttl(&self) -> Duration {
        if self.invalidated {
            return Duration::ZERO;
        }
        self.ttl.saturating_sub(self.derived_at.elapsed())
    }

    /// Restart the TTL clock. The handshake calls this once on finalization.
    pub fn restart_clock(&mut self) {
        self.derived_at = Instant::now();
    }

    pub fn key(&self) -> Result<&[u8; 32], CryptoError> {
        if self.is_expired() {
            return Err(CryptoError::KeyUnusable);
        }
        Ok(&self.key)
    }

    pub fn invalidate(&mut self) {
        self.key.zeroize();
        self.invalidated = true;
    }
}

/// Constant-time equality for secrets; does not short-circuit on the first
/// mismatching byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// AEAD open for the nonce-prepended framing produced by
/// [`CryptoEngine::encrypt`]. Every failure path performs exactly one AEAD
/// open and surfaces the same error, so the caller cannot distinguish a
/// malformed length from a tag mismatch or a wrong key.
pub(crate) fn open_sealed(
    crypto: &StdCrypto,
    key: &EphemeralKeySession,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let k = key.key().map_err(|_| CryptoError::KeyUnusable)?;
    if ciphertext.len() < AEAD_NONCE_LEN + AEAD_TAG_LEN {
        let _ = crypto.open(k, &[0u8; AEAD_NONCE_LEN], &[], &[]);
        return Err(CryptoError::AuthFail);
    }
    let mut nonce = [0u8; AEAD_NONCE_LEN];
    nonce.copy_from_slice(&ciphertext[..AEAD_NONCE_LEN]);
    crypto
        .open(k, &nonce, &[], &ciphertext[AEAD_NONCE_LEN..])
        .map_err(|_| CryptoError::AuthFail)
}

/// Key generation, agreement, authenticated encryption, MACs, and signing for
/// one device. Owns its ephemeral X25519 pair (regenerated after every
/// derivation) and a long-lived Ed25519 identity used only for audit entries.
pub struct CryptoEngine {
    crypto: StdCrypto,
    ed25519: StdEd25519,
    rng: StdRng,
    dh_priv: X25519Priv,
    dh_pub: X25519Pub,
    sig_priv: [u8; 32],
    sig_pub: [u8; 32],
}

impl Drop for CryptoEngine {
    fn drop(&mut self) {
        self.sig_priv.zeroize();
    }
}

impl Default for CryptoEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoEngine {
    pub fn new() -> Self {
        let crypto = StdCrypto;
        let ed25519 = StdEd25519;
        let mut rng = StdRng;
        let (dh_priv, dh_pub) = crypto.keypair();
        let mut sig_priv = [0u8; 32];
        rng.fill(&mut sig_priv);
        let mut sig_pub = [0u8; 32];
        let derived = ed25519.derive_public(&sig_priv);
        if derived.len() == 32 {
            sig_pub.copy_from_slice(&derived);
        }
        Self {
            crypto,
            ed25519,
            rng,
            dh_priv,
            dh_pub,
            sig_priv,
            sig_pub,
        }
    }

    pub fn dh_public(&self) -> X25519Pub {
        self.dh_pub
    }

    pub fn signing_public_key(&self) -> [u8; 32] {
        self.sig_pub
    }

    /// Discard the current ephemeral pair and advertise a fresh one.
    pub fn regenerate_dh(&mut self) {
        let (sk, pk) = self.crypto.keypair();
        self.dh_priv = sk;
        self.dh_pub = pk;
    }

    /// X25519 shared secret with `peer`, consuming the current ephemeral
    /// pair: a fresh pair is generated immediately so the spent private key
    /// never services a second session.
    pub fn diffie_hellman(&mut self, peer: &X25519Pub) -> [u8; 32] {
        let shared = self.crypto.dh(&self.dh_priv, peer);
        self.regenerate_dh();
        shared
    }

    /// Labeled KMAC-256 key derivation, 32-byte output.
    pub fn kdf(&self, key: &[u8], label: &str, context: &[u8]) -> [u8; 32] {
        let v = self.crypto.kmac256(key, label, context, 32);
        let mut out = [0u8; 32];
        out.copy_from_slice(&v);
        out
    }

    pub fn sha256(&self, data: &[u8]) -> [u8; 32] {
        self.crypto.sha256(data)
    }

    pub fn generate_nonce16(&mut self) -> [u8; 16] {
        let mut n = [0u8; 16];
        self.rng.fill(&mut n);
        n
    }

    pub fn random_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.rng.fill(&mut buf);
        buf
    }

    /// Authenticated encryption with an internally generated nonce, unique
    /// per call and prepended to the ciphertext.
    pub fn encrypt(
        &mut self,
        key: &EphemeralKeySession,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let k = key.key()?;
        let mut nonce = [0u8; AEAD_NONCE_LEN];
        self.rng.fill(&mut nonce);
        let ct = self.crypto.seal(k, &nonce, &[], plaintext);
        if ct.is_empty() {
            return Err(CryptoError::InvalidKey);
        }
        let mut out = Vec::with_capacity(AEAD_NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Authenticated decryption. On any failure returns `AuthFail` and no
    /// plaintext, partial or otherwise.
    pub fn decrypt(
        &self,
        key: &EphemeralKeySession,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        open_sealed(&self.crypto, key, ciphertext)
    }

    /// MAC over `payload` bound to `timestamp`, for the low-bandwidth
    /// ultrasonic channel where full authenticated encryption is too costly.
    pub fn mac_timestamped(
        &self,
        key: &EphemeralKeySession,
        payload: &[u8],
        timestamp: u64,
    ) -> Result<[u8; 32], CryptoError> {
        let k = key.key()?;
        let mut m = timestamp.to_be_bytes().to_vec();
        m.extend_from_slice(payload);
        Ok(self.kdf(k, TS_MAC_LABEL, &m))
    }

    pub fn verify_mac_timestamped(
        &self,
        key: &EphemeralKeySession,
        payload: &[u8],
        timestamp: u64,
        mac: &[u8],
    ) -> Result<(), CryptoError> {
        let computed = self.mac_timestamped(key, payload, timestamp)?;
        if constant_time_eq(&computed, mac) {
            Ok(())
        } else {
            Err(CryptoError::AuthFail)
        }
    }

    /// Ed25519 signature over `msg` with this device's audit identity.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.ed25519.sign(&self.sig_priv, msg)
    }

    pub fn verify_signature(&self, pubk: &[u8], msg: &[u8], sig: &[u8]) -> bool {
        self.ed25519.verify(pubk, msg, sig)
    }

    /// Non-reversible 32-byte fingerprint of stable hardware descriptors.
    pub fn device_fingerprint(&self, descriptors: &[u8]) -> [u8; 32] {
        self.crypto.sha256(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn session(ttl_ms: u64) -> EphemeralKeySession {
        EphemeralKeySession::new([0x5Au8; 32], Duration::from_millis(ttl_ms))
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let mut e = CryptoEngine::new();
        let key = session(5000);
        let ct = e.encrypt(&key, b"hello beam").unwrap();
        assert_eq!(e.decrypt(&key, &ct).unwrap(), b"hello beam");
    }

    #[test]
    fn two_encryptions_never_bit_identical() {
        let mut e = CryptoEngine::new();
        let key = session(5000);
        let a = e.encrypt(&key, b"same plaintext").unwrap();
        let b = e.encrypt(&key, b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn decrypt_failure_surfaces_single_error_variant() {
        let mut e = CryptoEngine::new();
        let key = session(5000);
        let other = session(5000);
        let mut tampered = e.encrypt(&key, b"payload").unwrap();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;

        // tag mismatch, short input, wrong key: same variant for all three
        assert!(matches!(e.decrypt(&key, &tampered), Err(CryptoError::AuthFail)));
        assert!(matches!(e.decrypt(&key, &[0u8; 5]), Err(CryptoError::AuthFail)));
        let other_ct = {
            let wrong = EphemeralKeySession::new([0x77u8; 32], Duration::from_secs(5));
            e.encrypt(&wrong, b"payload").unwrap()
        };
        assert!(matches!(e.decrypt(&other, &other_ct), Err(CryptoError::AuthFail)));
    }

    #[test]
    fn expired_key_fails_closed() {
        let mut e = CryptoEngine::new();
        let key = EphemeralKeySession::new([1u8; 32], Duration::from_millis(1));
        thread::sleep(Duration::from_millis(5));
        assert!(key.is_expired());
        assert!(matches!(e.encrypt(&key, b"x"), Err(CryptoError::KeyUnusable)));
        assert!(matches!(e.decrypt(&key, &[0u8; 64]), Err(CryptoError::KeyUnusable)));
        assert!(matches!(
            e.mac_timestamped(&key, b"x", 1),
            Err(CryptoError::KeyUnusable)
        ));
    }

    #[test]
    fn invalidated_key_fails_closed_and_is_zeroed() {
        let mut key = session(5000);
        key.invalidate();
        assert!(key.is_expired());
        assert!(key.key().is_err());
        assert_eq!(key.remaining_ttl(), Duration::ZERO);
    }

    #[test]
    fn mac_binds_payload_and_timestamp() {
        let e = CryptoEngine::new();
        let key = session(5000);
        let mac = e.mac_timestamped(&key, b"frame", 1000).unwrap();
        e.verify_mac_timestamped(&key, b"frame", 1000, &mac).unwrap();
        assert!(e.verify_mac_timestamped(&key, b"frame", 1001, &mac).is_err());
        assert!(e.verify_mac_timestamped(&key, b"framf", 1000, &mac).is_err());
    }

    #[test]
    fn mismatched_peers_derive_different_secrets() {
        let mut a = CryptoEngine::new();
        let mut b = CryptoEngine::new();
        let mut c = CryptoEngine::new();
        let b_pub = b.dh_public();
        let c_pub = c.dh_public();
        let a_pub = a.dh_public();

        let ab = a.diffie_hellman(&b_pub);
        let ba = b.diffie_hellman(&a_pub);
        let ca = c.diffie_hellman(&a_pub);
        assert_eq!(ab, ba);
        assert_ne!(ab, ca);
    }

    #[test]
    fn diffie_hellman_regenerates_the_ephemeral_pair() {
        let mut a = CryptoEngine::new();
        let b_pub = CryptoEngine::new().dh_public();
        let before = a.dh_public();
        let _ = a.diffie_hellman(&b_pub);
        assert_ne!(before.0, a.dh_public().0);
    }

    #[test]
    fn fingerprint_is_stable_and_input_sensitive() {
        let e = CryptoEngine::new();
        let fp1 = e.device_fingerprint(b"serial=XK-100;cam=v2");
        let fp2 = e.device_fingerprint(b"serial=XK-100;cam=v2");
        let fp3 = e.device_fingerprint(b"serial=XK-101;cam=v2");
        assert_eq!(fp1, fp2);
        assert_ne!(fp1, fp3);
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn sign_verify_with_engine_identity() {
        let e = CryptoEngine::new();
        let sig = e.sign(b"log entry");
        assert!(e.verify_signature(&e.signing_public_key(), b"log entry", &sig));
        assert!(!e.verify_signature(&e.signing_public_key(), b"log entrz", &sig));
    }

    #[test]
    fn random_bytes_arbitrary_length() {
        let mut e = CryptoEngine::new();
        assert_eq!(e.random_bytes(0).len(), 0);
        let buf = e.random_bytes(1024);
        assert_eq!(buf.len(), 1024);
        assert!(buf.iter().any(|b| *b != 0));
    }
}

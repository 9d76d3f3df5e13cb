//! Standard-crypto implementations backing the trait seams in [`traits`].

use super::traits::*;
use aes_gcm::{
    aead::{Aead as _, Payload},
    Aes256Gcm, KeyInit, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher, Kmac as KeccakKmac};

#[derive(Clone, Copy, Default)]
pub struct StdCrypto;

impl StdCrypto {
    fn seal_inner(
        &self,
        key: &[u8],
        nonce: &[u8],
        ad: &[u8],
        pt: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if key.len() != 32 || nonce.len() != 12 {
            return Err(CryptoError::InvalidKey);
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;
        let nonce = Nonce::from_slice(nonce);
        cipher
            .encrypt(nonce, Payload { msg: pt, aad: ad })
            .map_err(|_| CryptoError::AuthFail)
    }
}

impl Hash for StdCrypto {
    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        let mut h = Sha256::new();
        h.update(data);
        h.finalize().into()
    }
}

impl Kmac for StdCrypto {
    fn kmac256(&self, key: &[u8], label: &str, data: &[u8], outlen: usize) -> Vec<u8> {
        let mut kmac = KeccakKmac::v256(key, label.as_bytes());
        kmac.update(data);
        let mut out = vec![0u8; outlen];
        kmac.finalize(&mut out);
        out
    }
}

impl Aead for StdCrypto {
    fn seal(&self, key32: &[u8; 32], nonce12: &[u8; 12], ad: &[u8], pt: &[u8]) -> Vec<u8> {
        match self.seal_inner(key32, nonce12, ad, pt) {
            Ok(ct) => ct,
            Err(_) => Vec::new(),
        }
    }

    fn open(
        &self,
        key32: &[u8; 32],
        nonce12: &[u8; 12],
        ad: &[u8],
        ct: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key32).map_err(|_| CryptoError::InvalidKey)?;
        cipher
            .decrypt(nonce12.into(), Payload { msg: ct, aad: ad })
            .map_err(|_| CryptoError::AuthFail)
    }
}

impl X25519Dh for StdCrypto {
    fn keypair(&self) -> (X25519Priv, X25519Pub) {
        use x25519_dalek::{PublicKey, StaticSecret};
        let mut sk_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut sk_bytes);
        let sk = StaticSecret::from(sk_bytes);
        let pk = PublicKey::from(&sk);
        (X25519Priv(sk.to_bytes()), X25519Pub(pk.to_bytes()))
    }

    fn dh(&self, privk: &X25519Priv, pubk: &X25519Pub) -> [u8; 32] {
        use x25519_dalek::{PublicKey, StaticSecret};
        let sk = StaticSecret::from(privk.0);
        let pk = PublicKey::from(pubk.0);
        (sk.diffie_hellman(&pk)).to_bytes()
    }
}

#[derive(Clone, Copy, Default)]
pub struct StdEd25519;

impl SigEd25519 for StdEd25519 {
    fn sign(&self, privk: &[u8], msg: &[u8]) -> Vec<u8> {
        use ed25519_dalek::{Signature, Signer, SigningKey};
        let Ok(bytes) = <[u8; 32]>::try_from(privk) else {
            return Vec::new();
        };
        let sk = SigningKey::from_bytes(&bytes);
        let sig: Signature = sk.sign(msg);
        sig.to_bytes().to_vec()
    }

    fn verify(&self, pubk: &[u8], msg: &[u8], sig: &[u8]) -> bool {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};
        let Ok(bytes) = <[u8; 32]>::try_from(pubk) else {
            return false;
        };
        let pk = match VerifyingKey::from_bytes(&bytes) {
            Ok(v) => v,
            Err(_) => return false,
        };
        let sig = match Signature::from_slice(sig) {
            Ok(s) => s,
            Err(_) => return false,
        };
        pk.verify(msg, &sig).is_ok()
    }

    fn derive_public(&self, privk: &[u8]) -> Vec<u8> {
        use ed25519_dalek::SigningKey;
        let Ok(bytes) = <[u8; 32]>::try_from(privk) else {
            return Vec::new();
        };
        let sk = SigningKey::from_bytes(&bytes);
        sk.verifying_key().to_bytes().to_vec()
    }
}

#[derive(Clone, Copy, Default)]
pub struct StdRng;

impl SecureRng for StdRng {
    fn fill(&mut self, out: &mut [u8]) {
        OsRng.fill_bytes(out);
    }
}

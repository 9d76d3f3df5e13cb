use super::constants::*;
use crate::codec::{CodecError, Reader, Writer};
use crate::crypto::traits::Hash;

/// Key-exchange payload carried on the optical channel.
///
/// Fixed 92-byte layout, fields concatenated in this exact order; truncation,
/// reordering, or trailing bytes are rejected before any cryptographic check
/// runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchangePayload {
    pub session_id: [u8; SZ_SESSION_ID],
    pub public_key: [u8; SZ_X25519_PUB],
    pub nonce: [u8; SZ_PAYLOAD_NONCE],
    pub signature: [u8; SZ_BINDING_TAG],
}

impl KeyExchangePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_bytes(&self.session_id);
        w.write_bytes(&self.public_key);
        w.write_bytes(&self.nonce);
        w.write_bytes(&self.signature);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(buf);
        let session_id = r.read_exact::<SZ_SESSION_ID>()?;
        let public_key = r.read_exact::<SZ_X25519_PUB>()?;
        let nonce = r.read_exact::<SZ_PAYLOAD_NONCE>()?;
        let signature = r.read_exact::<SZ_BINDING_TAG>()?;
        r.finish()?;
        Ok(Self {
            session_id,
            public_key,
            nonce,
            signature,
        })
    }

    /// Cross-channel binding tag: SHA-256 over the payload with the signature
    /// field zeroed, domain-labeled and bound to the ultrasonic handshake
    /// nonce. Only a party that observed the ultrasonic channel can produce
    /// or verify it.
    pub fn binding_tag(
        &self,
        hash: &dyn Hash,
        handshake_nonce: &[u8; SZ_HANDSHAKE_NONCE],
    ) -> [u8; SZ_BINDING_TAG] {
        let mut tmp = self.clone();
        tmp.signature = [0u8; SZ_BINDING_TAG];
        let mut m = LABEL_BINDING_TAG.to_vec();
        m.extend_from_slice(&tmp.encode());
        m.extend_from_slice(handshake_nonce);
        hash.sha256(&m)
    }
}

//! Canonical encoding/parsing for wire payloads, session snapshots, and audit
//! entry signing bytes.
//!
//! - Unsigned integers are big-endian.
//! - varbytes<u32> = u32 len || len bytes
//! - trailing bytes are rejected by message-specific decoders via `finish()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated input")]
    Truncated,
    #[error("length exceeds remaining bytes")]
    LengthOutOfRange,
    #[error("trailing bytes not permitted")]
    TrailingBytes,
    #[error("invalid value: {0}")]
    Invalid(&'static str),
}

#[derive(Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self { Self { buf, pos: 0 } }
    pub fn remaining(&self) -> usize { self.buf.len().saturating_sub(self.pos) }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n { return Err(CodecError::Truncated); }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_be_bytes(a))
    }
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, CodecError> {
        Ok(self.take(n)?.to_vec())
    }
    pub fn read_exact<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let b = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(b);
        Ok(out)
    }
    pub fn read_varbytes_u32(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        if self.remaining() < len { return Err(CodecError::LengthOutOfRange); }
        self.read_bytes(len)
    }
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.remaining() != 0 { Err(CodecError::TrailingBytes) } else { Ok(()) }
    }
}

#[derive(Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self { Self { buf: Vec::new() } }
    pub fn into_vec(self) -> Vec<u8> { self.buf }
    pub fn write_u8(&mut self, v: u8) { self.buf.push(v); }
    pub fn write_u16(&mut self, v: u16) { self.buf.extend_from_slice(&v.to_be_bytes()); }
    pub fn write_u32(&mut self, v: u32) { self.buf.extend_from_slice(&v.to_be_bytes()); }
    pub fn write_u64(&mut self, v: u64) { self.buf.extend_from_slice(&v.to_be_bytes()); }
    pub fn write_bytes(&mut self, b: &[u8]) { self.buf.extend_from_slice(b); }
    pub fn write_varbytes_u32(&mut self, b: &[u8]) {
        self.write_u32(b.len() as u32);
        self.write_bytes(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_scalars_and_bytes() {
        let mut w = Writer::new();
        w.write_u8(0xAB);
        w.write_u16(0x0102);
        w.write_u32(0xDEAD_BEEF);
        w.write_u64(0x0123_4567_89AB_CDEF);
        w.write_varbytes_u32(b"payload");
        let buf = w.into_vec();

        let mut r = Reader::new(&buf);
        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert_eq!(r.read_u16().unwrap(), 0x0102);
        assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_u64().unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(r.read_varbytes_u32().unwrap(), b"payload");
        r.finish().unwrap();
    }

    #[test]
    fn truncated_input_rejected() {
        let mut r = Reader::new(&[0x01, 0x02, 0x03]);
        assert!(matches!(r.read_u32(), Err(CodecError::Truncated)));
    }

    #[test]
    fn varbytes_length_beyond_remaining_rejected() {
        let mut w = Writer::new();
        w.write_u32(100);
        w.write_bytes(&[0u8; 4]);
        let buf = w.into_vec();
        let mut r = Reader::new(&buf);
        assert!(matches!(r.read_varbytes_u32(), Err(CodecError::LengthOutOfRange)));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let buf = [0u8; 3];
        let mut r = Reader::new(&buf);
        let _ = r.read_u16().unwrap();
        assert!(matches!(r.finish(), Err(CodecError::TrailingBytes)));
    }

    #[test]
    fn read_exact_copies_fixed_width() {
        let buf = [1u8, 2, 3, 4];
        let mut r = Reader::new(&buf);
        let a: [u8; 4] = r.read_exact().unwrap();
        assert_eq!(a, [1, 2, 3, 4]);
        r.finish().unwrap();
    }
}

//! Adaptive optical error correction.
//!
//! Smooths externally supplied channel-quality telemetry into an
//! `ecc_strength` in [0, 1] and sizes Reed-Solomon redundancy from it.
//! Corrupted shards are detected by per-shard checksums and treated as
//! erasures; anything beyond the code's correction capacity is rejected,
//! never silently corrupted.

use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::{Reader, Writer};
use crate::channel::{EnvironmentTelemetry, RangeTelemetry};

const FRAME_VERSION: u8 = 1;
const SHARD_CHECKSUM_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum EccError {
    #[error("encoded frame is malformed")]
    Malformed,
    #[error("payload exceeds correction capacity")]
    DecodeFailure,
    #[error("payload too large to encode")]
    Oversize,
}

/// Live optical-channel quality sample. `attenuation` is in dB/km
/// (≈1 in clear air); `turbulence` is a scattering/turbulence index in
/// [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpticalQualityMetrics {
    pub bit_error_rate: f64,
    pub signal_strength: f64,
    pub attenuation: f64,
    pub turbulence: f64,
}

impl OpticalQualityMetrics {
    /// Derive a quality sample from range/environment telemetry. Visibility
    /// maps to attenuation (Kruse-style 13/V(km) proxy), wind and humidity
    /// to the turbulence index.
    pub fn from_telemetry(range: &RangeTelemetry, env: &EnvironmentTelemetry) -> Self {
        let visibility_km = (env.visibility_m / 1000.0).clamp(0.1, 100.0);
        let attenuation = 13.0 / visibility_km;
        let turbulence = (env.wind_mps / 25.0 + env.humidity_pct / 500.0).clamp(0.0, 1.0);
        let bit_error_rate = ((1.0 - range.quality_score.clamp(0.0, 1.0)) * 0.2).max(0.0);
        Self {
            bit_error_rate,
            signal_strength: range.signal_strength.clamp(0.0, 1.0),
            attenuation,
            turbulence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EccConfig {
    #[serde(default = "default_data_shards")]
    pub data_shards: usize,
    #[serde(default = "default_min_parity")]
    pub min_parity: usize,
    #[serde(default = "default_max_parity")]
    pub max_parity: usize,
    /// EMA weight given to each new telemetry sample, in (0, 1].
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    /// Strength added after a decode failure, decayed by later samples.
    #[serde(default = "default_failure_boost")]
    pub failure_boost: f64,
}

fn default_data_shards() -> usize { 16 }
fn default_min_parity() -> usize { 2 }
fn default_max_parity() -> usize { 16 }
fn default_smoothing() -> f64 { 0.3 }
fn default_failure_boost() -> f64 { 0.1 }

impl Default for EccConfig {
    fn default() -> Self {
        Self {
            data_shards: default_data_shards(),
            min_parity: default_min_parity(),
            max_parity: default_max_parity(),
            smoothing: default_smoothing(),
            failure_boost: default_failure_boost(),
        }
    }
}

fn strength_from(m: &OpticalQualityMetrics) -> f64 {
    let att = ((m.attenuation - 1.0) / 5.0).clamp(0.0, 1.0);
    let turb = (m.turbulence / 0.7).clamp(0.0, 1.0);
    let ber = (m.bit_error_rate / 0.2).clamp(0.0, 1.0);
    let sig = 1.0 - m.signal_strength.clamp(0.0, 1.0);
    (0.10 + 0.40 * att + 0.35 * turb + 0.15 * ber + 0.10 * sig).clamp(0.0, 1.0)
}

/// Maps smoothed channel quality to redundancy and performs the
/// encode/decode. Read by the handshake engine and fallback controller via
/// [`OpticalEccAdapter::ecc_strength`]; mutated only here.
pub struct OpticalEccAdapter {
    config: EccConfig,
    smoothed: Option<OpticalQualityMetrics>,
    strength: f64,
    failure_pressure: f64,
}

impl Default for OpticalEccAdapter {
    fn default() -> Self {
        Self::new(EccConfig::default())
    }
}

impl OpticalEccAdapter {
    pub fn new(config: EccConfig) -> Self {
        Self {
            config,
            smoothed: None,
            strength: 0.5,
            failure_pressure: 0.0,
        }
    }

    pub fn ecc_strength(&self) -> f64 {
        self.strength
    }

    /// Parity shard count selected by the current strength.
    pub fn parity_shards(&self) -> usize {
        let span = self.config.max_parity.saturating_sub(self.config.min_parity) as f64;
        self.config.min_parity + (self.strength * span).round() as usize
    }

    /// Fold a telemetry sample into the smoothed estimate and recompute the
    /// strength. Monotonic: worse conditions never lower redundancy.
    pub fn update_metrics(&mut self, sample: OpticalQualityMetrics) {
        let alpha = self.config.smoothing.clamp(f64::MIN_POSITIVE, 1.0);
        let smoothed = match self.smoothed {
            None => sample,
            Some(prev) => OpticalQualityMetrics {
                bit_error_rate: prev.bit_error_rate + alpha * (sample.bit_error_rate - prev.bit_error_rate),
                signal_strength: prev.signal_strength + alpha * (sample.signal_strength - prev.signal_strength),
                attenuation: prev.attenuation + alpha * (sample.attenuation - prev.attenuation),
                turbulence: prev.turbulence + alpha * (sample.turbulence - prev.turbulence),
            },
        };
        self.smoothed = Some(smoothed);
        self.failure_pressure *= 0.5;
        if self.failure_pressure < 0.01 {
            self.failure_pressure = 0.0;
        }
        self.strength = (strength_from(&smoothed) + self.failure_pressure).clamp(0.0, 1.0);
        debug!(strength = self.strength, "ecc strength updated");
    }

    fn shard_size(payload_len: usize, data_shards: usize) -> usize {
        payload_len.div_ceil(data_shards).max(1)
    }

    fn shard_checksum(shard: &[u8]) -> [u8; SHARD_CHECKSUM_LEN] {
        let digest = Sha256::digest(shard);
        let mut out = [0u8; SHARD_CHECKSUM_LEN];
        out.copy_from_slice(&digest[..SHARD_CHECKSUM_LEN]);
        out
    }

    /// Encode `payload` with redundancy sized by the current strength.
    /// Frame: version, shard counts, payload length, then checksummed
    /// shards.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, EccError> {
        if payload.len() > u32::MAX as usize {
            return Err(EccError::Oversize);
        }
        let data_shards = self.config.data_shards;
        let parity_shards = self.parity_shards();
        if data_shards == 0 || data_shards + parity_shards > 255 {
            return Err(EccError::Malformed);
        }
        let shard_size = Self::shard_size(payload.len(), data_shards);

        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(data_shards + parity_shards);
        for i in 0..data_shards {
            let start = (i * shard_size).min(payload.len());
            let end = (start + shard_size).min(payload.len());
            let mut shard = payload[start..end].to_vec();
            shard.resize(shard_size, 0);
            shards.push(shard);
        }
        shards.resize(data_shards + parity_shards, vec![0u8; shard_size]);

        let rs = ReedSolomon::new(data_shards, parity_shards).map_err(|_| EccError::Malformed)?;
        rs.encode(&mut shards).map_err(|_| EccError::Malformed)?;

        let mut w = Writer::new();
        w.write_u8(FRAME_VERSION);
        w.write_u8(data_shards as u8);
        w.write_u8(parity_shards as u8);
        w.write_u32(payload.len() as u32);
        for shard in &shards {
            w.write_bytes(&Self::shard_checksum(shard));
            w.write_bytes(shard);
        }
        Ok(w.into_vec())
    }

    /// Reconstruct the original payload. Shards whose checksum does not
    /// match are treated as erasures; more erasures than parity shards is a
    /// `DecodeFailure`, which also raises the strength for subsequent
    /// traffic.
    pub fn decode(&mut self, frame: &[u8]) -> Result<Vec<u8>, EccError> {
        let mut r = Reader::new(frame);
        let version = r.read_u8().map_err(|_| EccError::Malformed)?;
        if version != FRAME_VERSION {
            return Err(EccError::Malformed);
        }
        let data_shards = r.read_u8().map_err(|_| EccError::Malformed)? as usize;
        let parity_shards = r.read_u8().map_err(|_| EccError::Malformed)? as usize;
        let payload_len = r.read_u32().map_err(|_| EccError::Malformed)? as usize;
        if data_shards == 0 || parity_shards == 0 || data_shards + parity_shards > 255 {
            return Err(EccError::Malformed);
        }
        let total = data_shards + parity_shards;
        let body = r.remaining();
        if body % total != 0 {
            return Err(EccError::Malformed);
        }
        let stride = body / total;
        if stride <= SHARD_CHECKSUM_LEN {
            return Err(EccError::Malformed);
        }
        let shard_size = stride - SHARD_CHECKSUM_LEN;
        if payload_len > data_shards * shard_size {
            return Err(EccError::Malformed);
        }

        let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(total);
        let mut erasures = 0usize;
        for _ in 0..total {
            let checksum = r
                .read_exact::<SHARD_CHECKSUM_LEN>()
                .map_err(|_| EccError::Malformed)?;
            let shard = r.read_bytes(shard_size).map_err(|_| EccError::Malformed)?;
            if Self::shard_checksum(&shard) == checksum {
                shards.push(Some(shard));
            } else {
                shards.push(None);
                erasures += 1;
            }
        }
        r.finish().map_err(|_| EccError::Malformed)?;

        if erasures > parity_shards {
            self.record_decode_failure();
            return Err(EccError::DecodeFailure);
        }
        if erasures > 0 {
            let rs =
                ReedSolomon::new(data_shards, parity_shards).map_err(|_| EccError::Malformed)?;
            if rs.reconstruct(&mut shards).is_err() {
                self.record_decode_failure();
                return Err(EccError::DecodeFailure);
            }
        }

        let mut payload = Vec::with_capacity(data_shards * shard_size);
        for shard in shards.into_iter().take(data_shards).flatten() {
            payload.extend_from_slice(&shard);
        }
        payload.truncate(payload_len);
        Ok(payload)
    }

    fn record_decode_failure(&mut self) {
        self.failure_pressure =
            (self.failure_pressure + self.config.failure_boost).clamp(0.0, 1.0);
        self.strength = (self.strength + self.config.failure_boost).clamp(0.0, 1.0);
        warn!(strength = self.strength, "ecc decode failure, raising redundancy");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_sky() -> OpticalQualityMetrics {
        OpticalQualityMetrics {
            bit_error_rate: 0.001,
            signal_strength: 0.9,
            attenuation: 1.0,
            turbulence: 0.1,
        }
    }

    fn degraded() -> OpticalQualityMetrics {
        OpticalQualityMetrics {
            bit_error_rate: 0.05,
            signal_strength: 0.4,
            attenuation: 6.0,
            turbulence: 0.6,
        }
    }

    fn settled(sample: OpticalQualityMetrics) -> OpticalEccAdapter {
        let mut a = OpticalEccAdapter::default();
        for _ in 0..30 {
            a.update_metrics(sample);
        }
        a
    }

    #[test]
    fn clear_conditions_select_minimal_redundancy() {
        let a = settled(clear_sky());
        assert!(a.ecc_strength() < 0.5, "strength {}", a.ecc_strength());
    }

    #[test]
    fn degraded_conditions_select_strong_redundancy() {
        let a = settled(degraded());
        assert!(a.ecc_strength() > 0.7, "strength {}", a.ecc_strength());
        assert!(a.parity_shards() > settled(clear_sky()).parity_shards());
    }

    #[test]
    fn strength_map_is_monotonic_in_each_input() {
        let base = strength_from(&clear_sky());
        let mut worse = clear_sky();
        worse.attenuation = 3.0;
        assert!(strength_from(&worse) >= base);
        let mut worse = clear_sky();
        worse.turbulence = 0.4;
        assert!(strength_from(&worse) >= base);
        let mut worse = clear_sky();
        worse.bit_error_rate = 0.1;
        assert!(strength_from(&worse) >= base);
        let mut worse = clear_sky();
        worse.signal_strength = 0.2;
        assert!(strength_from(&worse) >= base);
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut a = settled(clear_sky());
        let payload: Vec<u8> = (0..997u32).map(|i| (i % 251) as u8).collect();
        let frame = a.encode(&payload).unwrap();
        assert_eq!(a.decode(&frame).unwrap(), payload);
    }

    #[test]
    fn empty_payload_round_trip() {
        let mut a = OpticalEccAdapter::default();
        let frame = a.encode(&[]).unwrap();
        assert_eq!(a.decode(&frame).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn corruption_within_capacity_is_recovered() {
        let mut a = settled(degraded());
        let payload = vec![0xA7u8; 500];
        let mut frame = a.encode(&payload).unwrap();
        // wipe two whole shards worth of bytes past the header
        let header = 7;
        let stride = (frame.len() - header) / (a.config.data_shards + a.parity_shards());
        for b in &mut frame[header..header + 2 * stride] {
            *b ^= 0x5A;
        }
        assert_eq!(a.decode(&frame).unwrap(), payload);
    }

    #[test]
    fn corruption_beyond_capacity_is_rejected_not_garbled() {
        let mut a = settled(clear_sky());
        let payload = vec![0x3Cu8; 400];
        let mut frame = a.encode(&payload).unwrap();
        let header = 7;
        // corrupt every shard
        let total = a.config.data_shards + a.parity_shards();
        let stride = (frame.len() - header) / total;
        for i in 0..total {
            frame[header + i * stride + SHARD_CHECKSUM_LEN] ^= 0xFF;
        }
        let before = a.ecc_strength();
        assert!(matches!(a.decode(&frame), Err(EccError::DecodeFailure)));
        assert!(a.ecc_strength() > before);
    }

    #[test]
    fn truncated_frame_is_malformed() {
        let mut a = OpticalEccAdapter::default();
        let frame = a.encode(b"payload").unwrap();
        assert!(matches!(a.decode(&frame[..frame.len() - 3]), Err(EccError::Malformed)));
        assert!(matches!(a.decode(&frame[..4]), Err(EccError::Malformed)));
    }

    #[test]
    fn telemetry_mapping_tracks_conditions() {
        let range = RangeTelemetry {
            distance_m: 80.0,
            signal_strength: 0.9,
            quality_score: 0.95,
        };
        let clear = EnvironmentTelemetry {
            temperature_c: 20.0,
            humidity_pct: 40.0,
            pressure_hpa: 1013.0,
            wind_mps: 2.0,
            visibility_m: 10_000.0,
        };
        let fog = EnvironmentTelemetry {
            visibility_m: 600.0,
            wind_mps: 12.0,
            humidity_pct: 95.0,
            ..clear
        };
        let m_clear = OpticalQualityMetrics::from_telemetry(&range, &clear);
        let m_fog = OpticalQualityMetrics::from_telemetry(&range, &fog);
        assert!(m_clear.attenuation < 2.0);
        assert!(m_fog.attenuation > 5.0);
        assert!(m_fog.turbulence > m_clear.turbulence);
        assert!(strength_from(&m_clear) < 0.5);
        assert!(strength_from(&m_fog) > 0.7);
    }
}

//! Contracts for the external collaborators this core consumes.
//!
//! The core never touches hardware: transducer drivers implement
//! [`ChannelDriver`] and push frames/diagnostics in; telemetry providers
//! supply [`RangeTelemetry`] and [`EnvironmentTelemetry`] snapshots. Both
//! channel types are treated symmetrically through the same shapes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("receive timed out")]
    Timeout,
    #[error("hardware unavailable")]
    HardwareUnavailable,
    #[error("alignment lost")]
    AlignmentLost,
    #[error("driver: {0}")]
    Driver(String),
}

/// Pull-based health snapshot reported by a channel driver. `locked` means
/// beam alignment for the optical channel and presence detection for the
/// ultrasonic one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDiagnostics {
    pub is_active: bool,
    pub locked: bool,
    pub signal_strength: f64,
    pub failures: Vec<String>,
}

impl ChannelDiagnostics {
    pub fn healthy(&self) -> bool {
        self.is_active && self.locked
    }

    pub fn nominal() -> Self {
        Self {
            is_active: true,
            locked: true,
            signal_strength: 1.0,
            failures: Vec::new(),
        }
    }
}

/// Byte transport for one physical channel. Implementations must not block
/// beyond the caller-supplied timeout.
pub trait ChannelDriver {
    fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, ChannelError>;
    fn diagnostics(&self) -> ChannelDiagnostics;
}

/// Periodic range measurement from the external range detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RangeTelemetry {
    pub distance_m: f64,
    pub signal_strength: f64,
    pub quality_score: f64,
}

/// Periodic environmental observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnvironmentTelemetry {
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub pressure_hpa: f64,
    pub wind_mps: f64,
    pub visibility_m: f64,
}

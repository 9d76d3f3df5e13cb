//! BeamLink Protocol (BLP) v1.0 core.
//!
//! Establishes a cryptographically authenticated, short-lived session between
//! two physically co-located devices over two independent physical channels: a
//! narrow optical beam (high bandwidth) and a focused ultrasonic beam (low
//! bandwidth). Both channels must be present, temporally coupled, and
//! cryptographically bound for pairing to complete.
//!
//! This crate is the decision core only: handshake state machine, crypto
//! engine, cross-channel coupling validator, adaptive optical error
//! correction, long/short-range fallback control, and a signed append-only
//! audit log. Transducer drivers, beam steering, and telemetry acquisition
//! live behind the interfaces in [`channel`].

pub mod audit;
pub mod channel;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod ecc;
pub mod error;
pub mod fallback;
pub mod pairing;
pub mod validator;

pub use audit::{AuditEvent, LogEntry, SignedAuditLog};
pub use channel::{ChannelDiagnostics, ChannelDriver, EnvironmentTelemetry, RangeTelemetry};
pub use config::LinkConfig;
pub use crypto::engine::{CryptoEngine, EphemeralKeySession};
pub use ecc::{OpticalEccAdapter, OpticalQualityMetrics};
pub use error::Error;
pub use fallback::{FallbackController, FallbackReason, LinkMode};
pub use pairing::{HandshakePhase, ProtocolEngine, ProtocolError, SharedProtocolEngine};
pub use validator::{ChannelFrame, ChannelType, ChannelValidator, ValidationState};

use core::fmt;

use crate::audit::AuditError;
use crate::channel::ChannelError;
use crate::config::ConfigError;
use crate::crypto::traits::CryptoError;
use crate::ecc::EccError;
use crate::fallback::FallbackError;
use crate::pairing::ProtocolError;
use crate::validator::ValidationError;

/// Crate-level error surface for callers.
///
/// Every reject carries a stable `reason_code=<CODE>` token so hosts and
/// audit tooling can match failures without parsing prose.
#[derive(Debug)]
pub enum Error {
    Protocol(ProtocolError),
    Validation(ValidationError),
    Crypto(CryptoError),
    Ecc(EccError),
    Channel(ChannelError),
    Fallback(FallbackError),
    Audit(AuditError),
    Config(ConfigError),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Protocol(e) => match e {
                ProtocolError::InvalidStateTransition { .. } => "invalid_state_transition",
                ProtocolError::SessionExpired => "session_expired",
                ProtocolError::SessionMismatch => "session_mismatch",
                ProtocolError::AuthenticationFailed => "authentication_failed",
                ProtocolError::SnapshotRejected => "snapshot_rejected",
                ProtocolError::Codec(_) => "malformed_payload",
            },
            Error::Validation(e) => match e {
                ValidationError::TemporalCoupling { .. } => "temporal_coupling_failure",
                ValidationError::Replay { .. } => "replay_detected",
                ValidationError::Auth => "authentication_failed",
            },
            Error::Crypto(e) => match e {
                CryptoError::AuthFail => "authentication_failed",
                CryptoError::InvalidKey => "invalid_key_material",
                CryptoError::KeyUnusable => "key_unusable",
            },
            Error::Ecc(e) => match e {
                EccError::Malformed => "ecc_frame_malformed",
                EccError::DecodeFailure => "ecc_decode_failure",
                EccError::Oversize => "ecc_payload_oversize",
            },
            Error::Channel(e) => match e {
                ChannelError::Timeout => "channel_timeout",
                ChannelError::HardwareUnavailable => "hardware_unavailable",
                ChannelError::AlignmentLost => "alignment_lost",
                ChannelError::Driver(_) => "channel_driver_error",
            },
            Error::Fallback(FallbackError::NoSnapshot) => "no_session_snapshot",
            Error::Audit(e) => match e {
                AuditError::Serialization => "audit_serialization_failed",
                AuditError::Signing => "audit_signing_failed",
            },
            Error::Config(_) => "invalid_config",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Protocol(e) => write!(f, "{e}")?,
            Error::Validation(e) => write!(f, "{e}")?,
            Error::Crypto(e) => write!(f, "{e}")?,
            Error::Ecc(e) => write!(f, "{e}")?,
            Error::Channel(e) => write!(f, "{e}")?,
            Error::Fallback(e) => write!(f, "{e}")?,
            Error::Audit(e) => write!(f, "{e}")?,
            Error::Config(e) => write!(f, "{e}")?,
        }
        write!(f, "; reason_code={}", self.code())
    }
}

impl std::error::Error for Error {}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e)
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Error::Crypto(e)
    }
}

impl From<EccError> for Error {
    fn from(e: EccError) -> Self {
        Error::Ecc(e)
    }
}

impl From<ChannelError> for Error {
    fn from(e: ChannelError) -> Self {
        Error::Channel(e)
    }
}

impl From<FallbackError> for Error {
    fn from(e: FallbackError) -> Self {
        Error::Fallback(e)
    }
}

impl From<AuditError> for Error {
    fn from(e: AuditError) -> Self {
        Error::Audit(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

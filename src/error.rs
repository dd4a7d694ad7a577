//! Error types.
//!
//! Data-quality problems (missing coordinates, malformed fields) are never errors:
//! the pure functions encode them as exclusion. Only the platform boundaries
//! (device geolocation, store I/O) produce the errors defined here.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PaceMatchError>;

/// Errors surfaced by tracker, store and session operations.
#[derive(Debug, Error)]
pub enum PaceMatchError {
    /// Location access was refused by the OS or browser. Terminal for the session.
    #[error("location permission denied; allow location access in system settings")]
    PermissionDenied,

    /// No fix could be obtained after exhausting retries.
    #[error("location unavailable after {attempts} attempts: {reason}")]
    LocationUnavailable { attempts: u32, reason: String },

    /// A location write was requested before any position was acquired.
    #[error("no location fix available")]
    NoLocation,

    /// Backend read/write failure.
    #[error("store error at {path}: {message}")]
    Store { path: String, message: String },

    /// A document could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl PaceMatchError {
    /// Build a store error for a reference path.
    pub fn store(path: impl Into<String>, message: impl ToString) -> Self {
        PaceMatchError::Store {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaceMatchError::LocationUnavailable { .. }
                | PaceMatchError::NoLocation
                | PaceMatchError::Store { .. }
        )
    }
}

/// Failure reported by a device geolocation provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("position request timed out")]
    Timeout,
}

impl PositionError {
    /// Permission denial is never retried automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionError::PermissionDenied)
    }

    /// Convert into a crate error after `attempts` tries.
    pub fn into_error(self, attempts: u32) -> PaceMatchError {
        match self {
            PositionError::PermissionDenied => PaceMatchError::PermissionDenied,
            PositionError::Unavailable(reason) => {
                PaceMatchError::LocationUnavailable { attempts, reason }
            }
            PositionError::Timeout => PaceMatchError::LocationUnavailable {
                attempts,
                reason: "timed out".to_string(),
            },
        }
    }
}

//! Error type for substrate operations.

use crate::app::{ErrorPayload, ServiceError};

/// Error type for substrate operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubstrateError {
    /// No reply within the caller's timeout.
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    /// Nobody answers requests of this type on this namespace/key.
    #[error("no dispatcher for '{method}' on {namespace}/{key}")]
    Unreachable {
        namespace: String,
        key: String,
        method: String,
    },
    /// The component has been closed.
    #[error("component '{0}' is closed")]
    Closed(String),
    /// No free port left in the configured range.
    #[error("no free port between {base} and {highest}")]
    PortsExhausted { base: u16, highest: u16 },
    /// The remote handler failed; carries its serialized error.
    #[error("remote error: {}", .0.message)]
    Remote(ErrorPayload),
}

impl From<SubstrateError> for ServiceError {
    /// Convert into the service taxonomy so proxy callers never see a
    /// transport-specific error.
    fn from(err: SubstrateError) -> Self {
        match err {
            SubstrateError::Remote(payload) => ServiceError::from_payload(payload),
            SubstrateError::Timeout(ms) => {
                ServiceError::Timeout(format!("Timeout of {}ms exceeded", ms))
            }
            other => ServiceError::unavailable(other.to_string()),
        }
    }
}

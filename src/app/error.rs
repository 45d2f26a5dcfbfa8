//! Error taxonomy shared by local services, proxies and the dispatcher.
//!
//! A `ServiceError` raised by a local service travels back to the caller
//! as an [`ErrorPayload`] and is converted into the same variant on the
//! other side, so remote and local call sites see identical errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type for service method calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    /// Malformed input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Missing authentication.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),
    /// Authenticated but not allowed.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Record, service or partition key not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The service does not implement this method.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    /// The call did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),
    /// Target service or path cannot be reached. `data` carries details
    /// such as a partial healthcheck report.
    #[error("unavailable: {message}")]
    Unavailable {
        message: String,
        data: Option<Value>,
    },
    /// Anything else.
    #[error("general error: {0}")]
    General(String),
}

impl ServiceError {
    /// Shorthand for an `Unavailable` error without details.
    pub fn unavailable(message: impl Into<String>) -> Self {
        ServiceError::Unavailable {
            message: message.into(),
            data: None,
        }
    }

    /// Map this error to an HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::NotAuthenticated(_) => 401,
            ServiceError::Forbidden(_) => 403,
            ServiceError::NotFound(_) => 404,
            ServiceError::MethodNotAllowed(_) => 405,
            ServiceError::Timeout(_) => 408,
            ServiceError::Unavailable { .. } => 503,
            ServiceError::General(_) => 500,
        }
    }

    /// Stable class name, used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ServiceError::BadRequest(_) => "BadRequest",
            ServiceError::NotAuthenticated(_) => "NotAuthenticated",
            ServiceError::Forbidden(_) => "Forbidden",
            ServiceError::NotFound(_) => "NotFound",
            ServiceError::MethodNotAllowed(_) => "MethodNotAllowed",
            ServiceError::Timeout(_) => "Timeout",
            ServiceError::Unavailable { .. } => "Unavailable",
            ServiceError::General(_) => "GeneralError",
        }
    }

    /// The human readable message without the class prefix.
    pub fn message(&self) -> &str {
        match self {
            ServiceError::BadRequest(m)
            | ServiceError::NotAuthenticated(m)
            | ServiceError::Forbidden(m)
            | ServiceError::NotFound(m)
            | ServiceError::MethodNotAllowed(m)
            | ServiceError::Timeout(m)
            | ServiceError::General(m) => m,
            ServiceError::Unavailable { message, .. } => message,
        }
    }

    /// Serialize into the wire shape.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            name: self.name().to_string(),
            code: self.status_code(),
            message: self.message().to_string(),
            data: match self {
                ServiceError::Unavailable { data, .. } => data.clone(),
                _ => None,
            },
        }
    }

    /// Convert a wire error back into the taxonomy.
    ///
    /// The class name wins; unknown names fall back on the status code and
    /// finally on `General`.
    pub fn from_payload(payload: ErrorPayload) -> Self {
        let ErrorPayload {
            name,
            code,
            message,
            data,
        } = payload;
        match name.as_str() {
            "BadRequest" => ServiceError::BadRequest(message),
            "NotAuthenticated" => ServiceError::NotAuthenticated(message),
            "Forbidden" => ServiceError::Forbidden(message),
            "NotFound" => ServiceError::NotFound(message),
            "MethodNotAllowed" => ServiceError::MethodNotAllowed(message),
            "Timeout" => ServiceError::Timeout(message),
            "Unavailable" => ServiceError::Unavailable { message, data },
            "GeneralError" => ServiceError::General(message),
            _ => match code {
                400 => ServiceError::BadRequest(message),
                401 => ServiceError::NotAuthenticated(message),
                403 => ServiceError::Forbidden(message),
                404 => ServiceError::NotFound(message),
                405 => ServiceError::MethodNotAllowed(message),
                408 => ServiceError::Timeout(message),
                503 => ServiceError::Unavailable { message, data },
                _ => ServiceError::General(message),
            },
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::BadRequest(err.to_string())
    }
}

/// Serialized error as exchanged between a caller and a dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub name: String,
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&ServiceError> for ErrorPayload {
    fn from(err: &ServiceError) -> Self {
        err.to_payload()
    }
}

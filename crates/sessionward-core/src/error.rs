use std::time::Duration;

use thiserror::Error;

/// Failure of one call to the authentication service.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("The service refused this account: {0}")]
    AccessDenied(String),

    #[error("The service rejected the access credential")]
    Unauthorized,

    #[error("Auth endpoint not found: {0}")]
    NotFound(String),

    #[error("Too many auth attempts, try again shortly")]
    RateLimited,

    #[error("Auth service failure: {0}")]
    ServerError(String),

    #[error("Could not reach the auth service: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Unexpected reply from the auth service: {0}")]
    InvalidResponse(String),
}

/// Bytes of a rejection body kept in the error
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl TransportError {
    /// Cut a rejection body on a char boundary so it stays loggable
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let cut = (0..=MAX_ERROR_BODY_LENGTH)
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        format!("{}... ({} bytes total)", &body[..cut], body.len())
    }

    /// Classify a non-success status from the auth service
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => TransportError::Unauthorized,
            403 => TransportError::AccessDenied(truncated),
            404 => TransportError::NotFound(truncated),
            429 => TransportError::RateLimited,
            500..=599 => TransportError::ServerError(truncated),
            _ => TransportError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// True when the service rejected the attached credential.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Unauthorized)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Session engine is no longer running")]
    Stopped,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("refresh lead time ({lead:?}) must be shorter than the access TTL ({access:?})")]
    LeadTimeTooLong { lead: Duration, access: Duration },

    #[error("access TTL ({access:?}) must be shorter than the refresh TTL ({refresh:?})")]
    AccessOutlivesRefresh { access: Duration, refresh: Duration },

    #[error("inactivity limit ({inactivity:?}) must not exceed the refresh TTL ({refresh:?})")]
    InactivityBeyondCeiling { inactivity: Duration, refresh: Duration },

    #[error("ceiling safety margin ({margin:?}) must be shorter than the refresh TTL ({refresh:?})")]
    MarginTooLong { margin: Duration, refresh: Duration },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

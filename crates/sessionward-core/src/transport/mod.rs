//! Authentication service transport.
//!
//! `AuthTransport` is the seam between the session engine and the network:
//! the engine only needs "send the request, get a new access credential or a
//! distinguishable failure back". `HttpTransport` is the REST implementation.

pub mod http;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub use http::HttpTransport;

/// A freshly issued access credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

/// Signup may or may not log the new account in directly
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupGrant {
    #[serde(rename = "accessToken", default)]
    pub access_token: Option<String>,
}

/// Payload of the example access-gated endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedData {
    #[serde(default)]
    pub message: String,
}

/// Calls against the authentication service.
///
/// Implementations must not retry. Any call that comes back with an
/// authorization failure is expected to have already notified the
/// credential store's logout handler before returning the error.
pub trait AuthTransport: Send + Sync {
    fn login<'a>(
        &'a self,
        identity: &'a str,
        secret: &'a str,
    ) -> BoxFuture<'a, Result<AccessGrant, TransportError>>;

    fn signup<'a>(
        &'a self,
        identity: &'a str,
        secret: &'a str,
    ) -> BoxFuture<'a, Result<SignupGrant, TransportError>>;

    /// Mint a new access credential from the ambient refresh reference
    fn refresh(&self) -> BoxFuture<'_, Result<AccessGrant, TransportError>>;

    fn logout(&self) -> BoxFuture<'_, Result<(), TransportError>>;
}

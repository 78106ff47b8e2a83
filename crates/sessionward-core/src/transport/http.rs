//! REST transport for the authentication service.
//!
//! Every request carries the current access credential as a bearer token
//! when one is held. The refresh reference travels in a cookie kept by the
//! client's cookie jar and is never seen by this crate.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::credentials::CredentialStore;
use crate::error::TransportError;

use super::{AccessGrant, AuthTransport, ProtectedData, SignupGrant};

const LOGIN_PATH: &str = "/auth/login";
const SIGNUP_PATH: &str = "/auth/signup";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";
const PROTECTED_PATH: &str = "/protected";

#[derive(Debug, Serialize)]
struct CredentialsBody<'a> {
    username: &'a str,
    password: &'a str,
}

/// HTTP client for the authentication service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig, credentials: Arc<CredentialStore>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the bearer token, send, and map non-success statuses.
    ///
    /// A 401 notifies the logout handler exactly once, and only when the
    /// credential that was sent is still the current one.
    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response, TransportError> {
        let attached = self.credentials.get();
        let request = match attached {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = TransportError::from_status(status, &body);
        if error.is_unauthorized() {
            if self.credentials.get() == attached {
                self.credentials.notify_unauthorized();
            } else {
                debug!(path, "Ignoring rejection of a credential that was already replaced");
            }
        }
        warn!(path, %status, "Request failed");
        Err(error)
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, TransportError> {
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = self.send(request, path).await?;
        response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(format!("{}: {}", path, e)))
    }

    /// Fetch the example access-gated resource
    pub async fn fetch_protected(&self) -> Result<ProtectedData, TransportError> {
        let request = self.client.get(self.url(PROTECTED_PATH));
        let response = self.send(request, PROTECTED_PATH).await?;
        response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(format!("{}: {}", PROTECTED_PATH, e)))
    }
}

impl AuthTransport for HttpTransport {
    fn login<'a>(
        &'a self,
        identity: &'a str,
        secret: &'a str,
    ) -> BoxFuture<'a, Result<AccessGrant, TransportError>> {
        async move {
            let body = CredentialsBody {
                username: identity,
                password: secret,
            };
            self.post_json(LOGIN_PATH, Some(&body)).await
        }
        .boxed()
    }

    fn signup<'a>(
        &'a self,
        identity: &'a str,
        secret: &'a str,
    ) -> BoxFuture<'a, Result<SignupGrant, TransportError>> {
        async move {
            let body = CredentialsBody {
                username: identity,
                password: secret,
            };
            self.post_json(SIGNUP_PATH, Some(&body)).await
        }
        .boxed()
    }

    fn refresh(&self) -> BoxFuture<'_, Result<AccessGrant, TransportError>> {
        async move { self.post_json::<AccessGrant, ()>(REFRESH_PATH, None).await }.boxed()
    }

    fn logout(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            let request = self.client.post(self.url(LOGOUT_PATH));
            self.send(request, LOGOUT_PATH).await?;
            Ok(())
        }
        .boxed()
    }
}

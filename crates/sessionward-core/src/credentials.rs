//! In-memory holder of the current access credential.
//!
//! The store lives for the life of the process and is shared between the
//! engine (sole writer) and the transport (reader, for the bearer header).
//! It also carries the forced-logout handler the transport calls when the
//! service rejects a credential.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

type LogoutHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct CredentialStore {
    token: Mutex<Option<String>>,
    on_logout: Mutex<Option<LogoutHandler>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current credential wholesale (`None` clears it)
    pub fn set(&self, token: Option<String>) {
        *lock(&self.token) = token;
    }

    pub fn get(&self) -> Option<String> {
        lock(&self.token).clone()
    }

    pub fn clear(&self) {
        self.set(None);
    }

    pub fn has_token(&self) -> bool {
        lock(&self.token).is_some()
    }

    /// Register the single forced-logout callback, replacing any previous one
    pub fn register_logout_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.on_logout) = Some(Arc::new(handler));
    }

    /// Invoke the registered handler for one authorization failure.
    /// Returns false when no handler is registered.
    pub fn notify_unauthorized(&self) -> bool {
        // Clone out of the lock so the handler may touch the store itself.
        let handler = lock(&self.on_logout).clone();
        match handler {
            Some(handler) => {
                debug!("Credential rejected, invoking logout handler");
                handler();
                true
            }
            None => {
                debug!("Credential rejected, no logout handler registered");
                false
            }
        }
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("has_token", &self.has_token())
            .field("has_logout_handler", &lock(&self.on_logout).is_some())
            .finish()
    }
}

//! Core library for sessionward.
//!
//! This crate provides the client-held session lifecycle:
//! - `CredentialStore`: current access credential plus the forced-logout handler
//! - `AuthTransport` / `HttpTransport`: login, signup, refresh and logout calls
//! - `SessionEngine` / `SessionHandle`: the session state machine and its three
//!   competing clocks (silent refresh, session ceiling, inactivity)
//! - `ActivityMonitor`: throttled user-presence signals feeding the engine
//!
//! Consumers read session state through `SessionSnapshot` values published by
//! the engine and never write session fields directly.

pub mod activity;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod session;
pub mod transport;

pub use activity::{ActivityMonitor, ActivitySignal, Throttle};
pub use config::{SessionConfig, TransportConfig};
pub use credentials::CredentialStore;
pub use engine::{SessionEngine, SessionHandle, SignupOutcome};
pub use error::{ConfigError, EngineError, TransportError};
pub use session::{EndReason, SessionEvent, SessionSnapshot};
pub use transport::{AccessGrant, AuthTransport, HttpTransport, ProtectedData, SignupGrant};

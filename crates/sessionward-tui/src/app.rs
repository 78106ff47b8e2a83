//! Application state management for the sessionward terminal client.
//!
//! `App` owns the session engine handle, the activity monitor and all UI
//! state. The engine decides when a session ends; the app only reacts to the
//! snapshots and events it publishes.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use sessionward_core::{
    ActivityMonitor, ActivitySignal, CredentialStore, EndReason, EngineError, HttpTransport,
    SessionEngine, SessionEvent, SessionHandle, SessionSnapshot, SignupOutcome, TransportError,
};

use crate::config::Config;
use crate::vault::PasswordVault;

// ============================================================================
// Constants
// ============================================================================

/// Buffer size for protected-data fetch results.
/// At most one fetch is in flight per session, a few slots is plenty.
const CHANNEL_BUFFER_SIZE: usize = 8;

/// Maximum length for username input.
const MAX_USERNAME_LENGTH: usize = 50;

/// Maximum length for password input.
/// 128 chars accommodates password managers and passphrases.
const MAX_PASSWORD_LENGTH: usize = 128;

const USERNAME_ENV: &str = "SESSIONWARD_USERNAME";
const PASSWORD_ENV: &str = "SESSIONWARD_PASSWORD";

// ============================================================================
// UI State Types
// ============================================================================

/// Overall application state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    LoggingIn,
    SigningUp,
    Dashboard,
    ConfirmingQuit,
    Quitting,
}

impl AppState {
    /// True while one of the credential forms is shown
    pub fn is_form(&self) -> bool {
        matches!(self, AppState::LoggingIn | AppState::SigningUp)
    }
}

/// Credential form focus state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoginFocus {
    Username,
    Password,
    Button,
}

impl LoginFocus {
    pub fn next(&self) -> Self {
        match self {
            LoginFocus::Username => LoginFocus::Password,
            LoginFocus::Password => LoginFocus::Button,
            LoginFocus::Button => LoginFocus::Username,
        }
    }

    pub fn prev(&self) -> Self {
        match self {
            LoginFocus::Username => LoginFocus::Button,
            LoginFocus::Password => LoginFocus::Username,
            LoginFocus::Button => LoginFocus::Password,
        }
    }
}

/// What the dashboard knows about the access-gated payload
#[derive(Debug, Clone, PartialEq)]
pub enum ProtectedView {
    Idle,
    Loading,
    Loaded(String),
    Failed(String),
}

/// Result of a background protected-data fetch, tagged with the session
/// generation that requested it
struct ProtectedResult {
    generation: u64,
    outcome: Result<String, String>,
}

// ============================================================================
// Main Application Struct
// ============================================================================

pub struct App {
    pub config: Config,
    pub session: SessionHandle,
    transport: HttpTransport,
    activity: ActivityMonitor,
    session_state: watch::Receiver<SessionSnapshot>,
    session_events: broadcast::Receiver<SessionEvent>,

    // UI State
    pub state: AppState,
    /// Where to go back to when a quit confirmation is cancelled
    resume_state: AppState,
    pub status_message: Option<String>,
    pub protected: ProtectedView,

    // Credential form state
    pub login_username: String,
    pub login_password: String,
    pub login_focus: LoginFocus,
    pub login_error: Option<String>,

    protected_tx: mpsc::Sender<ProtectedResult>,
    protected_rx: mpsc::Receiver<ProtectedResult>,
}

impl App {
    /// Build the transport, start the session engine and the activity
    /// monitor. Must be called from within the tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        let credentials = Arc::new(CredentialStore::new());
        let transport = HttpTransport::new(&config.transport_config(), credentials.clone())
            .context("Failed to create HTTP client")?;
        let session = SessionEngine::spawn(
            config.session_config(),
            Arc::new(transport.clone()),
            credentials,
        )
        .context("Invalid session configuration")?;
        let activity = ActivityMonitor::spawn(session.clone());
        let session_state = session.subscribe();
        let session_events = session.events();

        let (protected_tx, protected_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);

        // Get credentials from env vars, config or the keychain
        let login_username = std::env::var(USERNAME_ENV)
            .ok()
            .or_else(|| config.last_username.clone())
            .unwrap_or_default();

        let login_password = std::env::var(PASSWORD_ENV)
            .ok()
            .or_else(|| {
                if config.remember_password && !login_username.is_empty() {
                    PasswordVault::get_password(&login_username).ok()
                } else {
                    None
                }
            })
            .unwrap_or_default();

        Ok(Self {
            config,
            session,
            transport,
            activity,
            session_state,
            session_events,

            state: AppState::LoggingIn,
            resume_state: AppState::LoggingIn,
            status_message: None,
            protected: ProtectedView::Idle,

            login_username,
            login_password,
            login_focus: LoginFocus::Username,
            login_error: None,

            protected_tx,
            protected_rx,
        })
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Resume a session the service still remembers, otherwise show the
    /// login form. No prior session is not an error.
    pub async fn verify_on_startup(&mut self) {
        if self.session.verify_existing_session().await {
            info!("Resumed existing session");
            self.show_dashboard();
        } else {
            self.start_login();
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Forward a raw interaction to the activity monitor
    pub fn record_activity(&self, signal: ActivitySignal) {
        self.activity.record(signal);
    }

    /// Validate the form fields before any network call
    fn form_credentials(&mut self) -> Option<(String, String)> {
        let username = self.login_username.trim().to_string();
        let password = self.login_password.clone();

        if username.is_empty() || password.is_empty() {
            self.login_error = Some("Username and password required".to_string());
            return None;
        }
        self.login_error = None;
        Some((username, password))
    }

    /// Attempt login with the credentials from the login form
    pub async fn attempt_login(&mut self) -> Result<()> {
        let Some((username, password)) = self.form_credentials() else {
            return Err(anyhow::anyhow!("Username and password required"));
        };

        match self.session.login(&username, &password).await {
            Ok(()) => {
                self.remember_login(&username, &password);
                info!(username = %username, "Login successful");
                self.show_dashboard();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Login failed");
                self.login_error = Some(login_error_message(&e));
                Err(e.into())
            }
        }
    }

    /// Attempt signup with the credentials from the signup form
    pub async fn attempt_signup(&mut self) -> Result<()> {
        let Some((username, password)) = self.form_credentials() else {
            return Err(anyhow::anyhow!("Username and password required"));
        };

        match self.session.signup(&username, &password).await {
            Ok(SignupOutcome::LoggedIn) => {
                self.remember_login(&username, &password);
                info!(username = %username, "Signup successful");
                self.show_dashboard();
                Ok(())
            }
            Ok(SignupOutcome::LoginRequired) => {
                info!(username = %username, "Account created, login required");
                self.state = AppState::LoggingIn;
                self.login_focus = LoginFocus::Button;
                self.status_message = Some("Account created, please log in".to_string());
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Signup failed");
                self.login_error = Some(signup_error_message(&e));
                Err(e.into())
            }
        }
    }

    fn remember_login(&mut self, username: &str, password: &str) {
        if self.config.remember_password {
            if let Err(e) = PasswordVault::store(username, password) {
                warn!(error = %e, "Failed to store credentials");
            }
        }

        self.config.last_username = Some(username.to_string());
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }
        self.login_password.clear();
    }

    /// Flip the keychain preference; turning it off forgets the stored password
    pub fn toggle_remember_password(&mut self) {
        self.config.remember_password = !self.config.remember_password;
        if !self.config.remember_password && !self.login_username.is_empty() {
            if let Err(e) = PasswordVault::delete(&self.login_username) {
                debug!(error = %e, "No stored password to forget");
            }
        }
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }
    }

    pub async fn logout(&mut self) {
        match self.session.logout().await {
            Ok(true) => info!("Logged out"),
            Ok(false) => debug!("Logout requested with no active session"),
            Err(e) => error!(error = %e, "Logout failed"),
        }
        // The Ended event moves the UI back to the login form
        self.check_background_tasks().await;
    }

    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Show the login form
    pub fn start_login(&mut self) {
        self.refill_password(|username| PasswordVault::get_password(username).ok());
        self.state = AppState::LoggingIn;
        self.login_focus = if self.login_username.is_empty() {
            LoginFocus::Username
        } else {
            LoginFocus::Password
        };
        self.login_error = None;
    }

    /// Put the remembered password back into the form, since a successful
    /// login clears it
    fn refill_password(&mut self, lookup: impl FnOnce(&str) -> Option<String>) {
        if !self.config.remember_password
            || self.login_username.is_empty()
            || !self.login_password.is_empty()
        {
            return;
        }
        if let Some(password) = lookup(&self.login_username) {
            self.login_password = password;
        }
    }

    /// Switch between the login and signup forms, keeping what was typed
    pub fn toggle_form(&mut self) {
        self.state = match self.state {
            AppState::LoggingIn => AppState::SigningUp,
            AppState::SigningUp => AppState::LoggingIn,
            other => other,
        };
        self.login_error = None;
    }

    pub fn confirm_quit(&mut self) {
        if self.state != AppState::ConfirmingQuit {
            self.resume_state = self.state;
        }
        self.state = AppState::ConfirmingQuit;
    }

    pub fn cancel_quit(&mut self) {
        self.state = self.resume_state;
    }

    fn show_dashboard(&mut self) {
        self.state = AppState::Dashboard;
        self.status_message = None;
        self.fetch_protected();
    }

    // =========================================================================
    // Background Tasks
    // =========================================================================

    /// Load the access-gated payload in the background
    pub fn fetch_protected(&mut self) {
        let generation = self.session.snapshot().generation;
        let transport = self.transport.clone();
        let tx = self.protected_tx.clone();
        self.protected = ProtectedView::Loading;

        tokio::spawn(async move {
            let outcome = transport
                .fetch_protected()
                .await
                .map(|data| data.message)
                .map_err(|e| protected_error_message(&e));
            let _ = tx.send(ProtectedResult { generation, outcome }).await;
        });
    }

    /// Apply session events and finished background fetches
    pub async fn check_background_tasks(&mut self) {
        loop {
            match self.session_events.try_recv() {
                Ok(SessionEvent::Ended { reason, .. }) => {
                    self.status_message = Some(end_reason_message(reason).to_string());
                }
                Ok(SessionEvent::RefreshFailed { error, .. }) => {
                    debug!(error = %error, "Silent refresh failed");
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Session events lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if self.session_state.has_changed().unwrap_or(false) {
            let authenticated = self.session_state.borrow_and_update().is_authenticated();
            let on_dashboard = matches!(self.state, AppState::Dashboard)
                || (self.state == AppState::ConfirmingQuit
                    && self.resume_state == AppState::Dashboard);
            if !authenticated && on_dashboard {
                self.protected = ProtectedView::Idle;
                self.start_login();
            }
        }

        while let Ok(result) = self.protected_rx.try_recv() {
            let current = self.session.snapshot();
            if !current.is_authenticated() || current.generation != result.generation {
                debug!(generation = result.generation, "Discarding protected data from an ended session");
                continue;
            }
            self.protected = match result.outcome {
                Ok(message) => ProtectedView::Loaded(message),
                Err(message) => ProtectedView::Failed(message),
            };
        }
    }
}

// ============================================================================
// User-facing messages
// ============================================================================

fn transport_message(e: &TransportError) -> Option<&'static str> {
    match e {
        TransportError::NetworkError(inner) if inner.is_timeout() => {
            Some("Connection timed out. Please try again.")
        }
        TransportError::NetworkError(_) => {
            Some("Unable to connect to server. Check the service URL.")
        }
        TransportError::RateLimited => Some("Too many attempts. Please wait and try again."),
        _ => None,
    }
}

/// Map a login failure to a message for the form
pub fn login_error_message(e: &EngineError) -> String {
    match e {
        EngineError::Transport(TransportError::Unauthorized) => {
            "Invalid username or password".to_string()
        }
        EngineError::Transport(inner) => transport_message(inner)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Login failed: {}", inner)),
        EngineError::Stopped => "Session engine stopped, restart the client".to_string(),
    }
}

/// Map a signup failure to a message for the form
pub fn signup_error_message(e: &EngineError) -> String {
    match e {
        EngineError::Transport(TransportError::AccessDenied(_)) => {
            "That username is not available".to_string()
        }
        EngineError::Transport(inner) => transport_message(inner)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Signup failed: {}", inner)),
        EngineError::Stopped => "Session engine stopped, restart the client".to_string(),
    }
}

fn protected_error_message(e: &TransportError) -> String {
    match e {
        TransportError::Unauthorized => "Access rejected, signing out".to_string(),
        other => transport_message(other)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

/// Status line shown after the engine ends a session
pub fn end_reason_message(reason: EndReason) -> &'static str {
    match reason {
        EndReason::UserInitiated => "Logged out",
        EndReason::CeilingExpired => "Session expired, please log in again",
        EndReason::InactivityExpired => "Logged out due to inactivity",
        EndReason::RefreshFailedFatally => "Session rejected by the server, please log in again",
    }
}

// ============================================================================
// Input validation helpers (exported for use in input.rs)
// ============================================================================

/// Check if a character is valid for input (no control characters)
fn is_valid_input_char(c: char) -> bool {
    !c.is_control()
}

/// Check if a username character should be accepted
pub fn can_add_username_char(current_len: usize, c: char) -> bool {
    current_len < MAX_USERNAME_LENGTH && is_valid_input_char(c)
}

/// Check if a password character should be accepted
pub fn can_add_password_char(current_len: usize, c: char) -> bool {
    current_len < MAX_PASSWORD_LENGTH && is_valid_input_char(c)
}

// ============================================================================
// Tests
// ============================================================================

//! Session lifecycle engine.
//!
//! One tokio task owns the session record, the credential writes and the
//! three scheduled actions. Everything that can change the session (handle
//! calls, timer fires, refresh completions, forced logouts from the
//! transport) arrives as a message and is processed to completion one at a
//! time, so no locking is needed around the record.
//!
//! Three clocks race for every session:
//! - silent refresh at `access_deadline - refresh_lead` (extends the access
//!   deadline only; failures are tolerated)
//! - the ceiling at `refresh_deadline` (always ends the session)
//! - inactivity at `last_active_at + inactivity_limit` (ends the session)
//!
//! Refresh calls run outside the engine task and report back tagged with the
//! generation of the session that started them. A result for any other
//! generation is discarded, so an ended session is never resurrected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::credentials::CredentialStore;
use crate::error::{ConfigError, EngineError, TransportError};
use crate::schedule::{ActionKind, Fired, Schedule};
use crate::session::{ActiveSession, EndReason, SessionEvent, SessionSnapshot, ANONYMOUS_IDENTITY};
use crate::transport::{AccessGrant, AuthTransport};

/// Buffer size for the lifecycle event broadcast.
/// Slow subscribers lose the oldest events rather than stalling the engine.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Result of a signup call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignupOutcome {
    /// The service issued a credential and a session is now active
    LoggedIn,
    /// The account exists but a separate login is required
    LoginRequired,
}

enum Command {
    Start {
        identity: String,
        token: Option<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
        reply: oneshot::Sender<u64>,
    },
    End {
        reason: EndReason,
        /// Only end this generation; `None` ends whatever is active
        generation: Option<u64>,
        reply: Option<oneshot::Sender<bool>>,
    },
    NoteActivity,
    RefreshCompleted {
        generation: u64,
        result: Result<AccessGrant, TransportError>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub struct SessionEngine {
    config: SessionConfig,
    transport: Arc<dyn AuthTransport>,
    credentials: Arc<CredentialStore>,
    session: Option<ActiveSession>,
    generation: u64,
    /// Consecutive silent refreshes armed with a deadline already in the past
    catchup_streak: u32,
    schedule: Schedule,
    fired: mpsc::UnboundedReceiver<Fired>,
    commands: mpsc::UnboundedReceiver<Command>,
    self_tx: mpsc::WeakUnboundedSender<Command>,
    state_tx: watch::Sender<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl SessionEngine {
    /// Validate `config`, register the forced-logout handler on `credentials`
    /// and start the engine task. Must be called from within a tokio runtime.
    ///
    /// The engine stops once every `SessionHandle` is dropped or
    /// `SessionHandle::shutdown` is called.
    pub fn spawn(
        config: SessionConfig,
        transport: Arc<dyn AuthTransport>,
        credentials: Arc<CredentialStore>,
    ) -> Result<SessionHandle, ConfigError> {
        config.validate()?;

        let (command_tx, commands) = mpsc::unbounded_channel();
        let (schedule, fired) = Schedule::new();
        let (state_tx, state_rx) = watch::channel(SessionSnapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        // Tagged with the generation live at rejection time, so a late 401
        // cannot end a session started after it.
        let logout_tx = command_tx.downgrade();
        let logout_state = state_rx.clone();
        credentials.register_logout_handler(move || {
            if let Some(tx) = logout_tx.upgrade() {
                let generation = logout_state.borrow().generation;
                let _ = tx.send(Command::End {
                    reason: EndReason::RefreshFailedFatally,
                    generation: Some(generation),
                    reply: None,
                });
            }
        });

        let engine = SessionEngine {
            config: config.clone(),
            transport: transport.clone(),
            credentials: credentials.clone(),
            session: None,
            generation: 0,
            catchup_streak: 0,
            schedule,
            fired,
            commands,
            self_tx: command_tx.downgrade(),
            state_tx,
            events_tx: events_tx.clone(),
        };
        tokio::spawn(engine.run());

        Ok(SessionHandle {
            commands: command_tx,
            transport,
            credentials,
            config,
            state: state_rx,
            events: events_tx,
        })
    }

    async fn run(mut self) {
        debug!("Session engine started");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some(fired) = self.fired.recv() => self.on_fired(fired).await,
            }
        }
        self.schedule.cancel_all();
        debug!("Session engine stopped");
    }

    /// Returns false when the engine should stop
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start {
                identity,
                token,
                access_ttl,
                refresh_ttl,
                reply,
            } => {
                let generation = self.start(identity, token, access_ttl, refresh_ttl);
                let _ = reply.send(generation);
            }
            Command::End {
                reason,
                generation,
                reply,
            } => {
                let targeted = match (generation, &self.session) {
                    (Some(generation), Some(session)) => session.generation == generation,
                    _ => true,
                };
                let ended = if targeted {
                    self.end(reason).await
                } else {
                    debug!(reason = reason.as_str(), "Ignoring end request for a replaced session");
                    false
                };
                if let Some(reply) = reply {
                    let _ = reply.send(ended);
                }
            }
            Command::NoteActivity => self.note_activity(),
            Command::RefreshCompleted { generation, result } => {
                self.complete_refresh(generation, result)
            }
            Command::Shutdown { reply } => {
                self.schedule.cancel_all();
                // Local teardown only, the service is not told
                if let Some(session) = self.session.take() {
                    debug!(generation = session.generation, "Dropping active session on shutdown");
                }
                self.credentials.clear();
                self.publish();
                info!("Session engine shutting down");
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn start(
        &mut self,
        identity: String,
        token: Option<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> u64 {
        if refresh_ttl < access_ttl {
            warn!(
                ?access_ttl,
                ?refresh_ttl,
                "Session ceiling expires before its access window, check configuration"
            );
        }
        if let Some(previous) = self.session.take() {
            debug!(
                identity = %previous.identity,
                generation = previous.generation,
                "Replacing existing session"
            );
        }
        self.schedule.cancel_all();

        if let Some(token) = token {
            self.credentials.set(Some(token));
        }

        self.generation += 1;
        let generation = self.generation;
        let now = Instant::now();
        let session = ActiveSession::new(identity, access_ttl, refresh_ttl, now, generation);

        self.schedule.arm(ActionKind::CeilingExpiry, session.refresh_deadline);
        self.schedule.arm(
            ActionKind::InactivityExpiry,
            session.inactivity_deadline(self.config.inactivity_limit),
        );

        info!(identity = %session.identity, generation, "Session started");
        self.emit(SessionEvent::Started {
            identity: session.identity.clone(),
            generation,
        });

        self.session = Some(session);
        self.catchup_streak = 0;
        self.arm_silent_refresh(now);
        self.publish();
        generation
    }

    /// Idempotent: returns false when there was no session to end.
    async fn end(&mut self, reason: EndReason) -> bool {
        let Some(session) = self.session.take() else {
            debug!(reason = reason.as_str(), "No active session to end");
            return false;
        };

        self.schedule.cancel_all();
        self.catchup_streak = 0;
        self.publish();
        info!(
            identity = %session.identity,
            generation = session.generation,
            reason = reason.as_str(),
            "Ending session"
        );

        // The credential stays attached until the service has been told.
        if let Err(e) = self.transport.logout().await {
            warn!(error = %e, reason = reason.as_str(), "Logout request failed, local session cleared anyway");
        }
        self.credentials.clear();

        self.emit(SessionEvent::Ended {
            generation: session.generation,
            reason,
        });
        true
    }

    fn note_activity(&mut self) {
        let Some(session) = self.session.as_mut() else {
            trace!("Activity ignored, no active session");
            return;
        };

        let now = Instant::now();
        if now > session.last_active_at {
            session.last_active_at = now;
        }
        let generation = session.generation;
        let deadline = session.inactivity_deadline(self.config.inactivity_limit);

        self.schedule.arm(ActionKind::InactivityExpiry, deadline);
        self.emit(SessionEvent::ActivityNoted { generation, at: now });
        self.publish();
    }

    // =========================================================================
    // Silent refresh
    // =========================================================================

    fn arm_silent_refresh(&mut self, now: Instant) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let generation = session.generation;
        let fire_at = session
            .access_deadline
            .checked_sub(self.config.refresh_lead)
            .unwrap_or(now);

        if fire_at <= now {
            self.catchup_streak += 1;
            if self.catchup_streak > self.config.max_catchup_refreshes {
                warn!(
                    generation,
                    streak = self.catchup_streak,
                    "Silent refresh keeps falling behind, relying on the session ceiling"
                );
                self.schedule.cancel(ActionKind::SilentRefresh);
                return;
            }
            debug!(generation, "Refresh window already open, refreshing immediately");
        } else {
            self.catchup_streak = 0;
        }

        debug!(
            generation,
            in_ms = fire_at.saturating_duration_since(now).as_millis() as u64,
            "Scheduling silent refresh"
        );
        self.schedule.arm(ActionKind::SilentRefresh, fire_at.max(now));
    }

    fn begin_refresh(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let generation = session.generation;
        let now = Instant::now();
        let cutoff = session
            .refresh_deadline
            .checked_sub(self.config.ceiling_margin)
            .unwrap_or(session.refresh_deadline);

        // A refresh cannot move the ceiling, so there is nothing to gain this close to it.
        if now > cutoff {
            debug!(generation, "Session ceiling imminent, skipping silent refresh");
            self.emit(SessionEvent::RefreshSkipped { generation });
            return;
        }

        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        let transport = self.transport.clone();
        debug!(generation, "Triggering silent refresh");
        tokio::spawn(async move {
            let result = transport.refresh().await;
            let _ = tx.send(Command::RefreshCompleted { generation, result });
        });
    }

    fn complete_refresh(&mut self, generation: u64, result: Result<AccessGrant, TransportError>) {
        let current = matches!(&self.session, Some(session) if session.generation == generation);
        if !current {
            debug!(generation, "Discarding refresh result for a session that has ended");
            self.emit(SessionEvent::RefreshDiscarded { generation });
            return;
        }

        match result {
            Ok(grant) => {
                let now = Instant::now();
                self.credentials.set(Some(grant.access_token));
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.access_deadline = now + session.access_ttl;
                let access_deadline = session.access_deadline;

                info!(generation, "Silent refresh successful");
                self.emit(SessionEvent::Refreshed {
                    generation,
                    access_deadline,
                });
                self.arm_silent_refresh(now);
                self.publish();
            }
            Err(e) => {
                // Not fatal: the ceiling or the next rejected call is the backstop.
                warn!(generation, error = %e, "Silent refresh failed");
                self.emit(SessionEvent::RefreshFailed {
                    generation,
                    error: e.to_string(),
                });
            }
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    async fn on_fired(&mut self, fired: Fired) {
        if !self.schedule.take_if_current(fired) {
            trace!(action = fired.kind.as_str(), "Ignoring fire from a cancelled action");
            return;
        }

        match fired.kind {
            ActionKind::SilentRefresh => self.begin_refresh(),
            ActionKind::CeilingExpiry => {
                info!("Session ceiling reached");
                self.end(EndReason::CeilingExpired).await;
            }
            ActionKind::InactivityExpiry => {
                info!("Inactivity limit reached");
                self.end(EndReason::InactivityExpired).await;
            }
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    fn publish(&self) {
        let snapshot = match &self.session {
            Some(session) => session.snapshot(self.config.inactivity_limit),
            None => SessionSnapshot::ended(self.generation),
        };
        self.state_tx.send_replace(snapshot);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }
}

/// Cheap, cloneable entry point to a running `SessionEngine`.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    transport: Arc<dyn AuthTransport>,
    credentials: Arc<CredentialStore>,
    config: SessionConfig,
    state: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Stopped)
    }

    async fn establish(
        &self,
        identity: String,
        token: Option<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<u64, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start {
            identity,
            token,
            access_ttl,
            refresh_ttl,
            reply,
        })?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Authenticate and start a session with the configured TTLs
    pub async fn login(&self, identity: &str, secret: &str) -> Result<(), EngineError> {
        let grant = self.transport.login(identity, secret).await?;
        self.establish(
            identity.to_string(),
            Some(grant.access_token),
            self.config.access_ttl,
            self.config.refresh_ttl,
        )
        .await?;
        Ok(())
    }

    /// Create an account; starts a session only if the service issued a credential
    pub async fn signup(&self, identity: &str, secret: &str) -> Result<SignupOutcome, EngineError> {
        let grant = self.transport.signup(identity, secret).await?;
        match grant.access_token {
            Some(token) => {
                self.establish(
                    identity.to_string(),
                    Some(token),
                    self.config.access_ttl,
                    self.config.refresh_ttl,
                )
                .await?;
                Ok(SignupOutcome::LoggedIn)
            }
            None => {
                debug!(identity, "Signup succeeded without a credential, login required");
                Ok(SignupOutcome::LoginRequired)
            }
        }
    }

    /// Recover a session from the ambient refresh reference at startup.
    ///
    /// No prior session is a normal outcome: returns false without surfacing
    /// an error.
    pub async fn verify_existing_session(&self) -> bool {
        match self.transport.refresh().await {
            Ok(grant) => self
                .establish(
                    ANONYMOUS_IDENTITY.to_string(),
                    Some(grant.access_token),
                    self.config.access_ttl,
                    self.config.refresh_ttl,
                )
                .await
                .is_ok(),
            Err(e) => {
                debug!(error = %e, "No existing session to resume");
                false
            }
        }
    }

    /// Start (or replace) a session without touching the credential.
    /// Callers must only do this after a successful authentication call.
    pub async fn start_session(
        &self,
        identity: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<(), EngineError> {
        self.establish(identity.to_string(), None, access_ttl, refresh_ttl)
            .await?;
        Ok(())
    }

    /// End the active session. Returns false if there was none.
    pub async fn end_session(&self, reason: EndReason) -> Result<bool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::End {
            reason,
            generation: None,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub async fn logout(&self) -> Result<bool, EngineError> {
        self.end_session(EndReason::UserInitiated).await
    }

    /// Record user presence; ignored when no session is active
    pub fn note_activity(&self) {
        if self.send(Command::NoteActivity).is_err() {
            trace!("Activity dropped, engine stopped");
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    /// Watch every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current access credential, for attaching to collaborator calls
    pub fn credential(&self) -> Option<String> {
        self.credentials.get()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Stop the engine and cancel every scheduled action without contacting
    /// the service.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

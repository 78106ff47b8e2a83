//! Session engine scenarios on a paused tokio clock.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{sleep, sleep_until, Instant};

use sessionward_core::{
    AccessGrant, AuthTransport, CredentialStore, EndReason, EngineError, SessionConfig,
    SessionEngine, SessionEvent, SessionHandle, SignupGrant, SignupOutcome, TransportError,
};

// ============================================================================
// Scripted transport
// ============================================================================

#[derive(Default)]
struct ScriptedTransport {
    refresh_fails: AtomicBool,
    logout_fails: AtomicBool,
    signup_issues_token: AtomicBool,
    /// When set, every refresh waits for a permit before answering
    refresh_gate: Option<Semaphore>,
    /// When set, logout is rejected with 401 and reported to this store
    logout_rejects: OnceLock<Arc<CredentialStore>>,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    login_calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self::default()
    }

    fn gated() -> Self {
        Self {
            refresh_gate: Some(Semaphore::new(0)),
            ..Default::default()
        }
    }

    fn failing_refresh() -> Self {
        let transport = Self::default();
        transport.refresh_fails.store(true, Ordering::SeqCst);
        transport
    }

    fn release_refresh(&self) {
        if let Some(gate) = &self.refresh_gate {
            gate.add_permits(1);
        }
    }

    fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn logouts(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

impl AuthTransport for ScriptedTransport {
    fn login<'a>(
        &'a self,
        _identity: &'a str,
        secret: &'a str,
    ) -> BoxFuture<'a, Result<AccessGrant, TransportError>> {
        async move {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            if secret == "wrong" {
                return Err(TransportError::Unauthorized);
            }
            Ok(AccessGrant {
                access_token: "login-token".to_string(),
            })
        }
        .boxed()
    }

    fn signup<'a>(
        &'a self,
        _identity: &'a str,
        _secret: &'a str,
    ) -> BoxFuture<'a, Result<SignupGrant, TransportError>> {
        async move {
            let access_token = self
                .signup_issues_token
                .load(Ordering::SeqCst)
                .then(|| "signup-token".to_string());
            Ok(SignupGrant { access_token })
        }
        .boxed()
    }

    fn refresh(&self) -> BoxFuture<'_, Result<AccessGrant, TransportError>> {
        async move {
            let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(gate) = &self.refresh_gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            if self.refresh_fails.load(Ordering::SeqCst) {
                return Err(TransportError::ServerError("refresh unavailable".to_string()));
            }
            Ok(AccessGrant {
                access_token: format!("refreshed-{call}"),
            })
        }
        .boxed()
    }

    fn logout(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(store) = self.logout_rejects.get() {
                store.notify_unauthorized();
                return Err(TransportError::Unauthorized);
            }
            if self.logout_fails.load(Ordering::SeqCst) {
                return Err(TransportError::ServerError("logout unavailable".to_string()));
            }
            Ok(())
        }
        .boxed()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Config whose ceiling and inactivity limits stay out of the way of
/// sessions started explicitly with a 10s/20s window.
fn roomy_config() -> SessionConfig {
    SessionConfig {
        refresh_ttl: secs(60),
        inactivity_limit: secs(30),
        ..Default::default()
    }
}

fn spawn(config: SessionConfig, transport: &Arc<ScriptedTransport>) -> (SessionHandle, Arc<CredentialStore>) {
    let credentials = Arc::new(CredentialStore::new());
    let handle = SessionEngine::spawn(config, transport.clone(), credentials.clone())
        .expect("valid config");
    (handle, credentials)
}

/// Let spawned tasks run without moving the clock meaningfully
async fn settle() {
    sleep(millis(1)).await;
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn end_reasons(events: &[SessionEvent]) -> Vec<EndReason> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Ended { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_silent_refresh_extends_access_deadline() {
    let transport = Arc::new(ScriptedTransport::new());
    let (handle, credentials) = spawn(roomy_config(), &transport);

    let t0 = Instant::now();
    handle.start_session("alice", secs(10), secs(20)).await.unwrap();

    sleep_until(t0 + secs(15)).await;
    let snapshot = handle.snapshot();
    assert!(snapshot.is_authenticated());
    assert_eq!(snapshot.identity.as_deref(), Some("alice"));
    assert_eq!(snapshot.access_deadline, Some(t0 + secs(18)));
    assert_eq!(snapshot.refresh_deadline, Some(t0 + secs(20)));
    assert_eq!(transport.refreshes(), 1);
    assert_eq!(credentials.get().as_deref(), Some("refreshed-1"));
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_ends_session_when_refresh_always_fails() {
    let transport = Arc::new(ScriptedTransport::failing_refresh());
    let (handle, _) = spawn(roomy_config(), &transport);
    let mut events = handle.events();

    let t0 = Instant::now();
    handle.start_session("alice", secs(10), secs(20)).await.unwrap();

    sleep_until(t0 + millis(19_999)).await;
    assert!(handle.is_authenticated());
    // The failed refresh at 8s is not retried
    assert_eq!(transport.refreshes(), 1);

    sleep_until(t0 + millis(20_001)).await;
    assert!(!handle.is_authenticated());

    let seen = drain(&mut events);
    assert!(seen
        .iter()
        .any(|e| matches!(e, SessionEvent::RefreshFailed { .. })));
    assert_eq!(end_reasons(&seen), vec![EndReason::CeilingExpired]);
    assert_eq!(transport.logouts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_ends_session_after_last_activity() {
    let transport = Arc::new(ScriptedTransport::new());
    let config = SessionConfig {
        inactivity_limit: secs(10),
        ..Default::default()
    };
    let (handle, _) = spawn(config, &transport);
    let mut events = handle.events();

    let t0 = Instant::now();
    handle.start_session("alice", secs(10), secs(20)).await.unwrap();

    sleep_until(t0 + secs(5)).await;
    handle.note_activity();
    settle().await;
    assert_eq!(handle.snapshot().inactivity_deadline, Some(t0 + secs(15)));
    assert_eq!(handle.snapshot().last_active_at, Some(t0 + secs(5)));

    sleep_until(t0 + millis(14_999)).await;
    assert!(handle.is_authenticated());

    sleep_until(t0 + millis(15_001)).await;
    assert!(!handle.is_authenticated());
    assert_eq!(end_reasons(&drain(&mut events)), vec![EndReason::InactivityExpired]);
}

// ============================================================================
// Inactivity
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_activity_below_limit_keeps_session_alive() {
    let transport = Arc::new(ScriptedTransport::new());
    let config = SessionConfig {
        refresh_ttl: secs(120),
        inactivity_limit: secs(10),
        ..Default::default()
    };
    let (handle, _) = spawn(config, &transport);
    let mut events = handle.events();

    handle.start_session("alice", secs(10), secs(120)).await.unwrap();
    for _ in 0..8 {
        sleep(millis(9_500)).await;
        handle.note_activity();
    }
    settle().await;

    assert!(handle.is_authenticated());
    assert!(end_reasons(&drain(&mut events)).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_fires_exactly_once() {
    let transport = Arc::new(ScriptedTransport::new());
    let config = SessionConfig {
        inactivity_limit: secs(10),
        ..Default::default()
    };
    let (handle, _) = spawn(config, &transport);
    let mut events = handle.events();

    let t0 = Instant::now();
    handle.start_session("alice", secs(10), secs(20)).await.unwrap();

    sleep_until(t0 + millis(9_999)).await;
    assert!(handle.is_authenticated());
    sleep_until(t0 + millis(10_001)).await;
    assert!(!handle.is_authenticated());

    // The ceiling was cancelled along with everything else
    sleep_until(t0 + secs(40)).await;
    assert_eq!(end_reasons(&drain(&mut events)), vec![EndReason::InactivityExpired]);
    assert_eq!(transport.logouts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_activity_without_session_is_ignored() {
    let transport = Arc::new(ScriptedTransport::new());
    let (handle, _) = spawn(SessionConfig::default(), &transport);
    let mut events = handle.events();

    handle.note_activity();
    settle().await;

    assert!(!handle.is_authenticated());
    assert_eq!(handle.snapshot().last_active_at, None);
    assert!(drain(&mut events).is_empty());
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_refresh_never_extends_ceiling() {
    let transport = Arc::new(ScriptedTransport::new());
    let (handle, _) = spawn(roomy_config(), &transport);
    let mut events = handle.events();

    let t0 = Instant::now();
    handle.start_session("alice", secs(10), secs(20)).await.unwrap();

    sleep_until(t0 + secs(17)).await;
    let snapshot = handle.snapshot();
    assert_eq!(transport.refreshes(), 2);
    assert_eq!(snapshot.access_deadline, Some(t0 + secs(26)));
    assert_eq!(snapshot.refresh_deadline, Some(t0 + secs(20)));

    sleep_until(t0 + millis(20_001)).await;
    assert!(!handle.is_authenticated());
    assert_eq!(end_reasons(&drain(&mut events)), vec![EndReason::CeilingExpired]);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_skipped_when_ceiling_imminent() {
    let transport = Arc::new(ScriptedTransport::new());
    let config = SessionConfig {
        ceiling_margin: secs(3),
        ..roomy_config()
    };
    let (handle, _) = spawn(config, &transport);
    let mut events = handle.events();

    let t0 = Instant::now();
    // Refresh would fire at 8s, past the 10s - 3s cutoff
    handle.start_session("alice", secs(10), secs(10)).await.unwrap();

    sleep_until(t0 + secs(9)).await;
    assert_eq!(transport.refreshes(), 0);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SessionEvent::RefreshSkipped { .. })));
    assert!(handle.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_catchup_refreshes_are_capped() {
    let transport = Arc::new(ScriptedTransport::new());
    let config = SessionConfig {
        max_catchup_refreshes: 2,
        ..roomy_config()
    };
    let (handle, _) = spawn(config, &transport);

    // Access TTL shorter than the lead time: every refresh is already due
    handle.start_session("alice", secs(1), secs(60)).await.unwrap();
    settle().await;
    sleep(millis(500)).await;

    assert_eq!(transport.refreshes(), 2);
    assert!(handle.is_authenticated());
}

// ============================================================================
// Races
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_refresh_success_is_discarded_after_logout() {
    let transport = Arc::new(ScriptedTransport::gated());
    let (handle, credentials) = spawn(roomy_config(), &transport);
    let mut events = handle.events();

    let t0 = Instant::now();
    handle.login("alice", "pw").await.unwrap();
    sleep_until(t0 + secs(9)).await;
    assert_eq!(transport.refreshes(), 1, "refresh should be in flight");

    assert!(handle.logout().await.unwrap());
    transport.release_refresh();
    settle().await;

    let snapshot = handle.snapshot();
    assert!(!snapshot.is_authenticated());
    assert_eq!(snapshot.access_deadline, None);
    assert_eq!(credentials.get(), None);

    let seen = drain(&mut events);
    assert!(seen
        .iter()
        .any(|e| matches!(e, SessionEvent::RefreshDiscarded { .. })));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::Refreshed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_wins_over_in_flight_refresh() {
    let transport = Arc::new(ScriptedTransport::gated());
    let (handle, credentials) = spawn(roomy_config(), &transport);
    let mut events = handle.events();

    let t0 = Instant::now();
    handle.login("alice", "pw").await.unwrap();
    handle.start_session("alice", secs(10), secs(20)).await.unwrap();

    sleep_until(t0 + millis(20_001)).await;
    assert!(!handle.is_authenticated());

    transport.release_refresh();
    settle().await;
    assert!(!handle.is_authenticated());
    assert_eq!(credentials.get(), None);
    assert_eq!(end_reasons(&drain(&mut events)), vec![EndReason::CeilingExpired]);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_from_replaced_session_is_discarded() {
    let transport = Arc::new(ScriptedTransport::gated());
    let (handle, credentials) = spawn(roomy_config(), &transport);

    let t0 = Instant::now();
    handle.login("alice", "pw").await.unwrap();
    sleep_until(t0 + secs(9)).await;

    handle.login("bob", "pw").await.unwrap();
    transport.release_refresh();
    settle().await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.identity.as_deref(), Some("bob"));
    assert_eq!(snapshot.access_deadline, Some(t0 + secs(19)));
    assert_eq!(credentials.get().as_deref(), Some("login-token"));
}

// ============================================================================
// Ending sessions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_end_session_is_idempotent() {
    let transport = Arc::new(ScriptedTransport::new());
    let (handle, credentials) = spawn(SessionConfig::default(), &transport);

    handle.login("alice", "pw").await.unwrap();
    assert_eq!(credentials.get().as_deref(), Some("login-token"));

    let (first, second) = tokio::join!(
        handle.end_session(EndReason::UserInitiated),
        handle.end_session(EndReason::UserInitiated)
    );
    let outcomes = [first.unwrap(), second.unwrap()];
    assert_eq!(outcomes.iter().filter(|ended| **ended).count(), 1);

    assert!(!handle.logout().await.unwrap());
    assert_eq!(transport.logouts(), 1);
    assert_eq!(credentials.get(), None);
    assert!(!handle.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_logout_failure_still_clears_local_state() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.logout_fails.store(true, Ordering::SeqCst);
    let (handle, credentials) = spawn(SessionConfig::default(), &transport);

    handle.login("alice", "pw").await.unwrap();
    assert!(handle.logout().await.unwrap());

    assert!(!handle.is_authenticated());
    assert_eq!(credentials.get(), None);
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_handler_forces_logout_once() {
    let transport = Arc::new(ScriptedTransport::new());
    let (handle, credentials) = spawn(SessionConfig::default(), &transport);
    let mut events = handle.events();

    handle.login("alice", "pw").await.unwrap();
    assert!(credentials.notify_unauthorized());
    settle().await;
    assert!(!handle.is_authenticated());

    // A second rejection after the session is gone is a no-op
    assert!(credentials.notify_unauthorized());
    settle().await;

    assert_eq!(end_reasons(&drain(&mut events)), vec![EndReason::RefreshFailedFatally]);
    assert_eq!(transport.logouts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_rejection_does_not_end_next_session() {
    let transport = Arc::new(ScriptedTransport::new());
    let (handle, credentials) = spawn(SessionConfig::default(), &transport);
    let _ = transport.logout_rejects.set(credentials.clone());
    let mut events = handle.events();

    handle.login("alice", "pw").await.unwrap();

    // The next session is queued behind the logout whose call gets a 401
    let (ended, started) = tokio::join!(
        handle.logout(),
        handle.start_session("bob", secs(10), secs(20))
    );
    assert!(ended.unwrap());
    started.unwrap();
    settle().await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.identity.as_deref(), Some("bob"));
    assert_eq!(end_reasons(&drain(&mut events)), vec![EndReason::UserInitiated]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_all_timers() {
    let transport = Arc::new(ScriptedTransport::new());
    let (handle, credentials) = spawn(SessionConfig::default(), &transport);
    let mut events = handle.events();

    handle.login("alice", "pw").await.unwrap();
    assert_eq!(credentials.get().as_deref(), Some("login-token"));
    handle.shutdown().await;

    // Torn down locally, without telling the service
    assert!(!handle.is_authenticated());
    assert_eq!(credentials.get(), None);
    assert_eq!(transport.logouts(), 0);

    sleep(secs(60)).await;

    assert!(end_reasons(&drain(&mut events)).is_empty());
    assert_eq!(transport.refreshes(), 0);
    assert!(!handle.is_authenticated());
    assert!(matches!(
        handle.start_session("alice", secs(10), secs(20)).await,
        Err(EngineError::Stopped)
    ));
}

// ============================================================================
// Establishing sessions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_login_starts_session_with_configured_ttls() {
    let transport = Arc::new(ScriptedTransport::new());
    let (handle, credentials) = spawn(SessionConfig::default(), &transport);

    let t0 = Instant::now();
    handle.login("alice", "pw").await.unwrap();

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.identity.as_deref(), Some("alice"));
    assert_eq!(snapshot.access_deadline, Some(t0 + secs(10)));
    assert_eq!(snapshot.refresh_deadline, Some(t0 + secs(20)));
    assert_eq!(snapshot.inactivity_deadline, Some(t0 + secs(10)));
    assert_eq!(credentials.get().as_deref(), Some("login-token"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_login_leaves_session_unauthenticated() {
    let transport = Arc::new(ScriptedTransport::new());
    let (handle, credentials) = spawn(SessionConfig::default(), &transport);

    let result = handle.login("alice", "wrong").await;
    assert!(matches!(
        result,
        Err(EngineError::Transport(TransportError::Unauthorized))
    ));
    assert!(!handle.is_authenticated());
    assert_eq!(credentials.get(), None);
}

#[tokio::test(start_paused = true)]
async fn test_signup_outcomes() {
    let transport = Arc::new(ScriptedTransport::new());
    let (handle, _) = spawn(SessionConfig::default(), &transport);

    assert_eq!(
        handle.signup("alice", "pw").await.unwrap(),
        SignupOutcome::LoginRequired
    );
    assert!(!handle.is_authenticated());

    transport.signup_issues_token.store(true, Ordering::SeqCst);
    assert_eq!(handle.signup("alice", "pw").await.unwrap(), SignupOutcome::LoggedIn);
    assert_eq!(handle.snapshot().identity.as_deref(), Some("alice"));
    assert_eq!(handle.credential().as_deref(), Some("signup-token"));
}

#[tokio::test(start_paused = true)]
async fn test_verify_existing_session() {
    let transport = Arc::new(ScriptedTransport::new());
    let (handle, credentials) = spawn(SessionConfig::default(), &transport);

    assert!(handle.verify_existing_session().await);
    assert_eq!(handle.snapshot().identity.as_deref(), Some("User"));
    assert_eq!(credentials.get().as_deref(), Some("refreshed-1"));
}

#[tokio::test(start_paused = true)]
async fn test_verify_without_session_is_silent() {
    let transport = Arc::new(ScriptedTransport::failing_refresh());
    let (handle, credentials) = spawn(SessionConfig::default(), &transport);
    let mut events = handle.events();

    assert!(!handle.verify_existing_session().await);
    assert!(!handle.is_authenticated());
    assert_eq!(credentials.get(), None);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let transport: Arc<ScriptedTransport> = Arc::new(ScriptedTransport::new());
    let config = SessionConfig {
        refresh_lead: secs(30),
        ..Default::default()
    };
    assert!(SessionEngine::spawn(config, transport, Arc::new(CredentialStore::new())).is_err());
}

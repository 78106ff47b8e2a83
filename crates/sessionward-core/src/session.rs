//! Session record, the read-only snapshot consumers see, and lifecycle events.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Identity given to a session recovered by startup verification, where the
/// service only confirms that a refresh reference exists.
pub const ANONYMOUS_IDENTITY: &str = "User";

/// Why a session ended. Carried for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    UserInitiated,
    CeilingExpired,
    InactivityExpired,
    RefreshFailedFatally,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::UserInitiated => "user-initiated",
            EndReason::CeilingExpired => "ceiling-expired",
            EndReason::InactivityExpired => "inactivity-expired",
            EndReason::RefreshFailedFatally => "refresh-failed-fatally",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative record of a logged-in session, owned by the engine.
#[derive(Debug, Clone)]
pub(crate) struct ActiveSession {
    pub identity: String,
    pub access_ttl: Duration,
    pub access_deadline: Instant,
    pub refresh_deadline: Instant,
    pub last_active_at: Instant,
    pub started_at: DateTime<Utc>,
    pub generation: u64,
}

impl ActiveSession {
    pub fn new(
        identity: String,
        access_ttl: Duration,
        refresh_ttl: Duration,
        now: Instant,
        generation: u64,
    ) -> Self {
        Self {
            identity,
            access_ttl,
            access_deadline: now + access_ttl,
            refresh_deadline: now + refresh_ttl,
            last_active_at: now,
            started_at: Utc::now(),
            generation,
        }
    }

    pub fn inactivity_deadline(&self, limit: Duration) -> Instant {
        self.last_active_at + limit
    }

    pub fn snapshot(&self, inactivity_limit: Duration) -> SessionSnapshot {
        SessionSnapshot {
            identity: Some(self.identity.clone()),
            access_deadline: Some(self.access_deadline),
            refresh_deadline: Some(self.refresh_deadline),
            last_active_at: Some(self.last_active_at),
            inactivity_deadline: Some(self.inactivity_deadline(inactivity_limit)),
            started_at: Some(self.started_at),
            generation: self.generation,
        }
    }
}

/// Read-only view of the session published after every change.
///
/// Either every field is set (authenticated) or none is; `generation`
/// identifies the most recent session and survives its end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub identity: Option<String>,
    pub access_deadline: Option<Instant>,
    pub refresh_deadline: Option<Instant>,
    pub last_active_at: Option<Instant>,
    pub inactivity_deadline: Option<Instant>,
    pub started_at: Option<DateTime<Utc>>,
    pub generation: u64,
}

impl SessionSnapshot {
    pub(crate) fn ended(generation: u64) -> Self {
        Self {
            generation,
            ..Default::default()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Time left on the current access credential, zero once past or absent
    pub fn access_remaining(&self, now: Instant) -> Duration {
        remaining(self.access_deadline, now)
    }

    /// Time left before the session ceiling
    pub fn session_remaining(&self, now: Instant) -> Duration {
        remaining(self.refresh_deadline, now)
    }

    /// Time left before the inactivity logout
    pub fn idle_remaining(&self, now: Instant) -> Duration {
        remaining(self.inactivity_deadline, now)
    }
}

fn remaining(deadline: Option<Instant>, now: Instant) -> Duration {
    deadline
        .map(|d| d.saturating_duration_since(now))
        .unwrap_or(Duration::ZERO)
}

/// Lifecycle notifications broadcast by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started { identity: String, generation: u64 },
    Refreshed { generation: u64, access_deadline: Instant },
    /// The ceiling was too close for a refresh to be worth attempting
    RefreshSkipped { generation: u64 },
    RefreshFailed { generation: u64, error: String },
    /// A refresh completed for a session that no longer exists
    RefreshDiscarded { generation: u64 },
    ActivityNoted { generation: u64, at: Instant },
    Ended { generation: u64, reason: EndReason },
}

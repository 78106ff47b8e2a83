//! Cancellable deadline timers.
//!
//! Each `ActionKind` has at most one armed `ScheduledAction`. Arming a kind
//! replaces (and aborts) whatever was armed before. When a timer elapses it
//! posts a `Fired` ticket; the owner accepts it only through
//! `Schedule::take_if_current`, so a ticket from a cancelled or replaced
//! action is never acted on even if it was already in the channel.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SilentRefresh,
    CeilingExpiry,
    InactivityExpiry,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SilentRefresh => "silent-refresh",
            ActionKind::CeilingExpiry => "ceiling-expiry",
            ActionKind::InactivityExpiry => "inactivity-expiry",
        }
    }
}

/// Notification that an armed action's deadline was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub kind: ActionKind,
    pub ticket: u64,
}

/// An armed timer. Dropping it aborts the timer task.
#[derive(Debug)]
pub struct ScheduledAction {
    kind: ActionKind,
    deadline: Instant,
    ticket: u64,
    task: JoinHandle<()>,
}

impl ScheduledAction {
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Drop for ScheduledAction {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug)]
pub struct Schedule {
    silent_refresh: Option<ScheduledAction>,
    ceiling: Option<ScheduledAction>,
    inactivity: Option<ScheduledAction>,
    next_ticket: u64,
    fired_tx: mpsc::UnboundedSender<Fired>,
}

impl Schedule {
    /// Create an empty schedule and the receiver its timers report to
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Fired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let schedule = Self {
            silent_refresh: None,
            ceiling: None,
            inactivity: None,
            next_ticket: 0,
            fired_tx,
        };
        (schedule, fired_rx)
    }

    fn slot(&mut self, kind: ActionKind) -> &mut Option<ScheduledAction> {
        match kind {
            ActionKind::SilentRefresh => &mut self.silent_refresh,
            ActionKind::CeilingExpiry => &mut self.ceiling,
            ActionKind::InactivityExpiry => &mut self.inactivity,
        }
    }

    fn get(&self, kind: ActionKind) -> Option<&ScheduledAction> {
        match kind {
            ActionKind::SilentRefresh => self.silent_refresh.as_ref(),
            ActionKind::CeilingExpiry => self.ceiling.as_ref(),
            ActionKind::InactivityExpiry => self.inactivity.as_ref(),
        }
    }

    /// Arm `kind` to fire at `deadline`, cancelling any pending instance first.
    /// A deadline in the past fires on the next tick.
    pub fn arm(&mut self, kind: ActionKind, deadline: Instant) {
        self.cancel(kind);

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let tx = self.fired_tx.clone();
        let task = tokio::spawn(async move {
            sleep_until(deadline).await;
            let _ = tx.send(Fired { kind, ticket });
        });

        trace!(action = kind.as_str(), ticket, "Armed scheduled action");
        *self.slot(kind) = Some(ScheduledAction {
            kind,
            deadline,
            ticket,
            task,
        });
    }

    pub fn cancel(&mut self, kind: ActionKind) {
        if let Some(action) = self.slot(kind).take() {
            trace!(action = kind.as_str(), ticket = action.ticket, "Cancelled scheduled action");
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel(ActionKind::SilentRefresh);
        self.cancel(ActionKind::CeilingExpiry);
        self.cancel(ActionKind::InactivityExpiry);
    }

    /// Consume the armed action if `fired` belongs to it
    pub fn take_if_current(&mut self, fired: Fired) -> bool {
        let current = self.get(fired.kind).map(|action| action.ticket) == Some(fired.ticket);
        if current {
            *self.slot(fired.kind) = None;
        }
        current
    }

    pub fn deadline(&self, kind: ActionKind) -> Option<Instant> {
        self.get(kind).map(ScheduledAction::deadline)
    }

    pub fn is_armed(&self, kind: ActionKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn armed_count(&self) -> usize {
        [&self.silent_refresh, &self.ceiling, &self.inactivity]
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

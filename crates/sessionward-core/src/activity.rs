//! User-presence tracking.
//!
//! The UI reports raw interaction signals through `ActivityMonitor::record`.
//! The monitor only listens while a session is authenticated: it subscribes
//! when a session starts, reports presence immediately, then forwards at most
//! one `note_activity` per throttle window. When the session ends the
//! subscription is dropped, so signals recorded while logged out go nowhere.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::engine::SessionHandle;

/// Raw signals are bursty (pointer movement); a small buffer is enough since
/// only one per throttle window matters.
const SIGNAL_CHANNEL_CAPACITY: usize = 32;

/// Interaction kinds that count as user presence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivitySignal {
    PointerMove,
    KeyPress,
    Click,
    Scroll,
}

impl ActivitySignal {
    pub const ALL: [ActivitySignal; 4] = [
        ActivitySignal::PointerMove,
        ActivitySignal::KeyPress,
        ActivitySignal::Click,
        ActivitySignal::Scroll,
    ];
}

/// Lets one event through per window; the first event always passes.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// True if an event at `now` should be forwarded
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) <= self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

pub struct ActivityMonitor {
    signals: broadcast::Sender<ActivitySignal>,
    task: JoinHandle<()>,
}

impl ActivityMonitor {
    /// Start watching `session` and forwarding throttled activity to it
    pub fn spawn(session: SessionHandle) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        let task = tokio::spawn(watch_session(session, signals.clone()));
        Self { signals, task }
    }

    /// Report a raw interaction; dropped when no session is active
    pub fn record(&self, signal: ActivitySignal) {
        let _ = self.signals.send(signal);
    }

    /// True while subscribed to signals, i.e. while a session is active
    pub fn is_listening(&self) -> bool {
        self.signals.receiver_count() > 0
    }
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn watch_session(session: SessionHandle, signals: broadcast::Sender<ActivitySignal>) {
    let mut state = session.subscribe();
    let window = session.config().activity_throttle;

    loop {
        let generation = match state.wait_for(|s| s.is_authenticated()).await {
            Ok(snapshot) => snapshot.generation,
            Err(_) => return,
        };

        let mut rx = signals.subscribe();
        let mut throttle = Throttle::new(window);
        debug!(generation, "Activity monitor listening");
        session.note_activity();

        loop {
            tokio::select! {
                signal = rx.recv() => match signal {
                    Ok(signal) => {
                        if throttle.allow(Instant::now()) {
                            trace!(?signal, "User activity");
                            session.note_activity();
                        }
                    }
                    // Missed signals still prove presence
                    Err(RecvError::Lagged(_)) => {
                        if throttle.allow(Instant::now()) {
                            session.note_activity();
                        }
                    }
                    Err(RecvError::Closed) => return,
                },
                changed = state.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let (active, current) = {
                        let snapshot = state.borrow_and_update();
                        (snapshot.is_authenticated(), snapshot.generation)
                    };
                    if !active || current != generation {
                        break;
                    }
                }
            }
        }

        drop(rx);
        debug!(generation, "Activity monitor stopped listening");
    }
}

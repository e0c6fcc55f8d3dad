//! Debounce and re-entrancy guard for editor notifications.
//!
//! Selection-change and document-change notifications arrive in bursts.
//! The gate collapses a burst into one trailing call and drops anything
//! that arrives while a handler is already running or a reload is active.
//! Dropped notifications are not queued.

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Recorded; the handler runs once the debounce elapses.
    Pending,
    /// A handler is already running.
    DroppedReentrant,
    DroppedReloading,
}

#[derive(Debug, Clone)]
pub struct NotificationGate {
    name: &'static str,
    debounce: Duration,
    pending: Option<Instant>,
    handling: bool,
}

impl NotificationGate {
    pub fn new(name: &'static str, debounce: Duration) -> Self {
        Self {
            name,
            debounce,
            pending: None,
            handling: false,
        }
    }

    pub fn is_handling(&self) -> bool {
        self.handling
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Record a notification at `now`. Each one restarts the debounce.
    pub fn notify(&mut self, now: Instant, reloading: bool) -> GateDecision {
        if reloading {
            trace!("{} notification dropped during reload", self.name);
            return GateDecision::DroppedReloading;
        }
        if self.handling {
            trace!("{} notification dropped, handler running", self.name);
            return GateDecision::DroppedReentrant;
        }
        self.pending = Some(now);
        GateDecision::Pending
    }

    /// Whether the handler should run now. A `true` marks the gate as
    /// handling until [`finish`](Self::finish).
    pub fn take_ready(&mut self, now: Instant, reloading: bool) -> bool {
        if reloading {
            self.pending = None;
            return false;
        }
        match self.pending {
            Some(at) if !self.handling && now.duration_since(at) >= self.debounce => {
                self.pending = None;
                self.handling = true;
                true
            }
            _ => false,
        }
    }

    pub fn finish(&mut self) {
        self.handling = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(250);

    #[test]
    fn test_burst_collapses_to_trailing_call() {
        let mut gate = NotificationGate::new("selection", DEBOUNCE);
        let t0 = Instant::now();
        assert_eq!(gate.notify(t0, false), GateDecision::Pending);
        assert_eq!(
            gate.notify(t0 + Duration::from_millis(200), false),
            GateDecision::Pending
        );
        // 250ms after the first, but only 50ms after the last.
        assert!(!gate.take_ready(t0 + Duration::from_millis(250), false));
        assert!(gate.take_ready(t0 + Duration::from_millis(450), false));
        assert!(!gate.take_ready(t0 + Duration::from_millis(900), false));
    }

    #[test]
    fn test_reentrant_notifications_are_dropped() {
        let mut gate = NotificationGate::new("document", DEBOUNCE);
        let t0 = Instant::now();
        gate.notify(t0, false);
        assert!(gate.take_ready(t0 + DEBOUNCE, false));
        assert!(gate.is_handling());
        assert_eq!(
            gate.notify(t0 + DEBOUNCE, false),
            GateDecision::DroppedReentrant
        );
        assert!(!gate.has_pending());
        gate.finish();
        assert_eq!(gate.notify(t0 + DEBOUNCE, false), GateDecision::Pending);
    }

    #[test]
    fn test_reload_drops_pending() {
        let mut gate = NotificationGate::new("selection", DEBOUNCE);
        let t0 = Instant::now();
        assert_eq!(gate.notify(t0, true), GateDecision::DroppedReloading);
        gate.notify(t0, false);
        assert!(!gate.take_ready(t0 + DEBOUNCE, true));
        assert!(!gate.has_pending());
        assert!(!gate.take_ready(t0 + DEBOUNCE * 2, false));
    }
}

//! Reload state machine.
//!
//! When the sync controller finds the local view stale, the whole document
//! is replaced. While that happens the editor must not react to its own
//! selection and change notifications, and the user must not type into a
//! document that is about to vanish. The machine owns that window:
//!
//! ```text
//!   Idle --begin()--> Reloading --rendered--> Resettling --settle_delay--> Idle
//!                         |
//!                         +--max_poll_attempts without pages--> Idle (fail open)
//! ```
//!
//! Consumers subscribe to [`ReloadEvent`]s instead of reading flags.

use std::time::Duration;

use kiroku_doc::FormDocument;
use kiroku_types::Selection;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Timing;
use crate::constants::RELOAD_EVENT_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    Idle,
    /// Content is being replaced; input and callbacks are suspended.
    Reloading { attempts: u32 },
    /// Rendered; waiting out the settle delay before notifications resume.
    Resettling { since: Instant },
}

/// What to put back once the new content has rendered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Restore {
    #[default]
    Nothing,
    Selection(Selection),
    /// A bulk operation interrupted by the reload, replayed afterwards.
    BulkOperation(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadEvent {
    Started,
    Rendered { page_count: usize },
    Restored(Restore),
    Settled,
    TimedOut { attempts: u32 },
    /// Content could not be fetched; nothing was replaced.
    Aborted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReloadError {
    #[error("a reload is already in progress")]
    InProgress,

    #[error("document did not render after {attempts} polls")]
    Timeout { attempts: u32 },

    #[error("no reload in progress")]
    NotReloading,
}

/// Anything that can report how many pages it has rendered.
pub trait RenderProbe {
    fn rendered_pages(&self) -> usize;
}

impl RenderProbe for FormDocument {
    fn rendered_pages(&self) -> usize {
        self.page_count()
    }
}

#[derive(Debug)]
pub struct ReloadMachine {
    state: ReloadState,
    restore: Restore,
    poll_interval: Duration,
    max_attempts: u32,
    settle_delay: Duration,
    events: broadcast::Sender<ReloadEvent>,
}

impl ReloadMachine {
    pub fn new(timing: &Timing) -> Self {
        let (events, _) = broadcast::channel(RELOAD_EVENT_CAPACITY);
        Self {
            state: ReloadState::Idle,
            restore: Restore::Nothing,
            poll_interval: timing.reload_poll_interval(),
            max_attempts: timing.max_poll_attempts.max(1),
            settle_delay: timing.settle_delay(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ReloadState {
        self.state
    }

    /// Reloading or resettling.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, ReloadState::Idle)
    }

    /// Pointer, keyboard and focus input are blocked.
    pub fn input_blocked(&self) -> bool {
        matches!(self.state, ReloadState::Reloading { .. })
    }

    fn emit(&self, event: ReloadEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Idle -> Reloading, recording what to restore afterwards.
    pub fn begin(&mut self, restore: Restore) -> Result<(), ReloadError> {
        if self.is_active() {
            return Err(ReloadError::InProgress);
        }
        info!("Reload started ({:?})", restore);
        self.restore = restore;
        self.state = ReloadState::Reloading { attempts: 0 };
        self.emit(ReloadEvent::Started);
        Ok(())
    }

    /// Report the rendered page count after the content swap.
    ///
    /// Returns what to restore once pages are up, `None` while still waiting.
    /// Exhausting the attempts forces Idle and re-enables input.
    pub fn poll_rendered(&mut self, page_count: usize) -> Result<Option<Restore>, ReloadError> {
        let ReloadState::Reloading { attempts } = self.state else {
            return Err(ReloadError::NotReloading);
        };
        if page_count > 0 {
            self.state = ReloadState::Resettling {
                since: Instant::now(),
            };
            self.emit(ReloadEvent::Rendered { page_count });
            let restore = std::mem::take(&mut self.restore);
            self.emit(ReloadEvent::Restored(restore.clone()));
            debug!("Reload rendered {} pages after {} polls", page_count, attempts);
            return Ok(Some(restore));
        }

        let attempts = attempts + 1;
        if attempts >= self.max_attempts {
            error!("Reload timed out after {} polls, re-enabling input", attempts);
            self.state = ReloadState::Idle;
            self.restore = Restore::Nothing;
            self.emit(ReloadEvent::TimedOut { attempts });
            return Err(ReloadError::Timeout { attempts });
        }
        self.state = ReloadState::Reloading { attempts };
        Ok(None)
    }

    /// Back to Idle without rendering, when the replacement content never
    /// arrived.
    pub fn abort(&mut self) {
        if self.is_active() {
            warn!("Reload aborted");
            self.state = ReloadState::Idle;
            self.restore = Restore::Nothing;
            self.emit(ReloadEvent::Aborted);
        }
    }

    /// Resettling -> Idle once the settle delay has passed. Returns whether
    /// the machine is idle afterwards.
    pub fn settle(&mut self, now: Instant) -> bool {
        match self.state {
            ReloadState::Idle => true,
            ReloadState::Reloading { .. } => false,
            ReloadState::Resettling { since } => {
                if now.duration_since(since) < self.settle_delay {
                    return false;
                }
                self.state = ReloadState::Idle;
                self.emit(ReloadEvent::Settled);
                info!("Reload settled");
                true
            }
        }
    }

    /// Run the poll and settle loop against `probe` to completion.
    pub async fn drive<R: RenderProbe + ?Sized>(&mut self, probe: &R) -> Result<Restore, ReloadError> {
        let restore = loop {
            if let Some(restore) = self.poll_rendered(probe.rendered_pages())? {
                break restore;
            }
            tokio::time::sleep(self.poll_interval).await;
        };
        tokio::time::sleep(self.settle_delay).await;
        self.settle(Instant::now());
        Ok(restore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiroku_types::DocumentPosition;

    struct Blank;

    impl RenderProbe for Blank {
        fn rendered_pages(&self) -> usize {
            0
        }
    }

    struct Pages(usize);

    impl RenderProbe for Pages {
        fn rendered_pages(&self) -> usize {
            self.0
        }
    }

    fn timing(max_poll_attempts: u32) -> Timing {
        Timing {
            max_poll_attempts,
            ..Timing::default()
        }
    }

    #[test]
    fn test_begin_is_not_reentrant() {
        let mut machine = ReloadMachine::new(&timing(5));
        machine.begin(Restore::Nothing).unwrap();
        assert!(machine.input_blocked());
        assert_eq!(machine.begin(Restore::Nothing), Err(ReloadError::InProgress));
    }

    #[test]
    fn test_poll_without_reload() {
        let mut machine = ReloadMachine::new(&timing(5));
        assert_eq!(machine.poll_rendered(3), Err(ReloadError::NotReloading));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rendered_restores_selection_then_settles() {
        let mut machine = ReloadMachine::new(&timing(5));
        let mut events = machine.subscribe();
        let sel = Selection::caret(DocumentPosition::new([2, 4]));
        machine.begin(Restore::Selection(sel.clone())).unwrap();

        assert_eq!(machine.poll_rendered(0), Ok(None));
        assert_eq!(machine.poll_rendered(2), Ok(Some(Restore::Selection(sel.clone()))));
        assert!(!machine.input_blocked());
        assert!(machine.is_active());

        assert!(!machine.settle(Instant::now()));
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(machine.settle(Instant::now()));
        assert_eq!(machine.state(), ReloadState::Idle);

        assert_eq!(events.recv().await.unwrap(), ReloadEvent::Started);
        assert_eq!(
            events.recv().await.unwrap(),
            ReloadEvent::Rendered { page_count: 2 }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ReloadEvent::Restored(Restore::Selection(sel))
        );
        assert_eq!(events.recv().await.unwrap(), ReloadEvent::Settled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_open() {
        let mut machine = ReloadMachine::new(&timing(3));
        let mut events = machine.subscribe();
        machine.begin(Restore::BulkOperation("sign-all".into())).unwrap();

        let err = machine.drive(&Blank).await.unwrap_err();
        assert_eq!(err, ReloadError::Timeout { attempts: 3 });
        assert_eq!(machine.state(), ReloadState::Idle);
        assert!(!machine.input_blocked());

        assert_eq!(events.recv().await.unwrap(), ReloadEvent::Started);
        assert_eq!(
            events.recv().await.unwrap(),
            ReloadEvent::TimedOut { attempts: 3 }
        );
        // A fresh reload may start afterwards.
        assert!(machine.begin(Restore::Nothing).is_ok());
    }

    #[test]
    fn test_abort_returns_to_idle() {
        let mut machine = ReloadMachine::new(&timing(3));
        let mut events = machine.subscribe();
        machine.begin(Restore::Nothing).unwrap();
        machine.abort();
        assert_eq!(machine.state(), ReloadState::Idle);
        assert_eq!(events.try_recv().unwrap(), ReloadEvent::Started);
        assert_eq!(events.try_recv().unwrap(), ReloadEvent::Aborted);
        machine.abort();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_to_idle() {
        let mut machine = ReloadMachine::new(&timing(3));
        machine
            .begin(Restore::BulkOperation("sign-all".into()))
            .unwrap();
        let restore = machine.drive(&Pages(1)).await.unwrap();
        assert_eq!(restore, Restore::BulkOperation("sign-all".into()));
        assert_eq!(machine.state(), ReloadState::Idle);
    }
}

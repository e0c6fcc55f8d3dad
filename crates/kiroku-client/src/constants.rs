//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Debounce window for selection-change and document-change notifications.
pub const NOTIFICATION_DEBOUNCE: Duration = Duration::from_millis(250);

/// Interval between render polls while a reloaded document lays out.
pub const RELOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Render polls before a reload gives up and fails open.
/// At the default interval this bounds a reload at about five seconds.
pub const MAX_RELOAD_POLL_ATTEMPTS: u32 = 50;

/// Quiet period after content is back before input handlers re-arm.
pub const RELOAD_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Server-side lock lifetime when the holder goes silent.
pub const LOCK_TTL: Duration = Duration::from_secs(15 * 60);

/// Capacity of the reload event broadcast channel.
pub const RELOAD_EVENT_CAPACITY: usize = 64;

/// Default locale sent with appends and stage changes.
pub const DEFAULT_LOCALE: &str = "en-GB";

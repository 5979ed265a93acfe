//! Events and Clocks
//!
//! An event is one closed unit of propagation. Each event is stamped with a
//! monotonically increasing sequence number and a timestamp taken from the
//! graph's [`Clock`] when the event opens.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Identity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EventStamp {
    /// Position of the event in the graph's timeline, starting at 1.
    pub sequence: u64,

    /// Milliseconds reported by the graph's clock when the event opened.
    pub timestamp: u64,
}

impl EventStamp {
    /// The stamp every value carries before its first update.
    pub const INITIAL: EventStamp = EventStamp {
        sequence: 0,
        timestamp: 0,
    };
}

/// What the graph is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// No event is open.
    Idle,

    /// An action body is running.
    Action,

    /// Structural changes are committed and activated behaviors run.
    Updates,

    /// Deferred side effects are running.
    SideEffects,
}

/// Source of event timestamps.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now(&self) -> u64;
}

/// Wall-clock time since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
///
/// # Example
///
/// ```rust,ignore
/// let clock = Arc::new(ManualClock::new(1_000));
/// let graph = Graph::builder().clock(clock.clone()).build();
///
/// graph.action(|| Ok(()))?;
/// assert_eq!(graph.last_event().timestamp, 1_000);
///
/// clock.advance(250);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `millis`.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now(), 10);
        clock.advance(5);
        assert_eq!(clock.now(), 15);
        clock.set(3);
        assert_eq!(clock.now(), 3);
    }

    #[test]
    fn system_clock_is_past_the_epoch() {
        assert!(SystemClock.now() > 0);
    }

    #[test]
    fn event_stamp_serializes_as_object() {
        let stamp = EventStamp {
            sequence: 4,
            timestamp: 1200,
        };
        let json = serde_json::to_string(&stamp).unwrap();
        assert_eq!(json, r#"{"sequence":4,"timestamp":1200}"#);
    }
}

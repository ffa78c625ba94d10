//! ==============================================================================
//! edge.rs - debounced edge detector
//! ==============================================================================
//!
//! purpose:
//!     turns a noisy digital level into clean transition events.
//!     one detector per input; it owns the last level and the time of the
//!     last reported edge, nothing else.
//!
//! semantics:
//!     - an edge qualifies only if at least `window` has passed since the
//!       previous qualifying edge (the first edge always qualifies).
//!     - the level is recorded on every poll, qualifying or not, so a bounce
//!       that is swallowed does not resurface on the next poll.
//!     - inputs are active-low: `Falling` is "asserted" (button pressed),
//!       `Rising` is "released".
//!
//! ==============================================================================

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    None,
    RisingQualified,
    FallingQualified,
}

#[derive(Debug, Clone)]
pub struct EdgeDetector {
    window: Duration,
    last_level: bool,
    last_event: Option<Instant>,
}

impl EdgeDetector {
    /// `idle_level` is the level the input rests at before anything happens
    /// (high for a pulled-up button, low for a tilt switch).
    pub fn new(window: Duration, idle_level: bool) -> Self {
        Self {
            window,
            last_level: idle_level,
            last_event: None,
        }
    }

    pub fn poll(&mut self, level: bool, now: Instant) -> Edge {
        let previous = self.last_level;
        self.last_level = level;

        if previous == level {
            return Edge::None;
        }

        let settled = match self.last_event {
            Some(at) => now.saturating_duration_since(at) >= self.window,
            None => true,
        };
        if !settled {
            return Edge::None;
        }

        self.last_event = Some(now);
        if level {
            Edge::RisingQualified
        } else {
            Edge::FallingQualified
        }
    }

    pub fn last_level(&self) -> bool {
        self.last_level
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Outcome tallies for one group; persisted across checkpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    pub successes: u64,
    pub failures: u64,
    pub disregarded: u64,
    pub total_bytes: u64,
}

/// Tracks the scheduling state of one politeness group
///
/// A group collects every pending URI sharing a politeness key. It enforces
/// the two politeness rules: at most one URI of the group is checked out at
/// a time, and consecutive fetches are spaced by a per-group delay.
#[derive(Debug, Clone)]
pub struct FrontierGroup {
    /// Politeness key (host[:port])
    pub key: String,

    /// Number of URIs waiting in the queue store for this group
    pub pending: usize,

    /// Whether a URI of this group is currently checked out by a worker
    pub busy: bool,

    /// Earliest time the next URI may be handed out
    pub wake_time: Option<Instant>,

    /// Whether the group sits in the frontier's ready queue or snooze heap
    pub enqueued: bool,

    /// Outcome tallies
    pub stats: GroupStats,
}

impl FrontierGroup {
    /// Creates an idle group with no pending URIs
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            pending: 0,
            busy: false,
            wake_time: None,
            enqueued: false,
            stats: GroupStats::default(),
        }
    }

    /// Checks if a URI of this group may be handed out now
    ///
    /// # Arguments
    ///
    /// * `now` - The current time instant
    ///
    /// # Returns
    ///
    /// * `true` - The group has pending work, is not busy and is not snoozed
    /// * `false` - Otherwise
    pub fn is_eligible(&self, now: Instant) -> bool {
        !self.busy && self.pending > 0 && self.time_until_eligible(now).is_none()
    }

    /// Calculates the remaining politeness delay
    ///
    /// Returns None if the group is not snoozed, or the duration to wait otherwise.
    pub fn time_until_eligible(&self, now: Instant) -> Option<Duration> {
        match self.wake_time {
            Some(wake) if wake > now => Some(wake - now),
            _ => None,
        }
    }

    /// Marks a URI of this group as checked out
    pub fn check_out(&mut self) {
        debug_assert!(!self.busy, "group {} already busy", self.key);
        self.busy = true;
        self.pending = self.pending.saturating_sub(1);
    }

    /// Releases the group after its checked-out URI finished, snoozing it
    /// for `delay`
    pub fn check_in(&mut self, now: Instant, delay: Duration) {
        self.busy = false;
        self.wake_time = if delay.is_zero() {
            None
        } else {
            Some(now + delay)
        };
    }

    /// Records the outcome of a finished URI
    pub fn record_outcome(&mut self, success: bool, disregarded: bool, bytes: u64) {
        if disregarded {
            self.stats.disregarded += 1;
        } else if success {
            self.stats.successes += 1;
            self.stats.total_bytes += bytes;
        } else {
            self.stats.failures += 1;
        }
    }
}

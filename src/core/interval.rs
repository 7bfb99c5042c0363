//! Time ranges and replay windows.
//!
//! Timestamps are signed nanoseconds since the Unix epoch. Both bounds of a
//! [`TimeInterval`] are inclusive.

use serde::{Deserialize, Serialize};

/// Nanoseconds since the Unix epoch.
pub type Timestamp = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub left: Timestamp,
    pub right: Timestamp,
}

impl TimeInterval {
    pub const fn new(left: Timestamp, right: Timestamp) -> Self {
        Self { left, right }
    }

    /// Interval containing no points. Identity element for [`TimeInterval::coverage`].
    pub const fn empty() -> Self {
        Self {
            left: Timestamp::MAX,
            right: Timestamp::MIN,
        }
    }

    /// Interval containing every representable timestamp.
    pub const fn infinite() -> Self {
        Self {
            left: Timestamp::MIN,
            right: Timestamp::MAX,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.left > self.right
    }

    pub fn point_is_within(&self, t: Timestamp) -> bool {
        self.left <= t && t <= self.right
    }

    pub fn contains_interval(&self, other: &TimeInterval) -> bool {
        if other.is_empty() {
            return true;
        }
        self.point_is_within(other.left) && self.point_is_within(other.right)
    }

    pub fn intersects(&self, other: &TimeInterval) -> bool {
        !self.is_empty() && !other.is_empty() && self.left <= other.right && other.left <= self.right
    }

    /// Width in nanoseconds, `None` for the empty interval or on overflow.
    pub fn span(&self) -> Option<u64> {
        if self.is_empty() {
            return None;
        }
        self.right.checked_sub(self.left).map(|d| d as u64)
    }

    /// Smallest interval containing all of `intervals`.
    pub fn coverage<'a, I>(intervals: I) -> Self
    where
        I: IntoIterator<Item = &'a TimeInterval>,
    {
        intervals
            .into_iter()
            .filter(|interval| !interval.is_empty())
            .fold(Self::empty(), |acc, interval| Self {
                left: acc.left.min(interval.left),
                right: acc.right.max(interval.right),
            })
    }
}

impl Default for TimeInterval {
    fn default() -> Self {
        Self::empty()
    }
}

/// Time window plus the choice of which envelope timestamp governs filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayDescriptor {
    pub interval: TimeInterval,
    pub use_originating_time: bool,
}

impl ReplayDescriptor {
    pub const fn new(interval: TimeInterval, use_originating_time: bool) -> Self {
        Self {
            interval,
            use_originating_time,
        }
    }

    pub const fn replay_all() -> Self {
        Self::new(TimeInterval::infinite(), true)
    }
}

impl Default for ReplayDescriptor {
    fn default() -> Self {
        Self::replay_all()
    }
}

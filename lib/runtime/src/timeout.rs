// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Monotonic-clock deadlines with a "never" sentinel.
//!
//! Every blocking operation in the crate takes a [`Timeout`]. The ordering is
//! total, with [`Timeout::never`] comparing greater than every finite
//! deadline, which lets schedulers keep timeouts directly in ordered
//! containers.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// An immutable point on the monotonic clock, or "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    deadline: Option<Instant>,
}

impl Timeout {
    /// A deadline that has already arrived.
    pub fn now() -> Self {
        Self {
            deadline: Some(Instant::now()),
        }
    }

    /// A deadline that never arrives.
    pub const fn never() -> Self {
        Self { deadline: None }
    }

    /// Expire at an absolute instant.
    pub const fn at(instant: Instant) -> Self {
        Self {
            deadline: Some(instant),
        }
    }

    /// Expire after the given duration from now.
    pub fn after(dur: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + dur),
        }
    }

    /// Expire after the given number of milliseconds from now.
    pub fn after_ms(ms: u64) -> Self {
        Self::after(Duration::from_millis(ms))
    }

    /// The deadline instant, unless this timeout never expires.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True for the never-expiring sentinel.
    pub fn is_never(&self) -> bool {
        self.deadline.is_none()
    }

    /// True once the deadline is in the past (never true for the sentinel).
    pub fn expired(&self) -> bool {
        matches!(self.deadline, Some(d) if d <= Instant::now())
    }
}

impl From<Duration> for Timeout {
    fn from(dur: Duration) -> Self {
        Timeout::after(dur)
    }
}

impl Ord for Timeout {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.deadline, other.deadline) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(&b),
        }
    }
}

impl PartialOrd for Timeout {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_the_maximum() {
        let finite = Timeout::after_ms(10);
        assert!(Timeout::never() > finite);
        assert!(finite < Timeout::never());
        assert_eq!(Timeout::never(), Timeout::never());
    }

    #[test]
    fn finite_deadlines_order_by_instant() {
        let early = Timeout::after_ms(1);
        let late = Timeout::after_ms(1000);
        assert!(early < late);
    }

    #[test]
    fn expiry() {
        assert!(Timeout::now().expired());
        assert!(!Timeout::never().expired());
        assert!(!Timeout::after_ms(60_000).expired());
    }
}

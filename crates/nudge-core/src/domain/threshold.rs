//! Threshold - リマインダーのリードタイム
//!
//! リマインダーは期限の 60 / 30 / 10 分前にだけ送る。
//! 閾値は固定集合なので enum で表現し、`remindersSent` に集合外の値が入らないことを型で保証する。

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Fixed lead time before a task's due instant.
///
/// Wire format is the plain number of minutes (`60`, `30`, `10`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Threshold {
    Ten,
    Thirty,
    Sixty,
}

impl Threshold {
    /// Evaluation order: largest lead time first.
    pub const ALL: [Threshold; 3] = [Threshold::Sixty, Threshold::Thirty, Threshold::Ten];

    pub fn minutes(self) -> u32 {
        match self {
            Threshold::Sixty => 60,
            Threshold::Thirty => 30,
            Threshold::Ten => 10,
        }
    }

    /// The fire window is one minute wide: `[minutes - 1, minutes]`.
    pub fn fires_at(self, remaining_minutes: i64) -> bool {
        let m = i64::from(self.minutes());
        remaining_minutes <= m && remaining_minutes >= m - 1
    }

    /// Marker used in the reminder subject line.
    pub fn urgency_marker(self) -> &'static str {
        match self {
            Threshold::Sixty => "🔔",
            Threshold::Thirty => "⏰",
            Threshold::Ten => "🚨",
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.minutes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported reminder threshold: {0} (expected 60, 30 or 10)")]
pub struct UnknownThreshold(pub u32);

impl TryFrom<u32> for Threshold {
    type Error = UnknownThreshold;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            60 => Ok(Threshold::Sixty),
            30 => Ok(Threshold::Thirty),
            10 => Ok(Threshold::Ten),
            other => Err(UnknownThreshold(other)),
        }
    }
}

impl From<Threshold> for u32 {
    fn from(t: Threshold) -> Self {
        t.minutes()
    }
}

/// Set of thresholds already notified for one task. Grows, never shrinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemindersSent(BTreeSet<Threshold>);

impl RemindersSent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, threshold: Threshold) -> bool {
        self.0.contains(&threshold)
    }

    /// Returns `false` when the threshold was already recorded.
    pub fn insert(&mut self, threshold: Threshold) -> bool {
        self.0.insert(threshold)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Largest lead time first, matching evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = Threshold> + '_ {
        self.0.iter().rev().copied()
    }
}

impl FromIterator<Threshold> for RemindersSent {
    fn from_iter<I: IntoIterator<Item = Threshold>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Thresholds that fire for a task `remaining_minutes` away from its due
/// instant, in evaluation order, excluding those already sent.
pub fn firing_thresholds(remaining_minutes: i64, sent: &RemindersSent) -> Vec<Threshold> {
    Threshold::ALL
        .into_iter()
        .filter(|t| t.fires_at(remaining_minutes) && !sent.contains(*t))
        .collect()
}

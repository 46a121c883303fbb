//! Task status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task status.
///
/// State transitions:
/// - Pending -> Completed
/// - Pending -> Cancelled
/// - Completed / Cancelled -> Pending (re-opened by the user)
///
/// 旧レコードには `status` フィールドが無いことがある。
/// その場合はストア境界（serde default / NULL カラム）で `Pending` に正規化するので、
/// 下流のロジックが「未設定」を気にする必要はない。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Only pending tasks are evaluated by the reminder scan.
    pub fn is_remindable(self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Normalize an optional stored value. Absence means pending.
    pub fn from_stored(value: Option<&str>) -> Result<Self, UnknownStatus> {
        match value {
            None => Ok(TaskStatus::Pending),
            Some(s) if s.trim().is_empty() => Ok(TaskStatus::Pending),
            Some(s) => s.parse(),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0:?} (expected pending, completed or cancelled)")]
pub struct UnknownStatus(pub String);

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

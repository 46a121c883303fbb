//! Task record and its creation input.
//!
//! フィールド名は永続化フォーマット（UI / API 層と共有）そのもの。
//! ここを変えると他のコラボレーターが読めなくなるので注意。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::civil_time::{parse_civil_date, parse_clock_time};
use super::ids::TaskId;
use super::status::TaskStatus;
use super::threshold::RemindersSent;

/// Meeting kind that requires a `meetLink`.
pub const ONLINE_MEETING: &str = "Google Meet";

/// Owner used when the creator did not identify themselves.
pub const SHARED_OWNER: &str = "shared";

/// Persisted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Meeting kind (free string).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meet_link: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
    /// Legacy records omit this field; it deserializes to `Pending`.
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub reminders_sent: RemindersSent,
    #[serde(alias = "userEmail", default = "default_owner")]
    pub owner_email: String,
    pub created_at: DateTime<Utc>,
}

fn default_owner() -> String {
    SHARED_OWNER.to_string()
}

impl Task {
    /// Both civil schedule fields are present (not necessarily parsable).
    pub fn has_schedule(&self) -> bool {
        self.date.is_some() && self.time.is_some()
    }

    /// Build a record from validated input.
    pub fn from_new(id: TaskId, new: NewTask, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: new.title.trim().to_string(),
            subject: new.subject,
            kind: new.kind,
            meet_link: new.meet_link,
            date: new.date,
            time: new.time,
            period: new.period,
            status: TaskStatus::Pending,
            reminders_sent: RemindersSent::new(),
            owner_email: new
                .owner_email
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .unwrap_or_else(default_owner),
            created_at,
        }
    }

    #[cfg(test)]
    pub(crate) fn sample(title: &str) -> Self {
        use ulid::Ulid;
        Self::from_new(
            TaskId::from_ulid(Ulid::new()),
            NewTask::titled(title),
            Utc::now(),
        )
    }
}

/// Input of the create operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub meet_link: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(alias = "userEmail", default)]
    pub owner_email: Option<String>,
}

/// Reasons a create request is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskValidationError {
    #[error("title must not be empty")]
    EmptyTitle,

    #[error("an online meeting needs a meet link")]
    MissingMeetLink,

    #[error("unparsable date: {0:?}")]
    InvalidDate(String),

    #[error("unparsable time: {time:?} (period {period:?})")]
    InvalidTime {
        time: String,
        period: Option<String>,
    },
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn is_online_meeting(&self) -> bool {
        self.kind.as_deref().map(str::trim) == Some(ONLINE_MEETING)
    }

    /// Check the input before it reaches the store.
    ///
    /// Schedule fields stay optional (unscheduled tasks are valid and simply
    /// never reminded), but when present they must be parsable.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if self.title.trim().is_empty() {
            return Err(TaskValidationError::EmptyTitle);
        }

        if self.is_online_meeting()
            && self.meet_link.as_deref().is_none_or(|l| l.trim().is_empty())
        {
            return Err(TaskValidationError::MissingMeetLink);
        }

        if let Some(date) = self.date.as_deref()
            && parse_civil_date(date).is_none()
        {
            return Err(TaskValidationError::InvalidDate(date.to_string()));
        }

        if let Some(time) = self.time.as_deref()
            && parse_clock_time(time, self.period.as_deref()).is_none()
        {
            return Err(TaskValidationError::InvalidTime {
                time: time.to_string(),
                period: self.period.clone(),
            });
        }

        Ok(())
    }
}

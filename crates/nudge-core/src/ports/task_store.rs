//! TaskStore port - タスクの正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - タスクレコード（作成・一覧・状態変更・削除）
//! - 送信済みリマインダー閾値（`remindersSent`）
//!
//! # 実装
//! - `impls::InMemoryTaskStore`: テスト・dry-run 用
//! - `impls::SqliteTaskStore`: 本番用（単一ファイル DB）

use async_trait::async_trait;

use crate::domain::{ErrorKind, NewTask, Task, TaskId, TaskStatus, TaskValidationError, Threshold};

/// TaskStore はタスクの正本
///
/// # 設計原則
/// - `claim_threshold` はアトミックな条件付き更新
///   （閾値がまだ記録されていない場合にのみ追加する）
/// - これが重複送信を防ぐ唯一の永続的な記録
/// - `status` の欠損はストア境界で `Pending` に正規化して返す
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Tasks matching `filter`, newest first.
    async fn find_candidates(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Validate and persist a new task (status pending, no reminders sent).
    async fn create(&self, new: NewTask) -> Result<Task, StoreError>;

    /// Record `threshold` as sent, only if the stored record lacks it.
    ///
    /// Returns `Rejected` when another writer already recorded it or the
    /// task no longer exists.
    async fn claim_threshold(
        &self,
        id: TaskId,
        threshold: Threshold,
    ) -> Result<ClaimOutcome, StoreError>;

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<Task, StoreError>;

    async fn delete_by_id(&self, id: TaskId) -> Result<DeleteOutcome, StoreError>;
}

/// Result of a conditional threshold claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the dispatch. Carries the updated record.
    Claimed(Task),
    Rejected,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Query filter for `find_candidates`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// `None` matches any status.
    pub statuses: Option<Vec<TaskStatus>>,
    pub owner_email: Option<String>,
    /// Require both `date` and `time` to be present.
    pub scheduled_only: bool,
}

impl TaskFilter {
    /// Every task.
    pub fn all() -> Self {
        Self::default()
    }

    /// Tasks the reminder scan should evaluate: pending (or legacy without
    /// status) with both schedule fields present.
    pub fn reminder_candidates() -> Self {
        Self {
            statuses: Some(vec![TaskStatus::Pending]),
            owner_email: None,
            scheduled_only: true,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses = Some(vec![status]);
        self
    }

    pub fn with_owner(mut self, owner_email: impl Into<String>) -> Self {
        self.owner_email = Some(owner_email.into());
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(statuses) = &self.statuses
            && !statuses.contains(&task.status)
        {
            return false;
        }
        if let Some(owner) = &self.owner_email
            && &task.owner_email != owner
        {
            return false;
        }
        !self.scheduled_only || task.has_schedule()
    }
}

/// StoreError はストア操作のエラー
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store unreachable or failed mid-operation.
    #[error("task store unavailable: {0}")]
    Unavailable(String),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("invalid task: {0}")]
    Invalid(#[from] TaskValidationError),

    /// A stored record cannot be decoded.
    #[error("corrupt task record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) => ErrorKind::Transient,
            StoreError::NotFound(_) | StoreError::Invalid(_) | StoreError::Corrupt { .. } => {
                ErrorKind::Data
            }
        }
    }
}

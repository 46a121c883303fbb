//! In-memory task store.
//!
//! テストと `--dry-run` 用。dry run は `snapshot_of` で永続ストアの
//! 候補を写し取り、その写しに対して claim する（元のストアは変わらない）。
//! 条件付き claim は Mutex の中で「確認 → 追加」を行うので、
//! 同時に走る tick があっても 1 つしか勝たない。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{NewTask, Task, TaskId, TaskStatus, Threshold};
use crate::ports::{
    ClaimOutcome, Clock, DeleteOutcome, IdGenerator, StoreError, SystemClock, TaskFilter,
    TaskStore, UlidGenerator,
};

/// In-memory store state.
#[derive(Default)]
struct InMemoryStoreState {
    /// All task records (single source of truth).
    records: HashMap<TaskId, Task>,
}

/// In-memory `TaskStore`.
pub struct InMemoryTaskStore {
    state: Arc<Mutex<InMemoryStoreState>>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// `created_at` and id timestamps follow `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState::default())),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        }
    }

    /// Copy the tasks matching `filter` out of `source`.
    ///
    /// Claims made against the copy never reach `source`.
    pub async fn snapshot_of(
        source: &dyn TaskStore,
        filter: &TaskFilter,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let tasks = source.find_candidates(filter).await?;
        let store = Self::with_clock(clock);
        {
            let mut state = store.state.lock().await;
            state.records.extend(tasks.into_iter().map(|t| (t.id, t)));
        }
        Ok(store)
    }

    /// Insert a record as-is (used to seed legacy-shaped data in tests).
    pub async fn insert_raw(&self, task: Task) {
        let mut state = self.state.lock().await;
        state.records.insert(task.id, task);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn find_candidates(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .records
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        // newest first; ULIDs break ties between equal timestamps
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks)
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn create(&self, new: NewTask) -> Result<Task, StoreError> {
        new.validate()?;
        let task = Task::from_new(self.ids.generate_task_id(), new, self.clock.now());

        let mut state = self.state.lock().await;
        state.records.insert(task.id, task.clone());
        Ok(task)
    }

    async fn claim_threshold(
        &self,
        id: TaskId,
        threshold: Threshold,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(&id) else {
            return Ok(ClaimOutcome::Rejected);
        };
        if record.reminders_sent.insert(threshold) {
            Ok(ClaimOutcome::Claimed(record.clone()))
        } else {
            Ok(ClaimOutcome::Rejected)
        }
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<Task, StoreError> {
        let mut state = self.state.lock().await;
        let record = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.status = status;
        Ok(record.clone())
    }

    async fn delete_by_id(&self, id: TaskId) -> Result<DeleteOutcome, StoreError> {
        let mut state = self.state.lock().await;
        Ok(match state.records.remove(&id) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }
}

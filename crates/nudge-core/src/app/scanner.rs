//! Reminder scan engine.
//!
//! 1 tick の流れ:
//! 1. run guard を取る（前の tick が走っていたらこの tick は捨てる）
//! 2. 候補タスク（pending かつ date/time あり）をストアから取得
//! 3. タスクごとに期限と残り分数を計算し、窓に入った閾値を 60 → 30 → 10 の順に評価
//! 4. 閾値ごとに条件付き claim → 勝ったときだけ送信
//!
//! タスク・閾値は 1 つずつ順番に処理する（claim → send の順序を崩さない）。
//! 送信失敗で claim は戻さない。重複送信よりは取りこぼしを選ぶ。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, FixedOffset};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::domain::{
    Task, firing_thresholds, now_in_civil_zone, remaining_minutes, resolve_due_instant,
};
use crate::ports::{ClaimOutcome, Clock, StoreError, TaskFilter, TaskStore};

use super::dispatcher::NotificationDispatcher;

/// Counters for one completed tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tasks returned by the candidate query.
    pub candidates: usize,
    /// Unresolvable schedule, already due, or beyond the lookahead.
    pub skipped: usize,
    pub claimed: usize,
    /// Claims lost to another tick or process.
    pub rejected: usize,
    pub dispatched: usize,
    pub dispatch_failures: usize,
    /// Claims that failed with a store error; the task was left for the next tick.
    pub claim_errors: usize,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// A previous tick was still running; nothing was done.
    Overlapped,
    Completed(TickReport),
    /// The candidate query failed; the next tick starts over.
    Aborted(StoreError),
}

impl TickOutcome {
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            TickOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Releases the run flag on every exit path.
struct TickGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> TickGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct ReminderScanner {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    dispatcher: NotificationDispatcher,
    lookahead_minutes: i64,
    running: AtomicBool,
}

impl ReminderScanner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        dispatcher: NotificationDispatcher,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            dispatcher,
            lookahead_minutes: config.lookahead_minutes,
            running: AtomicBool::new(false),
        }
    }

    /// Whether a tick is in flight right now.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one scan unless another one is still in flight.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = TickGuard::acquire(&self.running) else {
            debug!("previous tick still running; tick dropped");
            return TickOutcome::Overlapped;
        };

        match self.scan().await {
            Ok(report) => {
                info!(
                    candidates = report.candidates,
                    skipped = report.skipped,
                    claimed = report.claimed,
                    rejected = report.rejected,
                    dispatched = report.dispatched,
                    dispatch_failures = report.dispatch_failures,
                    claim_errors = report.claim_errors,
                    "reminder tick finished"
                );
                TickOutcome::Completed(report)
            }
            Err(err) => {
                error!(kind = ?err.kind(), error = %err, "reminder tick aborted");
                TickOutcome::Aborted(err)
            }
        }
    }

    async fn scan(&self) -> Result<TickReport, StoreError> {
        let candidates = self
            .store
            .find_candidates(&TaskFilter::reminder_candidates())
            .await?;
        let now = now_in_civil_zone(self.clock.as_ref());

        let mut report = TickReport {
            candidates: candidates.len(),
            ..TickReport::default()
        };
        for task in &candidates {
            self.evaluate(task, now, &mut report).await;
        }
        Ok(report)
    }

    async fn evaluate(&self, task: &Task, now: DateTime<FixedOffset>, report: &mut TickReport) {
        // store 側のフィルタが緩くても閉じたタスクには送らない
        if !task.status.is_remindable() {
            debug!(task_id = %task.id, status = %task.status, "task closed; skipped");
            report.skipped += 1;
            return;
        }

        let Some(due) = resolve_due_instant(task) else {
            debug!(
                task_id = %task.id,
                date = ?task.date,
                time = ?task.time,
                period = ?task.period,
                "schedule not resolvable; task skipped"
            );
            report.skipped += 1;
            return;
        };

        let remaining = remaining_minutes(due, now);
        if remaining <= 0 || remaining > self.lookahead_minutes {
            report.skipped += 1;
            return;
        }

        for threshold in firing_thresholds(remaining, &task.reminders_sent) {
            let claimed = match self.store.claim_threshold(task.id, threshold).await {
                Ok(ClaimOutcome::Claimed(claimed)) => claimed,
                Ok(ClaimOutcome::Rejected) => {
                    info!(
                        task_id = %task.id,
                        %threshold,
                        remaining_minutes = remaining,
                        "threshold already claimed elsewhere; not sending"
                    );
                    report.rejected += 1;
                    continue;
                }
                Err(err) => {
                    warn!(
                        task_id = %task.id,
                        %threshold,
                        error = %err,
                        "claim failed; task left for the next tick"
                    );
                    report.claim_errors += 1;
                    return;
                }
            };
            report.claimed += 1;

            let recipient = self.dispatcher.recipient_for(&claimed);
            let sent = self
                .dispatcher
                .send(
                    &recipient,
                    &claimed.title,
                    claimed.subject.as_deref(),
                    threshold,
                    due,
                )
                .await;
            match sent {
                Ok(()) => report.dispatched += 1,
                // already logged by the dispatcher; the claim stays
                Err(_) => report.dispatch_failures += 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, RemindersSent, TaskId, TaskStatus, Threshold, civil_zone};
    use crate::impls::{InMemoryTaskStore, RecordingMailTransport};
    use crate::ports::{DeleteOutcome, FixedClock, MailError};
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone, Utc};
    use rstest::rstest;
    use tokio::sync::Notify;

    /// 2026-10-17 09:00 IST.
    fn base_now() -> DateTime<Utc> {
        civil_zone()
            .with_ymd_and_hms(2026, 10, 17, 9, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    /// Due `minutes` after 09:00 IST, written in the 12-hour form.
    fn due_in(title: &str, minutes: i64) -> NewTask {
        let due = civil_zone().with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
            + TimeDelta::minutes(minutes);
        NewTask {
            title: title.to_string(),
            subject: Some("Agenda".to_string()),
            date: Some(due.format("%Y-%m-%d").to_string()),
            time: Some(due.format("%-I:%M").to_string()),
            period: Some(due.format("%p").to_string()),
            owner_email: Some("owner@example.com".to_string()),
            ..NewTask::default()
        }
    }

    struct Harness {
        store: Arc<InMemoryTaskStore>,
        clock: Arc<FixedClock>,
        transport: Arc<RecordingMailTransport>,
        scanner: ReminderScanner,
    }

    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::new(base_now()));
        let store = Arc::new(InMemoryTaskStore::with_clock(clock.clone()));
        let transport = Arc::new(RecordingMailTransport::new());
        let scanner = scanner_over(store.clone(), clock.clone(), transport.clone());
        Harness {
            store,
            clock,
            transport,
            scanner,
        }
    }

    fn scanner_over(
        store: Arc<dyn TaskStore>,
        clock: Arc<FixedClock>,
        transport: Arc<RecordingMailTransport>,
    ) -> ReminderScanner {
        let dispatcher = NotificationDispatcher::new(
            transport,
            "\"Task Reminder System\" <me@example.com>",
            "me@example.com",
        );
        ReminderScanner::new(store, clock, dispatcher, &SchedulerConfig::default())
    }

    async fn seed_with_sent(store: &InMemoryTaskStore, new: NewTask, sent: &[Threshold]) -> TaskId {
        let mut task = store.create(new).await.unwrap();
        task.reminders_sent = sent.iter().copied().collect::<RemindersSent>();
        let id = task.id;
        store.insert_raw(task).await;
        id
    }

    fn completed(outcome: TickOutcome) -> TickReport {
        match outcome {
            TickOutcome::Completed(report) => report,
            other => panic!("expected a completed tick, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exactly_sixty_minutes_fires_sixty_only() {
        let h = harness();
        let id = h.store.create(due_in("Sync", 60)).await.unwrap().id;

        let report = completed(h.scanner.tick().await);
        assert_eq!(report.claimed, 1);
        assert_eq!(report.dispatched, 1);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "owner@example.com");
        assert!(sent[0].subject.contains("60 mins left"));

        let task = h.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.reminders_sent.iter().collect::<Vec<_>>(), vec![Threshold::Sixty]);
    }

    #[tokio::test]
    async fn earlier_reminders_sent_leaves_only_ten() {
        let h = harness();
        let id = seed_with_sent(
            &h.store,
            due_in("Call", 5),
            &[Threshold::Sixty, Threshold::Thirty],
        )
        .await;

        // 5 minutes is outside the 10-minute window, so nothing yet
        let report = completed(h.scanner.tick().await);
        assert_eq!(report.claimed, 0);

        // back the clock up so 10 minutes remain
        h.clock.set(base_now() - TimeDelta::minutes(5));
        let report = completed(h.scanner.tick().await);
        assert_eq!(report.claimed, 1);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.starts_with("🚨"));
        let task = h.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.reminders_sent.len(), 3);
    }

    #[rstest]
    #[case(70)]
    #[case(66)]
    #[case(0)]
    #[case(-15)]
    #[case(45)]
    #[tokio::test]
    async fn outside_any_window_nothing_fires(#[case] minutes: i64) {
        let h = harness();
        h.store.create(due_in("Later", minutes)).await.unwrap();

        let report = completed(h.scanner.tick().await);
        assert_eq!(report.candidates, 1);
        assert_eq!(report.claimed, 0);
        assert!(h.transport.sent().is_empty());
    }

    #[rstest]
    #[case(60, Threshold::Sixty)]
    #[case(59, Threshold::Sixty)]
    #[case(30, Threshold::Thirty)]
    #[case(29, Threshold::Thirty)]
    #[case(10, Threshold::Ten)]
    #[case(9, Threshold::Ten)]
    #[tokio::test]
    async fn window_edges_fire(#[case] minutes: i64, #[case] expected: Threshold) {
        let h = harness();
        let id = h.store.create(due_in("Edge", minutes)).await.unwrap().id;

        completed(h.scanner.tick().await);
        let task = h.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.reminders_sent.iter().collect::<Vec<_>>(), vec![expected]);
    }

    #[tokio::test]
    async fn already_sent_threshold_never_refires() {
        let h = harness();
        seed_with_sent(&h.store, due_in("Done", 30), &[Threshold::Thirty]).await;

        let report = completed(h.scanner.tick().await);
        assert_eq!(report.claimed, 0);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn repeated_ticks_in_one_window_send_once() {
        let h = harness();
        h.store.create(due_in("Once", 30)).await.unwrap();

        completed(h.scanner.tick().await);
        h.clock.advance(TimeDelta::seconds(30));
        completed(h.scanner.tick().await);
        completed(h.scanner.tick().await);

        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn missing_time_is_skipped() {
        let h = harness();
        // written by another client, bypassing validation
        let mut task = h.store.create(due_in("No time", 30)).await.unwrap();
        task.time = None;
        let id = task.id;
        h.store.insert_raw(task).await;

        let report = completed(h.scanner.tick().await);
        assert_eq!(report.candidates, 0);
        assert!(h.transport.sent().is_empty());
        let task = h.store.find_by_id(id).await.unwrap().unwrap();
        assert!(task.reminders_sent.is_empty());
    }

    #[tokio::test]
    async fn unparsable_schedule_is_skipped_without_claim() {
        let h = harness();
        let mut task = h.store.create(due_in("Garbled", 30)).await.unwrap();
        task.time = Some("half past".to_string());
        let id = task.id;
        h.store.insert_raw(task).await;

        let report = completed(h.scanner.tick().await);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.claimed, 0);
        let task = h.store.find_by_id(id).await.unwrap().unwrap();
        assert!(task.reminders_sent.is_empty());
    }

    #[tokio::test]
    async fn closed_tasks_are_not_candidates() {
        let h = harness();
        let task = h.store.create(due_in("Closed", 10)).await.unwrap();
        h.store
            .update_status(task.id, TaskStatus::Cancelled)
            .await
            .unwrap();

        let report = completed(h.scanner.tick().await);
        assert_eq!(report.candidates, 0);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_keeps_claim_and_continues() {
        let h = harness();
        let failing = h.store.create(due_in("Fails", 30)).await.unwrap().id;
        let mut other = due_in("Works", 10);
        other.owner_email = Some("other@example.com".to_string());
        h.store.create(other).await.unwrap();
        h.transport.fail_recipient(
            "owner@example.com",
            MailError::Transport("connection reset".to_string()),
        );

        let report = completed(h.scanner.tick().await);
        assert_eq!(report.claimed, 2);
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.dispatch_failures, 1);

        // no retry on the next tick
        let report = completed(h.scanner.tick().await);
        assert_eq!(report.claimed, 0);
        let task = h.store.find_by_id(failing).await.unwrap().unwrap();
        assert!(task.reminders_sent.contains(Threshold::Thirty));
    }

    #[tokio::test]
    async fn concurrent_ticks_on_separate_engines_dispatch_once() {
        let clock = Arc::new(FixedClock::new(base_now()));
        let store = Arc::new(InMemoryTaskStore::with_clock(clock.clone()));
        let transport = Arc::new(RecordingMailTransport::new());
        store.create(due_in("Race", 10)).await.unwrap();

        let a = scanner_over(store.clone(), clock.clone(), transport.clone());
        let b = scanner_over(store.clone(), clock.clone(), transport.clone());
        let (ra, rb) = tokio::join!(a.tick(), b.tick());
        let (ra, rb) = (completed(ra), completed(rb));

        assert_eq!(ra.claimed + rb.claimed, 1);
        assert_eq!(transport.sent().len(), 1);
    }

    /// Store that ignores the candidate filter and returns every task.
    struct UnfilteredStore(InMemoryTaskStore);

    #[async_trait]
    impl TaskStore for UnfilteredStore {
        async fn find_candidates(&self, _: &TaskFilter) -> Result<Vec<Task>, StoreError> {
            self.0.find_candidates(&TaskFilter::all()).await
        }
        async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
            self.0.find_by_id(id).await
        }
        async fn create(&self, new: NewTask) -> Result<Task, StoreError> {
            self.0.create(new).await
        }
        async fn claim_threshold(
            &self,
            id: TaskId,
            threshold: Threshold,
        ) -> Result<ClaimOutcome, StoreError> {
            self.0.claim_threshold(id, threshold).await
        }
        async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<Task, StoreError> {
            self.0.update_status(id, status).await
        }
        async fn delete_by_id(&self, id: TaskId) -> Result<DeleteOutcome, StoreError> {
            self.0.delete_by_id(id).await
        }
    }

    #[tokio::test]
    async fn closed_task_from_a_loose_store_is_not_reminded() {
        let clock = Arc::new(FixedClock::new(base_now()));
        let store = Arc::new(UnfilteredStore(InMemoryTaskStore::with_clock(clock.clone())));
        let done = store.create(due_in("Done", 10)).await.unwrap();
        store
            .update_status(done.id, TaskStatus::Completed)
            .await
            .unwrap();
        store.create(due_in("Open", 30)).await.unwrap();
        let transport = Arc::new(RecordingMailTransport::new());
        let scanner = scanner_over(store.clone(), clock, transport.clone());

        let outcome = scanner.tick().await;
        let report = outcome.report().expect("tick completes");
        assert_eq!(report.candidates, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(transport.sent().len(), 1);
        assert!(transport.sent()[0].subject.contains("Open"));

        let done = store.find_by_id(done.id).await.unwrap().unwrap();
        assert!(done.reminders_sent.is_empty());
    }

    /// Store whose candidate query waits until released.
    struct GatedStore {
        inner: InMemoryTaskStore,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl TaskStore for GatedStore {
        async fn find_candidates(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.find_candidates(filter).await
        }
        async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
            self.inner.find_by_id(id).await
        }
        async fn create(&self, new: NewTask) -> Result<Task, StoreError> {
            self.inner.create(new).await
        }
        async fn claim_threshold(
            &self,
            id: TaskId,
            threshold: Threshold,
        ) -> Result<ClaimOutcome, StoreError> {
            self.inner.claim_threshold(id, threshold).await
        }
        async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<Task, StoreError> {
            self.inner.update_status(id, status).await
        }
        async fn delete_by_id(&self, id: TaskId) -> Result<DeleteOutcome, StoreError> {
            self.inner.delete_by_id(id).await
        }
    }

    #[tokio::test]
    async fn overlapping_tick_is_dropped() {
        let clock = Arc::new(FixedClock::new(base_now()));
        let store = Arc::new(GatedStore {
            inner: InMemoryTaskStore::with_clock(clock.clone()),
            entered: Notify::new(),
            release: Notify::new(),
        });
        store.create(due_in("Slow", 10)).await.unwrap();
        let transport = Arc::new(RecordingMailTransport::new());
        let scanner = Arc::new(scanner_over(store.clone(), clock, transport.clone()));

        let first = tokio::spawn({
            let scanner = Arc::clone(&scanner);
            async move { scanner.tick().await }
        });
        store.entered.notified().await;
        assert!(scanner.is_running());

        assert!(matches!(scanner.tick().await, TickOutcome::Overlapped));

        store.release.notify_one();
        let report = completed(first.await.unwrap());
        assert_eq!(report.dispatched, 1);
        assert!(!scanner.is_running());
        assert_eq!(transport.sent().len(), 1);
    }

    struct DownStore;

    #[async_trait]
    impl TaskStore for DownStore {
        async fn find_candidates(&self, _: &TaskFilter) -> Result<Vec<Task>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn find_by_id(&self, _: TaskId) -> Result<Option<Task>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn create(&self, _: NewTask) -> Result<Task, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn claim_threshold(&self, _: TaskId, _: Threshold) -> Result<ClaimOutcome, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn update_status(&self, _: TaskId, _: TaskStatus) -> Result<Task, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn delete_by_id(&self, _: TaskId) -> Result<DeleteOutcome, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn store_outage_aborts_tick_and_releases_guard() {
        let clock = Arc::new(FixedClock::new(base_now()));
        let transport = Arc::new(RecordingMailTransport::new());
        let scanner = scanner_over(Arc::new(DownStore), clock, transport);

        let outcome = scanner.tick().await;
        assert!(outcome.report().is_none());
        assert!(matches!(outcome, TickOutcome::Aborted(StoreError::Unavailable(_))));
        // the guard was released, so the next tick runs (and aborts again)
        assert!(matches!(scanner.tick().await, TickOutcome::Aborted(_)));
    }
}

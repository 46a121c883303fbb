//! Periodic trigger for the scan engine.
//!
//! - タイマーは civil zone の分境界に揃えて発火する
//! - tick は別タスクで走らせる。前の tick が終わっていなければ
//!   その発火は捨てる（キューしない）。scanner の run guard が最後の砦
//! - `shutdown_tx` で停止。停止後に新しい tick は始まらず、
//!   走行中の tick は最後まで待つ（途中キャンセルはしない）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::ports::Clock;

use super::scanner::{ReminderScanner, TickOutcome};

/// Scheduler handle.
pub struct ReminderScheduler {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReminderScheduler {
    /// Start the timer loop on the current runtime.
    pub fn spawn(
        scanner: Arc<ReminderScanner>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let period = config.tick_interval;
        let first = first_tick_delay(clock.as_ref(), period);

        info!(
            tick_secs = period.as_secs(),
            first_tick_in_ms = first.as_millis() as u64,
            "reminder scheduler started"
        );
        let join = tokio::spawn(timer_loop(scanner, period, first, shutdown_rx));
        Self { shutdown_tx, join }
    }

    /// Stop the timer. An in-flight tick still runs to completion.
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the timer and wait for the in-flight tick.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            warn!(error = %e, "scheduler loop ended abnormally");
        }
        info!("reminder scheduler stopped");
    }
}

/// Time until the next multiple of `period` on the wall clock.
///
/// The civil offset is a whole number of minutes, so a UTC minute boundary
/// is also a civil-zone minute boundary.
fn first_tick_delay(clock: &dyn Clock, period: Duration) -> Duration {
    let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX).max(1);
    let into = clock.now().timestamp_millis().rem_euclid(period_ms);
    if into == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(u64::try_from(period_ms - into).unwrap_or(0))
    }
}

async fn timer_loop(
    scanner: Arc<ReminderScanner>,
    period: Duration,
    first: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<JoinHandle<TickOutcome>> = None;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped counts as shutdown
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        if let Some(handle) = in_flight.take() {
            if !handle.is_finished() {
                debug!("timer fired during a running tick; dropped");
                in_flight = Some(handle);
                continue;
            }
            wait_tick(handle).await;
        }

        let scanner = Arc::clone(&scanner);
        in_flight = Some(tokio::spawn(async move { scanner.tick().await }));
    }

    if let Some(handle) = in_flight {
        debug!("waiting for in-flight reminder tick");
        wait_tick(handle).await;
    }
}

async fn wait_tick(handle: JoinHandle<TickOutcome>) {
    match handle.await {
        Ok(TickOutcome::Overlapped) => debug!("tick overlapped another scan; dropped"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "reminder tick panicked"),
    }
}

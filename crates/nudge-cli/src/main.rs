//! `nudge` binary: task CRUD, one-shot scans and the reminder scheduler.

mod cli;

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nudge_core::app::{NotificationDispatcher, ReminderScanner, ReminderScheduler, TickOutcome};
use nudge_core::config::{MailConfig, SchedulerConfig, StoreConfig};
use nudge_core::domain::{NewTask, NudgeError, Task, format_civil, resolve_due_instant};
use nudge_core::impls::{
    InMemoryTaskStore, RecordingMailTransport, SmtpMailTransport, SqliteTaskStore,
};
use nudge_core::ports::{
    Clock, DeleteOutcome, MailTransport, SystemClock, TaskFilter, TaskStore,
};

use crate::cli::{Cli, Command};

/// Sender used by dry runs when no mail account is configured.
const DRY_RUN_ACCOUNT: &str = "nudge@localhost";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = dispatch(cli.command).await;
    if let Err(err) = &result
        && let Some(nudge) = err.downcast_ref::<NudgeError>()
    {
        warn!(kind = ?nudge.kind(), "command failed");
    }
    result
}

async fn dispatch(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Add {
            title,
            subject,
            kind,
            meet_link,
            date,
            time,
            period,
            owner_email,
        } => {
            let store = open_store()?;
            let task = store
                .create(NewTask {
                    title,
                    subject,
                    kind,
                    meet_link,
                    date,
                    time,
                    period,
                    owner_email,
                })
                .await
                .map_err(NudgeError::from)?;
            println!("{}", task.id);
            Ok(())
        }
        Command::List {
            status,
            owner_email,
            json,
        } => {
            let store = open_store()?;
            let mut filter = TaskFilter::all();
            if let Some(status) = status {
                filter = filter.with_status(status);
            }
            if let Some(owner) = owner_email {
                filter = filter.with_owner(owner);
            }
            let tasks = store
                .find_candidates(&filter)
                .await
                .map_err(NudgeError::from)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                for task in &tasks {
                    println!("{}", list_line(task));
                }
            }
            Ok(())
        }
        Command::Status { id, status } => {
            let store = open_store()?;
            let task = store
                .update_status(id, status)
                .await
                .map_err(NudgeError::from)?;
            println!("{} {}", task.id, task.status);
            Ok(())
        }
        Command::Delete { id } => {
            let store = open_store()?;
            match store.delete_by_id(id).await.map_err(NudgeError::from)? {
                DeleteOutcome::Deleted => {
                    println!("deleted {id}");
                    Ok(())
                }
                DeleteOutcome::NotFound => bail!("task not found: {id}"),
            }
        }
        Command::ScanOnce { dry_run } => {
            let config = SchedulerConfig::from_env().map_err(NudgeError::from)?;
            let scanner = build_scanner(dry_run, &config).await?;
            let outcome = scanner.tick().await;
            if let Some(report) = outcome.report() {
                println!(
                    "candidates={} skipped={} claimed={} rejected={} dispatched={} dispatch_failures={} claim_errors={}",
                    report.candidates,
                    report.skipped,
                    report.claimed,
                    report.rejected,
                    report.dispatched,
                    report.dispatch_failures,
                    report.claim_errors,
                );
            }
            match outcome {
                TickOutcome::Completed(_) => Ok(()),
                TickOutcome::Aborted(err) => Err(NudgeError::from(err).into()),
                TickOutcome::Overlapped => bail!("another scan is already running"),
            }
        }
        Command::Run { dry_run } => run_scheduler(dry_run).await,
        Command::TestMail => {
            let config = MailConfig::from_env().map_err(NudgeError::from)?;
            let transport = SmtpMailTransport::from_config(&config).map_err(NudgeError::from)?;
            NotificationDispatcher::from_config(Arc::new(transport), &config)
                .send_test_mail()
                .await
                .map_err(NudgeError::from)
                .with_context(|| format!("test mail via {}", config.smtp_host))?;
            println!("test mail sent to {}", config.user);
            Ok(())
        }
    }
}

fn open_store() -> Result<Arc<SqliteTaskStore>, NudgeError> {
    let config = StoreConfig::from_env()?;
    Ok(Arc::new(SqliteTaskStore::new(config.path)))
}

/// Mail config is only fatal when messages would actually be sent.
fn build_dispatcher(dry_run: bool) -> Result<NotificationDispatcher, NudgeError> {
    if !dry_run {
        let config = MailConfig::from_env()?;
        let transport = SmtpMailTransport::from_config(&config)?;
        info!(host = %transport.host(), user = %config.user, "smtp transport ready");
        return Ok(NotificationDispatcher::from_config(
            Arc::new(transport),
            &config,
        ));
    }

    let transport: Arc<dyn MailTransport> = Arc::new(RecordingMailTransport::logging());
    Ok(match MailConfig::from_env() {
        Ok(config) => NotificationDispatcher::from_config(transport, &config),
        Err(err) => {
            warn!(error = %err, "mail account not configured; dry run uses a placeholder sender");
            NotificationDispatcher::new(transport, DRY_RUN_ACCOUNT, DRY_RUN_ACCOUNT)
        }
    })
}

/// Dry runs claim against an in-memory copy so the real reminders stay unsent.
async fn build_scanner(
    dry_run: bool,
    config: &SchedulerConfig,
) -> Result<ReminderScanner, NudgeError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let dispatcher = build_dispatcher(dry_run)?;
    let store = open_store()?;
    let store: Arc<dyn TaskStore> = if dry_run {
        let snapshot = InMemoryTaskStore::snapshot_of(
            store.as_ref(),
            &TaskFilter::reminder_candidates(),
            Arc::clone(&clock),
        )
        .await?;
        info!(
            tasks = snapshot.len().await,
            "dry run scans a snapshot; the task store is not modified"
        );
        Arc::new(snapshot)
    } else {
        store
    };
    Ok(ReminderScanner::new(store, clock, dispatcher, config))
}

async fn run_scheduler(dry_run: bool) -> anyhow::Result<()> {
    let config = SchedulerConfig::from_env().map_err(NudgeError::from)?;
    let scanner = Arc::new(build_scanner(dry_run, &config).await?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let scheduler = ReminderScheduler::spawn(scanner, clock, &config);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutdown requested");
    scheduler.shutdown_and_join().await;
    Ok(())
}

fn list_line(task: &Task) -> String {
    let due = resolve_due_instant(task)
        .map(format_civil)
        .unwrap_or_else(|| "-".to_string());
    let sent: Vec<String> = task
        .reminders_sent
        .iter()
        .map(|t| t.minutes().to_string())
        .collect();
    format!(
        "{}  {:<9}  {:<22}  [{}]  {}",
        task.id,
        task.status.as_str(),
        due,
        sent.join(","),
        task.title
    )
}

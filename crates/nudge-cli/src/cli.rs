use clap::{Parser, Subcommand};

use nudge_core::domain::{TaskId, TaskStatus};

/// nudge: mails a reminder 60, 30 and 10 minutes before each scheduled task.
#[derive(Parser, Debug)]
#[command(name = "nudge", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a task
    ///
    /// Example: nudge add --title "Standup" --date 2026-10-17 --time 9:30 --period AM
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        subject: Option<String>,
        /// Meeting kind: "Google Meet" (needs --meet-link), "Contact" or "Call"
        #[arg(long = "type", value_name = "KIND")]
        kind: Option<String>,
        #[arg(long)]
        meet_link: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
        /// H:MM (1-12 with --period, 0-23 without)
        #[arg(long)]
        time: Option<String>,
        /// AM or PM
        #[arg(long)]
        period: Option<String>,
        /// Reminder recipient; defaults to the configured mail account
        #[arg(long = "owner", value_name = "EMAIL")]
        owner_email: Option<String>,
    },
    /// List tasks, newest first
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long = "owner", value_name = "EMAIL")]
        owner_email: Option<String>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a task's status
    ///
    /// Example: nudge status task-01J... completed
    Status { id: TaskId, status: TaskStatus },
    /// Delete a task
    Delete { id: TaskId },
    /// Run one reminder scan and exit
    ScanOnce {
        /// Log messages instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the reminder scheduler until Ctrl-C
    Run {
        /// Log messages instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
    /// Send a test message to the configured mail account
    TestMail,
}

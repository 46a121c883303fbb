//! Notification dispatcher.
//!
//! claim に成功した (task, threshold) 1 組につき 1 通のリマインダーを組み立てて
//! `MailTransport` に渡す。失敗はログに残して `Err` で返すだけで、
//! 呼び出し側（scanner）は次の閾値・次のタスクへ進む。

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use tracing::{info, warn};

use crate::config::MailConfig;
use crate::domain::{Task, Threshold, format_civil};
use crate::ports::{MailError, MailTransport, OutboundMessage};

const SIGNATURE: &str = "Task Reminder System";

/// Rendered reminder, before addressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderMail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl ReminderMail {
    pub fn render(
        title: &str,
        subject: Option<&str>,
        threshold: Threshold,
        due: DateTime<FixedOffset>,
    ) -> Self {
        let marker = threshold.urgency_marker();
        let minutes = threshold.minutes();
        let due_at = format_civil(due);
        let subject = subject.map(str::trim).filter(|s| !s.is_empty());

        let mut text = format!(
            "{marker} Task Reminder\n\nHello,\n\nThis is a reminder for your task.\n\n📌 Task: {title}\n"
        );
        if let Some(s) = subject {
            let _ = writeln!(text, "📝 Subject: {s}");
        }
        let _ = write!(
            text,
            "⏰ Due At: {due_at}\n⏳ Time Remaining: {minutes} minutes\n\n\
             Please make sure to complete it on time.\n\n— {SIGNATURE}\n"
        );

        // 10 分前だけ赤
        let accent = if threshold == Threshold::Ten {
            "#d32f2f"
        } else {
            "#ff9800"
        };
        let mut html = String::new();
        let _ = write!(
            html,
            "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;\">\
             <h2>{marker} Task Reminder</h2>\
             <p><strong>📌 Task:</strong> {}</p>",
            escape_html(title)
        );
        if let Some(s) = subject {
            let _ = write!(html, "<p><strong>📝 Subject:</strong> {}</p>", escape_html(s));
        }
        let _ = write!(
            html,
            "<p><strong>⏰ Due At:</strong> {due_at}</p>\
             <p style=\"color: {accent}; font-weight: bold;\">⏳ {minutes} minutes remaining!</p>\
             <p>Please make sure to complete your task on time.</p>\
             <p style=\"font-size: 12px; color: #999;\">{SIGNATURE} • Automated Notification</p>\
             </div>"
        );

        Self {
            subject: format!("{marker} Reminder: {title} ({minutes} mins left)"),
            text,
            html,
        }
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Formats reminders and hands them to the transport.
#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn MailTransport>,
    from: String,
    /// Used when a task's owner is not a mail address.
    fallback_recipient: String,
}

impl NotificationDispatcher {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        from: impl Into<String>,
        fallback_recipient: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            from: from.into(),
            fallback_recipient: fallback_recipient.into(),
        }
    }

    pub fn from_config(transport: Arc<dyn MailTransport>, config: &MailConfig) -> Self {
        Self::new(transport, config.from_header(), config.user.clone())
    }

    /// `ownerEmail` when it looks like an address, else the configured account.
    pub fn recipient_for(&self, task: &Task) -> String {
        let owner = task.owner_email.trim();
        if owner.contains('@') {
            owner.to_string()
        } else {
            self.fallback_recipient.clone()
        }
    }

    /// Send one reminder. Failures are logged and returned; nothing is retried.
    pub async fn send(
        &self,
        recipient: &str,
        title: &str,
        subject: Option<&str>,
        threshold: Threshold,
        due: DateTime<FixedOffset>,
    ) -> Result<(), MailError> {
        let mail = ReminderMail::render(title, subject, threshold, due);
        let message = OutboundMessage {
            from: self.from.clone(),
            to: recipient.to_string(),
            subject: mail.subject,
            text: mail.text,
            html: Some(mail.html),
        };

        match self.transport.send_message(&message).await {
            Ok(()) => {
                info!(to = %recipient, %threshold, "reminder sent");
                Ok(())
            }
            Err(err) => {
                warn!(
                    to = %recipient,
                    %threshold,
                    kind = ?err.kind(),
                    error = %err,
                    "reminder send failed"
                );
                Err(err)
            }
        }
    }

    /// Plain single-part message to the configured account.
    pub async fn send_test_mail(&self) -> Result<(), MailError> {
        let message = OutboundMessage {
            from: self.from.clone(),
            to: self.fallback_recipient.clone(),
            subject: "Mail transport test".to_string(),
            text: "If you receive this, the reminder mail transport is working.".to_string(),
            html: None,
        };
        self.transport.send_message(&message).await?;
        info!(to = %self.fallback_recipient, "test mail sent");
        Ok(())
    }
}

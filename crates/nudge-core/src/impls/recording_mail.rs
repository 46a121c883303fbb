//! Recording transport.
//!
//! 送らずに記録するだけ。`--dry-run` ではログにも出す。
//! テストでは宛先ごと／全体の失敗を仕込める。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::ports::{MailError, MailTransport, OutboundMessage};

#[derive(Default)]
struct RecordingState {
    sent: Vec<OutboundMessage>,
    failures: HashMap<String, MailError>,
    fail_all: Option<MailError>,
}

#[derive(Default)]
pub struct RecordingMailTransport {
    state: Mutex<RecordingState>,
    log_messages: bool,
}

impl RecordingMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every message at info level (dry-run).
    pub fn logging() -> Self {
        Self {
            log_messages: true,
            ..Self::default()
        }
    }

    /// Messages accepted so far, in send order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.lock().sent.clone()
    }

    /// Fail every send to `recipient` with `err`.
    pub fn fail_recipient(&self, recipient: impl Into<String>, err: MailError) {
        self.lock().failures.insert(recipient.into(), err);
    }

    /// Fail every send with `err`.
    pub fn fail_all(&self, err: MailError) {
        self.lock().fail_all = Some(err);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MailTransport for RecordingMailTransport {
    async fn send_message(&self, message: &OutboundMessage) -> Result<(), MailError> {
        let mut state = self.lock();
        if let Some(err) = state.fail_all.clone() {
            return Err(err);
        }
        if let Some(err) = state.failures.get(&message.to) {
            return Err(err.clone());
        }
        if self.log_messages {
            info!(
                to = %message.to,
                subject = %message.subject,
                "dry-run: mail not sent\n{}",
                message.text
            );
        }
        state.sent.push(message.clone());
        Ok(())
    }
}

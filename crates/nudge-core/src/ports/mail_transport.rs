//! MailTransport port - 送信メールの抽象化
//!
//! # 実装
//! - `impls::SmtpMailTransport`: 本番用（SMTP relay）
//! - `impls::RecordingMailTransport`: テスト・dry-run 用

use async_trait::async_trait;

use crate::domain::ErrorKind;

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Display form, e.g. `"Task Reminder System" <me@example.com>`.
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    /// Rich variant, sent as multipart/alternative when present.
    pub html: Option<String>,
}

/// MailTransport は 1 通のメッセージを送る
///
/// 1 回の呼び出しにつき送信は 1 通だけ。リトライはしない。
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_message(&self, message: &OutboundMessage) -> Result<(), MailError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailError {
    #[error("invalid mail address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("cannot build message: {0}")]
    Build(String),

    #[error("mail server rejected credentials: {0}")]
    Auth(String),

    #[error("mail transport failed: {0}")]
    Transport(String),
}

impl MailError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MailError::InvalidAddress { .. } | MailError::Build(_) => ErrorKind::Data,
            MailError::Auth(_) => ErrorKind::Configuration,
            MailError::Transport(_) => ErrorKind::Transient,
        }
    }
}

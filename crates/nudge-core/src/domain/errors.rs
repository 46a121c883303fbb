//! Errors - エラー型と分類
//!
//! ports ごとのエラー（`StoreError`, `MailError`, `ConfigError`）は各モジュールで定義し、
//! ここでは運用上の分類（ErrorKind）とそれを束ねる `NudgeError` を定義します。

use crate::config::ConfigError;
use crate::ports::{MailError, StoreError};

use super::task::TaskValidationError;

/// ErrorKind は実行エラーの運用分類
///
/// - Configuration: 起動時に致命的（該当サブシステムのみ）
/// - Transient: 一時的な I/O エラー（次の tick で自然にリトライ）
/// - Data: レコード単位の不正データ（その tick ではスキップ）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transient,
    Data,
}

/// NudgeError はドメインエラー
#[derive(Debug, thiserror::Error)]
pub enum NudgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error(transparent)]
    Validation(#[from] TaskValidationError),
}

impl NudgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NudgeError::Config(_) => ErrorKind::Configuration,
            NudgeError::Store(e) => e.kind(),
            NudgeError::Mail(e) => e.kind(),
            NudgeError::Validation(_) => ErrorKind::Data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_classified() {
        let config: NudgeError = ConfigError::Missing("MAIL_USER").into();
        assert_eq!(config.kind(), ErrorKind::Configuration);

        let store: NudgeError = StoreError::Unavailable("disk gone".into()).into();
        assert_eq!(store.kind(), ErrorKind::Transient);

        let mail: NudgeError = MailError::Transport("connection reset".into()).into();
        assert_eq!(mail.kind(), ErrorKind::Transient);

        let invalid: NudgeError = TaskValidationError::EmptyTitle.into();
        assert_eq!(invalid.kind(), ErrorKind::Data);
        assert_eq!(invalid.to_string(), "title must not be empty");
    }
}

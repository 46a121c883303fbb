//! Config - 環境変数からの設定読み込み
//!
//! サブシステムごとに独立して読み込む。メール設定が欠けていても
//! ストアや一覧系コマンドは動く（致命的なのは該当サブシステムだけ）。
//!
//! テストでプロセス環境を書き換えずに済むよう、各ローダーは
//! `from_lookup` でキー → 値のクロージャを受け取れる。

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const TASK_STORE_PATH: &str = "TASK_STORE_PATH";
pub const MAIL_USER: &str = "MAIL_USER";
pub const MAIL_PASS: &str = "MAIL_PASS";
pub const MAIL_SMTP_HOST: &str = "MAIL_SMTP_HOST";
pub const MAIL_FROM_NAME: &str = "MAIL_FROM_NAME";
pub const REMINDER_TICK_SECS: &str = "REMINDER_TICK_SECS";
pub const REMINDER_LOOKAHEAD_MINUTES: &str = "REMINDER_LOOKAHEAD_MINUTES";

const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_FROM_NAME: &str = "Task Reminder System";
const DEFAULT_TICK_SECS: u64 = 60;
const DEFAULT_LOOKAHEAD_MINUTES: i64 = 65;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Required, non-blank value.
fn required(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<String, ConfigError> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Task store location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let path = required(&lookup, TASK_STORE_PATH)?;
        Ok(Self {
            path: PathBuf::from(path),
        })
    }
}

/// Outbound mail account.
#[derive(Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub user: String,
    pub password: String,
    pub smtp_host: String,
    pub from_name: String,
}

impl MailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let user = required(&lookup, MAIL_USER)?;
        if !user.contains('@') {
            return Err(ConfigError::Invalid {
                var: MAIL_USER,
                reason: "expected a mail address".to_string(),
            });
        }
        // passwords may legitimately contain spaces (app passwords), so only
        // reject a value that is entirely blank
        let password = lookup(MAIL_PASS)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(MAIL_PASS))?;

        Ok(Self {
            user,
            password,
            smtp_host: optional(&lookup, MAIL_SMTP_HOST)
                .unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            from_name: optional(&lookup, MAIL_FROM_NAME)
                .unwrap_or_else(|| DEFAULT_FROM_NAME.to_string()),
        })
    }

    /// `"Name" <user>` header value.
    pub fn from_header(&self) -> String {
        format!("\"{}\" <{}>", self.from_name, self.user)
    }
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("smtp_host", &self.smtp_host)
            .field("from_name", &self.from_name)
            .finish()
    }
}

/// Scan cadence and horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Tasks further away than this are ignored in a tick.
    pub lookahead_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(DEFAULT_TICK_SECS),
            lookahead_minutes: DEFAULT_LOOKAHEAD_MINUTES,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = optional(&lookup, REMINDER_TICK_SECS) {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                var: REMINDER_TICK_SECS,
                reason: format!("not a whole number of seconds: {raw:?}"),
            })?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: REMINDER_TICK_SECS,
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.tick_interval = Duration::from_secs(secs);
        }

        if let Some(raw) = optional(&lookup, REMINDER_LOOKAHEAD_MINUTES) {
            let minutes: i64 = raw.parse().map_err(|_| ConfigError::Invalid {
                var: REMINDER_LOOKAHEAD_MINUTES,
                reason: format!("not a whole number of minutes: {raw:?}"),
            })?;
            if minutes <= 0 {
                return Err(ConfigError::Invalid {
                    var: REMINDER_LOOKAHEAD_MINUTES,
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.lookahead_minutes = minutes;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn store_path_is_required() {
        assert_eq!(
            StoreConfig::from_lookup(lookup(&[])),
            Err(ConfigError::Missing(TASK_STORE_PATH))
        );
        assert_eq!(
            StoreConfig::from_lookup(lookup(&[(TASK_STORE_PATH, "   ")])),
            Err(ConfigError::Missing(TASK_STORE_PATH))
        );

        let config = StoreConfig::from_lookup(lookup(&[(TASK_STORE_PATH, "/tmp/tasks.db")])).unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/tasks.db"));
    }

    #[test]
    fn mail_credentials_are_required() {
        assert_eq!(
            MailConfig::from_lookup(lookup(&[(MAIL_PASS, "secret")])),
            Err(ConfigError::Missing(MAIL_USER))
        );
        assert_eq!(
            MailConfig::from_lookup(lookup(&[(MAIL_USER, "me@example.com")])),
            Err(ConfigError::Missing(MAIL_PASS))
        );
    }

    #[test]
    fn mail_user_must_be_an_address() {
        let err = MailConfig::from_lookup(lookup(&[(MAIL_USER, "me"), (MAIL_PASS, "x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: MAIL_USER, .. }));
    }

    #[test]
    fn mail_defaults_and_redaction() {
        let config = MailConfig::from_lookup(lookup(&[
            (MAIL_USER, "me@example.com"),
            (MAIL_PASS, "abcd efgh ijkl mnop"),
        ]))
        .unwrap();
        assert_eq!(config.smtp_host, "smtp.gmail.com");
        assert_eq!(config.password, "abcd efgh ijkl mnop");
        assert_eq!(config.from_header(), "\"Task Reminder System\" <me@example.com>");

        let debug = format!("{config:?}");
        assert!(!debug.contains("abcd"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn scheduler_defaults() {
        let config = SchedulerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.lookahead_minutes, 65);
    }

    #[test]
    fn scheduler_rejects_zero_and_garbage() {
        let err = SchedulerConfig::from_lookup(lookup(&[(REMINDER_TICK_SECS, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: REMINDER_TICK_SECS, .. }));

        let err =
            SchedulerConfig::from_lookup(lookup(&[(REMINDER_LOOKAHEAD_MINUTES, "soon")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: REMINDER_LOOKAHEAD_MINUTES,
                ..
            }
        ));
    }

    #[test]
    fn scheduler_overrides() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            (REMINDER_TICK_SECS, "30"),
            (REMINDER_LOOKAHEAD_MINUTES, "90"),
        ]))
        .unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(30));
        assert_eq!(config.lookahead_minutes, 90);
    }
}

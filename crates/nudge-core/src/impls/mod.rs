//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: テスト・dry-run 用のストア
//! - **SqliteTaskStore**: 本番用のストア（遅延接続）
//! - **SmtpMailTransport**: 本番用のメール送信
//! - **RecordingMailTransport**: 送信せずに記録するだけ

pub mod inmem_store;
pub mod recording_mail;
pub mod smtp;
pub mod sqlite_store;

// 主要な型を再エクスポート
pub use self::inmem_store::InMemoryTaskStore;
pub use self::recording_mail::RecordingMailTransport;
pub use self::smtp::SmtpMailTransport;
pub use self::sqlite_store::SqliteTaskStore;

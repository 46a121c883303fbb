//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（タスクストア、メールサーバ、時計）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - タスクストアが正本（送信済み閾値もここに記録）
//! - メール送信は副作用のみ（結果は呼び出し側でログに残す）
//! - 時刻は必ず Clock 経由（テストで固定できるように）

pub mod clock;
pub mod id_generator;
pub mod mail_transport;
pub mod task_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::mail_transport::{MailError, MailTransport, OutboundMessage};
pub use self::task_store::{ClaimOutcome, DeleteOutcome, StoreError, TaskFilter, TaskStore};

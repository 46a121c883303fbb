//! App - アプリケーション層
//!
//! ports を組み合わせてリマインダーのパイプラインを組み立てる。
//!
//! # 主要コンポーネント
//! - **ReminderScanner**: 1 tick 分の走査（候補取得 → 閾値判定 → claim → 送信）
//! - **NotificationDispatcher**: リマインダーメールの整形と送信
//! - **ReminderScheduler**: 分境界で scanner を起動するタイマー

pub mod dispatcher;
pub mod scanner;
pub mod scheduler;

// 主要な型を再エクスポート
pub use self::dispatcher::{NotificationDispatcher, ReminderMail};
pub use self::scanner::{ReminderScanner, TickOutcome, TickReport};
pub use self::scheduler::ReminderScheduler;

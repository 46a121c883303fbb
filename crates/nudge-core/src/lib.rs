//! nudge-core
//!
//! Task reminder pipeline: scans scheduled tasks and mails one reminder per
//! lead time (60 / 30 / 10 minutes) before each task is due.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, status, threshold, civil_time, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, MailTransport, Clock, IdGenerator）
//! - **impls**: ports の実装（SQLite / in-memory ストア, SMTP / recording transport）
//! - **app**: scanner, dispatcher, scheduler
//! - **config**: 環境変数からの設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

//! casework-core
//!
//! Core building blocks for reporting test execution to a test management
//! service (Adaptavist Test Management for Jira).
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（keys, status, action, result, run, errors, ids）
//! - **ports**: 抽象化レイヤー（TrackingApi, Clock）
//! - **app**: アプリケーションロジック（session, scope, aggregator, selector, resolver, submit, summary）
//! - **impls**: 実装（HttpTracking, InMemoryTracking）
//! - **config**: 環境変数と `config/global_config.json` からの設定
//! - **harness**: libtest-mimic による host runner 連携

pub mod app;
pub mod config;
pub mod domain;
pub mod harness;
pub mod impls;
pub mod ports;

pub use self::app::{Session, SessionBuilder};
pub use self::harness::{Harness, HarnessCase};

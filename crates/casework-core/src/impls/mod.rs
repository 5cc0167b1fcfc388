//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **HttpTracking**: Adaptavist ATM REST API（本番用）
//! - **InMemoryTracking**: テスト・dry-run 用の tracking service

pub mod http;
pub mod memory;

// 主要な型を再エクスポート
pub use self::http::HttpTracking;
pub use self::memory::InMemoryTracking;

//! App - アプリケーション層
//!
//! domain の型と ports を組み合わせてセッションの流れを実装します。
//!
//! # 主要コンポーネント
//! - **SessionBuilder**: Session の構築とワイヤリング
//! - **Session / CaseScope / StepBlock**: セッションコンテキストと実行スコープ
//! - **ResultTable**: case key ごとの集約
//! - **CaseSelector**: 実行対象と順序の決定
//! - **RunResolver**: 報告先 run の解決
//! - **Submitter**: 結果の送信
//! - **Summary**: 最終ステータス行とレポートリンク

pub mod aggregator;
pub mod builder;
pub mod resolver;
pub mod scope;
pub mod selector;
pub mod session;
pub mod submit;
pub mod summary;

// 主要な型を再エクスポート
pub use self::aggregator::{PartialRun, ResultTable, StatusCounts};
pub use self::builder::{BuildError, SessionBuilder};
pub use self::resolver::{RunResolver, Target};
pub use self::scope::{CaseError, CaseScope, Check, HostOutcome, StepBlock};
pub use self::selector::{CaseSelector, KeyRange, Selection};
pub use self::session::{Gate, Session, SessionReport, SessionStop};
pub use self::submit::{SubmitFailure, SubmitReport, Submitter, build_submission};
pub use self::summary::{FinalStatus, ReportLinks, Summary};

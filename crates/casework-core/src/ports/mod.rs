//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（test management service, 時刻）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod tracking;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::tracking::{
    CiInfo, NewTestPlan, NewTestRun, StepSubmission, Submission, TestPlanInfo, TestRunInfo,
    TrackingApi,
};

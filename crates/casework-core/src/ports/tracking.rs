//! TrackingApi port - test management service（Adaptavist ATM）
//!
//! 報告に必要な操作だけを定義します：
//! - run / plan の検索と作成、plan と run の紐付け
//! - environment の確認と作成
//! - case ごとの結果の送信、case への CI 情報の付与
//!
//! # 実装
//! - `impls::HttpTracking`: REST API（本番用）
//! - `impls::InMemoryTracking`: テストと dry-run 用

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Attachment, CaseKey, Status, StepIndex, TrackingError};

/// A run as known to the tracking service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunInfo {
    pub key: String,
    pub name: String,
    pub project_key: String,
    #[serde(default)]
    pub items: Vec<CaseKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPlanInfo {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTestPlan {
    pub project_key: String,
    pub name: String,
    pub folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTestRun {
    pub project_key: String,
    pub plan_key: Option<String>,
    pub name: String,
    pub folder: Option<String>,
    pub cases: Vec<CaseKey>,
}

/// CI metadata attached to every reported case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiInfo {
    pub build_url: Option<String>,
    pub code_base: Option<String>,
}

/// Result of one step as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepSubmission {
    pub index: StepIndex,
    pub status: Status,
    pub comment: String,
    pub attachments: Vec<Attachment>,
}

/// Final result of one case as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub case_key: CaseKey,
    pub status: Status,
    pub comment: String,
    pub steps: Vec<StepSubmission>,
    pub attachments: Vec<Attachment>,
    #[serde(rename = "execution_time_ms", serialize_with = "as_millis")]
    pub execution_time: Duration,
    pub environment: Option<String>,
    pub executor: Option<String>,
}

fn as_millis<S: serde::Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

/// TrackingApi は test management service へのインターフェース
///
/// lookup 系は「見つからない」を `Ok(None)` で返し、通信や権限の問題は
/// `TrackingError` で返します。
#[async_trait::async_trait]
pub trait TrackingApi: Send + Sync {
    async fn get_test_run(&self, key: &str) -> Result<Option<TestRunInfo>, TrackingError>;

    async fn find_test_run_by_name(&self, name: &str) -> Result<Option<TestRunInfo>, TrackingError>;

    async fn get_test_plans(&self, project_key: &str) -> Result<Vec<TestPlanInfo>, TrackingError>;

    async fn get_test_plan(&self, key: &str) -> Result<Option<TestPlanInfo>, TrackingError>;

    /// Returns the key of the new plan.
    async fn create_test_plan(&self, plan: &NewTestPlan) -> Result<String, TrackingError>;

    /// Returns the key of the new run.
    async fn create_test_run(&self, run: &NewTestRun) -> Result<String, TrackingError>;

    async fn link_run_to_plan(&self, plan_key: &str, run_key: &str) -> Result<(), TrackingError>;

    async fn list_environments(&self, project_key: &str) -> Result<Vec<String>, TrackingError>;

    async fn create_environment(&self, project_key: &str, name: &str) -> Result<(), TrackingError>;

    /// Create (or replace) the result of one case in `run_key`.
    async fn submit(&self, run_key: &str, submission: &Submission) -> Result<(), TrackingError>;

    /// Label the case as automated and record where it was built from.
    async fn annotate_case(&self, case_key: &CaseKey, ci: &CiInfo) -> Result<(), TrackingError>;

    async fn is_known_user(&self, user: &str) -> Result<bool, TrackingError>;
}

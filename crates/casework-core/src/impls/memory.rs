//! InMemoryTracking - テストと dry-run 用の tracking service
//!
//! # 学習ポイント
//! - tokio::sync::Mutex による async context での排他制御
//! - 決定的な key 生成（`<PROJECT>-C<n>` が run、`<PROJECT>-P<n>` が plan）
//! - 送信内容をすべて記録し、テストから検査できる

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

use crate::domain::{CaseKey, TrackingError};
use crate::ports::{
    CiInfo, NewTestPlan, NewTestRun, Submission, TestPlanInfo, TestRunInfo, TrackingApi,
};

#[derive(Debug, Default)]
struct State {
    runs: Vec<TestRunInfo>,
    plans: Vec<(String, TestPlanInfo)>,
    links: Vec<(String, String)>,
    environments: HashMap<String, Vec<String>>,
    users: HashSet<String>,
    submissions: Vec<(String, Submission)>,
    annotations: Vec<(CaseKey, CiInfo)>,
    failing_cases: HashSet<CaseKey>,
    unreachable: bool,
    next_key: u32,
}

impl State {
    fn next_key(&mut self, project: &str, kind: char) -> String {
        self.next_key += 1;
        format!("{project}-{kind}{}", self.next_key)
    }

    fn check_reachable(&self) -> Result<(), TrackingError> {
        if self.unreachable {
            Err(TrackingError::infrastructure("in-memory tracking is unreachable"))
        } else {
            Ok(())
        }
    }
}

/// InMemoryTracking は開発用の tracking service
///
/// # 使用例
/// ```ignore
/// let tracking = InMemoryTracking::new();
/// let run = tracking.seed_run("PRJ", "nightly", &[key]).await;
/// // ... session を実行 ...
/// assert_eq!(tracking.submissions().await.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTracking {
    state: Mutex<State>,
}

impl InMemoryTracking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing run and return its key.
    pub async fn seed_run(&self, project_key: &str, name: &str, items: &[CaseKey]) -> String {
        let mut state = self.state.lock().await;
        let key = state.next_key(project_key, 'C');
        state.runs.push(TestRunInfo {
            key: key.clone(),
            name: name.to_string(),
            project_key: project_key.to_string(),
            items: items.to_vec(),
        });
        key
    }

    /// Register an existing plan and return its key.
    pub async fn seed_plan(&self, project_key: &str, name: &str) -> String {
        let mut state = self.state.lock().await;
        let key = state.next_key(project_key, 'P');
        state.plans.push((
            project_key.to_string(),
            TestPlanInfo {
                key: key.clone(),
                name: name.to_string(),
            },
        ));
        key
    }

    pub async fn seed_user(&self, user: &str) {
        self.state.lock().await.users.insert(user.to_string());
    }

    /// Make every submission for `case_key` fail with a permanent error.
    pub async fn reject_case(&self, case_key: CaseKey) {
        self.state.lock().await.failing_cases.insert(case_key);
    }

    /// Make every call fail with an infrastructure error.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    pub async fn runs(&self) -> Vec<TestRunInfo> {
        self.state.lock().await.runs.clone()
    }

    pub async fn plans(&self) -> Vec<TestPlanInfo> {
        let state = self.state.lock().await;
        state.plans.iter().map(|(_, plan)| plan.clone()).collect()
    }

    /// `(plan_key, run_key)` pairs in link order.
    pub async fn links(&self) -> Vec<(String, String)> {
        self.state.lock().await.links.clone()
    }

    pub async fn environments(&self, project_key: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state.environments.get(project_key).cloned().unwrap_or_default()
    }

    /// `(run_key, submission)` pairs in submission order.
    pub async fn submissions(&self) -> Vec<(String, Submission)> {
        self.state.lock().await.submissions.clone()
    }

    pub async fn annotations(&self) -> Vec<(CaseKey, CiInfo)> {
        self.state.lock().await.annotations.clone()
    }
}

#[async_trait::async_trait]
impl TrackingApi for InMemoryTracking {
    async fn get_test_run(&self, key: &str) -> Result<Option<TestRunInfo>, TrackingError> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state.runs.iter().find(|run| run.key == key).cloned())
    }

    async fn find_test_run_by_name(&self, name: &str) -> Result<Option<TestRunInfo>, TrackingError> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state.runs.iter().find(|run| run.name == name).cloned())
    }

    async fn get_test_plans(&self, project_key: &str) -> Result<Vec<TestPlanInfo>, TrackingError> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state
            .plans
            .iter()
            .filter(|(project, _)| project == project_key)
            .map(|(_, plan)| plan.clone())
            .collect())
    }

    async fn get_test_plan(&self, key: &str) -> Result<Option<TestPlanInfo>, TrackingError> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state
            .plans
            .iter()
            .find(|(_, plan)| plan.key == key)
            .map(|(_, plan)| plan.clone()))
    }

    async fn create_test_plan(&self, plan: &NewTestPlan) -> Result<String, TrackingError> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        let key = state.next_key(&plan.project_key, 'P');
        state.plans.push((
            plan.project_key.clone(),
            TestPlanInfo {
                key: key.clone(),
                name: plan.name.clone(),
            },
        ));
        tracing::debug!(plan = %key, name = %plan.name, "created test plan");
        Ok(key)
    }

    async fn create_test_run(&self, run: &NewTestRun) -> Result<String, TrackingError> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        let key = state.next_key(&run.project_key, 'C');
        state.runs.push(TestRunInfo {
            key: key.clone(),
            name: run.name.clone(),
            project_key: run.project_key.clone(),
            items: run.cases.clone(),
        });
        tracing::debug!(run = %key, name = %run.name, cases = run.cases.len(), "created test run");
        Ok(key)
    }

    async fn link_run_to_plan(&self, plan_key: &str, run_key: &str) -> Result<(), TrackingError> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        if !state.plans.iter().any(|(_, plan)| plan.key == plan_key) {
            return Err(TrackingError::permanent(format!("no test plan {plan_key}")));
        }
        let link = (plan_key.to_string(), run_key.to_string());
        if !state.links.contains(&link) {
            state.links.push(link);
        }
        Ok(())
    }

    async fn list_environments(&self, project_key: &str) -> Result<Vec<String>, TrackingError> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state.environments.get(project_key).cloned().unwrap_or_default())
    }

    async fn create_environment(&self, project_key: &str, name: &str) -> Result<(), TrackingError> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        state
            .environments
            .entry(project_key.to_string())
            .or_default()
            .push(name.to_string());
        Ok(())
    }

    async fn submit(&self, run_key: &str, submission: &Submission) -> Result<(), TrackingError> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        if state.failing_cases.contains(&submission.case_key) {
            return Err(TrackingError::permanent(format!(
                "result for {} rejected",
                submission.case_key
            )));
        }
        if !state.runs.iter().any(|run| run.key == run_key) {
            return Err(TrackingError::permanent(format!("no test run {run_key}")));
        }
        state
            .submissions
            .push((run_key.to_string(), submission.clone()));
        Ok(())
    }

    async fn annotate_case(&self, case_key: &CaseKey, ci: &CiInfo) -> Result<(), TrackingError> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        state.annotations.push((case_key.clone(), ci.clone()));
        Ok(())
    }

    async fn is_known_user(&self, user: &str) -> Result<bool, TrackingError> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state.users.contains(user))
    }
}

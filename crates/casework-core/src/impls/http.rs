//! HttpTracking - Adaptavist ATM REST API クライアント
//!
//! `{server}/rest/atm/1.0/...` に対して basic 認証で JSON をやり取りします。
//!
//! # エラー分類
//! - lookup の 404 → `Ok(None)`
//! - その他 4xx → `ErrorKind::Permanent`
//! - 5xx → `ErrorKind::Transient`
//! - 接続不可・タイムアウトなど → `ErrorKind::Infrastructure`

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::{Attachment, CaseKey, ErrorKind, StepIndex, TrackingError, parse_key_list};
use crate::ports::{
    CiInfo, NewTestPlan, NewTestRun, Submission, TestPlanInfo, TestRunInfo, TrackingApi,
};

const ATM_PATH: &str = "rest/atm/1.0";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRun {
    key: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    project_key: String,
    #[serde(default)]
    items: Vec<WireRunItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRunItem {
    test_case_key: String,
}

impl From<WireRun> for TestRunInfo {
    fn from(run: WireRun) -> Self {
        TestRunInfo {
            items: parse_key_list(run.items.iter().map(|item| item.test_case_key.as_str())),
            key: run.key,
            name: run.name,
            project_key: run.project_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WirePlan {
    key: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePlanRuns {
    #[serde(default)]
    test_runs: Vec<WireKey>,
}

#[derive(Debug, Deserialize)]
struct WireKey {
    key: String,
}

#[derive(Debug, Deserialize)]
struct WireId {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WireEnvironment {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireCase {
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireScriptResult<'a> {
    index: u32,
    status: &'static str,
    comment: &'a str,
}

/// HttpTracking は本番用の tracking service クライアント
#[derive(Debug, Clone)]
pub struct HttpTracking {
    client: Client,
    server: String,
    username: String,
    password: String,
}

impl HttpTracking {
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, TrackingError> {
        Self::with_timeout(server, username, password, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TrackingError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackingError::infrastructure("failed to build http client").with_source(e))?;
        Ok(Self {
            client,
            server: server.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    fn atm_url(&self, path: &str) -> String {
        format!("{}/{ATM_PATH}/{path}", self.server)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn dispatch(&self, builder: RequestBuilder, what: &str) -> Result<Response, TrackingError> {
        self.authed(builder)
            .send()
            .await
            .map_err(|e| TrackingError::infrastructure(format!("{what}: request failed")).with_source(e))
    }

    async fn expect_success(response: Response, what: &str) -> Result<Response, TrackingError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TrackingError::new(
            classify(status),
            format!("{what}: HTTP {} {}", status.as_u16(), body.trim()),
        ))
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response, TrackingError> {
        let response = self.dispatch(builder, what).await?;
        Self::expect_success(response, what).await
    }

    async fn json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, TrackingError> {
        response.json::<T>().await.map_err(|e| {
            TrackingError::permanent(format!("{what}: unexpected response body")).with_source(e)
        })
    }

    /// GET that maps 404 to `None`.
    async fn lookup<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<Option<T>, TrackingError> {
        let response = self.dispatch(builder, what).await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(what, "not found");
            return Ok(None);
        }
        let response = Self::expect_success(response, what).await?;
        Self::json(response, what).await.map(Some)
    }

    async fn result_id(&self, run_key: &str, case_key: &CaseKey) -> Result<u64, TrackingError> {
        let url = self.atm_url(&format!("testrun/{run_key}/testcase/{case_key}/testresult"));
        let response = self
            .send(
                self.client.post(url).json(&json!({ "status": "Not Executed" })),
                "create test result",
            )
            .await?;
        let id: WireId = Self::json(response, "create test result").await?;
        Ok(id.id)
    }

    async fn upload(&self, url: String, attachment: &Attachment) -> Result<(), TrackingError> {
        let part = reqwest::multipart::Part::bytes(attachment.data.clone())
            .file_name(attachment.name.clone());
        let form = reqwest::multipart::Form::new().part("file", part);
        self.send(self.client.post(url).multipart(form), "upload attachment")
            .await?;
        Ok(())
    }
}

fn classify(status: StatusCode) -> ErrorKind {
    if status.is_server_error() {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}

fn quoted_query(field: &str, value: &str) -> String {
    format!("{field} = \"{}\"", value.replace('"', "\\\""))
}

fn submission_body(submission: &Submission) -> serde_json::Value {
    let scripts: Vec<WireScriptResult<'_>> = submission
        .steps
        .iter()
        .map(|step| WireScriptResult {
            index: step.index.zero_based(),
            status: step.status.as_wire(),
            comment: &step.comment,
        })
        .collect();
    let mut body = json!({
        "status": submission.status.as_wire(),
        "comment": submission.comment,
        "executionTime": u64::try_from(submission.execution_time.as_millis()).unwrap_or(u64::MAX),
        "scriptResults": scripts,
    });
    if let Some(environment) = &submission.environment {
        body["environment"] = json!(environment);
    }
    if let Some(executor) = &submission.executor {
        body["executedBy"] = json!(executor);
        body["assignedTo"] = json!(executor);
    }
    body
}

fn html_link(url: &Option<String>) -> String {
    match url {
        Some(url) if !url.is_empty() => format!("<a href=\"{url}\">{url}</a>"),
        _ => String::new(),
    }
}

#[async_trait::async_trait]
impl TrackingApi for HttpTracking {
    async fn get_test_run(&self, key: &str) -> Result<Option<TestRunInfo>, TrackingError> {
        let url = self.atm_url(&format!("testrun/{key}"));
        let run: Option<WireRun> = self.lookup(self.client.get(url), "get test run").await?;
        Ok(run.map(TestRunInfo::from))
    }

    async fn find_test_run_by_name(&self, name: &str) -> Result<Option<TestRunInfo>, TrackingError> {
        let builder = self
            .client
            .get(self.atm_url("testrun/search"))
            .query(&[("query", quoted_query("name", name))]);
        let runs: Option<Vec<WireRun>> = self.lookup(builder, "search test run").await?;
        Ok(runs
            .unwrap_or_default()
            .into_iter()
            .find(|run| run.name == name)
            .map(TestRunInfo::from))
    }

    async fn get_test_plans(&self, project_key: &str) -> Result<Vec<TestPlanInfo>, TrackingError> {
        let builder = self
            .client
            .get(self.atm_url("testplan/search"))
            .query(&[("query", quoted_query("projectKey", project_key))]);
        let plans: Option<Vec<WirePlan>> = self.lookup(builder, "search test plans").await?;
        Ok(plans
            .unwrap_or_default()
            .into_iter()
            .map(|plan| TestPlanInfo {
                key: plan.key,
                name: plan.name,
            })
            .collect())
    }

    async fn get_test_plan(&self, key: &str) -> Result<Option<TestPlanInfo>, TrackingError> {
        let url = self.atm_url(&format!("testplan/{key}"));
        let plan: Option<WirePlan> = self.lookup(self.client.get(url), "get test plan").await?;
        Ok(plan.map(|plan| TestPlanInfo {
            key: plan.key,
            name: plan.name,
        }))
    }

    async fn create_test_plan(&self, plan: &NewTestPlan) -> Result<String, TrackingError> {
        let mut body = json!({
            "projectKey": plan.project_key,
            "name": plan.name,
            "status": "Approved",
        });
        if let Some(folder) = &plan.folder {
            body["folder"] = json!(folder);
        }
        let response = self
            .send(self.client.post(self.atm_url("testplan")).json(&body), "create test plan")
            .await?;
        let key: WireKey = Self::json(response, "create test plan").await?;
        tracing::info!(plan = %key.key, name = %plan.name, "created test plan");
        Ok(key.key)
    }

    async fn create_test_run(&self, run: &NewTestRun) -> Result<String, TrackingError> {
        let items: Vec<_> = run
            .cases
            .iter()
            .map(|case| json!({ "testCaseKey": case.to_string() }))
            .collect();
        let mut body = json!({
            "projectKey": run.project_key,
            "name": run.name,
            "items": items,
        });
        if let Some(plan) = &run.plan_key {
            body["testPlanKey"] = json!(plan);
        }
        if let Some(folder) = &run.folder {
            body["folder"] = json!(folder);
        }
        let response = self
            .send(self.client.post(self.atm_url("testrun")).json(&body), "create test run")
            .await?;
        let key: WireKey = Self::json(response, "create test run").await?;
        tracing::info!(run = %key.key, name = %run.name, cases = run.cases.len(), "created test run");
        Ok(key.key)
    }

    async fn link_run_to_plan(&self, plan_key: &str, run_key: &str) -> Result<(), TrackingError> {
        let url = self.atm_url(&format!("testplan/{plan_key}"));
        let existing: WirePlanRuns = self
            .lookup(self.client.get(url.clone()), "get test plan runs")
            .await?
            .ok_or_else(|| TrackingError::permanent(format!("no test plan {plan_key}")))?;
        let mut runs: Vec<String> = existing.test_runs.into_iter().map(|run| run.key).collect();
        if runs.iter().any(|key| key == run_key) {
            return Ok(());
        }
        runs.push(run_key.to_string());
        self.send(
            self.client.put(url).json(&json!({ "testRuns": runs })),
            "link test run",
        )
        .await?;
        Ok(())
    }

    async fn list_environments(&self, project_key: &str) -> Result<Vec<String>, TrackingError> {
        let builder = self
            .client
            .get(self.atm_url("environments"))
            .query(&[("projectKey", project_key)]);
        let environments: Option<Vec<WireEnvironment>> =
            self.lookup(builder, "list environments").await?;
        Ok(environments
            .unwrap_or_default()
            .into_iter()
            .map(|env| env.name)
            .collect())
    }

    async fn create_environment(&self, project_key: &str, name: &str) -> Result<(), TrackingError> {
        let body = json!({ "projectKey": project_key, "name": name });
        self.send(
            self.client.post(self.atm_url("environments")).json(&body),
            "create environment",
        )
        .await?;
        tracing::info!(project = project_key, environment = name, "created test environment");
        Ok(())
    }

    async fn submit(&self, run_key: &str, submission: &Submission) -> Result<(), TrackingError> {
        let case_key = &submission.case_key;
        let id = self.result_id(run_key, case_key).await?;

        let url = self.atm_url(&format!("testrun/{run_key}/testcase/{case_key}/testresult"));
        self.send(
            self.client.put(url).json(&submission_body(submission)),
            "update test result",
        )
        .await?;

        for attachment in &submission.attachments {
            self.upload(self.atm_url(&format!("testresult/{id}/attachments")), attachment)
                .await?;
        }
        for step in &submission.steps {
            for attachment in &step.attachments {
                self.upload(step_attachment_url(self, id, step.index), attachment)
                    .await?;
            }
        }
        Ok(())
    }

    async fn annotate_case(&self, case_key: &CaseKey, ci: &CiInfo) -> Result<(), TrackingError> {
        let url = self.atm_url(&format!("testcase/{case_key}"));
        let existing: WireCase = self
            .lookup(self.client.get(url.clone()), "get test case")
            .await?
            .unwrap_or_default();
        let mut labels = existing.labels;
        if !labels.iter().any(|label| label == "automated") {
            labels.push("automated".to_string());
        }
        let body = json!({
            "labels": labels,
            "customFields": {
                "ci_server_url": html_link(&ci.build_url),
                "code_base_url": html_link(&ci.code_base),
            },
        });
        self.send(self.client.put(url).json(&body), "annotate test case")
            .await?;
        Ok(())
    }

    async fn is_known_user(&self, user: &str) -> Result<bool, TrackingError> {
        let builder = self
            .client
            .get(format!("{}/rest/api/2/user", self.server))
            .query(&[("username", user)]);
        let found: Option<serde_json::Value> = self.lookup(builder, "get user").await?;
        Ok(found.is_some())
    }
}

fn step_attachment_url(tracking: &HttpTracking, result_id: u64, step: StepIndex) -> String {
    tracking.atm_url(&format!(
        "testresult/{result_id}/step/{}/attachments",
        step.zero_based()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Status;
    use crate::ports::StepSubmission;
    use rstest::rstest;

    fn tracking() -> HttpTracking {
        HttpTracking::new("https://jira.example.com/", "bot", "secret").unwrap()
    }

    #[test]
    fn urls_are_built_under_the_atm_root() {
        let tracking = tracking();
        assert_eq!(
            tracking.atm_url("testrun/PRJ-C1"),
            "https://jira.example.com/rest/atm/1.0/testrun/PRJ-C1"
        );
        assert_eq!(
            step_attachment_url(&tracking, 7, StepIndex::new(2).unwrap()),
            "https://jira.example.com/rest/atm/1.0/testresult/7/step/1/attachments"
        );
    }

    #[rstest]
    #[case(StatusCode::BAD_REQUEST, ErrorKind::Permanent)]
    #[case(StatusCode::FORBIDDEN, ErrorKind::Permanent)]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Transient)]
    #[case(StatusCode::SERVICE_UNAVAILABLE, ErrorKind::Transient)]
    fn status_codes_are_classified(#[case] status: StatusCode, #[case] kind: ErrorKind) {
        assert_eq!(classify(status), kind);
    }

    #[test]
    fn queries_escape_quotes() {
        assert_eq!(quoted_query("name", "PRJ \"x\""), "name = \"PRJ \\\"x\\\"\"");
    }

    #[test]
    fn submission_body_uses_zero_based_steps() {
        let submission = Submission {
            case_key: CaseKey::parse("PRJ-T1").unwrap(),
            status: Status::Failed,
            comment: "boom".into(),
            steps: vec![StepSubmission {
                index: StepIndex::new(1).unwrap(),
                status: Status::Failed,
                comment: "step".into(),
                attachments: Vec::new(),
            }],
            attachments: Vec::new(),
            execution_time: Duration::from_millis(1500),
            environment: Some("linux".into()),
            executor: Some("ci".into()),
        };
        let body = submission_body(&submission);
        assert_eq!(body["status"], "Fail");
        assert_eq!(body["executionTime"], 1500);
        assert_eq!(body["scriptResults"][0]["index"], 0);
        assert_eq!(body["scriptResults"][0]["status"], "Fail");
        assert_eq!(body["environment"], "linux");
        assert_eq!(body["executedBy"], "ci");
    }

    #[test]
    fn run_items_become_case_keys() {
        let wire: WireRun = serde_json::from_value(json!({
            "key": "PRJ-C4",
            "name": "nightly",
            "projectKey": "PRJ",
            "items": [{ "testCaseKey": "PRJ-T1" }, { "testCaseKey": "broken" }],
        }))
        .unwrap();
        let run = TestRunInfo::from(wire);
        assert_eq!(run.items, vec![CaseKey::parse("PRJ-T1").unwrap()]);
        assert_eq!(run.project_key, "PRJ");
    }

    #[test]
    fn links_are_rendered_as_anchors() {
        assert_eq!(
            html_link(&Some("https://ci/job/1".into())),
            "<a href=\"https://ci/job/1\">https://ci/job/1</a>"
        );
        assert_eq!(html_link(&None), "");
    }

    #[tokio::test]
    async fn refused_connection_is_an_infrastructure_error() {
        let tracking =
            HttpTracking::with_timeout("http://127.0.0.1:1", "bot", "secret", Duration::from_secs(2))
                .unwrap();
        let err = tracking.get_test_run("PRJ-C1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}

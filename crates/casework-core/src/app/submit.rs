//! Submitter - 確定した case 結果の送信
//!
//! case ごとに独立して送信し、失敗は case 単位で記録します。
//! ある case の失敗が他の case の送信を止めることはありません。

use serde::Serialize;

use crate::domain::{CaseKey, CaseResult, RunRef};
use crate::ports::{CiInfo, StepSubmission, Submission, TrackingApi};

use super::aggregator::ResultTable;

/// Payload for one finalized case. Building it has no side effects, so the
/// same result always yields the same payload.
pub fn build_submission(
    key: &CaseKey,
    result: &CaseResult,
    environment: Option<&str>,
    executor: Option<&str>,
) -> Submission {
    let status = result.status();
    let keep = status.keeps_attachments();
    Submission {
        case_key: key.clone(),
        status,
        comment: result.comment(),
        steps: result
            .steps()
            .map(|(index, step)| StepSubmission {
                index,
                status: step.status,
                comment: step.comment(),
                attachments: if keep { step.attachments.clone() } else { Vec::new() },
            })
            .collect(),
        attachments: if keep {
            result.case_attachments().to_vec()
        } else {
            Vec::new()
        },
        execution_time: result.elapsed(),
        environment: environment.map(str::to_string),
        executor: executor.map(str::to_string),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitFailure {
    pub case_key: CaseKey,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmitReport {
    pub submitted: Vec<CaseKey>,
    pub failures: Vec<SubmitFailure>,
}

impl SubmitReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Submitter<'a> {
    tracking: &'a dyn TrackingApi,
    environment: Option<String>,
    executor: Option<String>,
    ci: CiInfo,
}

impl<'a> Submitter<'a> {
    pub fn new(tracking: &'a dyn TrackingApi) -> Self {
        Self {
            tracking,
            environment: None,
            executor: None,
            ci: CiInfo::default(),
        }
    }

    pub fn environment(mut self, environment: Option<String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn executor(mut self, executor: Option<String>) -> Self {
        self.executor = executor;
        self
    }

    pub fn ci(mut self, ci: CiInfo) -> Self {
        self.ci = ci;
        self
    }

    pub async fn submit_all(&self, run: &RunRef, results: &ResultTable) -> SubmitReport {
        let mut report = SubmitReport::default();
        for (key, result) in results.iter() {
            let submission = build_submission(
                key,
                result,
                self.environment.as_deref(),
                self.executor.as_deref(),
            );
            match self.tracking.submit(&run.key, &submission).await {
                Ok(()) => {
                    tracing::info!(case = %key, status = %submission.status, run = %run.key, "submitted result");
                    report.submitted.push(key.clone());
                }
                Err(error) => {
                    tracing::warn!(case = %key, run = %run.key, %error, "result submission failed");
                    report.failures.push(SubmitFailure {
                        case_key: key.clone(),
                        error: error.to_string(),
                    });
                    continue;
                }
            }
            if submission.status.keeps_attachments()
                && let Err(error) = self.tracking.annotate_case(key, &self.ci).await
            {
                tracing::warn!(case = %key, %error, "could not annotate test case");
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Attachment, CommentRow, Status, StepIndex, StepResult};
    use crate::impls::InMemoryTracking;

    fn key(raw: &str) -> CaseKey {
        CaseKey::parse(raw).unwrap()
    }

    fn with_attachment(status: Status) -> StepResult {
        let mut result = StepResult::with_status(status);
        result.attachments.push(Attachment::new("shot.png", vec![1, 2, 3]));
        result
    }

    #[test]
    fn blocked_cases_drop_attachments_but_keep_comments() {
        let mut result = CaseResult::default();
        let mut step = with_attachment(Status::Blocked);
        step.rows.push(CommentRow::info("waiting for rig"));
        result.absorb(Some(StepIndex::new(1).unwrap()), step);
        result.absorb(None, with_attachment(Status::Passed));

        let submission = build_submission(&key("TEST-T1"), &result, None, None);
        assert_eq!(submission.status, Status::Blocked);
        assert!(submission.attachments.is_empty());
        assert!(submission.steps[0].attachments.is_empty());
        assert!(submission.comment.contains("waiting for rig"));
    }

    #[test]
    fn failed_cases_keep_attachments() {
        let mut result = CaseResult::default();
        result.absorb(Some(StepIndex::new(2).unwrap()), with_attachment(Status::Failed));
        let submission = build_submission(&key("TEST-T1"), &result, Some("linux"), Some("ci"));
        assert_eq!(submission.steps[0].attachments.len(), 1);
        assert_eq!(submission.steps[0].index.get(), 2);
        assert_eq!(submission.environment.as_deref(), Some("linux"));
    }

    #[test]
    fn building_twice_yields_the_same_payload() {
        let mut result = CaseResult::default();
        let mut step = StepResult::with_status(Status::Failed);
        step.rows.push(CommentRow::fail("boom"));
        result.absorb(Some(StepIndex::new(1).unwrap()), step);

        let first = build_submission(&key("TEST-T1"), &result, None, None);
        let second = build_submission(&key("TEST-T1"), &result, None, None);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_others() {
        let tracking = InMemoryTracking::new();
        let run_key = tracking.seed_run("TEST", "run", &[]).await;
        tracking.reject_case(key("TEST-T2")).await;
        let run = RunRef {
            key: run_key,
            project_key: "TEST".into(),
            plan_key: None,
            items: Vec::new(),
        };
        let mut table = ResultTable::new();
        for raw in ["TEST-T1", "TEST-T2", "TEST-T3"] {
            table.record(&key(raw), None, StepResult::with_status(Status::Passed));
        }

        let report = Submitter::new(&tracking).submit_all(&run, &table).await;

        assert_eq!(report.submitted, vec![key("TEST-T1"), key("TEST-T3")]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].case_key, key("TEST-T2"));
        assert_eq!(tracking.submissions().await.len(), 2);
        assert_eq!(tracking.annotations().await.len(), 2);
    }
}

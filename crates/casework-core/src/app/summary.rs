//! Summary - セッション終了時の最終ステータス行とレポートリンク
//!
//! CI パイプラインが読み取る 1 行を出力します：
//! `final_status (<S>): <project>, <plan>, <run>, <n> exception(s) raised`

use std::fmt;

use serde::Serialize;

use super::aggregator::StatusCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    Success,
    Unstable,
    Failure,
    Aborted,
    NotBuilt,
}

impl FinalStatus {
    /// Exit stop wins, then panics, then failed cases, then "nothing ran".
    pub fn decide(counts: &StatusCounts, panics: usize, exited: bool) -> Self {
        if exited {
            FinalStatus::Aborted
        } else if panics > 0 {
            FinalStatus::Failure
        } else if counts.failed > 0 {
            FinalStatus::Unstable
        } else if counts.passed == 0 {
            FinalStatus::NotBuilt
        } else {
            FinalStatus::Success
        }
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FinalStatus::Success => "SUCCESS",
            FinalStatus::Unstable => "UNSTABLE",
            FinalStatus::Failure => "FAILURE",
            FinalStatus::Aborted => "ABORTED",
            FinalStatus::NotBuilt => "NOT_BUILT",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub status: FinalStatus,
    pub project_key: Option<String>,
    pub plan_key: Option<String>,
    pub run_key: Option<String>,
    pub exceptions: usize,
    pub counts: StatusCounts,
}

impl Summary {
    pub fn line(&self) -> String {
        fn or_none(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("None")
        }
        format!(
            "final_status ({}): {}, {}, {}, {} exception(s) raised",
            self.status,
            or_none(&self.project_key),
            or_none(&self.plan_key),
            or_none(&self.run_key),
            self.exceptions
        )
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line())
    }
}

/// Links into the tracking service's report pages for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportLinks {
    pub traceability: String,
    pub test_results: String,
    pub coverage: String,
}

impl ReportLinks {
    pub fn new(server: &str, project_key: &str, run_key: &str) -> Self {
        let base = server.trim_end_matches('/');
        let tql = format!(
            "tql=testResult.projectKey%20IN%20%28%22{project_key}%22%29%20AND%20testRun.key%20IN%20%28%22{run_key}%22%29\
             %20AND%20testRun.onlyLastTestResult%20IS%20true&jql="
        );
        let options = "traceabilityReportOption=COVERAGE_TEST_CASES&traceabilityTreeOption=COVERAGE_TEST_CASES\
                       &traceabilityMatrixOption=COVERAGE_TEST_CASES&period=MONTH&scorecardOption=EXECUTION_RESULTS";
        let page = |view: &str, title: &str| {
            format!("{base}/secure/Tests.jspa#/reports/{view}?{tql}&title={title}&{options}")
        };
        Self {
            traceability: page("traceability/report/view", "REPORTS.TRACEABILITY_REPORT.TITLE"),
            test_results: page("testresults/board/view", "REPORTS.TEST_RESULTS_BOARD.TITLE"),
            coverage: page(
                "testresults/scorecard/coverage/view",
                "REPORTS.TEST_RESULTS_SCORECARD_BY_COVERAGE.TITLE",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn counts(passed: usize, failed: usize, blocked: usize) -> StatusCounts {
        StatusCounts {
            passed,
            failed,
            blocked,
            not_executed: 0,
        }
    }

    #[rstest]
    #[case::exit_wins(counts(1, 1, 0), 1, true, FinalStatus::Aborted)]
    #[case::panics(counts(3, 1, 0), 1, false, FinalStatus::Failure)]
    #[case::failed_case(counts(3, 1, 0), 0, false, FinalStatus::Unstable)]
    #[case::only_blocked(counts(0, 0, 2), 0, false, FinalStatus::NotBuilt)]
    #[case::nothing(counts(0, 0, 0), 0, false, FinalStatus::NotBuilt)]
    #[case::all_good(counts(2, 0, 1), 0, false, FinalStatus::Success)]
    fn final_status_precedence(
        #[case] counts: StatusCounts,
        #[case] panics: usize,
        #[case] exited: bool,
        #[case] expected: FinalStatus,
    ) {
        assert_eq!(FinalStatus::decide(&counts, panics, exited), expected);
    }

    #[test]
    fn status_line_format() {
        let summary = Summary {
            status: FinalStatus::Unstable,
            project_key: Some("PRJ".into()),
            plan_key: None,
            run_key: Some("PRJ-C3".into()),
            exceptions: 2,
            counts: counts(1, 1, 0),
        };
        assert_eq!(
            summary.line(),
            "final_status (UNSTABLE): PRJ, None, PRJ-C3, 2 exception(s) raised"
        );
    }

    #[test]
    fn report_links_point_at_the_run() {
        let links = ReportLinks::new("https://jira.example.com/", "PRJ", "PRJ-C3");
        assert!(links.traceability.starts_with(
            "https://jira.example.com/secure/Tests.jspa#/reports/traceability/report/view?"
        ));
        assert!(links.test_results.contains("testresults/board/view"));
        assert!(links.coverage.contains("REPORTS.TEST_RESULTS_SCORECARD_BY_COVERAGE.TITLE"));
        assert!(links.coverage.contains("%22PRJ-C3%22"));
    }
}

//! Session - テストセッションのコンテキスト
//!
//! 報告先 run、case の選択結果、集約テーブル、セッション停止状態を
//! 1 つの値として持ち回ります。プロセス全体のグローバル状態は持ちません。
//!
//! # ライフサイクル
//! 1. `prepare(discovered)`: 報告先の解決と case の選択
//! 2. case ごとに `gate(key)` → `begin_case(key)` または `block_case(key, reason)`
//! 3. `finish()`: 送信とサマリ（worker の場合は `into_partial()`）

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ReportingConfig;
use crate::domain::{
    CaseKey, CommentRow, PartialId, Resolution, SessionId, Status, StepResult, StopMode,
};
use crate::ports::{Clock, TrackingApi};

use super::aggregator::{PartialRun, ResultTable};
use super::resolver::{RunResolver, Target};
use super::scope::CaseScope;
use super::selector::{CaseSelector, Selection};
use super::submit::{SubmitReport, Submitter};
use super::summary::{FinalStatus, ReportLinks, Summary};

/// Session-wide stop raised by a session-level action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStop {
    pub mode: StopMode,
    pub origin: CaseKey,
    pub message: String,
}

impl SessionStop {
    pub fn reason(&self) -> String {
        format!("Blocked. {} failed: {}", self.origin, self.message)
    }
}

/// What to do with a case that is about to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Run,
    /// Record the case as blocked without running it.
    Block(String),
    /// Neither run nor report the case.
    Skip,
}

#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub session: SessionId,
    pub resolution: Resolution,
    pub results: ResultTable,
    pub submission: Option<SubmitReport>,
    pub summary: Summary,
    pub links: Option<ReportLinks>,
}

impl SessionReport {
    pub fn submission_failed(&self) -> bool {
        self.submission
            .as_ref()
            .is_some_and(|report| !report.is_complete())
    }
}

pub struct Session {
    id: SessionId,
    config: ReportingConfig,
    tracking: Arc<dyn TrackingApi>,
    clock: Arc<dyn Clock>,
    resolution: Resolution,
    selection: Selection,
    executor: Option<String>,
    results: ResultTable,
    stop: Option<SessionStop>,
    exited: bool,
    panics: usize,
}

impl Session {
    pub(crate) fn new(
        config: ReportingConfig,
        tracking: Arc<dyn TrackingApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id: SessionId::generate(),
            config,
            tracking,
            clock,
            resolution: Resolution::disabled("session not prepared"),
            selection: Selection::default(),
            executor: None,
            results: ResultTable::new(),
            stop: None,
            exited: false,
            panics: 0,
        }
    }

    /// Resolve the target run and select the cases to execute.
    pub async fn prepare(&mut self, discovered: &[CaseKey]) -> &Selection {
        let resolver = RunResolver::new(self.tracking.as_ref(), &self.config);
        let target = resolver.target().await;

        let mut selector = CaseSelector::from_config(&self.config);
        if let Target::Existing(run) = &target {
            selector = selector.existing_run(run.items.clone());
        }
        let selection = selector.select(discovered);

        let resolution = match target {
            Target::Disabled(reason) => Resolution::disabled(reason),
            Target::Existing(run) => Resolution::Report(run),
            Target::New { project_key } => resolver.create(&project_key, selection.run_cases()).await,
        };
        let resolution = resolver.finish(resolution).await;
        let executor = if resolution.is_reporting() {
            resolver.executor().await
        } else {
            None
        };

        tracing::info!(
            session = %self.id,
            resolution = %resolution,
            selected = selection.order.len(),
            skipped = selection.skipped.len(),
            unimplemented = selection.unimplemented.len(),
            "session prepared"
        );
        self.resolution = resolution;
        self.executor = executor;
        self.selection = selection;
        &self.selection
    }

    /// Resolve without selection, for results collected elsewhere.
    pub async fn resolve(&mut self, run_cases: Vec<CaseKey>) -> &Resolution {
        let resolver = RunResolver::new(self.tracking.as_ref(), &self.config);
        let resolution = resolver.resolve(run_cases).await;
        let executor = if resolution.is_reporting() {
            resolver.executor().await
        } else {
            None
        };
        self.resolution = resolution;
        self.executor = executor;
        &self.resolution
    }

    pub fn gate(&self, key: &CaseKey) -> Gate {
        if self.selection.is_skipped(key) {
            return Gate::Skip;
        }
        match &self.stop {
            None => Gate::Run,
            Some(stop) => match stop.mode {
                StopMode::Block => Gate::Block(stop.reason()),
                StopMode::Exit => Gate::Skip,
            },
        }
    }

    pub fn begin_case(&mut self, key: CaseKey) -> CaseScope<'_> {
        CaseScope::new(self, key)
    }

    /// Record `key` as blocked without running it.
    pub fn block_case(&mut self, key: &CaseKey, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::info!(case = %key, %reason, "case blocked");
        let mut result = StepResult::with_status(Status::Blocked);
        result.rows.push(CommentRow::blocked(reason, self.clock.now()));
        self.results.record(key, None, result);
    }

    /// Fold a worker partial into this session's results.
    pub fn absorb_partial(&mut self, partial: PartialRun) {
        tracing::debug!(partial = %partial.id, worker = partial.worker, cases = partial.cases.len(), "merging partial run");
        self.results.merge(partial.cases);
        self.panics += partial.panics;
        self.exited |= partial.exited;
    }

    pub(crate) fn stop(&mut self, mode: StopMode, origin: CaseKey, message: String) {
        if self.stop.is_some() {
            return;
        }
        tracing::warn!(case = %origin, ?mode, %message, "session stopped");
        self.exited = mode == StopMode::Exit;
        self.stop = Some(SessionStop {
            mode,
            origin,
            message,
        });
    }

    pub(crate) fn record_panic(&mut self) {
        self.panics += 1;
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn results_mut(&mut self) -> &mut ResultTable {
        &mut self.results
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &ReportingConfig {
        &self.config
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn executor(&self) -> Option<&str> {
        self.executor.as_deref()
    }

    pub fn results(&self) -> &ResultTable {
        &self.results
    }

    pub fn stopped(&self) -> Option<&SessionStop> {
        self.stop.as_ref()
    }

    pub fn panics(&self) -> usize {
        self.panics
    }

    pub fn summary(&self) -> Summary {
        let counts = self.results.counts();
        let run = self.resolution.run();
        Summary {
            status: FinalStatus::decide(&counts, self.panics, self.exited),
            project_key: run
                .map(|run| run.project_key.clone())
                .or_else(|| self.config.project_key.clone()),
            plan_key: run.and_then(|run| run.plan_key.clone()),
            run_key: run.map(|run| run.key.clone()),
            exceptions: self.panics,
            counts,
        }
    }

    /// Snapshot for central merging when this session is one of several workers.
    pub fn into_partial(self) -> PartialRun {
        PartialRun {
            id: PartialId::generate(),
            session: self.id,
            worker: self.config.worker,
            panics: self.panics,
            exited: self.exited,
            cases: self.results,
        }
    }

    /// Submit every recorded case (when reporting) and summarise.
    pub async fn finish(self) -> SessionReport {
        let summary = self.summary();
        let submission = match self.resolution.run() {
            Some(run) => Some(
                Submitter::new(self.tracking.as_ref())
                    .environment(self.config.test_environment.clone())
                    .executor(self.executor.clone())
                    .ci(self.config.ci.clone())
                    .submit_all(run, &self.results)
                    .await,
            ),
            None => {
                tracing::info!(resolution = %self.resolution, cases = self.results.len(), "results not submitted");
                None
            }
        };
        let links = match (self.resolution.run(), &self.config.jira) {
            (Some(run), Some(jira)) => Some(ReportLinks::new(&jira.server, &run.project_key, &run.key)),
            _ => None,
        };
        tracing::info!(session = %self.id, summary = %summary, "session finished");

        SessionReport {
            session: self.id,
            resolution: self.resolution,
            results: self.results,
            submission,
            summary,
            links,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::app::builder::SessionBuilder;
    use crate::app::resolver::tests::config;
    use crate::app::scope::HostOutcome;
    use crate::domain::{Action, StepIndex};
    use crate::impls::InMemoryTracking;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use serde_json::{Value, json};

    pub(crate) async fn session(file: Value) -> (Session, Arc<InMemoryTracking>) {
        let tracking = Arc::new(InMemoryTracking::new());
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let session = SessionBuilder::new()
            .config(config(file))
            .tracking(tracking.clone())
            .clock(Arc::new(FixedClock::new(at)))
            .build()
            .unwrap();
        (session, tracking)
    }

    fn key(raw: &str) -> CaseKey {
        CaseKey::parse(raw).unwrap()
    }

    fn keys(raw: &[&str]) -> Vec<CaseKey> {
        raw.iter().map(|k| key(k)).collect()
    }

    #[tokio::test]
    async fn prepare_creates_a_run_with_unimplemented_cases() {
        let (mut session, tracking) = session(json!({
            "adaptavist": true,
            "project_key": "TEST",
            "test_case_order": "TEST-T2,TEST-T18",
        }))
        .await;

        let selection = session.prepare(&keys(&["TEST-T1", "TEST-T2"])).await.clone();

        assert_eq!(selection.order, keys(&["TEST-T2", "TEST-T1"]));
        assert_eq!(selection.unimplemented, keys(&["TEST-T18"]));
        let runs = tracking.runs().await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].items, keys(&["TEST-T2", "TEST-T1", "TEST-T18"]));
        assert!(session.resolution().is_reporting());
    }

    #[tokio::test]
    async fn existing_run_restricts_and_orders_the_selection() {
        let tracking = Arc::new(InMemoryTracking::new());
        let run_key = tracking
            .seed_run("TEST", "nightly", &keys(&["TEST-T3", "TEST-T1"]))
            .await;
        let mut session = SessionBuilder::new()
            .config(config(json!({ "adaptavist": true, "test_run_key": run_key })))
            .tracking(tracking.clone())
            .build()
            .unwrap();

        let selection = session
            .prepare(&keys(&["TEST-T1", "TEST-T2", "TEST-T3"]))
            .await
            .clone();

        assert_eq!(selection.order, keys(&["TEST-T3", "TEST-T1"]));
        assert_eq!(selection.skipped, keys(&["TEST-T2"]));
        assert_eq!(session.gate(&key("TEST-T2")), Gate::Skip);
    }

    #[tokio::test]
    async fn stop_session_blocks_later_cases() {
        let (mut session, _) = session(json!({})).await;
        session.prepare(&keys(&["TEST-T1", "TEST-T2"])).await;

        let mut case = session.begin_case(key("TEST-T1"));
        let _ = case.run_step(1, |step| {
            step.check(false, "rig on fire", Action::StopSession).proceed()
        });
        case.finish(HostOutcome::Ok);

        let Gate::Block(reason) = session.gate(&key("TEST-T2")) else {
            panic!("expected the next case to be blocked");
        };
        assert_eq!(reason, "Blocked. TEST-T1 failed: rig on fire");
        session.block_case(&key("TEST-T2"), reason);
        assert_eq!(
            session.results().get(&key("TEST-T2")).unwrap().status(),
            Status::Blocked
        );
        assert_eq!(session.summary().status, FinalStatus::NotBuilt);
    }

    #[tokio::test]
    async fn fail_session_fails_the_case_and_blocks_the_next() {
        let (mut session, _) = session(json!({})).await;
        session.prepare(&keys(&["TEST-T1", "TEST-T2"])).await;

        let mut case = session.begin_case(key("TEST-T1"));
        let _ = case.run_step(1, |step| {
            step.check(false, "no license", Action::FailSession).proceed()
        });
        assert_eq!(case.finish(HostOutcome::Ok), Status::Failed);

        let Gate::Block(reason) = session.gate(&key("TEST-T2")) else {
            panic!("expected the next case to be blocked");
        };
        session.block_case(&key("TEST-T2"), reason);

        let first = session.results().get(&key("TEST-T1")).unwrap();
        assert_eq!(first.status(), Status::Failed);
        let second = session.results().get(&key("TEST-T2")).unwrap();
        assert_eq!(second.status(), Status::Blocked);
        assert!(second.comment().contains("Blocked. TEST-T1 failed: no license"));
        assert_eq!(session.stopped().unwrap().mode, StopMode::Block);
        assert_eq!(session.summary().status, FinalStatus::Unstable);
    }

    #[tokio::test]
    async fn exit_session_skips_later_cases_and_aborts() {
        let (mut session, _) = session(json!({})).await;
        let mut case = session.begin_case(key("TEST-T1"));
        let _ = case.check(false, "abort everything", Action::FailExitSession);
        case.finish(HostOutcome::Ok);

        assert_eq!(session.gate(&key("TEST-T2")), Gate::Skip);
        assert_eq!(session.summary().status, FinalStatus::Aborted);
        assert_eq!(session.stopped().unwrap().mode, StopMode::Exit);
    }

    #[tokio::test]
    async fn finish_submits_completed_cases() {
        let (mut session, tracking) = session(json!({
            "adaptavist": true,
            "project_key": "TEST",
            "test_environment": "linux",
        }))
        .await;
        tracking.seed_user("ci").await;
        session.prepare(&keys(&["TEST-T1", "TEST-T2"])).await;

        for raw in ["TEST-T1", "TEST-T2"] {
            let mut case = session.begin_case(key(raw));
            let failing = raw == "TEST-T2";
            let _ = case.run_step(1, |step| step.check(!failing, "mismatch", Action::FailContext).proceed());
            case.finish(HostOutcome::Ok);
        }
        let report = session.finish().await;

        assert!(!report.submission_failed());
        assert_eq!(report.summary.status, FinalStatus::Unstable);
        let submissions = tracking.submissions().await;
        assert_eq!(submissions.len(), 2);
        let (_, failed) = &submissions[1];
        assert_eq!(failed.status, Status::Failed);
        assert_eq!(failed.environment.as_deref(), Some("linux"));
        assert_eq!(failed.executor.as_deref(), Some("ci"));
        assert_eq!(failed.steps[0].index, StepIndex::new(1).unwrap());
        assert_eq!(tracking.environments("TEST").await, vec!["linux".to_string()]);
    }

    #[tokio::test]
    async fn disabled_reporting_still_aggregates() {
        let (mut session, tracking) = session(json!({ "project_key": "TEST" })).await;
        session.prepare(&keys(&["TEST-T1"])).await;
        let case = session.begin_case(key("TEST-T1"));
        case.finish(HostOutcome::Ok);

        let report = session.finish().await;
        assert!(report.submission.is_none());
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.summary.status, FinalStatus::Success);
        assert!(tracking.submissions().await.is_empty());
    }

    #[tokio::test]
    async fn partials_merge_into_one_session() {
        let (mut worker_a, _) = session(json!({})).await;
        let case = worker_a.begin_case(key("TEST-T1"));
        case.finish(HostOutcome::Failed("nope".into()));
        let (mut worker_b, _) = session(json!({})).await;
        let case = worker_b.begin_case(key("TEST-T1"));
        case.finish(HostOutcome::Ok);

        let (mut central, _) = session(json!({})).await;
        central.absorb_partial(worker_b.into_partial());
        central.absorb_partial(worker_a.into_partial());

        let merged = central.results().get(&key("TEST-T1")).unwrap();
        assert_eq!(merged.status(), Status::Failed);
        assert!(merged.mentions("nope"));
    }
}

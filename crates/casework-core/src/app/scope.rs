//! CaseScope / StepBlock - case と step の実行スコープ
//!
//! # 学習ポイント
//! - Drop ガードによる確定処理（早期 return・`?`・panic のどの経路でも結果が記録される）
//! - check の結果は `Control` として返り、呼び出し側が明示的に処理する
//! - `Control::proceed()` と `?` で中断を伝播する
//!
//! ```ignore
//! let mut case = session.begin_case(key);
//! case.run_step(1, |step| {
//!     step.check(login_ok, "login failed", Action::StopMethod).proceed()?;
//!     step.check(title == "Home", "wrong title", Action::FailContext).proceed()
//! })?;
//! case.finish(HostOutcome::Ok);
//! ```

use std::time::Instant;

use crate::domain::{
    Abort, Action, Attachment, CaseKey, CommentRow, Control, KeyError, Status, StepIndex,
    StepResult, StopMode,
};

use super::session::Session;

/// Why a case body stopped early.
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    /// A check aborted the case; the result is already recorded.
    #[error("case aborted: {0:?}")]
    Aborted(Control),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("{0}")]
    Failed(String),
    #[error("blocked: {0}")]
    Blocked(String),
    #[error("skipped: {0}")]
    Skipped(String),
}

impl From<Abort> for CaseError {
    fn from(abort: Abort) -> Self {
        CaseError::Aborted(abort.0)
    }
}

/// How the host runner saw the case end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutcome {
    Ok,
    Failed(String),
    Blocked(String),
    Skipped(String),
    Panicked(String),
}

impl HostOutcome {
    pub fn from_result(result: Result<(), CaseError>) -> Self {
        match result {
            Ok(()) | Err(CaseError::Aborted(_)) => HostOutcome::Ok,
            Err(CaseError::Key(error)) => HostOutcome::Failed(error.to_string()),
            Err(CaseError::Failed(message)) => HostOutcome::Failed(message),
            Err(CaseError::Blocked(reason)) => HostOutcome::Blocked(reason),
            Err(CaseError::Skipped(reason)) => HostOutcome::Skipped(reason),
        }
    }
}

/// A single check with optional extras.
///
/// ```ignore
/// step.check_with(
///     Check::that(response.ok())
///         .on_fail("request failed")
///         .on_pass("request ok")
///         .attach(Attachment::new("body.json", body))
///         .action(Action::FailMethod),
/// )
/// ```
#[derive(Debug, Clone, Default)]
pub struct Check {
    condition: bool,
    on_fail: String,
    on_pass: Option<String>,
    description: Option<String>,
    attachment: Option<Attachment>,
    action: Action,
}

impl Check {
    pub fn that(condition: bool) -> Self {
        Self {
            condition,
            ..Self::default()
        }
    }

    pub fn on_fail(mut self, message: impl Into<String>) -> Self {
        self.on_fail = message.into();
        self
    }

    pub fn on_pass(mut self, message: impl Into<String>) -> Self {
        self.on_pass = Some(message.into());
        self
    }

    /// Free text added to the comment whatever the outcome.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }
}

/// Execution scope of one case. Finalised by [`CaseScope::finish`] or, failing
/// that, on drop.
pub struct CaseScope<'s> {
    session: &'s mut Session,
    key: CaseKey,
    default_step: Option<StepIndex>,
    started: Instant,
    abort: Control,
    finished: bool,
}

impl<'s> CaseScope<'s> {
    pub(crate) fn new(session: &'s mut Session, key: CaseKey) -> Self {
        tracing::debug!(case = %key, "case started");
        Self {
            session,
            key,
            default_step: None,
            started: Instant::now(),
            abort: Control::Continue,
            finished: false,
        }
    }

    /// Record case-level checks and the host outcome against `step` instead
    /// of the case itself.
    pub fn with_step(mut self, step: Option<StepIndex>) -> Self {
        self.default_step = step;
        self
    }

    pub fn key(&self) -> &CaseKey {
        &self.key
    }

    /// `Continue` until a check aborts the case or the session.
    pub fn abort(&self) -> Control {
        self.abort
    }

    /// Open step `index` (1-based). Steps opened after the case was aborted
    /// are recorded as not executed.
    pub fn step(&mut self, index: u32) -> Result<StepBlock<'_, 's>, CaseError> {
        let index = StepIndex::new(index)?;
        Ok(StepBlock::new(self, Some(index)))
    }

    /// Run `body` inside step `index`. A step abort ends only the step; a case
    /// or session abort is returned as [`CaseError::Aborted`].
    pub fn run_step<F>(&mut self, index: u32, body: F) -> Result<(), CaseError>
    where
        F: FnOnce(&mut StepBlock<'_, 's>) -> Result<(), Abort>,
    {
        let mut block = self.step(index)?;
        if block.entered_aborted {
            return Err(CaseError::Aborted(block.control));
        }
        let outcome = body(&mut block);
        drop(block);

        if let Err(Abort(control)) = outcome
            && control != Control::AbortStep
        {
            self.abort = self.abort.escalate(control);
        }
        match self.abort {
            Control::Continue => Ok(()),
            control => Err(CaseError::Aborted(control)),
        }
    }

    /// Case-level check, recorded against the case itself (or the default step).
    pub fn check(&mut self, condition: bool, message: impl Into<String>, action: Action) -> Control {
        self.check_with(Check::that(condition).on_fail(message).action(action))
    }

    pub fn check_with(&mut self, check: Check) -> Control {
        if !self.abort.is_continue() {
            return self.abort;
        }
        let index = self.default_step;
        StepBlock::new(self, index).check_with(check)
    }

    /// Fold the host outcome into the case and return its final status.
    pub fn finish(mut self, outcome: HostOutcome) -> Status {
        self.finalize(outcome)
    }

    fn finalize(&mut self, outcome: HostOutcome) -> Status {
        self.finished = true;
        let now = self.session.now();
        if matches!(outcome, HostOutcome::Panicked(_)) {
            self.session.record_panic();
        }

        let elapsed = self.started.elapsed();
        let key = self.key.clone();
        let results = self.session.results_mut();
        if let HostOutcome::Skipped(reason) = &outcome {
            tracing::info!(case = %key, %reason, "case skipped");
            return results.get(&key).map_or(Status::NotExecuted, |case| case.status());
        }

        let case = results.entry(&key);
        let mut result = StepResult::default();
        match outcome {
            HostOutcome::Ok => result.status = Status::Passed,
            HostOutcome::Failed(message) | HostOutcome::Panicked(message) => {
                result.status = Status::Failed;
                if !case.mentions(&message) {
                    result.rows.push(CommentRow::fail(message));
                }
            }
            HostOutcome::Blocked(reason) => {
                result.status = Status::Blocked;
                result.rows.push(CommentRow::blocked(reason, now));
            }
            HostOutcome::Skipped(_) => {}
        }
        case.absorb(self.default_step, result);
        case.add_elapsed(elapsed);

        let status = case.status();
        tracing::info!(case = %key, %status, elapsed_ms = elapsed.as_millis() as u64, "case finished");
        status
    }
}

impl Drop for CaseScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let outcome = if std::thread::panicking() {
            HostOutcome::Panicked(format!("{} panicked", self.key))
        } else {
            HostOutcome::Ok
        };
        self.finalize(outcome);
    }
}

/// One step (or the case body itself when `index` is `None`). The collected
/// result is merged into the case on drop.
pub struct StepBlock<'c, 's> {
    scope: &'c mut CaseScope<'s>,
    index: Option<StepIndex>,
    result: StepResult,
    control: Control,
    entered_aborted: bool,
}

impl<'c, 's> StepBlock<'c, 's> {
    fn new(scope: &'c mut CaseScope<'s>, index: Option<StepIndex>) -> Self {
        let control = scope.abort;
        Self {
            scope,
            index,
            result: StepResult::default(),
            control,
            entered_aborted: !control.is_continue(),
        }
    }

    pub fn index(&self) -> Option<StepIndex> {
        self.index
    }

    /// `Continue` until a check in this step aborts.
    pub fn control(&self) -> Control {
        self.control
    }

    pub fn check(&mut self, condition: bool, message: impl Into<String>, action: Action) -> Control {
        self.check_with(Check::that(condition).on_fail(message).action(action))
    }

    pub fn check_with(&mut self, check: Check) -> Control {
        if !self.control.is_continue() {
            return self.control;
        }
        if let Some(description) = check.description {
            self.result.descriptions.push(description);
        }
        if let Some(attachment) = check.attachment {
            self.result.attachments.push(attachment);
        }
        if check.condition {
            if let Some(message) = check.on_pass {
                self.result.rows.push(CommentRow::pass(message));
            }
            return Control::Continue;
        }

        let (status, control) = check.action.on_failure();
        let row = match status {
            Status::Blocked => CommentRow::blocked(check.on_fail.clone(), self.scope.session.now()),
            _ => CommentRow::fail(check.on_fail.clone()),
        };
        self.result.rows.push(row);
        self.result.status = self.result.status.merge(status);
        self.control = control;
        tracing::debug!(
            case = %self.scope.key,
            step = ?self.index.map(StepIndex::get),
            action = %check.action,
            message = %check.on_fail,
            "check failed"
        );

        match control {
            Control::AbortCase => self.scope.abort = self.scope.abort.escalate(control),
            Control::AbortSession => {
                self.scope.abort = self.scope.abort.escalate(control);
                let mode = check.action.stop_mode().unwrap_or(StopMode::Block);
                let origin = self.scope.key.clone();
                self.scope.session.stop(mode, origin, check.on_fail);
            }
            Control::Continue | Control::AbortStep => {}
        }
        control
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.result.attachments.push(attachment);
    }

    pub fn describe(&mut self, description: impl Into<String>) {
        self.result.descriptions.push(description.into());
    }
}

impl Drop for StepBlock<'_, '_> {
    fn drop(&mut self) {
        let mut result = std::mem::take(&mut self.result);
        result.status = if self.entered_aborted {
            Status::NotExecuted
        } else if std::thread::panicking() {
            result.status.merge(Status::Failed)
        } else {
            result.status.merge(Status::Passed)
        };
        let key = self.scope.key.clone();
        self.scope.session.results_mut().record(&key, self.index, result);
    }
}

//! Action / Control - 条件が失敗したときの振る舞い
//!
//! check が失敗した場合に何をするかを `Action` で指定し、その結果を
//! `Control` として呼び出し側に返します。例外による中断ではなく、
//! 呼び出し側が明示的に処理するタグ付きの戻り値です。

use std::fmt;

use serde::{Deserialize, Serialize};

use super::status::Status;

/// What to do when a checked condition is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Record a failure for the current step and keep going.
    #[default]
    FailContext,
    /// Block the current step and skip its remaining checks.
    StopContext,
    /// Fail the current step and skip the rest of the case.
    FailMethod,
    /// Block the current step and skip the rest of the case.
    StopMethod,
    /// Fail the current case and block every case that has not started yet.
    FailSession,
    /// Block the current case and every case that has not started yet.
    StopSession,
    /// Block the current case and do not run any further case.
    FailExitSession,
    /// Block the current case and do not run any further case.
    StopExitSession,
}

/// How cases that have not started yet are treated after a session stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopMode {
    /// Remaining cases are reported as blocked.
    Block,
    /// Remaining cases are not executed and not reported.
    Exit,
}

/// Outcome of a check, to be handled by the caller.
#[must_use = "a failed check may require the step, case or session to stop"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    AbortStep,
    AbortCase,
    AbortSession,
}

/// Error form of a non-`Continue` [`Control`], so callers can use `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("execution aborted: {0:?}")]
pub struct Abort(pub Control);

impl Control {
    pub fn is_continue(self) -> bool {
        self == Control::Continue
    }

    pub fn proceed(self) -> Result<(), Abort> {
        match self {
            Control::Continue => Ok(()),
            other => Err(Abort(other)),
        }
    }

    /// The stronger of two controls (`AbortSession` > `AbortCase` > `AbortStep` > `Continue`).
    pub fn escalate(self, other: Control) -> Control {
        fn rank(control: Control) -> u8 {
            match control {
                Control::Continue => 0,
                Control::AbortStep => 1,
                Control::AbortCase => 2,
                Control::AbortSession => 3,
            }
        }
        if rank(other) > rank(self) { other } else { self }
    }
}

impl Action {
    /// Status recorded for the current step and the resulting control.
    pub fn on_failure(self) -> (Status, Control) {
        match self {
            Action::FailContext => (Status::Failed, Control::Continue),
            Action::StopContext => (Status::Blocked, Control::AbortStep),
            Action::FailMethod => (Status::Failed, Control::AbortCase),
            Action::StopMethod => (Status::Blocked, Control::AbortCase),
            Action::FailSession => (Status::Failed, Control::AbortSession),
            Action::StopSession | Action::FailExitSession | Action::StopExitSession => {
                (Status::Blocked, Control::AbortSession)
            }
        }
    }

    /// How the rest of the session continues, for session-level actions.
    pub fn stop_mode(self) -> Option<StopMode> {
        match self {
            Action::FailSession | Action::StopSession => Some(StopMode::Block),
            Action::FailExitSession | Action::StopExitSession => Some(StopMode::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::FailContext => "FAIL_CONTEXT",
            Action::StopContext => "STOP_CONTEXT",
            Action::FailMethod => "FAIL_METHOD",
            Action::StopMethod => "STOP_METHOD",
            Action::FailSession => "FAIL_SESSION",
            Action::StopSession => "STOP_SESSION",
            Action::FailExitSession => "FAIL_EXIT_SESSION",
            Action::StopExitSession => "STOP_EXIT_SESSION",
        };
        f.write_str(name)
    }
}

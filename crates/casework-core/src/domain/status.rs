//! Status - step / case の実行ステータスと集約ルール
//!
//! 優先順位（高 → 低）: `Failed` > `Blocked` > `Passed` > `NotExecuted`
//!
//! 集約は単純な最大値なので、可換・結合的・冪等です。worker ごとに
//! 独立して集約した結果を後からマージしても同じ結果になります。

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a step or of a whole case.
///
/// The derive order is the precedence order; do not reorder variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    #[serde(rename = "Not Executed")]
    NotExecuted,
    #[serde(rename = "Pass")]
    Passed,
    #[serde(rename = "Blocked")]
    Blocked,
    #[serde(rename = "Fail")]
    Failed,
}

impl Status {
    /// Combine two statuses. Once `Failed`, always `Failed`.
    #[must_use]
    pub fn merge(self, incoming: Status) -> Status {
        self.max(incoming)
    }

    /// Fold any number of statuses; an empty input is `NotExecuted`.
    pub fn fold<I: IntoIterator<Item = Status>>(statuses: I) -> Status {
        statuses
            .into_iter()
            .fold(Status::NotExecuted, Status::merge)
    }

    /// Name used by the tracking service.
    pub fn as_wire(self) -> &'static str {
        match self {
            Status::NotExecuted => "Not Executed",
            Status::Passed => "Pass",
            Status::Blocked => "Blocked",
            Status::Failed => "Fail",
        }
    }

    /// Whether attachments of a case with this status are uploaded.
    pub fn keeps_attachments(self) -> bool {
        matches!(self, Status::Passed | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::NotExecuted => "not-executed",
            Status::Passed => "passed",
            Status::Blocked => "blocked",
            Status::Failed => "failed",
        })
    }
}

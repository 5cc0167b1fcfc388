//! Result - step / case の集約単位
//!
//! - `StepResult`: 1 つの step（または case 自身）の status / comment / attachment
//! - `CaseResult`: case key ごとの集約先。同じ step の結果はマージされ、上書きされない
//!
//! comment の HTML 化は純粋関数です。同じ `CaseResult` を何度 render しても
//! 同じ文字列になります。

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::keys::StepIndex;
use super::status::Status;

/// A named binary payload uploaded with a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(with = "base64_data")]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

mod base64_data {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Badge shown in front of a comment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Badge {
    Pass,
    Fail,
    Blocked,
    /// Plain row without badge.
    Info,
}

impl Badge {
    fn colour(self) -> Option<&'static str> {
        match self {
            Badge::Pass => Some("rgb(58, 187, 75)"),
            Badge::Fail => Some("rgb(223, 47, 54)"),
            Badge::Blocked => Some("rgb(75, 136, 231)"),
            Badge::Info => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Badge::Pass => Status::Passed.as_wire(),
            Badge::Fail => Status::Failed.as_wire(),
            Badge::Blocked => Status::Blocked.as_wire(),
            Badge::Info => "",
        }
    }
}

/// One line of a result comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRow {
    pub badge: Badge,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

impl CommentRow {
    pub fn pass(message: impl Into<String>) -> Self {
        Self::new(Badge::Pass, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(Badge::Fail, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Badge::Info, message)
    }

    /// Blocked rows are stamped with the moment the block happened.
    pub fn blocked(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            badge: Badge::Blocked,
            message: message.into(),
            at: Some(at),
        }
    }

    fn new(badge: Badge, message: impl Into<String>) -> Self {
        Self {
            badge,
            message: message.into(),
            at: None,
        }
    }

    /// HTML status row; empty messages render to nothing.
    pub fn render(&self) -> String {
        if self.message.is_empty() {
            return String::new();
        }
        let stamp = self
            .at
            .map(|at| format!("{} ", at.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        match self.badge.colour() {
            None => format!("<div style='padding: 2pt'>{}</div>", self.message),
            Some(colour) => format!(
                "<div style='padding: 2pt'><span style='width: auto; margin-right: 4pt; padding: 2pt; \
                 border-radius: 4px; background-color: {colour}; color: white; font-family: monospace; \
                 font-size: 10pt; font-weight: bold;'>{label}</span>{stamp}{message}</div>",
                label = self.badge.label(),
                message = self.message,
            ),
        }
    }
}

fn render_rows(rows: &[CommentRow]) -> String {
    rows.iter().map(CommentRow::render).collect()
}

/// One aggregation unit: a step execution, a step block, or the case body itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: Status,
    #[serde(default)]
    pub rows: Vec<CommentRow>,
    #[serde(default)]
    pub descriptions: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl StepResult {
    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status == Status::NotExecuted
            && self.rows.is_empty()
            && self.descriptions.is_empty()
            && self.attachments.is_empty()
    }

    /// Merge `other` into `self`. Status follows the precedence rule; rows,
    /// descriptions and attachments are appended in arrival order.
    pub fn merge(&mut self, other: StepResult) {
        self.status = self.status.merge(other.status);
        self.rows.extend(other.rows);
        self.descriptions.extend(other.descriptions);
        self.attachments.extend(other.attachments);
    }

    /// Rows followed by descriptions, as submitted for a single step.
    pub fn comment(&self) -> String {
        let mut comment = render_rows(&self.rows);
        let descriptions = self.descriptions.join("<br>");
        if !descriptions.is_empty() {
            if !comment.is_empty() {
                comment.push_str("<br>");
            }
            comment.push_str(&descriptions);
        }
        comment
    }

    fn has_message(&self, message: &str) -> bool {
        self.rows.iter().any(|row| row.message == message)
    }
}

/// Everything recorded for one case key during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    case: StepResult,
    #[serde(default)]
    steps: BTreeMap<StepIndex, StepResult>,
    #[serde(default, with = "millis")]
    elapsed: Duration,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl CaseResult {
    /// Fold a step result into the case. `None` targets the case itself.
    pub fn absorb(&mut self, step: Option<StepIndex>, result: StepResult) {
        match step {
            None => self.case.merge(result),
            Some(index) => self.steps.entry(index).or_default().merge(result),
        }
    }

    /// Merge a partial result for the same key, e.g. from another worker.
    pub fn merge(&mut self, other: CaseResult) {
        self.case.merge(other.case);
        for (index, step) in other.steps {
            self.steps.entry(index).or_default().merge(step);
        }
        self.elapsed += other.elapsed;
    }

    pub fn add_elapsed(&mut self, elapsed: Duration) {
        self.elapsed += elapsed;
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Final status: the case-level status merged with every step.
    pub fn status(&self) -> Status {
        self.steps
            .values()
            .map(|step| step.status)
            .fold(self.case.status, Status::merge)
    }

    pub fn case_level(&self) -> &StepResult {
        &self.case
    }

    pub fn steps(&self) -> impl Iterator<Item = (StepIndex, &StepResult)> {
        self.steps.iter().map(|(index, step)| (*index, step))
    }

    pub fn step(&self, index: StepIndex) -> Option<&StepResult> {
        self.steps.get(&index)
    }

    /// Whether a row with exactly this message was already recorded anywhere.
    pub fn mentions(&self, message: &str) -> bool {
        self.case.has_message(message) || self.steps.values().any(|step| step.has_message(message))
    }

    /// Case-level rows, then every step's rows under a `Step n` heading, then
    /// all descriptions.
    pub fn comment(&self) -> String {
        let mut sections = Vec::new();

        let case_rows = render_rows(&self.case.rows);
        if !case_rows.is_empty() {
            sections.push(case_rows);
        }
        for (index, step) in &self.steps {
            let rows = render_rows(&step.rows);
            if !rows.is_empty() {
                sections.push(format!("Step {index}{rows}"));
            }
        }

        let descriptions: Vec<&str> = std::iter::once(&self.case)
            .chain(self.steps.values())
            .flat_map(|step| step.descriptions.iter().map(String::as_str))
            .collect();
        if !descriptions.is_empty() {
            sections.push(descriptions.join("<br>"));
        }

        sections.join("<br>")
    }

    /// Attachments uploaded with the case itself (not with a step).
    pub fn case_attachments(&self) -> &[Attachment] {
        &self.case.attachments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn step(index: u32) -> Option<StepIndex> {
        Some(StepIndex::new(index).unwrap())
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 59).unwrap()
    }

    #[test]
    fn rows_carry_badge_colours() {
        assert!(CommentRow::pass("ok").render().contains("rgb(58, 187, 75)"));
        assert!(CommentRow::fail("bad").render().contains("rgb(223, 47, 54)"));
        let blocked = CommentRow::blocked("waiting", at()).render();
        assert!(blocked.contains("rgb(75, 136, 231)"));
        assert!(blocked.contains(">Blocked</span>2024-03-09 14:05 waiting</div>"));
    }

    #[test]
    fn info_rows_and_empty_rows() {
        assert_eq!(
            CommentRow::info("note").render(),
            "<div style='padding: 2pt'>note</div>"
        );
        assert_eq!(CommentRow::pass("").render(), "");
    }

    #[test]
    fn failed_step_then_passed_step_fails_the_case() {
        let mut case = CaseResult::default();
        case.absorb(step(1), StepResult::with_status(Status::Failed));
        case.absorb(step(2), StepResult::with_status(Status::Passed));
        assert_eq!(case.status(), Status::Failed);
    }

    #[test]
    fn same_step_results_are_merged_not_overwritten() {
        let mut case = CaseResult::default();
        let mut first = StepResult::with_status(Status::Failed);
        first.rows.push(CommentRow::fail("first"));
        let mut second = StepResult::with_status(Status::Passed);
        second.rows.push(CommentRow::pass("second"));

        case.absorb(step(1), first);
        case.absorb(step(1), second);

        let merged = case.step(StepIndex::new(1).unwrap()).unwrap();
        assert_eq!(merged.status, Status::Failed);
        assert_eq!(merged.rows.len(), 2);
    }

    #[test]
    fn comment_puts_case_rows_first_and_steps_in_index_order() {
        let mut case = CaseResult::default();
        let mut second = StepResult::with_status(Status::Passed);
        second.rows.push(CommentRow::info("two"));
        let mut first = StepResult::with_status(Status::Passed);
        first.rows.push(CommentRow::info("one"));
        first.descriptions.push("details".into());
        let mut top = StepResult::with_status(Status::Passed);
        top.rows.push(CommentRow::info("case"));

        case.absorb(step(2), second);
        case.absorb(step(1), first);
        case.absorb(None, top);

        let comment = case.comment();
        assert_eq!(
            comment,
            "<div style='padding: 2pt'>case</div><br>\
             Step 1<div style='padding: 2pt'>one</div><br>\
             Step 2<div style='padding: 2pt'>two</div><br>\
             details"
        );
        assert_eq!(case.comment(), comment);
    }

    #[test]
    fn merging_partials_unions_steps() {
        let mut left = CaseResult::default();
        left.absorb(step(1), StepResult::with_status(Status::Passed));
        left.add_elapsed(Duration::from_millis(10));
        let mut right = CaseResult::default();
        right.absorb(step(2), StepResult::with_status(Status::Blocked));
        right.add_elapsed(Duration::from_millis(5));

        left.merge(right);
        assert_eq!(left.status(), Status::Blocked);
        assert_eq!(left.steps().count(), 2);
        assert_eq!(left.elapsed(), Duration::from_millis(15));
    }

    #[test]
    fn case_result_survives_json() {
        let mut case = CaseResult::default();
        let mut result = StepResult::with_status(Status::Passed);
        result.attachments.push(Attachment::new("log.txt", b"hello".to_vec()));
        case.absorb(step(3), result);

        let json = serde_json::to_string(&case).unwrap();
        assert!(json.contains("aGVsbG8="));
        let back: CaseResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, case);
    }
}

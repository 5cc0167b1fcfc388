//! ResultTable - case key ごとの集約テーブル
//!
//! key は最初に結果が記録された順に並びます（indexmap）。
//! 同じ key への記録は常にマージされ、上書きされません。
//!
//! worker ごとに独立した `PartialRun` を書き出し、集約側で
//! `ResultTable::merge` により同じルールで合流させます。

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::domain::{CaseKey, CaseResult, PartialId, SessionId, Status, StepIndex, StepResult};

/// Number of cases per final status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub passed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub not_executed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.blocked + self.not_executed
    }

    fn add(&mut self, status: Status) {
        match status {
            Status::Passed => self.passed += 1,
            Status::Failed => self.failed += 1,
            Status::Blocked => self.blocked += 1,
            Status::NotExecuted => self.not_executed += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultTable {
    cases: IndexMap<CaseKey, CaseResult>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one step result. `step = None` records against the case itself.
    pub fn record(&mut self, key: &CaseKey, step: Option<StepIndex>, result: StepResult) {
        self.entry(key).absorb(step, result);
    }

    /// The result for `key`, created empty on first use.
    pub fn entry(&mut self, key: &CaseKey) -> &mut CaseResult {
        self.cases.entry(key.clone()).or_default()
    }

    /// Merge another table (e.g. a worker partial) key by key.
    pub fn merge(&mut self, other: ResultTable) {
        for (key, result) in other.cases {
            match self.cases.get_mut(&key) {
                Some(existing) => existing.merge(result),
                None => {
                    self.cases.insert(key, result);
                }
            }
        }
    }

    pub fn get(&self, key: &CaseKey) -> Option<&CaseResult> {
        self.cases.get(key)
    }

    pub fn contains(&self, key: &CaseKey) -> bool {
        self.cases.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CaseKey, &CaseResult)> {
        self.cases.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CaseKey> {
        self.cases.keys()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for result in self.cases.values() {
            counts.add(result.status());
        }
        counts
    }
}

/// Snapshot of one isolated worker, merged centrally by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialRun {
    pub id: PartialId,
    pub session: SessionId,
    pub worker: u32,
    #[serde(default)]
    pub panics: usize,
    #[serde(default)]
    pub exited: bool,
    pub cases: ResultTable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CommentRow;
    use proptest::prelude::*;

    fn key(raw: &str) -> CaseKey {
        CaseKey::parse(raw).unwrap()
    }

    fn step(index: u32) -> Option<StepIndex> {
        Some(StepIndex::new(index).unwrap())
    }

    #[test]
    fn record_merges_into_one_entry_per_key() {
        let mut table = ResultTable::new();
        table.record(&key("TEST-T1"), step(1), StepResult::with_status(Status::Failed));
        table.record(&key("TEST-T1"), step(2), StepResult::with_status(Status::Passed));
        table.record(&key("TEST-T2"), None, StepResult::with_status(Status::Passed));

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&key("TEST-T1")).unwrap().status(), Status::Failed);
        let counts = table.counts();
        assert_eq!((counts.passed, counts.failed), (1, 1));
    }

    #[test]
    fn keys_keep_first_recorded_order() {
        let mut table = ResultTable::new();
        for raw in ["TEST-T3", "TEST-T1", "TEST-T3", "TEST-T2"] {
            table.record(&key(raw), None, StepResult::with_status(Status::Passed));
        }
        let keys: Vec<String> = table.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["TEST-T3", "TEST-T1", "TEST-T2"]);
    }

    #[test]
    fn merging_partials_keeps_comments_of_both() {
        let mut left = ResultTable::new();
        let mut failed = StepResult::with_status(Status::Failed);
        failed.rows.push(CommentRow::fail("left"));
        left.record(&key("TEST-T1"), step(1), failed);

        let mut right = ResultTable::new();
        let mut passed = StepResult::with_status(Status::Passed);
        passed.rows.push(CommentRow::pass("right"));
        right.record(&key("TEST-T1"), step(1), passed);
        right.record(&key("TEST-T9"), None, StepResult::with_status(Status::Blocked));

        left.merge(right);
        let merged = left.get(&key("TEST-T1")).unwrap();
        assert_eq!(merged.status(), Status::Failed);
        assert!(merged.mentions("left") && merged.mentions("right"));
        assert_eq!(left.get(&key("TEST-T9")).unwrap().status(), Status::Blocked);
    }

    #[test]
    fn partial_run_survives_json() {
        let mut cases = ResultTable::new();
        cases.record(&key("TEST-T1"), step(2), StepResult::with_status(Status::Passed));
        let partial = PartialRun {
            id: PartialId::generate(),
            session: SessionId::generate(),
            worker: 3,
            panics: 0,
            exited: false,
            cases,
        };
        let json = serde_json::to_string(&partial).unwrap();
        let back: PartialRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back, partial);
    }

    fn any_status() -> impl Strategy<Value = Status> {
        prop_oneof![
            Just(Status::NotExecuted),
            Just(Status::Passed),
            Just(Status::Blocked),
            Just(Status::Failed),
        ]
    }

    fn table_from(entries: &[(u8, u8, Status)]) -> ResultTable {
        let mut table = ResultTable::new();
        for (case, step_no, status) in entries {
            table.record(
                &key(&format!("TEST-T{}", case + 1)),
                step(u32::from(*step_no) + 1),
                StepResult::with_status(*status),
            );
        }
        table
    }

    fn statuses(table: &ResultTable) -> Vec<(String, Status)> {
        let mut out: Vec<_> = table
            .iter()
            .map(|(key, result)| (key.to_string(), result.status()))
            .collect();
        out.sort();
        out
    }

    proptest! {
        #[test]
        fn merge_order_does_not_change_statuses(
            a in proptest::collection::vec((0u8..4, 0u8..3, any_status()), 0..8),
            b in proptest::collection::vec((0u8..4, 0u8..3, any_status()), 0..8),
        ) {
            let mut ab = table_from(&a);
            ab.merge(table_from(&b));
            let mut ba = table_from(&b);
            ba.merge(table_from(&a));
            prop_assert_eq!(statuses(&ab), statuses(&ba));
        }
    }
}

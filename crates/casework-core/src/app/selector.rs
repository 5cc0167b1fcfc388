//! CaseSelector - 実行する case の選択と並べ替え
//!
//! # アルゴリズム
//! 1. allowlist か range が指定されていれば、
//!    eligible = (allowlist ∪ range に入る key) ∩ 発見済み key。
//!    それ以外の発見済み key は静的に skip
//! 2. 実行順 = 明示順序リストのうち eligible なもの（リスト順）、
//!    続いて残りの eligible key（発見順）
//! 3. 要求された（allowlist, 順序, range）が発見されなかった key は
//!    unimplemented として残す
//!    （新しい run の作成時には含めるが、実行はしない）
//!
//! 何も指定がなければ発見順そのままです。

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::config::ReportingConfig;
use crate::domain::CaseKey;

/// Inclusive range of case keys sharing project and number prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    project: String,
    prefix: String,
    low: u64,
    high: u64,
}

impl KeyRange {
    /// Build a range from two bounds; `None` when they cannot form one.
    pub fn new(low: &CaseKey, high: &CaseKey) -> Option<Self> {
        if low.project() != high.project() || low.number_prefix() != high.number_prefix() {
            return None;
        }
        let (lo, hi) = (low.trailing_number()?, high.trailing_number()?);
        if lo > hi {
            return None;
        }
        Some(Self {
            project: low.project().to_string(),
            prefix: low.number_prefix().to_string(),
            low: lo,
            high: hi,
        })
    }

    /// Parse a flat `low, high, low, high, ...` list. Malformed pairs are
    /// logged and dropped; the others still apply.
    pub fn parse_pairs<S: AsRef<str>>(raw: &[S]) -> Vec<KeyRange> {
        let mut ranges = Vec::new();
        for pair in raw.chunks(2) {
            let [low, high] = pair else {
                tracing::warn!(entry = pair[0].as_ref(), "ignoring test case range without upper bound");
                continue;
            };
            let (low, high) = (low.as_ref(), high.as_ref());
            let parsed = CaseKey::parse(low)
                .ok()
                .zip(CaseKey::parse(high).ok())
                .and_then(|(lo, hi)| KeyRange::new(&lo, &hi));
            match parsed {
                Some(range) => ranges.push(range),
                None => tracing::warn!(low, high, "ignoring malformed test case range"),
            }
        }
        ranges
    }

    /// Every key the range covers, low to high.
    pub fn keys(&self) -> impl Iterator<Item = CaseKey> + '_ {
        (self.low..=self.high)
            .filter_map(move |n| CaseKey::new(&self.project, format!("{}{n}", self.prefix)).ok())
    }

    pub fn contains(&self, key: &CaseKey) -> bool {
        key.project() == self.project
            && key.number_prefix() == self.prefix
            && key
                .trailing_number()
                .is_some_and(|n| (self.low..=self.high).contains(&n))
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{p}-{x}{lo}..{p}-{x}{hi}",
            p = self.project,
            x = self.prefix,
            lo = self.low,
            hi = self.high
        )
    }
}

/// Outcome of selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    /// Cases to execute, in execution order.
    pub order: Vec<CaseKey>,
    /// Discovered cases that are statically skipped.
    pub skipped: Vec<CaseKey>,
    /// Requested cases without an implementation.
    pub unimplemented: Vec<CaseKey>,
}

impl Selection {
    /// Cases linked to a newly created run.
    pub fn run_cases(&self) -> Vec<CaseKey> {
        self.order
            .iter()
            .chain(&self.unimplemented)
            .cloned()
            .collect()
    }

    pub fn position(&self, key: &CaseKey) -> Option<usize> {
        self.order.iter().position(|k| k == key)
    }

    pub fn is_selected(&self, key: &CaseKey) -> bool {
        self.order.contains(key)
    }

    pub fn is_skipped(&self, key: &CaseKey) -> bool {
        self.skipped.contains(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaseSelector {
    allowlist: Vec<CaseKey>,
    ranges: Vec<KeyRange>,
    order: Vec<CaseKey>,
    run_items: Option<Vec<CaseKey>>,
    append_to_cycle: bool,
}

impl CaseSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allowlist, ranges, order and append flag taken from the configuration.
    pub fn from_config(config: &ReportingConfig) -> Self {
        Self::new()
            .allow(config.test_case_keys.iter().cloned())
            .ranges(KeyRange::parse_pairs(&config.test_case_range))
            .order(config.test_case_order.iter().cloned())
            .append_to_cycle(config.append_to_cycle)
    }

    pub fn allow(mut self, keys: impl IntoIterator<Item = CaseKey>) -> Self {
        self.allowlist.extend(keys);
        self
    }

    pub fn ranges(mut self, ranges: impl IntoIterator<Item = KeyRange>) -> Self {
        self.ranges.extend(ranges);
        self
    }

    pub fn order(mut self, keys: impl IntoIterator<Item = CaseKey>) -> Self {
        self.order.extend(keys);
        self
    }

    /// Cases of an existing run being reported to.
    pub fn existing_run(mut self, items: Vec<CaseKey>) -> Self {
        self.run_items = Some(items);
        self
    }

    /// Keep cases outside the existing run eligible.
    pub fn append_to_cycle(mut self, append: bool) -> Self {
        self.append_to_cycle = append;
        self
    }

    /// Allowlist in effect, or `None` when nothing restricts by key.
    fn effective_allowlist(&self) -> Option<Vec<CaseKey>> {
        let run_items = self
            .run_items
            .as_ref()
            .filter(|items| !self.append_to_cycle && !items.is_empty());
        match (run_items, self.allowlist.is_empty()) {
            (None, true) => None,
            (None, false) => Some(self.allowlist.clone()),
            (Some(items), true) => Some(items.clone()),
            (Some(items), false) => Some(
                self.allowlist
                    .iter()
                    .filter(|key| items.contains(key))
                    .cloned()
                    .collect(),
            ),
        }
    }

    /// Explicit order, falling back to the order of the existing run.
    fn effective_order(&self) -> &[CaseKey] {
        match &self.run_items {
            Some(items) if self.order.is_empty() => items,
            _ => &self.order,
        }
    }

    pub fn select(&self, discovered: &[CaseKey]) -> Selection {
        let mut seen = HashSet::new();
        let discovered: Vec<&CaseKey> = discovered.iter().filter(|key| seen.insert(*key)).collect();

        let allowlist = self.effective_allowlist();
        let restricted = allowlist.is_some() || !self.ranges.is_empty();
        let allowed: HashSet<&CaseKey> = allowlist.iter().flatten().collect();
        let is_eligible = |key: &CaseKey| {
            !restricted || allowed.contains(key) || self.ranges.iter().any(|r| r.contains(key))
        };

        let (eligible, skipped): (Vec<&CaseKey>, Vec<&CaseKey>) =
            discovered.iter().copied().partition(|key| is_eligible(key));
        let eligible_set: HashSet<&CaseKey> = eligible.iter().copied().collect();

        let mut placed = HashSet::new();
        let mut order = Vec::with_capacity(eligible.len());
        for key in self.effective_order() {
            if eligible_set.contains(key) && placed.insert(key) {
                order.push(key.clone());
            }
        }
        for key in &eligible {
            if placed.insert(*key) {
                order.push((*key).clone());
            }
        }

        let ranged: Vec<CaseKey> = self.ranges.iter().flat_map(KeyRange::keys).collect();
        let mut requested = HashSet::new();
        let unimplemented = allowlist
            .iter()
            .flatten()
            .chain(&self.order)
            .chain(&ranged)
            .filter(|key| !seen.contains(key) && requested.insert(*key))
            .cloned()
            .collect();

        tracing::debug!(
            selected = order.len(),
            skipped = skipped.len(),
            "selected test cases"
        );

        Selection {
            order,
            skipped: skipped.into_iter().cloned().collect(),
            unimplemented,
        }
    }
}

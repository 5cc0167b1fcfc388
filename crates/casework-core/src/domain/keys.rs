//! Case keys, step indices and test-function name recognition.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::KeyError;

/// Project used when neither the function nor the configuration names one.
pub const DEFAULT_PROJECT: &str = "TEST";

/// Identifier of a tracked case: `PROJECT-NUMBER` (e.g. `TEST-T1`, `TEST-200`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CaseKey {
    project: String,
    number: String,
}

impl CaseKey {
    pub fn new(project: impl Into<String>, number: impl Into<String>) -> Result<Self, KeyError> {
        let project = project.into();
        let number = number.into();
        validate_project(&project)?;
        if number.is_empty() {
            return Err(KeyError::MissingNumber(format!("{project}-")));
        }
        Ok(Self { project, number })
    }

    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let raw = raw.trim();
        let (project, number) = raw
            .split_once('-')
            .ok_or_else(|| KeyError::MissingSeparator(raw.to_string()))?;
        Self::new(project, number)
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    /// Digits at the end of the number part (`12` for `T12`, `200` for `200`).
    pub fn trailing_number(&self) -> Option<u64> {
        let prefix_len = self.number_prefix().len();
        self.number[prefix_len..].parse().ok()
    }

    /// Number part without its trailing digits (`T` for `T12`, empty for `200`).
    pub fn number_prefix(&self) -> &str {
        self.number.trim_end_matches(|c: char| c.is_ascii_digit())
    }
}

fn validate_project(project: &str) -> Result<(), KeyError> {
    let mut chars = project.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(KeyError::InvalidProject(project.to_string()))
    }
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.project, self.number)
    }
}

impl FromStr for CaseKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CaseKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CaseKey> for String {
    fn from(key: CaseKey) -> Self {
        key.to_string()
    }
}

/// 1-based index of a step inside a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepIndex(NonZeroU32);

impl StepIndex {
    pub fn new(index: u32) -> Result<Self, KeyError> {
        NonZeroU32::new(index)
            .map(Self)
            .ok_or(KeyError::ZeroStep)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Position as expected by the tracking API (0-based).
    pub fn zero_based(self) -> u32 {
        self.0.get() - 1
    }
}

impl fmt::Display for StepIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

static TEST_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^test_(([A-Z]+[A-Z0-9_]*[^_])_)?(T[1-9]+[0-9]*)(_([1-9]+[0-9]*))*")
        .expect("test name pattern is valid")
});

/// A test function recognised as the implementation of a case (or of one of its steps).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseTarget {
    pub key: CaseKey,
    pub step: Option<StepIndex>,
}

/// Recognise `test_[<PROJECT>_]T<n>[_<step>]`.
///
/// The project embedded in the name wins over `fallback_project`, which in turn
/// wins over [`DEFAULT_PROJECT`].
pub fn parse_test_name(name: &str, fallback_project: Option<&str>) -> Option<CaseTarget> {
    let captures = TEST_NAME.captures(name)?;
    let number = captures.get(3)?.as_str();
    let project = captures
        .get(2)
        .map(|m| m.as_str())
        .or(fallback_project)
        .unwrap_or(DEFAULT_PROJECT);
    let key = CaseKey::new(project, number).ok()?;
    let step = captures
        .get(5)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .and_then(|n| StepIndex::new(n).ok());
    Some(CaseTarget { key, step })
}

/// Parse a list of raw keys, dropping (and logging) entries that are not keys.
pub fn parse_key_list<I, S>(raw: I) -> Vec<CaseKey>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|entry| {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                return None;
            }
            match CaseKey::parse(entry) {
                Ok(key) => Some(key),
                Err(error) => {
                    tracing::warn!(%entry, %error, "ignoring malformed case key");
                    None
                }
            }
        })
        .collect()
}

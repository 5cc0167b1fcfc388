//! Run - 報告先の test run と名前テンプレート

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::TemplateError;
use super::keys::CaseKey;

pub const DEFAULT_RUN_NAME: &str = "%(project_key) %(test_run_suffix)";
pub const DEFAULT_PLAN_NAME: &str = "%(project_key) %(test_plan_suffix)";

/// Reference to the run results are reported to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRef {
    pub key: String,
    pub project_key: String,
    #[serde(default)]
    pub plan_key: Option<String>,
    /// Cases already linked to the run.
    #[serde(default)]
    pub items: Vec<CaseKey>,
}

/// Outcome of run resolution, decided once before any case executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Resolution {
    Report(RunRef),
    Disabled { reason: String },
}

impl Resolution {
    pub fn disabled(reason: impl Into<String>) -> Self {
        Resolution::Disabled {
            reason: reason.into(),
        }
    }

    pub fn run(&self) -> Option<&RunRef> {
        match self {
            Resolution::Report(run) => Some(run),
            Resolution::Disabled { .. } => None,
        }
    }

    pub fn is_reporting(&self) -> bool {
        self.run().is_some()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Report(run) => match &run.plan_key {
                Some(plan) => write!(f, "reporting to {} ({}, plan {plan})", run.key, run.project_key),
                None => write!(f, "reporting to {} ({})", run.key, run.project_key),
            },
            Resolution::Disabled { reason } => write!(f, "reporting disabled: {reason}"),
        }
    }
}

/// Default run suffix: `test run YYYYmmddHHMM`.
pub fn default_run_suffix(now: DateTime<Utc>) -> String {
    format!("test run {}", now.format("%Y%m%d%H%M"))
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\((\w+)\)").expect("placeholder pattern is valid"));

/// Values a name template may refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameVars {
    pub project_key: String,
    pub test_run_suffix: String,
    pub test_plan_suffix: String,
    pub test_environment: String,
    pub local_user: String,
}

impl NameVars {
    fn lookup(&self, name: &str) -> Option<&str> {
        let value = match name {
            "project_key" => &self.project_key,
            "test_run_suffix" => &self.test_run_suffix,
            "test_plan_suffix" => &self.test_plan_suffix,
            "test_environment" => &self.test_environment,
            "local_user" => &self.local_user,
            _ => return None,
        };
        Some(value)
    }
}

/// A run or plan name with `%(name)` placeholders.
///
/// Placeholders are checked when the template is parsed, so rendering cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate(String);

impl NameTemplate {
    pub fn parse(template: impl Into<String>) -> Result<Self, TemplateError> {
        let template = template.into();
        let probe = NameVars::default();
        if let Some(unknown) = PLACEHOLDER
            .captures_iter(&template)
            .filter_map(|c| c.get(1))
            .find(|m| probe.lookup(m.as_str()).is_none())
        {
            return Err(TemplateError::UnknownPlaceholder {
                placeholder: unknown.as_str().to_string(),
                template,
            });
        }
        Ok(Self(template))
    }

    pub fn default_run() -> Self {
        Self(DEFAULT_RUN_NAME.to_string())
    }

    pub fn default_plan() -> Self {
        Self(DEFAULT_PLAN_NAME.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn render(&self, vars: &NameVars) -> String {
        PLACEHOLDER
            .replace_all(&self.0, |caps: &regex::Captures<'_>| {
                vars.lookup(&caps[1]).unwrap_or_default().to_string()
            })
            .into_owned()
    }
}

//! Configuration - 環境変数と `config/global_config.json` の階層的な読み込み
//!
//! key `k` の探索順：
//! 1. 環境変数 `k`
//! 2. 環境変数 `K`（大文字）
//! 3. JSON ファイルの `k`
//! 4. JSON ファイルの `cfg_k`
//!
//! `cfg_` で始まる key は JSON ファイルだけを見ます。
//! コマンドラインの `Overrides` はこれらすべてより優先されます。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{CaseKey, NameTemplate, TemplateError, default_run_suffix, parse_key_list};
use crate::ports::CiInfo;

pub const CONFIG_FILE: &str = "config/global_config.json";
pub const DEFAULT_RESTRICT_BRANCH_NAME: &str = "origin/master";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load config from file {path}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid bool value for `{key}`: {value}")]
    InvalidBool { key: String, value: String },

    #[error("invalid list value for `{key}`: {value}")]
    InvalidList { key: String, value: String },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("the branch `{branch}` cannot be used to report as reporting is restricted to `{expected}`")]
    BranchRestricted { branch: String, expected: String },
}

/// Raw settings from the environment and the JSON config file.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    env: HashMap<String, String>,
    file: Map<String, Value>,
}

impl Settings {
    /// Read the process environment and `<root>/config/global_config.json` (if present).
    pub fn load(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = root.as_ref().join(CONFIG_FILE);
        let file = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|source| ConfigError::Malformed { path: path.clone(), source })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        tracing::debug!(path = %path.display(), keys = file.len(), "loaded settings");
        Ok(Self::from_parts(std::env::vars().collect(), file))
    }

    pub fn from_parts(env: HashMap<String, String>, file: Map<String, Value>) -> Self {
        Self { env, file }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if key.to_lowercase().starts_with("cfg_") {
            return self.file.get(key).cloned();
        }
        self.env
            .get(key)
            .or_else(|| self.env.get(&key.to_uppercase()))
            .map(|value| Value::String(value.clone()))
            .or_else(|| self.file.get(key).cloned())
            .or_else(|| self.file.get(&format!("cfg_{key}")).cloned())
    }

    /// String form of a scalar setting.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let invalid = |value: &Value| ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        };
        match &value {
            Value::Null => Ok(Some(false)),
            Value::Bool(b) => Ok(Some(*b)),
            Value::Number(n) => n.as_i64().map(|n| Some(n != 0)).ok_or_else(|| invalid(&value)),
            Value::String(s) => parse_bool(s).map(Some).ok_or_else(|| invalid(&value)),
            _ => Err(invalid(&value)),
        }
    }

    /// Comma separated string or JSON array of strings.
    pub fn get_list(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(split_list(&s)),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.trim().to_string()),
                    other => Err(ConfigError::InvalidList {
                        key: key.to_string(),
                        value: other.to_string(),
                    }),
                })
                .collect(),
            Some(other) => Err(ConfigError::InvalidList {
                key: key.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Command-line layer; set values win over [`Settings`].
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub adaptavist: Option<bool>,
    pub project_key: Option<String>,
    pub test_run_key: Option<String>,
    pub test_plan_key: Option<String>,
    pub test_run_name: Option<String>,
    pub test_plan_name: Option<String>,
    pub test_case_keys: Option<Vec<String>>,
    pub test_case_order: Option<Vec<String>>,
    pub test_case_range: Option<Vec<String>>,
    pub test_environment: Option<Vec<String>>,
    pub append_to_cycle: Option<bool>,
    pub restrict_user: Option<String>,
    pub worker: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JiraCredentials {
    pub server: String,
    pub username: String,
    pub password: String,
}

/// Typed reporting configuration.
#[derive(Debug, Clone)]
pub struct ReportingConfig {
    pub enabled: bool,
    pub project_key: Option<String>,
    pub test_run_key: Option<String>,
    pub test_plan_key: Option<String>,
    pub test_plan_suffix: Option<String>,
    pub test_plan_folder: Option<String>,
    pub test_run_suffix: String,
    pub test_run_folder: Option<String>,
    pub run_name: NameTemplate,
    pub plan_name: NameTemplate,
    pub test_environment: Option<String>,
    pub test_case_keys: Vec<CaseKey>,
    pub test_case_order: Vec<CaseKey>,
    pub test_case_range: Vec<String>,
    pub skip_ntc_methods: bool,
    pub append_to_cycle: bool,
    pub restrict_user: Option<String>,
    pub local_user: String,
    pub jira: Option<JiraCredentials>,
    pub ci: CiInfo,
    pub partial_output: Option<PathBuf>,
    pub worker: u32,
}

impl ReportingConfig {
    pub fn load(
        settings: &Settings,
        overrides: &Overrides,
        now: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let str_or = |over: &Option<String>, key: &str| {
            over.clone()
                .or_else(|| settings.get_str(key))
                .filter(|s| !s.trim().is_empty())
        };
        let list_or = |over: &Option<Vec<String>>, key: &str| -> Result<Vec<String>, ConfigError> {
            match over {
                Some(list) => Ok(list.clone()),
                None => settings.get_list(key),
            }
        };
        let bool_or = |over: Option<bool>, key: &str| -> Result<bool, ConfigError> {
            match over {
                Some(b) => Ok(b),
                None => Ok(settings.get_bool(key)?.unwrap_or(false)),
            }
        };

        let worker = match overrides.worker {
            Some(worker) => worker,
            None => settings
                .get_str("worker_index")
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(0),
        };
        let environments = list_or(&overrides.test_environment, "test_environment")?;
        let test_environment = environments
            .get(worker as usize)
            .or(environments.last())
            .cloned();

        let run_name = match str_or(&overrides.test_run_name, "test_run_name") {
            Some(raw) => NameTemplate::parse(raw)?,
            None => NameTemplate::default_run(),
        };
        let plan_name = match str_or(&overrides.test_plan_name, "test_plan_name") {
            Some(raw) => NameTemplate::parse(raw)?,
            None => NameTemplate::default_plan(),
        };

        let enabled = bool_or(overrides.adaptavist, "adaptavist")?;
        let branch = settings.get_str("GIT_BRANCH").unwrap_or_default();
        // Without reporting there is nothing to restrict.
        if enabled && settings.get_bool("restrict_branch")?.unwrap_or(false) {
            let expected = settings
                .get_str("restrict_branch_name")
                .unwrap_or_else(|| DEFAULT_RESTRICT_BRANCH_NAME.to_string());
            if branch != expected {
                return Err(ConfigError::BranchRestricted { branch, expected });
            }
        }

        let jira = settings.get_str("jira_server").map(|server| JiraCredentials {
            server,
            username: settings.get_str("jira_username").unwrap_or_default(),
            password: settings.get_str("jira_password").unwrap_or_default(),
        });

        let local_user = settings
            .get_str("USER")
            .or_else(|| settings.get_str("USERNAME"))
            .unwrap_or_default()
            .to_lowercase();

        let ci = CiInfo {
            build_url: settings
                .get_str("BUILD_URL")
                .filter(|url| !url.is_empty())
                .map(|url| shorten_build_url(&url, settings.get_str("JENKINS_URL").as_deref())),
            code_base: settings
                .get_str("GIT_URL")
                .or_else(git_remote_url)
                .filter(|url| !url.is_empty())
                .map(|url| https_code_base(&url)),
        };

        Ok(Self {
            enabled,
            project_key: str_or(&overrides.project_key, "project_key"),
            test_run_key: str_or(&overrides.test_run_key, "test_run_key"),
            test_plan_key: str_or(&overrides.test_plan_key, "test_plan_key"),
            test_plan_suffix: str_or(&None, "test_plan_suffix"),
            test_plan_folder: str_or(&None, "test_plan_folder"),
            test_run_suffix: str_or(&None, "test_run_suffix")
                .unwrap_or_else(|| default_run_suffix(now)),
            test_run_folder: str_or(&None, "test_run_folder"),
            run_name,
            plan_name,
            test_environment,
            test_case_keys: parse_key_list(list_or(&overrides.test_case_keys, "test_case_keys")?),
            test_case_order: parse_key_list(list_or(&overrides.test_case_order, "test_case_order")?),
            test_case_range: list_or(&overrides.test_case_range, "test_case_range")?,
            skip_ntc_methods: bool_or(None, "skip_ntc_methods")?,
            append_to_cycle: bool_or(overrides.append_to_cycle, "append_to_cycle")?,
            restrict_user: str_or(&overrides.restrict_user, "restrict_user"),
            local_user,
            jira,
            ci,
            partial_output: str_or(&None, "partial_output").map(PathBuf::from),
            worker,
        })
    }
}

/// `https://jenkins/job/name/42/` becomes `https://jenkins/job/name` when it
/// lives under the Jenkins root.
pub fn shorten_build_url(build_url: &str, jenkins_url: Option<&str>) -> String {
    match jenkins_url {
        Some(root) if !root.is_empty() && build_url.starts_with(root) => {
            build_url.split('/').take(5).collect::<Vec<_>>().join("/")
        }
        _ => build_url.to_string(),
    }
}

/// `git@host:org/repo.git` becomes `https://host/org/repo`.
pub fn https_code_base(url: &str) -> String {
    if url.starts_with("git@") {
        url.replace(':', "/")
            .replace(".git", "")
            .replace("git@", "https://")
    } else {
        url.to_string()
    }
}

fn git_remote_url() -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["config", "--get", "remote.origin.url"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

//! RunResolver - case 実行前に報告先の run を 1 つに決める
//!
//! # 解決順
//! 1. フラグ無効 / ユーザー制限 → Disabled
//! 2. 既存 run key → 取得（なければ Disabled）
//! 3. project key なし → Disabled
//! 4. plan: 明示 key、または suffix 指定時に名前完全一致 → suffix 一致 → 新規作成
//! 5. run: 同名の run を再利用、なければ新規作成
//! 6. plan と run を紐付け
//! 7. test environment を確認（なければ作成）
//!
//! 解決中の tracking エラーはすべて Disabled になります（致命的ではない）。

use crate::config::ReportingConfig;
use crate::domain::{CaseKey, NameVars, Resolution, RunRef, TrackingError};
use crate::ports::{NewTestPlan, NewTestRun, TrackingApi};

/// First half of resolution, decided before cases are selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Disabled(String),
    /// Report to an existing run; its cases restrict the selection.
    Existing(RunRef),
    /// A run will be found or created for this project.
    New { project_key: String },
}

pub struct RunResolver<'a> {
    tracking: &'a dyn TrackingApi,
    config: &'a ReportingConfig,
}

impl<'a> RunResolver<'a> {
    pub fn new(tracking: &'a dyn TrackingApi, config: &'a ReportingConfig) -> Self {
        Self { tracking, config }
    }

    fn name_vars(&self, project_key: &str) -> NameVars {
        NameVars {
            project_key: project_key.to_string(),
            test_run_suffix: self.config.test_run_suffix.clone(),
            test_plan_suffix: self.config.test_plan_suffix.clone().unwrap_or_default(),
            test_environment: self.config.test_environment.clone().unwrap_or_default(),
            local_user: self.config.local_user.clone(),
        }
    }

    /// Steps 1 to 3.
    pub async fn target(&self) -> Target {
        if !self.config.enabled {
            return Target::Disabled("reporting is not enabled".into());
        }
        if let Some(user) = &self.config.restrict_user
            && *user != self.config.local_user
        {
            return Target::Disabled(format!("reporting is restricted to user {user}"));
        }
        if let Some(run_key) = &self.config.test_run_key {
            return match self.existing(run_key).await {
                Ok(Some(run)) => Target::Existing(run),
                Ok(None) => {
                    tracing::warn!(run = %run_key, "test run not found, reporting disabled");
                    Target::Disabled(format!("test run {run_key} not found"))
                }
                Err(error) => {
                    tracing::warn!(run = %run_key, %error, "test run unreachable, reporting disabled");
                    Target::Disabled(error.to_string())
                }
            };
        }
        match &self.config.project_key {
            Some(project_key) => Target::New {
                project_key: project_key.clone(),
            },
            None => Target::Disabled("neither test run key nor project key configured".into()),
        }
    }

    async fn existing(&self, run_key: &str) -> Result<Option<RunRef>, TrackingError> {
        let Some(info) = self.tracking.get_test_run(run_key).await? else {
            return Ok(None);
        };
        let run = RunRef {
            key: info.key,
            project_key: info.project_key,
            plan_key: self.config.test_plan_key.clone(),
            items: info.items,
        };
        if let Some(plan_key) = &run.plan_key {
            self.tracking.link_run_to_plan(plan_key, &run.key).await?;
        }
        Ok(Some(run))
    }

    /// Steps 4 to 6 for a run that is found by name or created.
    pub async fn create(&self, project_key: &str, run_cases: Vec<CaseKey>) -> Resolution {
        match self.find_or_create(project_key, run_cases).await {
            Ok(run) => {
                tracing::info!(run = %run.key, plan = ?run.plan_key, "resolved test run");
                Resolution::Report(run)
            }
            Err(error) => {
                tracing::warn!(project = project_key, %error, "run resolution failed, reporting disabled");
                Resolution::disabled(error.to_string())
            }
        }
    }

    async fn find_or_create(
        &self,
        project_key: &str,
        run_cases: Vec<CaseKey>,
    ) -> Result<RunRef, TrackingError> {
        let vars = self.name_vars(project_key);
        let plan_key = self.plan(project_key, &vars).await?;

        let run_name = self.config.run_name.render(&vars);
        let run = match self.tracking.find_test_run_by_name(&run_name).await? {
            Some(found) => {
                tracing::debug!(run = %found.key, name = %run_name, "reusing test run");
                RunRef {
                    key: found.key,
                    project_key: project_key.to_string(),
                    plan_key: plan_key.clone(),
                    items: found.items,
                }
            }
            None => {
                let key = self
                    .tracking
                    .create_test_run(&NewTestRun {
                        project_key: project_key.to_string(),
                        plan_key: plan_key.clone(),
                        name: run_name,
                        folder: self.config.test_run_folder.clone(),
                        cases: run_cases.clone(),
                    })
                    .await?;
                RunRef {
                    key,
                    project_key: project_key.to_string(),
                    plan_key: plan_key.clone(),
                    items: run_cases,
                }
            }
        };

        if let Some(plan_key) = &plan_key {
            self.tracking.link_run_to_plan(plan_key, &run.key).await?;
        }
        Ok(run)
    }

    async fn plan(&self, project_key: &str, vars: &NameVars) -> Result<Option<String>, TrackingError> {
        if let Some(key) = &self.config.test_plan_key {
            return Ok(Some(key.clone()));
        }
        let Some(suffix) = &self.config.test_plan_suffix else {
            return Ok(None);
        };
        let plan_name = self.config.plan_name.render(vars);
        let plans = self.tracking.get_test_plans(project_key).await?;
        let found = plans
            .iter()
            .find(|plan| plan.name == plan_name)
            .or_else(|| plans.iter().find(|plan| plan.name.ends_with(suffix.as_str())));
        if let Some(plan) = found {
            return Ok(Some(plan.key.clone()));
        }
        let key = self
            .tracking
            .create_test_plan(&NewTestPlan {
                project_key: project_key.to_string(),
                name: plan_name,
                folder: self.config.test_plan_folder.clone(),
            })
            .await?;
        Ok(Some(key))
    }

    /// Step 7.
    pub async fn ensure_environment(&self, run: &RunRef) -> Result<(), TrackingError> {
        let Some(environment) = &self.config.test_environment else {
            return Ok(());
        };
        let known = self.tracking.list_environments(&run.project_key).await?;
        if !known.iter().any(|name| name == environment) {
            self.tracking
                .create_environment(&run.project_key, environment)
                .await?;
        }
        Ok(())
    }

    /// Executor recorded with results; `None` when the local user is unknown.
    pub async fn executor(&self) -> Option<String> {
        let user = &self.config.local_user;
        if user.is_empty() {
            return None;
        }
        match self.tracking.is_known_user(user).await {
            Ok(true) => Some(user.clone()),
            Ok(false) => {
                tracing::warn!(user = %user, "local user is not known, results are reported without executor");
                None
            }
            Err(error) => {
                tracing::warn!(user = %user, %error, "could not check local user");
                None
            }
        }
    }

    /// All steps in one go, for callers that already know the cases.
    pub async fn resolve(&self, run_cases: Vec<CaseKey>) -> Resolution {
        let resolution = match self.target().await {
            Target::Disabled(reason) => return Resolution::disabled(reason),
            Target::Existing(run) => Resolution::Report(run),
            Target::New { project_key } => self.create(&project_key, run_cases).await,
        };
        self.finish(resolution).await
    }

    /// Apply step 7 to a resolved run.
    pub async fn finish(&self, resolution: Resolution) -> Resolution {
        let Resolution::Report(run) = &resolution else {
            return resolution;
        };
        match self.ensure_environment(run).await {
            Ok(()) => resolution,
            Err(error) => {
                tracing::warn!(%error, "test environment setup failed, reporting disabled");
                Resolution::disabled(error.to_string())
            }
        }
    }
}

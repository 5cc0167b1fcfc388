//! SessionBuilder - Session の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use crate::config::ReportingConfig;
use crate::domain::TrackingError;
use crate::impls::{HttpTracking, InMemoryTracking};
use crate::ports::{Clock, SystemClock, TrackingApi};

use super::session::Session;

/// SessionBuilder は Session を構築
///
/// # 使用例
/// ```ignore
/// let session = SessionBuilder::new()
///     .config(ReportingConfig::load(&settings, &overrides, Utc::now())?)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - tracking を明示しない場合、config の jira 設定から HTTP クライアントを作る
/// - 報告が有効なのに接続先がなければ BuildError を返す
#[derive(Default)]
pub struct SessionBuilder {
    config: Option<ReportingConfig>,
    tracking: Option<Arc<dyn TrackingApi>>,
    clock: Option<Arc<dyn Clock>>,
}

/// BuildError は Session 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no reporting configuration given")]
    MissingConfig,

    #[error("reporting is enabled but jira_server is not configured")]
    MissingServer,

    #[error("could not create the tracking client")]
    Tracking(#[source] TrackingError),
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ReportingConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Tracking service to use instead of the configured server.
    pub fn tracking(mut self, tracking: Arc<dyn TrackingApi>) -> Self {
        self.tracking = Some(tracking);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Session, BuildError> {
        let config = self.config.ok_or(BuildError::MissingConfig)?;
        let tracking: Arc<dyn TrackingApi> = match (self.tracking, &config.jira) {
            (Some(tracking), _) => tracking,
            (None, Some(jira)) => Arc::new(
                HttpTracking::new(&jira.server, &jira.username, &jira.password)
                    .map_err(BuildError::Tracking)?,
            ),
            (None, None) if config.enabled => return Err(BuildError::MissingServer),
            // Never contacted: resolution stops at the disabled flag.
            (None, None) => Arc::new(InMemoryTracking::new()),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        Ok(Session::new(config, tracking, clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::resolver::tests::config;
    use serde_json::json;

    #[test]
    fn build_without_config_fails() {
        let built = SessionBuilder::new().build();
        assert!(matches!(built, Err(BuildError::MissingConfig)));
    }

    #[test]
    fn enabled_reporting_needs_a_server() {
        let built = SessionBuilder::new()
            .config(config(json!({ "adaptavist": true, "project_key": "TEST" })))
            .build();
        assert!(matches!(built, Err(BuildError::MissingServer)));
    }

    #[test]
    fn server_from_config_builds_an_http_client() {
        let built = SessionBuilder::new()
            .config(config(json!({
                "adaptavist": true,
                "project_key": "TEST",
                "jira_server": "https://jira.example.com",
                "jira_username": "bot",
                "jira_password": "secret",
            })))
            .build();
        assert!(built.is_ok());
    }

    #[test]
    fn disabled_reporting_builds_without_a_server() {
        let session = SessionBuilder::new()
            .config(config(json!({ "project_key": "TEST" })))
            .build()
            .unwrap();
        assert!(!session.resolution().is_reporting());
    }
}

//! Errors - エラー型と分類
//!
//! - `KeyError`: case key / step index のパースエラー
//! - `TemplateError`: run / plan 名テンプレートのエラー
//! - `TrackingError`: tracking service との通信エラー（`ErrorKind` で運用分類）

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("case key `{0}` is missing the `-` separator")]
    MissingSeparator(String),

    #[error("case key `{0}` has no number")]
    MissingNumber(String),

    #[error("`{0}` is not a valid project key")]
    InvalidProject(String),

    #[error("step indices start at 1")]
    ZeroStep,
}

/// 名前テンプレートのエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("invalid name template `{template}`: placeholder `{placeholder}` not known")]
    UnknownPlaceholder { template: String, placeholder: String },
}

/// ErrorKind は tracking エラーの分類
///
/// - Transient: 一時的なエラー（サーバー側 5xx など、再実行で回復しうる）
/// - Permanent: 恒久的なエラー（4xx、リクエスト内容の誤り）
/// - Infrastructure: 通信経路の障害（接続不可、TLS、タイムアウト）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// A failed call against the tracking service.
#[derive(Debug, Error)]
#[error("tracking request failed ({kind:?}): {message}")]
pub struct TrackingError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TrackingError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Infrastructure, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn tracking_error_display_carries_kind() {
        let err = TrackingError::permanent("no such run");
        assert_eq!(
            err.to_string(),
            "tracking request failed (Permanent): no such run"
        );
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn tracking_error_exposes_source() {
        let io = std::io::Error::other("socket closed");
        let err = TrackingError::infrastructure("request failed").with_source(io);
        assert_eq!(err.source().unwrap().to_string(), "socket closed");
    }
}

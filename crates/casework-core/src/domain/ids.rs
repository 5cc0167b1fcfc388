//! Session identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID を使います。ひとつのテストセッションと、
//! そのセッションの worker が書き出す partial run を区別するためのものです。
//!
//! ## Phantom Type パターン
//! `Id<T>` というジェネリック型で共通実装を提供し、`T` はコンパイル時の
//! 型安全性のためだけのマーカー型です（実行時にはメモリを消費しません）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"session-", "partial-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// 新しい ID を生成（現在時刻ベース）
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Session のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Session {}

impl IdMarker for Session {
    fn prefix() -> &'static str {
        "session-"
    }
}

/// Partial run のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partial {}

impl IdMarker for Partial {
    fn prefix() -> &'static str {
        "partial-"
    }
}

/// Identifier of one test session (one host-runner invocation).
pub type SessionId = Id<Session>;

/// Identifier of a partial run written by an isolated worker.
pub type PartialId = Id<Partial>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid1 = Ulid::new();
        let ulid2 = Ulid::new();

        let session = SessionId::from_ulid(ulid1);
        let partial = PartialId::from_ulid(ulid2);

        assert_eq!(session.as_ulid(), ulid1);
        assert_eq!(partial.as_ulid(), ulid2);

        assert!(session.to_string().starts_with("session-"));
        assert!(partial.to_string().starts_with("partial-"));
        // let _: SessionId = partial; // <- does not compile
    }

    #[test]
    fn id_serializes_as_bare_ulid() {
        let id = SessionId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));

        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

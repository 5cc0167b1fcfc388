//! Domain model (keys, statuses, actions, results, runs).
//!
//! ネットワークや host runner に依存しない純粋な型だけを置きます。
//! - keys / ids: case key, step index, session id
//! - status / action: 集約ルールと check 失敗時の制御
//! - result / run: 集約単位と報告先

pub mod action;
pub mod errors;
pub mod ids;
pub mod keys;
pub mod result;
pub mod run;
pub mod status;

pub use self::action::{Abort, Action, Control, StopMode};
pub use self::errors::{ErrorKind, KeyError, TemplateError, TrackingError};
pub use self::ids::{PartialId, SessionId};
pub use self::keys::{CaseKey, CaseTarget, DEFAULT_PROJECT, StepIndex, parse_key_list, parse_test_name};
pub use self::result::{Attachment, Badge, CaseResult, CommentRow, StepResult};
pub use self::run::{NameTemplate, NameVars, Resolution, RunRef, default_run_suffix};
pub use self::status::Status;

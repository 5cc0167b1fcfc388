//! Harness - libtest-mimic 上で case を実行する host runner 連携
//!
//! `harness = false` のテストバイナリから使います。
//!
//! ```ignore
//! fn main() {
//!     Harness::from_env()
//!         .expect("reporting configuration")
//!         .case(HarnessCase::new("test_PRJ_T1", |case| {
//!             case.run_step(1, |step| step.check(true, "never", Action::FailContext).proceed())
//!         }))
//!         .test("test_helpers_work", || Ok(()))
//!         .main();
//! }
//! ```
//!
//! # 学習ポイント
//! - 名前から case key を認識し、選択結果に従って trial を並べ替える
//! - `catch_unwind` で panic を捕まえ、どの経路でも case を確定させる
//! - Session は `Arc<Mutex<_>>` で trial 間に共有し、終了後に取り戻す

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use libtest_mimic::{Arguments, Conclusion, Failed, Trial};

use crate::app::{
    BuildError, CaseError, CaseScope, Gate, HostOutcome, Session, SessionBuilder,
};
use crate::config::{ConfigError, Overrides, ReportingConfig, Settings};
use crate::domain::{CaseKey, CaseTarget, Status, parse_test_name};

type CaseFn = dyn Fn(&mut CaseScope<'_>) -> Result<(), CaseError> + Send + Sync;
type PlainFn = dyn Fn() -> Result<(), String> + Send + Sync;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("could not start the async runtime")]
    Runtime(#[source] std::io::Error),

    #[error("session is still shared after the run")]
    SessionInUse,

    #[error("could not write partial results to {path}")]
    Partial {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode partial results")]
    Encode(#[from] serde_json::Error),
}

/// A test function implementing a case (or one step of a case).
pub struct HarnessCase {
    name: String,
    body: Arc<CaseFn>,
    project: Option<String>,
    block: Option<String>,
}

impl HarnessCase {
    /// `name` follows `test_[<PROJECT>_]T<n>[_<step>]`. A name without a case
    /// key is logged at `warn` and runs as a plain test that always fails.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut CaseScope<'_>) -> Result<(), CaseError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
            project: None,
            block: None,
        }
    }

    /// Project used when the name does not carry one.
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Report the case as blocked without running it.
    pub fn block(mut self, reason: impl Into<String>) -> Self {
        self.block = Some(reason.into());
        self
    }

    pub fn block_if(self, condition: bool, reason: impl Into<String>) -> Self {
        if condition { self.block(reason) } else { self }
    }
}

struct PlainTest {
    name: String,
    body: Arc<PlainFn>,
}

struct Recognised {
    case: HarnessCase,
    target: CaseTarget,
}

pub struct Harness {
    session: Session,
    cases: Vec<HarnessCase>,
    plain: Vec<PlainTest>,
}

impl Harness {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            cases: Vec::new(),
            plain: Vec::new(),
        }
    }

    /// Session configured from the environment and `config/global_config.json`.
    pub fn from_env() -> Result<Self, HarnessError> {
        let settings = Settings::load(".")?;
        let config = ReportingConfig::load(&settings, &Overrides::default(), Utc::now())?;
        Ok(Self::new(SessionBuilder::new().config(config).build()?))
    }

    pub fn case(mut self, case: HarnessCase) -> Self {
        self.cases.push(case);
        self
    }

    /// A test that does not implement a case.
    pub fn test<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.plain.push(PlainTest {
            name: name.into(),
            body: Arc::new(body),
        });
        self
    }

    /// Parse command line arguments, run, and exit with libtest's exit code.
    pub fn main(self) -> ! {
        match self.run(Arguments::from_args()) {
            Ok(conclusion) => conclusion.exit(),
            Err(error) => {
                eprintln!("error: {error}");
                std::process::exit(101)
            }
        }
    }

    pub fn run(self, mut args: Arguments) -> Result<Conclusion, HarnessError> {
        let Self {
            mut session,
            cases,
            mut plain,
        } = self;
        args.test_threads = Some(1);

        let project = session.config().project_key.clone();
        let mut recognised = Vec::new();
        for case in cases {
            let fallback = case.project.clone().or_else(|| project.clone());
            match parse_test_name(&case.name, fallback.as_deref()) {
                Some(target) => recognised.push(Recognised { case, target }),
                None => {
                    tracing::warn!(name = %case.name, "test name carries no case key");
                    plain.push(PlainTest {
                        name: case.name,
                        body: Arc::new(|| Err("test name carries no case key".to_string())),
                    });
                }
            }
        }

        let mut discovered: Vec<CaseKey> = Vec::new();
        for item in &recognised {
            if !discovered.contains(&item.target.key) {
                discovered.push(item.target.key.clone());
            }
        }
        let skip_plain = session.config().skip_ntc_methods;

        // Listing executes nothing, so the run is neither resolved nor reported.
        if args.list {
            let shared = Arc::new(Mutex::new(session));
            let mut trials: Vec<Trial> = recognised
                .into_iter()
                .map(|item| case_trial(item, Arc::clone(&shared)))
                .collect();
            trials.extend(plain.into_iter().map(|test| plain_trial(test, skip_plain)));
            return Ok(libtest_mimic::run(&args, trials));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(HarnessError::Runtime)?;
        let selection = runtime.block_on(session.prepare(&discovered)).clone();
        for key in &selection.unimplemented {
            tracing::info!(case = %key, "requested case has no implementation");
        }

        // Stable: same-position trials keep registration order.
        recognised.sort_by_key(|item| selection.position(&item.target.key).unwrap_or(usize::MAX));

        let shared = Arc::new(Mutex::new(session));
        let mut trials = Vec::with_capacity(recognised.len() + plain.len());
        for item in recognised {
            let ignored = selection.is_skipped(&item.target.key);
            trials.push(case_trial(item, Arc::clone(&shared)).with_ignored_flag(ignored));
        }
        trials.extend(plain.into_iter().map(|test| plain_trial(test, skip_plain)));

        let conclusion = libtest_mimic::run(&args, trials);

        let session = Arc::try_unwrap(shared)
            .map_err(|_| HarnessError::SessionInUse)?
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        match session.config().partial_output.clone() {
            Some(path) => write_partial(&path, session)?,
            None => {
                let report = runtime.block_on(session.finish());
                println!("{}", report.summary.line());
                if let Some(links) = &report.links {
                    println!("traceability: {}", links.traceability);
                    println!("test results: {}", links.test_results);
                    println!("coverage: {}", links.coverage);
                }
                if let Some(submission) = &report.submission {
                    for failure in &submission.failures {
                        eprintln!("submission failed for {}: {}", failure.case_key, failure.error);
                    }
                }
            }
        }
        Ok(conclusion)
    }
}

fn lock(shared: &Mutex<Session>) -> MutexGuard<'_, Session> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn case_trial(item: Recognised, shared: Arc<Mutex<Session>>) -> Trial {
    let Recognised { case, target } = item;
    let HarnessCase { name, body, block, .. } = case;
    Trial::test(name, move || {
        let mut session = lock(&shared);
        let key = target.key;
        let blocked = match session.gate(&key) {
            Gate::Skip => {
                tracing::info!(case = %key, "case not run");
                return Ok(());
            }
            Gate::Block(reason) => Some(reason),
            Gate::Run => block,
        };
        if let Some(reason) = blocked {
            session.block_case(&key, reason);
            return Ok(());
        }

        let mut scope = session.begin_case(key.clone()).with_step(target.step);
        let outcome = match catch_unwind(AssertUnwindSafe(|| body(&mut scope))) {
            Ok(result) => HostOutcome::from_result(result),
            Err(payload) => HostOutcome::Panicked(panic_message(payload.as_ref())),
        };
        let message = match &outcome {
            HostOutcome::Failed(message) | HostOutcome::Panicked(message) => Some(message.clone()),
            _ => None,
        };
        match scope.finish(outcome) {
            Status::Failed => Err(message.unwrap_or_else(|| format!("{key} failed")).into()),
            _ => Ok(()),
        }
    })
    .with_kind("case")
}

fn plain_trial(test: PlainTest, ignored: bool) -> Trial {
    let body = test.body;
    Trial::test(test.name, move || body().map_err(Failed::from)).with_ignored_flag(ignored)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "test panicked".to_string()
    }
}

fn write_partial(path: &Path, session: Session) -> Result<(), HarnessError> {
    let partial = session.into_partial();
    let json = serde_json::to_vec_pretty(&partial)?;
    let io_error = |source| HarnessError::Partial {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, json).map_err(io_error)?;
    tracing::info!(path = %path.display(), cases = partial.cases.len(), "wrote partial results");
    Ok(())
}

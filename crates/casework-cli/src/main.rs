//! `casework` - plan, resolve and report test case results from the command line.
//!
//! - `plan`: case selection only, nothing is sent
//! - `resolve`: find or create the target run
//! - `report`: merge worker partials by key and submit them

mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use casework_core::app::{
    BuildError, CaseSelector, PartialRun, Selection, Session, SessionBuilder, SessionReport,
};
use casework_core::config::{ConfigError, ReportingConfig, Settings};
use casework_core::domain::{CaseKey, KeyError, Resolution};
use casework_core::impls::InMemoryTracking;
use chrono::Utc;
use clap::Parser;
use serde::Serialize;

use crate::cli::{Cli, Command};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("invalid case key")]
    Key(#[from] KeyError),

    #[error("could not read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a partial result file")]
    Partial {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not encode output")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct PlanOutput<'a> {
    selection: &'a Selection,
    run_cases: Vec<CaseKey>,
}

#[derive(Debug, Serialize)]
struct ResolveOutput<'a> {
    resolution: &'a Resolution,
    executor: Option<&'a str>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Applications embedding the library install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            let mut source = std::error::Error::source(&error);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let settings = Settings::load(&cli.config_dir)?;
    let config = ReportingConfig::load(&settings, &cli.overrides.into_overrides(), Utc::now())?;

    if let Command::Plan { discovered } = &cli.command {
        let discovered = discovered
            .iter()
            .map(|raw| CaseKey::parse(raw.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        let selection = CaseSelector::from_config(&config).select(&discovered);
        let output = PlanOutput {
            run_cases: selection.run_cases(),
            selection: &selection,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(ExitCode::SUCCESS);
    }

    let dry_run = cli.dry_run.then(|| Arc::new(InMemoryTracking::new()));
    let mut builder = SessionBuilder::new().config(config);
    if let Some(tracking) = &dry_run {
        builder = builder.tracking(tracking.clone());
    }
    let mut session = builder.build()?;

    let code = match cli.command {
        Command::Plan { .. } => ExitCode::SUCCESS,
        Command::Resolve => {
            session.resolve(Vec::new()).await;
            let output = ResolveOutput {
                resolution: session.resolution(),
                executor: session.executor(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            ExitCode::SUCCESS
        }
        Command::Report { partials } => {
            let report = report(session, &partials).await?;
            print_report(&report);
            if report.submission_failed() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
    };

    if let Some(tracking) = dry_run {
        let submissions = tracking.submissions().await;
        tracing::info!(count = submissions.len(), "dry run, nothing was sent");
        for (run, submission) in &submissions {
            println!("{run}: {}", serde_json::to_string(submission)?);
        }
    }
    Ok(code)
}

fn read_partial(path: &Path) -> Result<PartialRun, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Partial {
        path: path.to_path_buf(),
        source,
    })
}

async fn report(mut session: Session, partials: &[PathBuf]) -> Result<SessionReport, CliError> {
    for path in partials {
        session.absorb_partial(read_partial(path)?);
    }
    let run_cases: Vec<CaseKey> = session.results().keys().cloned().collect();
    session.resolve(run_cases).await;
    Ok(session.finish().await)
}

fn print_report(report: &SessionReport) {
    if let Some(submission) = &report.submission {
        for failure in &submission.failures {
            eprintln!("submission failed for {}: {}", failure.case_key, failure.error);
        }
    }
    if let Some(links) = &report.links {
        println!("traceability: {}", links.traceability);
        println!("test results: {}", links.test_results);
        println!("coverage: {}", links.coverage);
    }
    println!("{}", report.summary.line());
}

#[cfg(test)]
mod tests {
    use super::*;
    use casework_core::app::HostOutcome;
    use casework_core::config::Overrides;
    use serde_json::json;

    fn session(tracking: Arc<InMemoryTracking>) -> Session {
        let file = json!({ "adaptavist": true, "project_key": "TEST" });
        let serde_json::Value::Object(file) = file else {
            unreachable!()
        };
        let settings = Settings::from_parts(Default::default(), file);
        let config = ReportingConfig::load(&settings, &Overrides::default(), Utc::now()).unwrap();
        SessionBuilder::new()
            .config(config)
            .tracking(tracking)
            .build()
            .unwrap()
    }

    fn partial(case: &str, outcome: HostOutcome) -> PartialRun {
        let mut worker = session(Arc::new(InMemoryTracking::new()));
        let scope = worker.begin_case(CaseKey::parse(case).unwrap());
        scope.finish(outcome);
        worker.into_partial()
    }

    #[tokio::test]
    async fn report_merges_partials_and_submits() {
        let dir = camino_tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (i, (case, outcome)) in [
            ("TEST-T1", HostOutcome::Ok),
            ("TEST-T1", HostOutcome::Failed("flaky".into())),
            ("TEST-T2", HostOutcome::Ok),
        ]
        .into_iter()
        .enumerate()
        {
            let path = dir.path().join(format!("worker-{i}.json"));
            std::fs::write(&path, serde_json::to_vec(&partial(case, outcome)).unwrap()).unwrap();
            paths.push(path.into_std_path_buf());
        }

        let tracking = Arc::new(InMemoryTracking::new());
        let report = report(session(tracking.clone()), &paths).await.unwrap();

        assert!(!report.submission_failed());
        assert_eq!(report.summary.line(), "final_status (UNSTABLE): TEST, None, TEST-C1, 0 exception(s) raised");
        let runs = tracking.runs().await;
        assert_eq!(runs[0].items.len(), 2);
        assert_eq!(tracking.submissions().await.len(), 2);
    }

    #[tokio::test]
    async fn unreadable_partial_is_an_error() {
        let tracking = Arc::new(InMemoryTracking::new());
        let missing = vec![PathBuf::from("/nonexistent/partial.json")];
        let result = report(session(tracking), &missing).await;
        assert!(matches!(result, Err(CliError::Read { .. })));
    }
}

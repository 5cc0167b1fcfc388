//! Command line interface for the `casework` binary.
//!
//! Global flags override the environment and `config/global_config.json`.

use std::path::PathBuf;

use casework_core::config::Overrides;
use clap::{Args, Parser, Subcommand};

/// Command line arguments for the `casework` binary.
#[derive(Debug, Parser)]
#[command(
    name = "casework",
    version,
    about = "Report test case results to Adaptavist Test Management"
)]
pub struct Cli {
    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Use an in-memory tracking service instead of the configured server.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Directory containing `config/global_config.json`.
    #[arg(long, global = true, default_value = ".")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Default, Args)]
pub struct OverrideArgs {
    /// Enable reporting.
    #[arg(long, global = true)]
    pub adaptavist: bool,

    #[arg(long, global = true)]
    pub project_key: Option<String>,

    #[arg(long, global = true)]
    pub test_run_key: Option<String>,

    #[arg(long, global = true)]
    pub test_plan_key: Option<String>,

    /// Run name template, e.g. `%(project_key) %(test_run_suffix)`.
    #[arg(long, global = true)]
    pub test_run_name: Option<String>,

    #[arg(long, global = true)]
    pub test_plan_name: Option<String>,

    #[arg(long, global = true, value_delimiter = ',')]
    pub test_case_keys: Vec<String>,

    #[arg(long, global = true, value_delimiter = ',')]
    pub test_case_order: Vec<String>,

    /// Flat list of low/high pairs.
    #[arg(long, global = true, value_delimiter = ',')]
    pub test_case_range: Vec<String>,

    #[arg(long, global = true, value_delimiter = ',')]
    pub test_environment: Vec<String>,

    #[arg(long, global = true)]
    pub append_to_cycle: bool,

    #[arg(long, global = true)]
    pub restrict_user: Option<String>,

    #[arg(long, global = true)]
    pub worker: Option<u32>,
}

impl OverrideArgs {
    pub fn into_overrides(self) -> Overrides {
        fn list(values: Vec<String>) -> Option<Vec<String>> {
            (!values.is_empty()).then_some(values)
        }
        Overrides {
            adaptavist: self.adaptavist.then_some(true),
            project_key: self.project_key,
            test_run_key: self.test_run_key,
            test_plan_key: self.test_plan_key,
            test_run_name: self.test_run_name,
            test_plan_name: self.test_plan_name,
            test_case_keys: list(self.test_case_keys),
            test_case_order: list(self.test_case_order),
            test_case_range: list(self.test_case_range),
            test_environment: list(self.test_environment),
            append_to_cycle: self.append_to_cycle.then_some(true),
            restrict_user: self.restrict_user,
            worker: self.worker,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the execution order, skipped and unimplemented cases.
    Plan {
        /// Discovered case keys in discovery order.
        #[arg(long, value_delimiter = ',', required = true)]
        discovered: Vec<String>,
    },
    /// Resolve the target test run and print it.
    Resolve,
    /// Merge worker partial results, then submit them.
    Report {
        #[arg(required = true)]
        partials: Vec<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn parses_plan_with_global_overrides() {
        let cli = Cli::parse_from([
            "casework",
            "plan",
            "--discovered",
            "TEST-T1,TEST-T2",
            "--test-case-order",
            "TEST-T2",
            "--adaptavist",
        ]);
        let Command::Plan { discovered } = &cli.command else {
            panic!("expected plan");
        };
        assert_eq!(discovered, &["TEST-T1", "TEST-T2"]);
        let overrides = cli.overrides.into_overrides();
        assert_eq!(overrides.adaptavist, Some(true));
        assert_eq!(overrides.test_case_order, Some(vec!["TEST-T2".to_string()]));
        assert_eq!(overrides.test_case_keys, None);
    }

    #[test]
    fn unset_flags_do_not_override() {
        let cli = Cli::parse_from(["casework", "resolve"]);
        let overrides = cli.overrides.into_overrides();
        assert_eq!(overrides.adaptavist, None);
        assert_eq!(overrides.append_to_cycle, None);
        assert!(!cli.dry_run);
    }

    #[test]
    fn report_needs_partials() {
        assert!(Cli::try_parse_from(["casework", "report"]).is_err());
        let cli = Cli::parse_from(["casework", "--dry-run", "report", "a.json", "b.json"]);
        assert!(cli.dry_run);
        assert!(matches!(cli.command, Command::Report { partials } if partials.len() == 2));
    }
}

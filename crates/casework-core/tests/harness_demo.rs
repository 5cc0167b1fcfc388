//! Cases written against the harness, run as a `harness = false` test binary.
//!
//! Reporting stays disabled unless `ADAPTAVIST=true` and a server are configured.

use casework_core::app::{CaseError, Check};
use casework_core::domain::{Action, Attachment};
use casework_core::{Harness, HarnessCase};

fn main() {
    let harness = match Harness::from_env() {
        Ok(harness) => harness,
        Err(error) => {
            eprintln!("error: {error}");
            std::process::exit(101);
        }
    };
    harness
        .case(
            HarnessCase::new("test_CASEWORK_T1", |case| {
                case.run_step(1, |step| {
                    step.check(2 + 2 == 4, "arithmetic is broken", Action::StopMethod)
                        .proceed()
                })?;
                case.run_step(2, |step| {
                    step.check_with(
                        Check::that("casework".starts_with("case"))
                            .on_fail("prefix mismatch")
                            .on_pass("prefix matches")
                            .attach(Attachment::new("word.txt", b"casework".to_vec())),
                    )
                    .proceed()
                })
            })
            .project("CASEWORK"),
        )
        .case(HarnessCase::new("test_CASEWORK_T2_1", |case| {
            let words: Vec<&str> = "a b c".split(' ').collect();
            case.check(words.len() == 3, "split lost words", Action::FailContext)
                .proceed()
                .map_err(CaseError::from)
        }))
        .case(
            HarnessCase::new("test_CASEWORK_T3", |case| {
                let path = std::env::current_dir().map_err(|e| CaseError::Failed(e.to_string()))?;
                case.check(path.is_absolute(), "relative working directory", Action::FailMethod)
                    .proceed()?;
                Ok(())
            })
            .block_if(cfg!(windows), "no windows rig"),
        )
        .test("test_keys_parse", || {
            casework_core::domain::CaseKey::parse("CASEWORK-T9")
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .main();
}

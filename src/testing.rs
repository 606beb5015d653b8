//! On-device test harness with TAP output.
//!
//! Host unit tests cover the provisioning logic; what they cannot cover is
//! the platform glue (NVS, the factory MAC, the Wi-Fi driver). Those checks
//! are written as `#[tap_test]` functions, collected at link time, and run by
//! the `device-tests` binary, which prints TAP over the serial console.
//!
//! Only compiled with the `tap-tests` feature, so none of this reaches a
//! production image.
//!
//! ```ignore
//! #[cfg(feature = "tap-tests")]
//! mod tap_tests {
//!     use super::*;
//!     use wifi_provisioner_esp32_macros::tap_test;
//!
//!     #[tap_test]
//!     fn store_round_trips() -> wifi_provisioner_esp32::testing::TestResult {
//!         let store = NvsCredentialStore::open()?;
//!         store.save(&creds)?;
//!         Ok(())
//!     }
//! }
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

pub use inventory;

/// Result type for fallible tests.
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Registers one test with a runner.
pub type TestRegisterFn = fn(&mut TestRunner);

/// A test collected by `#[tap_test]`.
pub struct TapTestEntry {
    pub name: &'static str,
    pub register: TestRegisterFn,
}

impl TapTestEntry {
    pub const fn new(name: &'static str, register: TestRegisterFn) -> Self {
        Self { name, register }
    }
}

inventory::collect!(TapTestEntry);

/// Registered tests whose name contains `filter`, sorted by name.
fn selected(filter: Option<&str>) -> Vec<&'static TapTestEntry> {
    let mut entries: Vec<&'static TapTestEntry> = inventory::iter::<TapTestEntry>
        .into_iter()
        .filter(|entry| filter.map_or(true, |f| entry.name.contains(f)))
        .collect();
    entries.sort_by_key(|entry| entry.name);
    entries
}

/// Run every registered test. Returns true if all passed.
pub fn run_all_tests() -> bool {
    run_matching(None)
}

/// Run registered tests whose name contains `filter`.
pub fn run_matching(filter: Option<&str>) -> bool {
    let entries = selected(filter);
    let mut runner = TestRunner::new();
    runner.plan(entries.len());
    for entry in entries {
        (entry.register)(&mut runner);
    }
    runner.finish()
}

/// How a single test ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail(String),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Collects outcomes and prints TAP lines as they arrive.
#[derive(Debug, Default)]
pub struct TestRunner {
    outcomes: Vec<(String, Outcome)>,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print the TAP version line and plan.
    pub fn plan(&self, count: usize) {
        println!("TAP version 14");
        println!("1..{}", count);
    }

    /// Run a fallible test; an `Err` or a panic is a failure.
    pub fn run<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() -> TestResult + std::panic::UnwindSafe,
    {
        let started = Instant::now();
        let outcome = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(Ok(())) => Outcome::Pass,
            Ok(Err(e)) => Outcome::Fail(format!("error: {}", e)),
            Err(payload) => Outcome::Fail(format!("panic: {}", panic_message(payload.as_ref()))),
        };
        self.record(name, outcome, started);
    }

    /// Run a test that signals failure by panicking.
    pub fn run_assert<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        self.run(name, || {
            test_fn();
            Ok(())
        });
    }

    /// Run a test that must panic, with a message containing `expected` if given.
    pub fn run_should_panic<F>(&mut self, name: &str, test_fn: F, expected: Option<&str>)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        let started = Instant::now();
        let outcome = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(()) => Outcome::Fail("expected a panic".to_string()),
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                match expected {
                    Some(want) if !msg.contains(want) => {
                        Outcome::Fail(format!("panic '{}' does not contain '{}'", msg, want))
                    }
                    _ => Outcome::Pass,
                }
            }
        };
        self.record(name, outcome, started);
    }

    fn record(&mut self, name: &str, outcome: Outcome, started: Instant) {
        let number = self.outcomes.len() + 1;
        match &outcome {
            Outcome::Pass => println!("ok {} - {}", number, name),
            Outcome::Fail(reason) => {
                println!("not ok {} - {}", number, name);
                println!("  ---");
                println!("  message: {:?}", reason);
                println!("  ...");
            }
        }
        println!("# {} took {} ms", name, started.elapsed().as_millis());
        self.outcomes.push((name.to_string(), outcome));
    }

    pub fn passed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == Outcome::Pass)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn outcomes(&self) -> &[(String, Outcome)] {
        &self.outcomes
    }

    /// Print the summary. Returns true if nothing failed.
    pub fn finish(&self) -> bool {
        println!("# pass {}", self.passed());
        println!("# fail {}", self.failed());
        for (name, outcome) in &self.outcomes {
            if let Outcome::Fail(reason) = outcome {
                println!("# FAILED {}: {}", name, reason);
            }
        }
        self.failed() == 0
    }
}

mod tap_tests {
    use super::*;
    use wifi_provisioner_esp32_macros::tap_test;

    #[tap_test]
    fn runner_records_error_result() {
        let mut runner = TestRunner::new();
        runner.run("ok", || Ok(()));
        runner.run("err", || Err("boom".into()));
        assert_eq!(runner.passed(), 1);
        assert_eq!(runner.outcomes()[1].1, Outcome::Fail("error: boom".to_string()));
    }

    #[tap_test]
    fn runner_catches_panic() {
        let mut runner = TestRunner::new();
        runner.run_assert("panics", || panic!("on purpose"));
        assert_eq!(runner.failed(), 1);
        assert!(!runner.finish());
    }

    #[tap_test]
    fn runner_checks_panic_message() {
        let mut runner = TestRunner::new();
        runner.run_should_panic("right", || panic!("capacity exceeded"), Some("capacity"));
        runner.run_should_panic("wrong", || panic!("other"), Some("capacity"));
        runner.run_should_panic("none", || {}, None);
        assert_eq!(runner.passed(), 1);
        assert_eq!(runner.failed(), 2);
    }

    #[tap_test]
    fn selection_is_sorted() {
        let names: Vec<&str> = selected(Some("runner_")).iter().map(|e| e.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"runner_catches_panic"));
    }
}

//! Test driver for the hetsync scenario suites.
//!
//! A suite is a list of plain `fn()` test cases handed to
//! [`TestDriver::start`]. Each case runs on its own named thread; a case
//! passes when it returns and fails when it panics. Cases can be selected by
//! name from the command line:
//!
//! ```bash
//! $ cargo run -p grader -- ticket_lock::fifo_admission completion::message_42
//! ```

pub mod logging;

pub use grading_derive::*;

#[doc(hidden)]
pub mod __private {
    pub use tracing;
}

use std::collections::BTreeSet;

/// A single named test case.
pub trait TestCase
where
    Self: Sync + Send,
{
    /// The fully qualified name of the case.
    fn name(&'static self) -> &'static str;
    /// Runs the case, returning whether it passed.
    fn run(&'static self) -> bool;
}

impl<T> TestCase for T
where
    T: Fn() + Send + Sync + 'static,
{
    fn name(&'static self) -> &'static str {
        core::any::type_name::<T>()
    }

    fn run(&'static self) -> bool {
        print!("test {} ... ", self.name());
        let passed = std::thread::Builder::new()
            .name(short_name(self.name()).to_owned())
            .spawn(self)
            .map(|handle| handle.join().is_ok())
            .unwrap_or_else(|e| {
                tracing::error!("failed to spawn test thread: {e}");
                false
            });
        println!("{}", if passed { "ok" } else { "FAILED" });
        passed
    }
}

/// The case name without its leading crate path segment.
fn short_name(name: &str) -> &str {
    name.split_once("::").map(|(_, rest)| rest).unwrap_or(name)
}

/// Outcome of a [`TestDriver::start`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Number of cases run.
    pub total: usize,
    /// Number of cases that passed.
    pub passed: usize,
}

impl Summary {
    /// Whether every case that ran passed.
    pub fn is_success(&self) -> bool {
        self.total == self.passed
    }

    /// The process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// A driver for running tests.
pub struct TestDriver;

impl TestDriver {
    /// Runs the tests whose short names appear in `filter`, or all of them if
    /// `filter` is empty.
    pub fn start<const TC: usize>(tests: [&'static dyn TestCase; TC], filter: &[String]) -> Summary {
        let filter = filter.iter().map(String::as_str).collect::<BTreeSet<_>>();
        let tests = tests
            .into_iter()
            .filter(|test| filter.is_empty() || filter.contains(short_name(test.name())))
            .collect::<Vec<_>>();
        let (total, mut passed) = (tests.len(), 0);
        println!(
            "Running {} test{}",
            total,
            if total == 1 { "" } else { "s" }
        );

        for test in tests {
            if test.run() {
                passed += 1;
            }
        }
        println!(
            "test result: {}. {} passed; {} failed",
            if total == passed { "ok" } else { "FAILED" },
            passed,
            total - passed
        );
        Summary { total, passed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passes() {}

    fn fails() {
        panic!("expected failure");
    }

    #[test]
    fn short_name_strips_crate() {
        assert_eq!(short_name("grader::ticket_lock::smoke"), "ticket_lock::smoke");
        assert_eq!(short_name("smoke"), "smoke");
    }

    #[test]
    fn driver_counts_failures() {
        let summary = TestDriver::start([&passes, &fails], &[]);
        assert_eq!(summary, Summary { total: 2, passed: 1 });
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn driver_applies_filter() {
        let summary = TestDriver::start([&passes, &fails], &["tests::passes".to_owned()]);
        assert_eq!(summary, Summary { total: 1, passed: 1 });
        assert!(summary.is_success());
    }
}

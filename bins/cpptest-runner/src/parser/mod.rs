/// Output Parser - ExecutionResult → Test Case Outcomes
///
/// **Core Responsibility:**
/// Read what a framework printed and turn it into `TestCaseOutcome`s.
///
/// **Architectural Boundary:**
/// - Each framework module owns one grammar and produces per-case signals
/// - This module owns the binary-level rules shared by every grammar:
///   cancellation, launch failures, timeouts, unrecognized output and
///   abnormal termination all become synthetic Error outcomes here
/// - Parsing never fails; output that matches nothing is reported, not dropped
///
/// Case names are taken verbatim from positional markers and never
/// re-split on punctuation.

pub mod boost;
pub mod catch2;
pub mod gtest;
pub mod qt;

use crate::engine::ExecutionResult;
use cpptest_common::types::{FrameworkKind, OutcomeKind, SourceLocation, TestCaseOutcome};
use std::time::Duration;
use tracing::debug;

/// What a framework grammar extracted from one run
#[derive(Debug, Default)]
pub struct ParseOutput {
    pub outcomes: Vec<TestCaseOutcome>,
    /// At least one structural marker of the framework was seen
    pub recognized: bool,
    /// Errors reported outside of any case (e.g. global fixture setup)
    pub binary_errors: Vec<String>,
}

pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Reported against the limit a binary was given, not the time it got to run
pub fn timed_out_message(limit: Duration) -> String {
    format!("timed out after {} ms", limit.as_millis())
}

/// Parse one execution into outcomes. `binary_name` names synthetic
/// binary-level outcomes.
pub fn parse(kind: FrameworkKind, result: &ExecutionResult, binary_name: &str) -> Vec<TestCaseOutcome> {
    if result.cancelled {
        return vec![binary_error(binary_name, CANCELLED_MESSAGE)];
    }
    if let Some(ref message) = result.launch_error {
        return vec![binary_error(binary_name, message)];
    }

    let output = parse_framework(kind, result);
    debug!(
        framework = %kind,
        binary = binary_name,
        cases = output.outcomes.len(),
        recognized = output.recognized,
        binary_errors = output.binary_errors.len(),
        "Parsed output"
    );

    let mut outcomes = output.outcomes;

    if result.timed_out {
        outcomes.push(binary_error(binary_name, timed_out_message(result.timeout)));
        return outcomes;
    }

    if !output.recognized {
        return vec![unparseable(binary_name, result)];
    }

    if !output.binary_errors.is_empty() {
        outcomes.push(binary_error(binary_name, output.binary_errors.join("\n")));
    }

    if let Some(reason) = abnormal_termination(kind, result) {
        if outcomes.is_empty() {
            let raw = result.combined_output();
            let message = if raw.trim().is_empty() {
                reason
            } else {
                format!("{}\n{}", reason, raw)
            };
            return vec![binary_error(binary_name, message)];
        }
        if !outcomes.iter().any(|o| o.kind == OutcomeKind::Error) {
            outcomes.push(binary_error(binary_name, reason));
        }
    }

    outcomes
}

fn parse_framework(kind: FrameworkKind, result: &ExecutionResult) -> ParseOutput {
    let stdout = result.stdout_text();
    match kind {
        FrameworkKind::GoogleTest => gtest::parse(&stdout, result.report.as_deref()),
        FrameworkKind::Catch2 => catch2::parse(&stdout, result.report.as_deref()),
        // Boost.Test writes its log to stdout and some errors to stderr
        FrameworkKind::BoostTest => boost::parse(&result.combined_output()),
        FrameworkKind::QtTest => qt::parse(&stdout),
    }
}

/// Exit codes a framework uses when it ran to completion
pub fn is_normal_exit(kind: FrameworkKind, exit_code: i32) -> bool {
    match kind {
        FrameworkKind::GoogleTest => matches!(exit_code, 0 | 1),
        // 200: setup or fatal error, 201: test failures
        FrameworkKind::BoostTest => matches!(exit_code, 0 | 200 | 201),
        // Both report the number of failures
        FrameworkKind::Catch2 | FrameworkKind::QtTest => exit_code >= 0,
    }
}

fn abnormal_termination(kind: FrameworkKind, result: &ExecutionResult) -> Option<String> {
    if let Some(signal) = result.signal {
        return Some(format!("terminated by signal {}", signal));
    }
    if !is_normal_exit(kind, result.exit_code) {
        return Some(format!("exited with unexpected code {}", result.exit_code));
    }
    None
}

pub fn binary_error(binary_name: &str, message: impl Into<String>) -> TestCaseOutcome {
    TestCaseOutcome::new(binary_name, OutcomeKind::Error).with_message(message)
}

fn unparseable(binary_name: &str, result: &ExecutionResult) -> TestCaseOutcome {
    let raw = result.combined_output();
    let message = if raw.is_empty() {
        format!("no recognizable output (exit code {})", result.exit_code)
    } else {
        raw
    };
    binary_error(binary_name, message)
}

/// Parse `file:line` or `file(line)`
pub fn parse_location(text: &str) -> Option<SourceLocation> {
    let text = text.trim();
    if let Some(inner) = text.strip_suffix(')') {
        let (file, line) = inner.rsplit_once('(')?;
        return make_location(file, line);
    }
    let (file, line) = text.rsplit_once(':')?;
    make_location(file, line)
}

fn make_location(file: &str, line: &str) -> Option<SourceLocation> {
    let line = line.trim().parse().ok()?;
    let file = file.trim();
    if file.is_empty() {
        return None;
    }
    Some(SourceLocation {
        file: file.to_string(),
        line,
    })
}

/// Outcome Classifier and Report Aggregation
///
/// **Core Responsibility:**
/// Turn the framework-neutral signals a parser collected for each case into
/// exactly one outcome kind, then fold per-binary outcomes into reports.
///
/// **Critical Properties:**
/// - Knows nothing about processes
/// - Knows nothing about framework grammars
/// - Pure functions: (signals) → outcome, (binary reports) → suite report
///
/// **Precedence (highest first):**
/// Disabled > Skipped > Error > Fail > Pass
///
/// An exception after an assertion failure is an Error: unexpected
/// termination outranks a recoverable mismatch.

use crate::engine::ExecutionResult;
use chrono::{DateTime, Utc};
use cpptest_common::types::{
    BinaryReport, OutcomeCounts, OutcomeKind, SourceLocation, SuiteReport, TestBinary,
    TestCaseOutcome,
};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Separator between several failure messages of one case
pub const FAILURE_SEPARATOR: &str = "\n---\n";

/// Everything a parser observed about a single case
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseSignals {
    pub failures: Vec<String>,
    pub errors: Vec<String>,
    /// Skip directive with its message; empty when the directive had none
    pub skip: Option<String>,
    pub disabled: bool,
    /// First location reported for a failure or error
    pub location: Option<SourceLocation>,
}

impl CaseSignals {
    pub fn fail(&mut self, message: impl Into<String>, location: Option<SourceLocation>) {
        self.failures.push(message.into());
        self.note_location(location);
    }

    pub fn error(&mut self, message: impl Into<String>, location: Option<SourceLocation>) {
        self.errors.push(message.into());
        self.note_location(location);
    }

    /// Only the first skip directive counts
    pub fn skip(&mut self, message: impl Into<String>) {
        if self.skip.is_none() {
            self.skip = Some(message.into());
        }
    }

    fn note_location(&mut self, location: Option<SourceLocation>) {
        if self.location.is_none() {
            self.location = location;
        }
    }

    /// Append context (e.g. a checkpoint line) to the latest error or failure
    pub fn annotate_last(&mut self, context: &str) {
        let target = if !self.errors.is_empty() {
            self.errors.last_mut()
        } else {
            self.failures.last_mut()
        };
        if let Some(message) = target {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(context);
        }
    }
}

/// Classify one case
pub fn classify(name: &str, signals: CaseSignals) -> TestCaseOutcome {
    let CaseSignals {
        failures,
        errors,
        skip,
        disabled,
        location,
    } = signals;

    if disabled {
        return TestCaseOutcome::new(name, OutcomeKind::Disabled);
    }
    if let Some(message) = skip {
        return TestCaseOutcome::new(name, OutcomeKind::Skipped).with_message(message);
    }
    if !errors.is_empty() {
        let message = errors
            .into_iter()
            .chain(failures)
            .collect::<Vec<_>>()
            .join(FAILURE_SEPARATOR);
        return TestCaseOutcome::new(name, OutcomeKind::Error)
            .with_message(message)
            .with_location(location);
    }
    if !failures.is_empty() {
        return TestCaseOutcome::new(name, OutcomeKind::Fail)
            .with_message(failures.join(FAILURE_SEPARATOR))
            .with_location(location);
    }
    // A case the framework reported without any negative signal passed
    TestCaseOutcome::new(name, OutcomeKind::Pass)
}

/// Signals per case, in the order cases were first seen
#[derive(Debug, Clone, Default)]
pub struct CaseTable {
    order: Vec<(String, CaseSignals)>,
    index: HashMap<String, usize>,
}

impl CaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals for `name`, creating the entry on first sight
    pub fn case(&mut self, name: &str) -> &mut CaseSignals {
        let idx = match self.index.get(name) {
            Some(idx) => *idx,
            None => {
                self.order.push((name.to_string(), CaseSignals::default()));
                self.index.insert(name.to_string(), self.order.len() - 1);
                self.order.len() - 1
            }
        };
        &mut self.order[idx].1
    }

    pub fn get(&self, name: &str) -> Option<&CaseSignals> {
        self.index.get(name).map(|idx| &self.order[*idx].1)
    }

    pub fn into_outcomes(self) -> Vec<TestCaseOutcome> {
        self.order
            .into_iter()
            .map(|(name, signals)| classify(&name, signals))
            .collect()
    }
}

/// Build the report for one binary from its outcomes and last execution
pub fn binary_report(
    index: usize,
    binary: &TestBinary,
    last: &ExecutionResult,
    total_duration: Duration,
    mut outcomes: Vec<TestCaseOutcome>,
) -> BinaryReport {
    for outcome in &mut outcomes {
        outcome.binary = index;
    }

    BinaryReport {
        index,
        name: binary.display_name(),
        path: binary.path.clone(),
        framework: binary.framework,
        exit_code: last.exited().then_some(last.exit_code),
        timed_out: last.timed_out,
        cancelled: last.cancelled,
        duration_ms: total_duration.as_millis() as u64,
        counts: OutcomeCounts::from_outcomes(&outcomes),
        outcomes,
    }
}

/// Aggregate binary reports into the suite report.
///
/// Overall success holds iff no binary recorded a Fail or Error; Skipped and
/// Disabled never count against it.
pub fn aggregate(
    run_id: Uuid,
    started_at: DateTime<Utc>,
    duration: Duration,
    mut binaries: Vec<BinaryReport>,
    cancelled: bool,
) -> SuiteReport {
    binaries.sort_by_key(|b| b.index);

    let mut counts = OutcomeCounts::default();
    for binary in &binaries {
        counts.merge(&binary.counts);
    }

    let overall_success = !cancelled && binaries.iter().all(BinaryReport::success);

    SuiteReport {
        run_id,
        started_at,
        duration_ms: duration.as_millis() as u64,
        binaries,
        counts,
        overall_success,
        cancelled,
    }
}

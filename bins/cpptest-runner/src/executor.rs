/// Suite Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Coordinate the process engine, the output parser and the evaluator to turn
/// a list of test binaries into one `SuiteReport`.
///
/// **Architecture:**
/// 1. Build the framework command line (command.rs)
/// 2. Run it through the ProcessEngine (engine.rs)
/// 3. Parse the result into outcomes (parser/)
/// 4. Aggregate per-binary reports in input order (evaluator.rs)
///
/// This module is the glue layer - it knows nothing about:
/// - How processes are spawned (engine's job)
/// - What the frameworks print (parser's job)
/// - How outcomes are ranked (evaluator's job)
///
/// Binaries share nothing but the cancellation signal; each run owns its
/// child process and buffers, and a failing binary only ever produces
/// outcomes.

use crate::cancel::CancelSignal;
use crate::command::{self, split_boost_args};
use crate::config::FrameworkConfigManager;
use crate::engine::{ExecutionResult, ProcessEngine};
use crate::evaluator;
use crate::parser::{self, qt};
use chrono::Utc;
use cpptest_common::listing;
use cpptest_common::types::{
    BinaryReport, FrameworkKind, OutcomeKind, SuiteReport, TestBinary, TestCaseOutcome,
};
use futures_util::stream::{self, StreamExt};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct SuiteExecutor {
    engine: ProcessEngine,
    frameworks: FrameworkConfigManager,
    concurrency: usize,
}

impl SuiteExecutor {
    pub fn new(frameworks: FrameworkConfigManager, concurrency: usize) -> Self {
        Self {
            engine: ProcessEngine::new(),
            frameworks,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every binary and aggregate the results.
    ///
    /// At most `concurrency` binaries run at once. Reports come back in input
    /// order regardless of completion order.
    pub async fn run_suite(&self, binaries: &[TestBinary], cancel: &CancelSignal) -> SuiteReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            run_id = %run_id,
            binaries = binaries.len(),
            concurrency = self.concurrency,
            "Starting suite"
        );

        let reports: Vec<BinaryReport> = stream::iter(binaries.iter().enumerate())
            .map(|(index, binary)| self.run_binary(index, binary, cancel))
            .buffered(self.concurrency)
            .collect()
            .await;

        let report = evaluator::aggregate(
            run_id,
            started_at,
            start.elapsed(),
            reports,
            cancel.is_cancelled(),
        );

        info!(
            run_id = %run_id,
            passed = report.counts.passed,
            failed = report.counts.failed,
            errors = report.counts.errors,
            skipped = report.counts.skipped,
            disabled = report.counts.disabled,
            overall_success = report.overall_success,
            duration_ms = report.duration_ms,
            "Suite completed"
        );

        report
    }

    /// Run one binary (with resumption where the framework needs it) and
    /// build its report
    pub async fn run_binary(
        &self,
        index: usize,
        binary: &TestBinary,
        cancel: &CancelSignal,
    ) -> BinaryReport {
        let name = binary.display_name();
        let start = Instant::now();

        if cancel.is_cancelled() {
            debug!(binary = %name, "Suite cancelled before binary started");
            let result = ExecutionResult::cancelled(Duration::ZERO);
            let outcomes = parser::parse(binary.framework, &result, &name);
            return evaluator::binary_report(index, binary, &result, start.elapsed(), outcomes);
        }

        info!(
            binary = %name,
            framework = %binary.framework,
            timeout_ms = binary.timeout_ms,
            args = ?binary.args,
            filter = ?binary.filter,
            "Running test binary"
        );

        let (last, outcomes) = match binary.framework {
            FrameworkKind::QtTest => self.run_qt(binary, &name, cancel).await,
            kind => {
                let result = self.execute(binary, cancel).await;
                let outcomes = parser::parse(kind, &result, &name);
                (result, outcomes)
            }
        };

        let report = evaluator::binary_report(index, binary, &last, start.elapsed(), outcomes);

        for outcome in report.outcomes.iter().filter(|o| o.kind.is_failure()) {
            debug!(
                binary = %name,
                case = %outcome.name,
                kind = %outcome.kind,
                location = ?outcome.location.as_ref().map(ToString::to_string),
                "Non-passing case"
            );
        }

        info!(
            binary = %name,
            exit_code = ?report.exit_code,
            timed_out = report.timed_out,
            cancelled = report.cancelled,
            passed = report.counts.passed,
            failed = report.counts.failed,
            errors = report.counts.errors,
            skipped = report.counts.skipped,
            disabled = report.counts.disabled,
            duration_ms = report.duration_ms,
            "Binary finished"
        );

        report
    }

    /// Single invocation of a binary with its own filter and timeout
    pub async fn execute(&self, binary: &TestBinary, cancel: &CancelSignal) -> ExecutionResult {
        self.execute_selection(binary, &binary.filter, binary.timeout(), cancel)
            .await
    }

    async fn execute_selection(
        &self,
        binary: &TestBinary,
        selection: &[String],
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> ExecutionResult {
        let config = self.frameworks.get_config(binary.framework);
        let prepared = command::prepare_run(binary, &config, selection, timeout);

        if binary.framework == FrameworkKind::BoostTest {
            let (_, module_args) = split_boost_args(&prepared.invocation.args);
            debug!(module_args = ?module_args, "Boost.Test module arguments");
        }

        // `prepared` keeps the report directory alive until the run is read
        self.engine.run(&prepared.invocation, cancel).await
    }

    /// Qt Test stops at the first slot that takes the process down. Re-run
    /// the slots that never reported, sharing the binary's timeout budget,
    /// until each has an outcome or a run makes no progress.
    async fn run_qt(
        &self,
        binary: &TestBinary,
        name: &str,
        cancel: &CancelSignal,
    ) -> (ExecutionResult, Vec<TestCaseOutcome>) {
        let deadline = Instant::now() + binary.timeout();
        let first = self.execute(binary, cancel).await;
        let first_outcomes = parser::parse(FrameworkKind::QtTest, &first, name);

        if !interrupted(&first) {
            return (first, first_outcomes);
        }

        let Some(slots) = self.list_qt_slots(binary, deadline, cancel).await else {
            return (first, first_outcomes);
        };
        let selectable: Vec<String> = slots
            .into_iter()
            .filter(|slot| !qt::FIXTURE_SLOTS.contains(&slot.as_str()))
            .filter(|slot| binary.filter.is_empty() || binary.filter.contains(slot))
            .collect();

        if remaining_slots(&selectable, &first_outcomes).is_empty() {
            return (first, first_outcomes);
        }

        warn!(
            binary = %name,
            exit_code = first.exit_code,
            signal = ?first.signal,
            "Qt test terminated before all slots ran - resuming"
        );

        // Synthetic binary-level errors are replaced by per-slot ones below
        let mut outcomes: Vec<TestCaseOutcome> = first_outcomes
            .into_iter()
            .filter(|o| o.name != name)
            .collect();
        let mut last = first;

        for _ in 0..=selectable.len() {
            let remaining = remaining_slots(&selectable, &outcomes);
            if remaining.is_empty() {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                outcomes.push(parser::binary_error(
                    name,
                    parser::timed_out_message(binary.timeout()),
                ));
                break;
            }
            if cancel.is_cancelled() {
                outcomes.push(parser::binary_error(name, parser::CANCELLED_MESSAGE));
                break;
            }

            debug!(binary = %name, remaining = ?remaining, "Resuming Qt slots");
            let mut result = self
                .execute_selection(binary, &remaining, deadline - now, cancel)
                .await;
            // Resumed runs share the binary's budget
            result.timeout = binary.timeout();
            let terminal = result.timed_out || result.cancelled || result.launch_error.is_some();

            for outcome in parser::parse(FrameworkKind::QtTest, &result, name) {
                if outcome.name == name && !terminal {
                    continue;
                }
                if !outcomes.iter().any(|o| o.name == outcome.name) {
                    outcomes.push(outcome);
                }
            }

            if terminal {
                last = result;
                break;
            }

            let progressed = remaining.iter().any(|slot| has_slot(&outcomes, slot));
            if !progressed {
                let culprit = &remaining[0];
                warn!(binary = %name, slot = %culprit, "Slot terminated without reporting a result");
                let reason = match result.signal {
                    Some(signal) => format!(
                        "terminated without reporting a result (signal {})",
                        signal
                    ),
                    None => format!(
                        "terminated without reporting a result (exit code {})",
                        result.exit_code
                    ),
                };
                outcomes.push(
                    TestCaseOutcome::new(slot_case_name(&outcomes, culprit), OutcomeKind::Error)
                        .with_message(reason),
                );
            }
            last = result;
        }

        (last, outcomes)
    }

    async fn list_qt_slots(
        &self,
        binary: &TestBinary,
        deadline: Instant,
        cancel: &CancelSignal,
    ) -> Option<Vec<String>> {
        let budget = deadline.saturating_duration_since(Instant::now());
        if budget.is_zero() {
            return None;
        }

        let invocation = command::auxiliary_invocation(
            binary,
            listing::list_args(FrameworkKind::QtTest, None),
            budget,
        );
        let result = self.engine.run(&invocation, cancel).await;
        if !result.exited() {
            warn!(binary = %binary.display_name(), "Could not list Qt slots");
            return None;
        }

        let slots = listing::parse_listing(
            FrameworkKind::QtTest,
            &result.stdout_text(),
            &binary.display_name(),
        );
        Some(slots)
    }
}

/// Died on its own before every slot got to run. Qt 5 flushes the closing
/// banner before rethrowing an unhandled exception, so a printed banner does
/// not mean the process survived.
fn interrupted(result: &ExecutionResult) -> bool {
    if result.launch_error.is_some() || result.timed_out || result.cancelled {
        return false;
    }
    result.signal.is_some()
        || !parser::is_normal_exit(FrameworkKind::QtTest, result.exit_code)
        || !qt::finished(&result.stdout_text())
}

fn has_slot(outcomes: &[TestCaseOutcome], slot: &str) -> bool {
    outcomes.iter().any(|o| qt::slot_of(&o.name) == slot)
}

fn remaining_slots(selectable: &[String], outcomes: &[TestCaseOutcome]) -> Vec<String> {
    selectable
        .iter()
        .filter(|slot| !has_slot(outcomes, slot))
        .cloned()
        .collect()
}

/// `Class::slot()` using the class name seen in earlier outcomes
fn slot_case_name(outcomes: &[TestCaseOutcome], slot: &str) -> String {
    let class = outcomes
        .iter()
        .find_map(|o| o.name.split_once("::").map(|(class, _)| class));
    match class {
        Some(class) => format!("{}::{}()", class, slot),
        None => format!("{}()", slot),
    }
}

// Human-readable summary and the machine-readable JSON report
use anyhow::{Context, Result};
use cpptest_common::types::{OutcomeCounts, OutcomeKind, SuiteReport};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Render the summary printed at the end of a run: one line per binary,
/// every non-passing case with its message, then totals.
pub fn render_summary(report: &SuiteReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Run {}", report.run_id);
    for binary in &report.binaries {
        let status = if binary.success() { "PASS" } else { "FAIL" };
        let mut flags = String::new();
        if binary.timed_out {
            flags.push_str(" [timed out]");
        }
        if binary.cancelled {
            flags.push_str(" [cancelled]");
        }
        let _ = writeln!(
            out,
            "[{}] {} ({}) {} in {} ms{}",
            status,
            binary.name,
            binary.framework,
            counts_line(&binary.counts),
            binary.duration_ms,
            flags
        );

        for outcome in binary.outcomes.iter().filter(|o| o.kind != OutcomeKind::Pass) {
            let location = outcome
                .location
                .as_ref()
                .map(|l| format!(" ({})", l))
                .unwrap_or_default();
            let _ = writeln!(out, "    {} {}{}", outcome.kind, outcome.name, location);
            if let Some(ref message) = outcome.message {
                for line in message.lines().filter(|l| !l.trim().is_empty()) {
                    let _ = writeln!(out, "        {}", line);
                }
            }
        }
    }

    let _ = writeln!(
        out,
        "Totals: {} in {} ms",
        counts_line(&report.counts),
        report.duration_ms
    );
    let verdict = match (report.overall_success, report.cancelled) {
        (_, true) => "CANCELLED",
        (true, false) => "SUCCESS",
        (false, false) => "FAILURE",
    };
    let _ = writeln!(out, "Result: {}", verdict);
    out
}

fn counts_line(counts: &OutcomeCounts) -> String {
    format!(
        "{} passed, {} failed, {} errors, {} skipped, {} disabled",
        counts.passed, counts.failed, counts.errors, counts.skipped, counts.disabled
    )
}

pub fn print_summary(report: &SuiteReport) {
    println!();
    print!("{}", render_summary(report));
}

/// Write the report as pretty JSON, creating parent directories
pub fn write_json(report: &SuiteReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cpptest_common::types::{
        BinaryReport, FrameworkKind, SourceLocation, TestCaseOutcome,
    };
    use uuid::Uuid;

    fn sample_report() -> SuiteReport {
        let outcomes = vec![
            TestCaseOutcome::new("FooTest.test_success", OutcomeKind::Pass),
            TestCaseOutcome::new("FooTest.test_failure", OutcomeKind::Fail)
                .with_message("Expected equality of these values:\n  2 * 3\n  5")
                .with_location(Some(SourceLocation { file: "gtest.cpp".into(), line: 17 })),
        ];
        let counts = OutcomeCounts::from_outcomes(&outcomes);
        SuiteReport {
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            duration_ms: 42,
            binaries: vec![BinaryReport {
                index: 0,
                name: "gtest".into(),
                path: "/build/gtest".into(),
                framework: FrameworkKind::GoogleTest,
                exit_code: Some(1),
                timed_out: false,
                cancelled: false,
                duration_ms: 40,
                outcomes,
                counts,
            }],
            counts,
            overall_success: false,
            cancelled: false,
        }
    }

    #[test]
    fn test_summary_lists_non_passing_cases() {
        let summary = render_summary(&sample_report());
        assert!(summary.contains("[FAIL] gtest (google_test) 1 passed, 1 failed"));
        assert!(summary.contains("    FAIL FooTest.test_failure (gtest.cpp:17)"));
        assert!(summary.contains("        Expected equality of these values:"));
        assert!(!summary.contains("PASS FooTest.test_success"));
        assert!(summary.ends_with("Result: FAILURE\n"));
    }

    #[test]
    fn test_write_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("suite.json");
        let report = sample_report();

        write_json(&report, &path).unwrap();
        let loaded: SuiteReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, report);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Third-party test framework a binary was built against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkKind {
    Catch2,
    BoostTest,
    GoogleTest,
    QtTest,
}

impl FrameworkKind {
    pub const ALL: [FrameworkKind; 4] = [
        FrameworkKind::Catch2,
        FrameworkKind::BoostTest,
        FrameworkKind::GoogleTest,
        FrameworkKind::QtTest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameworkKind::Catch2 => "catch2",
            FrameworkKind::BoostTest => "boost_test",
            FrameworkKind::GoogleTest => "google_test",
            FrameworkKind::QtTest => "qt_test",
        }
    }
}

impl fmt::Display for FrameworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameworkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "catch2" | "catch" => Ok(FrameworkKind::Catch2),
            "boost_test" | "boost" => Ok(FrameworkKind::BoostTest),
            "google_test" | "gtest" | "googletest" => Ok(FrameworkKind::GoogleTest),
            "qt_test" | "qt" | "qtest" => Ok(FrameworkKind::QtTest),
            other => Err(format!(
                "unknown framework '{}' (valid: catch2, boost_test, google_test, qt_test)",
                other
            )),
        }
    }
}

/// A test executable and everything needed to invoke it.
///
/// Built once by discovery (or the suite manifest) and only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestBinary {
    pub path: PathBuf,
    pub framework: FrameworkKind,
    /// Display name; the file stem is used when absent
    #[serde(default)]
    pub name: Option<String>,
    /// Arguments handed to the test program itself, in order
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub timeout_ms: u64,
    /// Restrict the run to these case names
    #[serde(default)]
    pub filter: Vec<String>,
    /// Command prefix wrapping the binary (e.g. a memory checker)
    #[serde(default)]
    pub harness: Vec<String>,
}

impl TestBinary {
    pub fn new(path: impl Into<PathBuf>, framework: FrameworkKind, timeout_ms: u64) -> Self {
        Self {
            path: path.into(),
            framework,
            name: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout_ms,
            filter: Vec::new(),
            harness: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_filter<I, S>(mut self, filter: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = filter.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_harness<I, S>(mut self, harness: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.harness = harness.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Program and argv that run the binary with `args`, behind the harness
    /// when there is one
    pub fn command_line<I, S>(&self, args: I) -> (PathBuf, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (program, mut argv) = match self.harness.split_first() {
            Some((program, rest)) => {
                let mut argv = rest.to_vec();
                argv.push(self.path.display().to_string());
                (PathBuf::from(program), argv)
            }
            None => (self.path.clone(), Vec::new()),
        };
        argv.extend(args.into_iter().map(Into::into));
        (program, argv)
    }

    /// Name used for reporting and for binary-level synthetic outcomes
    pub fn display_name(&self) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Unified classification of a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Pass,
    Fail,
    Error,
    Skipped,
    Disabled,
}

impl OutcomeKind {
    /// Fail and Error are the only kinds that break a suite
    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeKind::Fail | OutcomeKind::Error)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Pass => "PASS",
            OutcomeKind::Fail => "FAIL",
            OutcomeKind::Error => "ERROR",
            OutcomeKind::Skipped => "SKIPPED",
            OutcomeKind::Disabled => "DISABLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseOutcome {
    /// Case name exactly as the framework printed it
    pub name: String,
    pub kind: OutcomeKind,
    pub message: Option<String>,
    pub location: Option<SourceLocation>,
    /// Index of the originating binary in the suite report
    pub binary: usize,
}

impl TestCaseOutcome {
    pub fn new(name: impl Into<String>, kind: OutcomeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            message: None,
            location: None,
            binary: 0,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_location(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub disabled: usize,
}

impl OutcomeCounts {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a TestCaseOutcome>) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            counts.record(outcome.kind);
        }
        counts
    }

    pub fn record(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Pass => self.passed += 1,
            OutcomeKind::Fail => self.failed += 1,
            OutcomeKind::Error => self.errors += 1,
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::Disabled => self.disabled += 1,
        }
    }

    pub fn merge(&mut self, other: &OutcomeCounts) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.errors += other.errors;
        self.skipped += other.skipped;
        self.disabled += other.disabled;
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errors + self.skipped + self.disabled
    }
}

/// Everything recorded for one binary of the suite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryReport {
    pub index: usize,
    pub name: String,
    pub path: PathBuf,
    pub framework: FrameworkKind,
    /// Exit code of the last invocation; None when it never exited normally
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub outcomes: Vec<TestCaseOutcome>,
    pub counts: OutcomeCounts,
}

impl BinaryReport {
    pub fn success(&self) -> bool {
        !self.outcomes.iter().any(|o| o.kind.is_failure())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// In input enumeration order
    pub binaries: Vec<BinaryReport>,
    pub counts: OutcomeCounts,
    pub overall_success: bool,
    pub cancelled: bool,
}

impl SuiteReport {
    /// All outcomes in report order
    pub fn outcomes(&self) -> impl Iterator<Item = &TestCaseOutcome> {
        self.binaries.iter().flat_map(|b| b.outcomes.iter())
    }

    /// Process exit code for CI: 0 on success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.overall_success {
            0
        } else {
            1
        }
    }
}

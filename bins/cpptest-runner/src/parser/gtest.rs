// GoogleTest: JSON report when the binary wrote one, console markers otherwise
use super::{parse_location, ParseOutput};
use crate::evaluator::{CaseSignals, CaseTable};
use cpptest_common::types::SourceLocation;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const RUN: &str = "[ RUN      ]";
const OK: &str = "[       OK ]";
const FAILED: &str = "[  FAILED  ]";
const SKIPPED: &str = "[  SKIPPED ]";
const BANNER: &str = "[==========]";

pub const DISABLED_PREFIX: &str = "DISABLED_";

const ERROR_MARKERS: [&str; 3] = [
    "C++ exception with description",
    "Unknown C++ exception",
    "SEH exception",
];

pub fn parse(stdout: &str, report: Option<&[u8]>) -> ParseOutput {
    let console = parse_console(stdout);

    let Some(bytes) = report else {
        return console.finish();
    };
    match serde_json::from_slice::<JsonReport>(bytes) {
        Ok(report) => from_report(report, &console),
        Err(e) => {
            debug!(error = %e, "Unreadable gtest report; using console output");
            console.finish()
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonReport {
    #[serde(default)]
    testsuites: Vec<JsonSuite>,
}

#[derive(Debug, Deserialize)]
struct JsonSuite {
    name: String,
    #[serde(default)]
    testsuite: Vec<JsonCase>,
}

#[derive(Debug, Deserialize)]
struct JsonCase {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    result: String,
    #[serde(default)]
    failures: Vec<JsonFailure>,
    /// Newer releases attach the skip message; its shape varies by version
    #[serde(default)]
    skipped: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonFailure {
    #[serde(default)]
    failure: String,
}

fn from_report(report: JsonReport, console: &Console) -> ParseOutput {
    let mut table = CaseTable::new();

    for suite in report.testsuites {
        for case in suite.testsuite {
            let name = format!("{}.{}", suite.name, case.name);
            let signals = table.case(&name);

            let disabled = case.status.eq_ignore_ascii_case("notrun")
                || case.name.starts_with(DISABLED_PREFIX)
                || suite.name.starts_with(DISABLED_PREFIX);
            if disabled {
                signals.disabled = true;
                continue;
            }

            if case.result.eq_ignore_ascii_case("skipped") {
                let message = case
                    .skipped
                    .as_ref()
                    .and_then(json_skip_message)
                    .or_else(|| console.skip_message(&name))
                    .unwrap_or_default();
                signals.skip(message);
                continue;
            }

            for failure in case.failures {
                let (location, message) = split_report_text(&failure.failure);
                record_failure(signals, message, location);
            }
        }
    }

    // Cases the report does not know (a crash cut it short) keep their console verdict
    let mut output = ParseOutput {
        recognized: true,
        ..Default::default()
    };
    let mut outcomes = table.into_outcomes();
    for outcome in console.clone().finish().outcomes {
        if !outcomes.iter().any(|o| o.name == outcome.name) {
            outcomes.push(outcome);
        }
    }
    output.outcomes = outcomes;
    output
}

fn json_skip_message(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => map.get("message").and_then(Value::as_str).map(String::from),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => map.get("message").and_then(Value::as_str)?.to_string(),
        _ => return None,
    };
    Some(split_report_text(&raw).1)
}

/// Report texts start with a `file:line` (or `unknown file`) line
fn split_report_text(text: &str) -> (Option<SourceLocation>, String) {
    let (first, rest) = text.split_once('\n').unwrap_or((text, ""));
    if first.trim() == "unknown file" {
        return (None, rest.trim().to_string());
    }
    match parse_location(first) {
        Some(location) => (Some(location), rest.trim().to_string()),
        None => (None, text.trim().to_string()),
    }
}

fn record_failure(signals: &mut CaseSignals, message: String, location: Option<SourceLocation>) {
    if ERROR_MARKERS.iter().any(|marker| message.contains(marker)) {
        signals.error(message, location);
    } else {
        signals.fail(message, location);
    }
}

/// Console state. Cases are closed by their own terminator line only; the
/// summary block repeats `[  FAILED  ]` lines which must not reopen anything.
#[derive(Debug, Default, Clone)]
struct Console {
    table: CaseTable,
    recognized: bool,
    current: Option<String>,
    body: Vec<String>,
}

impl Console {
    fn skip_message(&self, name: &str) -> Option<String> {
        self.table.get(name).and_then(|signals| signals.skip.clone())
    }

    fn open(&mut self, name: &str) {
        self.close_interrupted();
        self.table.case(name);
        self.current = Some(name.to_string());
        self.body.clear();
    }

    fn is_current(&self, name: &str) -> bool {
        self.current.as_deref() == Some(name)
    }

    fn close(&mut self, name: &str, verdict: Verdict) {
        let blocks = body_blocks(&self.body);
        self.body.clear();
        self.current = None;

        let signals = self.table.case(name);
        for block in blocks {
            match block.kind {
                BlockKind::Failure => record_failure(signals, block.message, block.location),
                BlockKind::Skipped if verdict == Verdict::Skipped => signals.skip(block.message),
                BlockKind::Skipped => {}
            }
        }
        match verdict {
            Verdict::Failed if signals.failures.is_empty() && signals.errors.is_empty() => {
                signals.fail("failed", None);
            }
            Verdict::Skipped => signals.skip(""),
            _ => {}
        }
    }

    /// A case whose RUN line was never terminated: the binary died inside it
    fn close_interrupted(&mut self) {
        let Some(name) = self.current.take() else {
            return;
        };
        let blocks = body_blocks(&self.body);
        self.body.clear();
        let signals = self.table.case(&name);
        for block in blocks {
            if block.kind == BlockKind::Failure {
                record_failure(signals, block.message, block.location);
            }
        }
        signals.error("crashed", None);
    }

    fn finish(mut self) -> ParseOutput {
        self.close_interrupted();
        ParseOutput {
            outcomes: self.table.into_outcomes(),
            recognized: self.recognized,
            binary_errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Ok,
    Failed,
    Skipped,
}

fn parse_console(stdout: &str) -> Console {
    let mut console = Console::default();

    for line in stdout.lines() {
        if line.starts_with(BANNER) {
            console.recognized = true;
            continue;
        }
        if let Some(rest) = line.strip_prefix(RUN) {
            console.recognized = true;
            console.open(rest.trim());
            continue;
        }

        let terminator = [(OK, Verdict::Ok), (FAILED, Verdict::Failed), (SKIPPED, Verdict::Skipped)]
            .into_iter()
            .find_map(|(marker, verdict)| line.strip_prefix(marker).map(|rest| (rest, verdict)));
        if let Some((rest, verdict)) = terminator {
            let name = first_token(rest);
            if console.is_current(name) {
                console.close(name, verdict);
            }
            continue;
        }

        if console.current.is_some() {
            console.body.push(line.to_string());
        }
    }
    console
}

/// Case name on a terminator line: `Foo.bar (3 ms)` or `Foo.bar, where ...`
fn first_token(rest: &str) -> &str {
    rest.split_whitespace()
        .next()
        .map(|token| token.trim_end_matches(','))
        .unwrap_or("")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Failure,
    Skipped,
}

#[derive(Debug)]
struct Block {
    kind: BlockKind,
    location: Option<SourceLocation>,
    lines: Vec<String>,
    message: String,
}

/// Split a case body into `file:line: Failure` / `file:line: Skipped` blocks.
/// Text before the first header is the test's own output and is ignored.
fn body_blocks(body: &[String]) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    for line in body {
        if let Some(block) = block_header(line) {
            blocks.push(block);
        } else if let Some(block) = blocks.last_mut() {
            block.lines.push(line.clone());
        }
    }
    for block in &mut blocks {
        block.message = block.lines.join("\n").trim().to_string();
    }
    blocks
}

fn block_header(line: &str) -> Option<Block> {
    let line = line.trim_end();
    let header = |kind, head: &str, first: Option<&str>| Block {
        kind,
        location: parse_location(head),
        lines: first.map(|f| vec![f.to_string()]).unwrap_or_default(),
        message: String::new(),
    };

    if let Some(head) = line.strip_suffix(": Failure") {
        return Some(header(BlockKind::Failure, head, None));
    }
    if let Some(head) = line.strip_suffix(": Skipped") {
        return Some(header(BlockKind::Skipped, head, None));
    }
    // MSVC-style `file(line): error: message` keeps the message on the header
    let (head, message) = line.split_once(": error: ")?;
    parse_location(head)?;
    Some(header(BlockKind::Failure, head, Some(message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpptest_common::types::OutcomeKind;

    const CONSOLE: &str = r#"[==========] Running 5 tests from 1 test suite.
[----------] Global test environment set-up.
[----------] 5 tests from FooTest
[ RUN      ] FooTest.test_success
Just saying hi from gtest
[       OK ] FooTest.test_success (0 ms)
[ RUN      ] FooTest.test_failure
Just saying hi from gtest
gtest.cpp:17: Failure
Expected equality of these values:
  2 * 3
    Which is: 6
  5
gtest.cpp:18: Failure
Expected equality of these values:
  2 * 6
    Which is: 12
  15
[  FAILED  ] FooTest.test_failure (0 ms)
[ RUN      ] FooTest.test_error
unknown file: Failure
C++ exception with description "unexpected exception" thrown in the test body.
[  FAILED  ] FooTest.test_error (0 ms)
[ RUN      ] FooTest.test_skipped
gtest.cpp:33: Skipped
This is a skipped message

[  SKIPPED ] FooTest.test_skipped (0 ms)
[ RUN      ] FooTest.test_skipped_no_msg
gtest.cpp:38: Skipped

[  SKIPPED ] FooTest.test_skipped_no_msg (0 ms)
[----------] 5 tests from FooTest (0 ms total)

[==========] 5 tests from 1 test suite ran. (0 ms total)
[  PASSED  ] 1 test.
[  SKIPPED ] 2 tests, listed below:
[  SKIPPED ] FooTest.test_skipped
[  SKIPPED ] FooTest.test_skipped_no_msg
[  FAILED  ] 2 tests, listed below:
[  FAILED  ] FooTest.test_failure
[  FAILED  ] FooTest.test_error

 2 FAILED TESTS
  YOU HAVE 1 DISABLED TEST

"#;

    const REPORT: &str = r#"{
  "tests": 6, "failures": 2, "disabled": 1, "errors": 0,
  "name": "AllTests",
  "testsuites": [
    {
      "name": "FooTest",
      "tests": 6,
      "testsuite": [
        {"name": "test_success", "status": "RUN", "result": "COMPLETED", "classname": "FooTest"},
        {"name": "test_failure", "status": "RUN", "result": "COMPLETED", "classname": "FooTest",
         "failures": [
           {"failure": "gtest.cpp:17\nExpected equality of these values:\n  2 * 3\n    Which is: 6\n  5", "type": ""},
           {"failure": "gtest.cpp:18\nExpected equality of these values:\n  2 * 6\n    Which is: 12\n  15", "type": ""}
         ]},
        {"name": "test_error", "status": "RUN", "result": "COMPLETED", "classname": "FooTest",
         "failures": [
           {"failure": "unknown file\nC++ exception with description \"unexpected exception\" thrown in the test body.", "type": ""}
         ]},
        {"name": "DISABLED_test_disabled", "status": "NOTRUN", "result": "SUPPRESSED", "classname": "FooTest"},
        {"name": "test_skipped", "status": "RUN", "result": "SKIPPED", "classname": "FooTest",
         "skipped": [{"message": "gtest.cpp:33\nThis is a skipped message"}]},
        {"name": "test_skipped_no_msg", "status": "RUN", "result": "SKIPPED", "classname": "FooTest"}
      ]
    }
  ]
}"#;

    fn kinds(output: &ParseOutput) -> Vec<(&str, OutcomeKind)> {
        output.outcomes.iter().map(|o| (o.name.as_str(), o.kind)).collect()
    }

    #[test]
    fn test_report_classification() {
        let output = parse(CONSOLE, Some(REPORT.as_bytes()));
        assert!(output.recognized);
        assert_eq!(
            kinds(&output),
            vec![
                ("FooTest.test_success", OutcomeKind::Pass),
                ("FooTest.test_failure", OutcomeKind::Fail),
                ("FooTest.test_error", OutcomeKind::Error),
                ("FooTest.DISABLED_test_disabled", OutcomeKind::Disabled),
                ("FooTest.test_skipped", OutcomeKind::Skipped),
                ("FooTest.test_skipped_no_msg", OutcomeKind::Skipped),
            ]
        );

        let failure = &output.outcomes[1];
        assert_eq!(failure.location.as_ref().map(|l| l.line), Some(17));
        let message = failure.message.as_deref().unwrap();
        assert!(message.contains("Which is: 6"));
        assert!(message.contains("\n---\n"));
        assert!(message.contains("Which is: 12"));

        assert_eq!(output.outcomes[4].message.as_deref(), Some("This is a skipped message"));
        assert_eq!(output.outcomes[5].message.as_deref(), Some(""));
    }

    #[test]
    fn test_report_without_skip_message_uses_console() {
        let report = r#"{"testsuites": [{"name": "FooTest", "testsuite": [
            {"name": "test_skipped", "status": "RUN", "result": "SKIPPED"}]}]}"#;
        let stdout = "\
[ RUN      ] FooTest.test_skipped
gtest.cpp:33: Skipped
This is a skipped message

[  SKIPPED ] FooTest.test_skipped (0 ms)
";
        let output = parse(stdout, Some(report.as_bytes()));
        assert_eq!(output.outcomes.len(), 1);
        assert_eq!(output.outcomes[0].kind, OutcomeKind::Skipped);
        assert_eq!(output.outcomes[0].message.as_deref(), Some("This is a skipped message"));
    }

    #[test]
    fn test_console_fallback() {
        let output = parse(CONSOLE, None);
        assert!(output.recognized);
        assert_eq!(
            kinds(&output),
            vec![
                ("FooTest.test_success", OutcomeKind::Pass),
                ("FooTest.test_failure", OutcomeKind::Fail),
                ("FooTest.test_error", OutcomeKind::Error),
                ("FooTest.test_skipped", OutcomeKind::Skipped),
                ("FooTest.test_skipped_no_msg", OutcomeKind::Skipped),
            ]
        );
        assert_eq!(output.outcomes[3].message.as_deref(), Some("This is a skipped message"));
        assert_eq!(output.outcomes[4].message.as_deref(), Some(""));
        assert_eq!(
            output.outcomes[1].location,
            Some(SourceLocation { file: "gtest.cpp".into(), line: 17 })
        );
    }

    #[test]
    fn test_summary_lines_do_not_create_cases() {
        let output = parse(CONSOLE, None);
        assert!(!output.outcomes.iter().any(|o| o.name == "2"));
        assert_eq!(output.outcomes.len(), 5);
    }

    #[test]
    fn test_unterminated_case_is_crash() {
        let stdout = "\
[==========] Running 2 tests from 1 test suite.
[ RUN      ] FooTest.test_success
[       OK ] FooTest.test_success (0 ms)
[ RUN      ] FooTest.test_abort
about to abort
";
        let output = parse(stdout, None);
        assert_eq!(output.outcomes.len(), 2);
        assert_eq!(output.outcomes[1].kind, OutcomeKind::Error);
        assert_eq!(output.outcomes[1].message.as_deref(), Some("crashed"));
    }

    #[test]
    fn test_partial_report_keeps_console_crash() {
        let report = r#"{"testsuites": [{"name": "FooTest", "testsuite": [
            {"name": "test_success", "status": "RUN", "result": "COMPLETED"}]}]}"#;
        let stdout = "\
[ RUN      ] FooTest.test_success
[       OK ] FooTest.test_success (0 ms)
[ RUN      ] FooTest.test_abort
";
        let output = parse(stdout, Some(report.as_bytes()));
        assert_eq!(
            kinds(&output),
            vec![
                ("FooTest.test_success", OutcomeKind::Pass),
                ("FooTest.test_abort", OutcomeKind::Error),
            ]
        );
    }

    #[test]
    fn test_parameterized_names_are_verbatim() {
        let stdout = "\
[ RUN      ] Prime/PrimeTest.ReturnsTrue/0
[       OK ] Prime/PrimeTest.ReturnsTrue/0 (0 ms)
[ RUN      ] Typed/0.Works
[  FAILED  ] Typed/0.Works, where TypeParam = int (0 ms)
";
        let output = parse(stdout, None);
        assert_eq!(
            kinds(&output),
            vec![
                ("Prime/PrimeTest.ReturnsTrue/0", OutcomeKind::Pass),
                ("Typed/0.Works", OutcomeKind::Fail),
            ]
        );
    }

    #[test]
    fn test_plain_text_is_not_recognized() {
        assert!(!parse("hello\nworld\n", None).recognized);
    }
}

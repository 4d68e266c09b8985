// Boost.Test log at `--log_level=test_suite`
use super::{parse_location, ParseOutput};
use crate::evaluator::CaseTable;
use cpptest_common::types::SourceLocation;

const RECOGNITION_MARKERS: [&str; 6] = [
    "Entering test module",
    "*** No errors detected",
    "failure is detected",
    "failures are detected",
    "Test setup error:",
    "was aborted",
];

/// Skip reason Boost.Test prints for cases switched off with `disabled()`
const DISABLED_REASON: &str = "disabled";

#[derive(Debug)]
struct Diagnostic {
    fatal: bool,
    location: Option<SourceLocation>,
    message: String,
}

pub fn parse(output: &str) -> ParseOutput {
    let mut table = CaseTable::new();
    let mut binary_errors: Vec<String> = Vec::new();
    let mut recognized = false;
    let mut suites: Vec<String> = Vec::new();
    let mut current: Option<String> = None;

    for line in output.lines() {
        if is_running_banner(line) || RECOGNITION_MARKERS.iter().any(|m| line.contains(m)) {
            recognized = true;
        }

        if quoted_after(line, "Entering test module \"").is_some() {
            continue;
        }
        if let Some(name) = quoted_after(line, "Entering test suite \"") {
            suites.push(name.to_string());
            continue;
        }
        if quoted_after(line, "Leaving test suite \"").is_some() {
            suites.pop();
            continue;
        }
        if let Some(name) = quoted_after(line, "Entering test case \"") {
            let path = case_path(&suites, name);
            table.case(&path);
            current = Some(path);
            continue;
        }
        if quoted_after(line, "Leaving test case \"").is_some() {
            current = None;
            continue;
        }
        if let Some((name, reason)) = skipped_case(line) {
            let signals = table.case(&case_path(&suites, name));
            if reason == DISABLED_REASON {
                signals.disabled = true;
            } else {
                signals.skip(reason);
            }
            continue;
        }

        if let Some(diagnostic) = diagnostic(line) {
            match current {
                Some(ref name) => {
                    let signals = table.case(name);
                    if diagnostic.fatal && !is_assertion(&diagnostic) {
                        signals.error(diagnostic.message, diagnostic.location);
                    } else {
                        signals.fail(diagnostic.message, diagnostic.location);
                    }
                }
                None => binary_errors.push(diagnostic.message),
            }
            continue;
        }

        if let Some(idx) = line.find("last checkpoint") {
            let context = line[idx..].trim();
            match current {
                Some(ref name) => table.case(name).annotate_last(context),
                None => {
                    if let Some(last) = binary_errors.last_mut() {
                        last.push('\n');
                        last.push_str(context);
                    }
                }
            }
            continue;
        }

        if let Some(rest) = line.trim_start().strip_prefix("Test setup error:") {
            binary_errors.push(rest.trim().to_string());
        }
    }

    ParseOutput {
        outcomes: table.into_outcomes(),
        recognized,
        binary_errors,
    }
}

fn is_running_banner(line: &str) -> bool {
    line.starts_with("Running ") && line.contains(" test case")
}

/// Case names are reported relative to the master suite, e.g. `suite/case`
fn case_path(suites: &[String], name: &str) -> String {
    if suites.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", suites.join("/"), name)
}

/// Text between `marker` (which ends in an opening quote) and the closing quote
fn quoted_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let start = line.find(marker)? + marker.len();
    let rest = &line[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// `Test case "x" is skipped because <reason>`
fn skipped_case(line: &str) -> Option<(&str, String)> {
    let name = quoted_after(line, "Test case \"")?;
    let (_, reason) = line.split_once("is skipped because")?;
    Some((name, reason.trim().to_string()))
}

/// Fatal assertions (`BOOST_REQUIRE*`, `BOOST_FAIL`) carry the source line of
/// the assertion. Exceptions and system errors are reported at
/// `unknown location`, whatever their message says.
fn is_assertion(diagnostic: &Diagnostic) -> bool {
    diagnostic.location.is_some() || diagnostic.message.starts_with("critical check ")
}

fn diagnostic(line: &str) -> Option<Diagnostic> {
    let markers = [
        (": fatal error: in \"", true),
        (": fatal error in \"", true),
        (": error: in \"", false),
        (": error in \"", false),
    ];
    let (idx, marker, fatal) = markers
        .iter()
        .find_map(|(marker, fatal)| line.find(marker).map(|idx| (idx, *marker, *fatal)))?;

    let head = &line[..idx];
    let rest = &line[idx + marker.len()..];
    let (_scope, message) = rest.split_once('"')?;
    let message = message.trim_start_matches(':').trim().to_string();

    let location = parse_location(head).filter(|l| l.file != "unknown location");
    Some(Diagnostic {
        fatal,
        location,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionResult;
    use cpptest_common::types::{FrameworkKind, OutcomeKind};

    const FAILURES: &str = r#"Running 4 test cases...
Entering test module "MyTest"
boost_failure.cpp(8): Entering test case "test_success"
boost_failure.cpp(8): Leaving test case "test_success"; testing time: 76us
boost_failure.cpp(12): Entering test case "test_failure"
boost_failure.cpp(14): error: in "test_failure": check 2 * 3 == 5 has failed [6 != 5]
boost_failure.cpp(15): error: in "test_failure": check 2 * 6 == 15 has failed [12 != 15]
boost_failure.cpp(12): Leaving test case "test_failure"; testing time: 90us
boost_failure.cpp(18): Entering test case "test_error"
unknown location(0): fatal error: in "test_error": std::runtime_error: unexpected exception
boost_failure.cpp(18): last checkpoint: "test_error" test entry
boost_failure.cpp(18): Leaving test case "test_error"; testing time: 50us
Test case "test_disabled" is skipped because disabled
Leaving test module "MyTest"; testing time: 300us

*** 3 failures are detected in the test module "MyTest"
"#;

    #[test]
    fn test_case_outcomes() {
        let output = parse(FAILURES);
        assert!(output.recognized);
        assert!(output.binary_errors.is_empty());

        let kinds: Vec<(&str, OutcomeKind)> =
            output.outcomes.iter().map(|o| (o.name.as_str(), o.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("test_success", OutcomeKind::Pass),
                ("test_failure", OutcomeKind::Fail),
                ("test_error", OutcomeKind::Error),
                ("test_disabled", OutcomeKind::Disabled),
            ]
        );

        let failure = &output.outcomes[1];
        assert_eq!(
            failure.message.as_deref(),
            Some("check 2 * 3 == 5 has failed [6 != 5]\n---\ncheck 2 * 6 == 15 has failed [12 != 15]")
        );
        assert_eq!(
            failure.location,
            Some(SourceLocation { file: "boost_failure.cpp".into(), line: 14 })
        );

        let error = &output.outcomes[2];
        assert_eq!(error.location, None);
        assert_eq!(
            error.message.as_deref(),
            Some("std::runtime_error: unexpected exception\nlast checkpoint: \"test_error\" test entry")
        );
    }

    #[test]
    fn test_nested_suites_build_paths() {
        let log = r#"Running 1 test case...
Entering test module "Master"
a.cpp(3): Entering test suite "outer"
a.cpp(4): Entering test suite "inner"
a.cpp(5): Entering test case "works"
a.cpp(5): Leaving test case "works"
a.cpp(4): Leaving test suite "inner"
a.cpp(9): Entering test case "after"
a.cpp(10): fatal error: in "outer/after": critical check x == 1 has failed
a.cpp(9): Leaving test case "after"
a.cpp(3): Leaving test suite "outer"
Leaving test module "Master"
"#;
        let output = parse(log);
        assert_eq!(output.outcomes[0].name, "outer/inner/works");
        assert_eq!(output.outcomes[1].name, "outer/after");
        // REQUIRE-style failures are fatal but still assertion failures
        assert_eq!(output.outcomes[1].kind, OutcomeKind::Fail);
    }

    #[test]
    fn test_fatal_exception_mentioning_checks_is_error() {
        let log = r#"Running 2 test cases...
Entering test module "Config"
config.cpp(5): Entering test case "load"
unknown location(0): fatal error: in "load": std::runtime_error: checksum check has failed for config.ini
config.cpp(7): last checkpoint: "load" entry
config.cpp(5): Leaving test case "load"
config.cpp(12): Entering test case "save"
config.cpp(14): fatal error: in "save": not implemented yet
config.cpp(12): Leaving test case "save"
Leaving test module "Config"
"#;
        let output = parse(log);
        let kinds: Vec<(&str, OutcomeKind)> =
            output.outcomes.iter().map(|o| (o.name.as_str(), o.kind)).collect();
        assert_eq!(
            kinds,
            vec![("load", OutcomeKind::Error), ("save", OutcomeKind::Fail)]
        );
        assert!(output.outcomes[0]
            .message
            .as_deref()
            .unwrap()
            .starts_with("std::runtime_error: checksum check has failed"));
    }

    #[test]
    fn test_skip_reason_is_message() {
        let log = "Running 1 test case...\n\
                   Test case \"needs_gpu\" is skipped because precondition failed\n\
                   \n*** No errors detected\n";
        let output = parse(log);
        assert_eq!(output.outcomes[0].kind, OutcomeKind::Skipped);
        assert_eq!(output.outcomes[0].message.as_deref(), Some("precondition failed"));
    }

    #[test]
    fn test_global_fixture_failure_is_single_binary_error() {
        let stdout = "\
Running 1 test case...
something on the stdout
unknown location(0): fatal error: in \"MyTest\": std::runtime_error: This is a global fixture init failure

*** 1 failure is detected in the test module \"MyTest\"
";
        let result = ExecutionResult {
            exit_code: 200,
            stdout: stdout.as_bytes().to_vec(),
            stderr: b"something on the stderr\n".to_vec(),
            ..Default::default()
        };

        let output = parse(&result.combined_output());
        assert!(output.outcomes.is_empty());
        assert_eq!(
            output.binary_errors,
            vec!["std::runtime_error: This is a global fixture init failure"]
        );

        let outcomes = super::super::parse(FrameworkKind::BoostTest, &result, "boost_fixture_setup_error");
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].name, "boost_fixture_setup_error");
        assert_eq!(outcomes[0].kind, OutcomeKind::Error);
        assert!(outcomes[0]
            .message
            .as_deref()
            .unwrap()
            .contains("This is a global fixture init failure"));
    }

    #[test]
    fn test_legacy_setup_error_line() {
        let output = parse("Test setup error: std::runtime_error: boom\n");
        assert!(output.recognized);
        assert_eq!(output.binary_errors, vec!["std::runtime_error: boom"]);
    }

    #[test]
    fn test_plain_text_is_not_recognized() {
        assert!(!parse("Segmentation fault\n").recognized);
    }
}

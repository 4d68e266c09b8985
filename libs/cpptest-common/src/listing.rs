/// Case listing - how each framework enumerates the cases a binary contains
///
/// Listing never runs a case. The caller invokes the binary with `list_args`
/// and hands the combined output to `parse_listing`.
use crate::types::FrameworkKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Catch2Version {
    V2,
    V3,
}

impl Catch2Version {
    /// Detect the Catch2 major version from `--help` output
    pub fn detect(help_output: &str) -> Option<Self> {
        if help_output.contains("--list-test-names-only") {
            Some(Catch2Version::V2)
        } else if help_output.contains("--list-tests") {
            Some(Catch2Version::V3)
        } else {
            None
        }
    }
}

/// Arguments that make a binary print its cases instead of running them
pub fn list_args(kind: FrameworkKind, catch2: Option<Catch2Version>) -> Vec<String> {
    let args: &[&str] = match kind {
        FrameworkKind::GoogleTest => &["--gtest_list_tests"],
        FrameworkKind::Catch2 => match catch2 {
            Some(Catch2Version::V2) => &["--list-test-names-only"],
            _ => &["--list-tests", "--verbosity", "quiet"],
        },
        FrameworkKind::BoostTest => &["--list_content"],
        FrameworkKind::QtTest => &["-functions"],
    };
    args.iter().map(|s| s.to_string()).collect()
}

/// Extract case names from listing output.
///
/// `fallback` names the single pseudo-case used when a framework prints
/// nothing usable (older Boost.Test cannot list its content).
pub fn parse_listing(kind: FrameworkKind, output: &str, fallback: &str) -> Vec<String> {
    let cases = match kind {
        FrameworkKind::GoogleTest => parse_gtest_listing(output),
        FrameworkKind::Catch2 => parse_catch2_listing(output),
        FrameworkKind::BoostTest => parse_boost_listing(output),
        FrameworkKind::QtTest => parse_qt_listing(output),
    };
    if cases.is_empty() && kind == FrameworkKind::BoostTest {
        return vec![fallback.to_string()];
    }
    cases
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Parses output like:
///
/// ```text
/// PrimeTableTest/0.  # TypeParam = class OnTheFlyPrimeTable
///   ReturnsFalseForNonPrimes
///   CanGetNextPrime
/// ```
fn parse_gtest_listing(output: &str) -> Vec<String> {
    let mut suite: Option<String> = None;
    let mut cases = Vec::new();
    for line in output.lines() {
        let indented = line.starts_with(' ');
        if !indented && line.contains('.') {
            suite = Some(strip_comment(line).trim().to_string());
        } else if indented {
            if let Some(ref suite) = suite {
                let name = strip_comment(line).trim();
                if !name.is_empty() {
                    cases.push(format!("{}{}", suite, name));
                }
            }
        }
    }
    cases
}

fn parse_catch2_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .collect()
}

/// Parses the `--list_content` tree. The module sits at depth 0, suites and
/// cases are indented four spaces per level, and enabled units carry a
/// trailing `*`. Leaves are cases; they are reported as `suite/case` paths.
fn parse_boost_listing(output: &str) -> Vec<String> {
    let nodes: Vec<(usize, String)> = output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let indent = line.len() - line.trim_start().len();
            let name = line.trim().trim_end_matches('*').trim_end().to_string();
            (indent / 4, name)
        })
        .collect();

    let mut cases = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    for (idx, (depth, name)) in nodes.iter().enumerate() {
        stack.truncate(*depth);
        stack.push(name.clone());
        let is_leaf = nodes.get(idx + 1).map_or(true, |(next, _)| next <= depth);
        if *depth > 0 && is_leaf {
            cases.push(stack[1..].join("/"));
        }
    }
    cases
}

fn parse_qt_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_suffix("()"))
        .filter(|name| !name.is_empty() && !name.contains(' '))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gtest_listing() {
        let output = "FooTest.\n  test_success\n  test_failure\n  test_error\n  DISABLED_test_disabled\n";
        assert_eq!(
            parse_listing(FrameworkKind::GoogleTest, output, "gtest"),
            vec![
                "FooTest.test_success",
                "FooTest.test_failure",
                "FooTest.test_error",
                "FooTest.DISABLED_test_disabled",
            ]
        );
    }

    #[test]
    fn test_gtest_listing_strips_comments() {
        let output = "PrimeTableTest/0.  # TypeParam = class OnTheFlyPrimeTable\n  ReturnsTrueForPrimes  # GetParam() = 3\n";
        assert_eq!(
            parse_listing(FrameworkKind::GoogleTest, output, "x"),
            vec!["PrimeTableTest/0.ReturnsTrueForPrimes"]
        );
    }

    #[test]
    fn test_catch2_listing_keeps_special_characters() {
        let output = "Brackets in [test] name\n**Star in test name**\n~Tilde in test name\nComma, in, test, name\nBackslash\\ in\\ test\\ name\n\"Quotes\" in test name\n";
        let cases = parse_listing(FrameworkKind::Catch2, output, "x");
        assert_eq!(cases.len(), 6);
        assert_eq!(cases[3], "Comma, in, test, name");
        assert_eq!(cases[4], r"Backslash\ in\ test\ name");
        assert_eq!(cases[5], "\"Quotes\" in test name");
    }

    #[test]
    fn test_boost_listing_tree() {
        let output = "MyTest*\n    math*\n        addition*\n        division\n    standalone*\n";
        assert_eq!(
            parse_listing(FrameworkKind::BoostTest, output, "boost_success"),
            vec!["math/addition", "math/division", "standalone"]
        );
    }

    #[test]
    fn test_boost_listing_falls_back_to_binary_name() {
        assert_eq!(
            parse_listing(FrameworkKind::BoostTest, "", "boost_success"),
            vec!["boost_success"]
        );
    }

    #[test]
    fn test_qt_listing() {
        let output = "testErrorOne()\ntestErrorTwo()\n";
        assert_eq!(
            parse_listing(FrameworkKind::QtTest, output, "qt_error"),
            vec!["testErrorOne", "testErrorTwo"]
        );
    }

    #[test]
    fn test_catch2_version_detection() {
        assert_eq!(
            Catch2Version::detect("  --list-test-names-only  list all/matching test cases names only"),
            Some(Catch2Version::V2)
        );
        assert_eq!(
            Catch2Version::detect("  -l, --list-tests  list all/matching test cases"),
            Some(Catch2Version::V3)
        );
        assert_eq!(Catch2Version::detect("usage: something else"), None);
        assert_eq!(
            list_args(FrameworkKind::Catch2, Some(Catch2Version::V2)),
            vec!["--list-test-names-only"]
        );
    }
}

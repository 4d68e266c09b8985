// Framework command lines: how a TestBinary becomes an Invocation
use crate::config::FrameworkConfig;
use crate::engine::Invocation;
use cpptest_common::types::{FrameworkKind, TestBinary};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tracing::warn;

/// Separates Boost.Test's own flags from the arguments handed to the test module
pub const BOOST_MODULE_SEPARATOR: &str = "--";

/// An invocation plus the scratch directory its report file lives in.
/// The directory is removed when this is dropped.
pub struct PreparedRun {
    pub invocation: Invocation,
    _report_dir: Option<TempDir>,
}

/// Build the run command for a binary, restricted to `selection` when non-empty
pub fn prepare_run(
    binary: &TestBinary,
    config: &FrameworkConfig,
    selection: &[String],
    timeout: Duration,
) -> PreparedRun {
    let mut invocation = base_invocation(binary, timeout);
    let mut report_dir = None;

    match binary.framework {
        FrameworkKind::GoogleTest => {
            invocation.args.extend(binary.args.iter().cloned());
            invocation.args.extend(config.run_args.iter().cloned());
            if !selection.is_empty() {
                invocation.args.push(format!("--gtest_filter={}", selection.join(":")));
            }
            if let Some((dir, report_path)) = report_file("gtest-report.json") {
                invocation
                    .args
                    .push(format!("--gtest_output=json:{}", report_path.display()));
                invocation.report_path = Some(report_path);
                report_dir = Some(dir);
            }
        }
        FrameworkKind::Catch2 => {
            invocation.args.extend(binary.args.iter().cloned());
            if !selection.is_empty() {
                let spec: Vec<String> = selection.iter().map(|name| escape_catch2_name(name)).collect();
                invocation.args.push(spec.join(","));
            }
            invocation.args.extend(config.run_args.iter().cloned());
            if let Some((dir, report_path)) = report_file("catch2-report.xml") {
                invocation.args.push(format!("--out={}", report_path.display()));
                invocation.report_path = Some(report_path);
                report_dir = Some(dir);
            }
        }
        FrameworkKind::BoostTest => {
            invocation.args.extend(config.run_args.iter().cloned());
            if !selection.is_empty() {
                invocation.args.push(format!("--run_test={}", selection.join(",")));
            }
            if !binary.args.is_empty() {
                invocation.args.push(BOOST_MODULE_SEPARATOR.to_string());
                invocation.args.extend(binary.args.iter().cloned());
            }
        }
        FrameworkKind::QtTest => {
            invocation.args.extend(config.run_args.iter().cloned());
            invocation.args.extend(binary.args.iter().cloned());
            invocation.args.extend(selection.iter().cloned());
        }
    }

    PreparedRun {
        invocation,
        _report_dir: report_dir,
    }
}

/// Build a command that runs the binary with `args` only (listing, `--help`)
pub fn auxiliary_invocation(binary: &TestBinary, args: Vec<String>, timeout: Duration) -> Invocation {
    let mut invocation = base_invocation(binary, timeout);
    invocation.args.extend(args);
    invocation
}

fn base_invocation(binary: &TestBinary, timeout: Duration) -> Invocation {
    let (program, args) = binary.command_line(Vec::<String>::new());
    let mut invocation = Invocation::new(program, timeout);
    invocation.args = args;
    invocation.env = binary.env.clone();
    invocation
}

/// Scratch file a framework writes its machine-readable report to
fn report_file(name: &str) -> Option<(TempDir, PathBuf)> {
    match tempfile::Builder::new().prefix("cpptest").tempdir() {
        Ok(dir) => {
            let path = dir.path().join(name);
            Some((dir, path))
        }
        Err(e) => {
            warn!(error = %e, "Could not create report directory; relying on console output");
            None
        }
    }
}

/// Backslash-escape the characters Catch2 treats as test-spec syntax, so a
/// case name matches literally
pub fn escape_catch2_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '[' | ']' | '*' | ',' | '~' | '\\' | '"') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Split a Boost.Test argv (without program name) into framework flags and
/// the arguments the module sees after the separator
pub fn split_boost_args(args: &[String]) -> (&[String], &[String]) {
    match args.iter().position(|a| a == BOOST_MODULE_SEPARATOR) {
        Some(idx) => (&args[..idx], &args[idx + 1..]),
        None => (args, &[]),
    }
}

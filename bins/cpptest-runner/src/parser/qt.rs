// Qt Test plain-text logger
//
// Result lines look like `FAIL!  : TestClass::slot(tag) message`; indented
// lines below belong to the same result, `Loc: [file(line)]` among them.
use super::{parse_location, ParseOutput};
use crate::evaluator::{CaseSignals, CaseTable};
use cpptest_common::types::SourceLocation;

const START_MARKER: &str = "********* Start testing of";
const FINISH_MARKER: &str = "********* Finished testing of";
const TOTALS_MARKER: &str = "Totals:";

const EXCEPTION_MARKERS: [&str; 2] = ["Caught unhandled exception", "Caught std::exception"];

/// Slots every Qt test class has; they are not individually selectable
pub const FIXTURE_SLOTS: [&str; 2] = ["initTestCase", "cleanupTestCase"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Pass,
    Fail,
    Skip,
    ExpectedFail,
    UnexpectedPass,
    BlacklistedPass,
    BlacklistedFail,
    Fatal,
    /// Debug and warning chatter that mentions a slot but carries no verdict
    Message,
}

impl Token {
    fn parse(s: &str) -> Option<Self> {
        let token = match s {
            "PASS" => Token::Pass,
            "FAIL!" => Token::Fail,
            "SKIP" => Token::Skip,
            "XFAIL" | "BXFAIL" => Token::ExpectedFail,
            "XPASS" => Token::UnexpectedPass,
            "BPASS" => Token::BlacklistedPass,
            "BFAIL" | "BXPASS" => Token::BlacklistedFail,
            "QFATAL" => Token::Fatal,
            "QWARN" | "QDEBUG" | "QINFO" | "QSYSTEM" | "QCRITICAL" | "INFO" | "WARNING" | "RESULT" => {
                Token::Message
            }
            _ => return None,
        };
        Some(token)
    }
}

#[derive(Debug)]
struct Pending {
    token: Token,
    name: String,
    lines: Vec<String>,
    location: Option<SourceLocation>,
}

pub fn parse(stdout: &str) -> ParseOutput {
    let mut table = CaseTable::new();
    let mut recognized = false;
    let mut pending: Option<Pending> = None;

    for line in stdout.lines() {
        if line.starts_with(START_MARKER)
            || line.starts_with(FINISH_MARKER)
            || line.starts_with(TOTALS_MARKER)
        {
            recognized = true;
            flush(&mut table, pending.take());
            continue;
        }

        if let Some((token, name, message)) = result_line(line) {
            recognized = true;
            flush(&mut table, pending.take());
            pending = Some(Pending {
                token,
                name: name.to_string(),
                lines: if message.is_empty() {
                    Vec::new()
                } else {
                    vec![message.to_string()]
                },
                location: None,
            });
            continue;
        }

        match pending {
            Some(ref mut result) if line.starts_with(' ') => {
                let trimmed = line.trim();
                if let Some(loc) = trimmed.strip_prefix("Loc: [").and_then(|l| l.strip_suffix(']')) {
                    result.location = parse_location(loc).filter(|l| l.file != "Unknown file");
                } else {
                    result.lines.push(trimmed.to_string());
                }
            }
            _ => flush(&mut table, pending.take()),
        }
    }
    flush(&mut table, pending.take());

    ParseOutput {
        outcomes: table.into_outcomes(),
        recognized,
        binary_errors: Vec::new(),
    }
}

/// The run printed its closing banner; without it the process died mid-run
pub fn finished(stdout: &str) -> bool {
    stdout.lines().any(|line| line.starts_with(FINISH_MARKER))
}

/// `TestClass::slot(tag)` → `slot`
pub fn slot_of(name: &str) -> &str {
    let function = name.rsplit_once("::").map(|(_, f)| f).unwrap_or(name);
    function.split('(').next().unwrap_or(function)
}

fn result_line(line: &str) -> Option<(Token, &str, &str)> {
    let (head, rest) = line.split_once(" : ")?;
    let token = Token::parse(head.trim())?;
    if head.starts_with(' ') {
        return None;
    }

    let open = rest.find('(')?;
    let close = name_end(rest, open)?;
    let name = &rest[..=close];
    if !name.contains("::") {
        return None;
    }
    Some((token, name, rest[close + 1..].trim()))
}

/// Index of the parenthesis closing the data tag opened at `open`. Tags may
/// hold parentheses of their own; when they do not balance, the name ends at
/// the first `)` followed by a space or the end of the line.
fn name_end(rest: &str, open: usize) -> Option<usize> {
    let bytes = rest.as_bytes();
    let ends_name = |idx: usize| matches!(bytes.get(idx + 1), None | Some(b' ') | Some(b'\r'));

    let mut depth = 0usize;
    let mut balanced = None;
    for (idx, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    balanced = Some(idx);
                    break;
                }
            }
            _ => {}
        }
    }

    match balanced {
        Some(idx) if ends_name(idx) => Some(idx),
        other => (other.unwrap_or(open)..bytes.len()).find(|&idx| bytes[idx] == b')' && ends_name(idx)),
    }
}

fn flush(table: &mut CaseTable, pending: Option<Pending>) {
    let Some(result) = pending else {
        return;
    };
    if result.token == Token::Message {
        return;
    }

    let message = result.lines.join("\n");
    let signals: &mut CaseSignals = table.case(&result.name);
    match result.token {
        Token::Pass | Token::ExpectedFail | Token::BlacklistedPass => {}
        Token::Fail | Token::UnexpectedPass => {
            if EXCEPTION_MARKERS.iter().any(|marker| message.contains(marker)) {
                signals.error(message, result.location);
            } else {
                signals.fail(message, result.location);
            }
        }
        Token::Skip => signals.skip(message),
        Token::BlacklistedFail => signals.skip("blacklisted"),
        Token::Fatal => signals.error(message, result.location),
        Token::Message => {}
    }
}

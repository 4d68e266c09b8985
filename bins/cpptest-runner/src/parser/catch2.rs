// Catch2 results
//
// The XML reporter (`--reporter xml --out <file>`) is the primary source: it
// names every case, including cases without a single assertion, and keeps
// names intact however long they are. The console grammar covers runs that
// wrote no XML, e.g. when the reporter was overridden in the framework config.
use super::{parse_location, ParseOutput};
use crate::evaluator::CaseTable;
use cpptest_common::types::SourceLocation;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::mem;
use tracing::debug;

const EXCEPTION_MARKERS: [&str; 2] = [
    "due to unexpected exception with message:",
    "due to a fatal error condition",
];

const SKIP_MESSAGE_MARKER: &str = "explicitly with message:";

const FOOTERS: [&str; 3] = ["All tests passed", "test cases:", "No tests ran"];

/// Case that started but never got a verdict
const CRASHED_MESSAGE: &str = "crashed";

pub fn parse(stdout: &str, report: Option<&[u8]>) -> ParseOutput {
    // A crash can leave the report file created but empty
    match report.filter(|bytes| bytes.iter().any(|b| !b.is_ascii_whitespace())) {
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            if is_xml_report(&text) {
                parse_xml(&text)
            } else {
                parse_console(&text)
            }
        }
        None => parse_console(stdout),
    }
}

fn is_xml_report(text: &str) -> bool {
    // v3 writes <Catch2TestRun>, v2 writes <Catch name="...">
    text.contains("<Catch2TestRun") || text.contains("<Catch ") || text.contains("<Catch>")
}

// ---------------------------------------------------------------------------
// XML reporter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    Original,
    Expanded,
    Exception,
    Failure,
    Skip,
}

#[derive(Debug, Default)]
struct Expression {
    success: bool,
    macro_name: String,
    location: Option<SourceLocation>,
    original: String,
    expanded: String,
}

impl Expression {
    /// Rendered the way the console reporter prints a failed assertion
    fn message(&self) -> String {
        let mut message = if self.macro_name.is_empty() {
            self.original.clone()
        } else {
            format!("{}( {} )", self.macro_name, self.original)
        };
        if !self.expanded.is_empty() && self.expanded != self.original {
            message.push_str("\nwith expansion:\n  ");
            message.push_str(&self.expanded);
        }
        message
    }
}

/// Signals of the case being read; applied once its verdict is known
#[derive(Debug, Default)]
struct OpenCase {
    name: String,
    failures: Vec<(String, Option<SourceLocation>)>,
    errors: Vec<(String, Option<SourceLocation>)>,
    skip: Option<String>,
}

#[derive(Default)]
struct XmlReport {
    table: CaseTable,
    recognized: bool,
    case: Option<OpenCase>,
    expression: Option<Expression>,
    target: Option<(TextTarget, Option<SourceLocation>)>,
    text: String,
}

fn parse_xml(text: &str) -> ParseOutput {
    let mut report = XmlReport::default();
    let mut reader = Reader::from_str(text);

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => report.start(e),
            Ok(Event::Empty(ref e)) => {
                report.start(e);
                report.end(e.name().as_ref());
            }
            Ok(Event::End(ref e)) => report.end(e.name().as_ref()),
            Ok(Event::Text(ref t)) => {
                if report.target.is_some() {
                    match t.unescape() {
                        Ok(text) => report.text.push_str(&text),
                        Err(_) => report.text.push_str(&String::from_utf8_lossy(t)),
                    }
                }
            }
            Ok(Event::CData(ref c)) => {
                if report.target.is_some() {
                    report.text.push_str(&String::from_utf8_lossy(c));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                // A crash leaves the document cut short; keep what was read
                debug!(position = reader.buffer_position(), error = %e, "Catch2 XML report ends early");
                break;
            }
        }
    }

    report.abandon_case();

    ParseOutput {
        outcomes: report.table.into_outcomes(),
        recognized: report.recognized,
        binary_errors: Vec::new(),
    }
}

impl XmlReport {
    fn start(&mut self, e: &BytesStart) {
        match e.name().as_ref() {
            b"Catch" | b"Catch2TestRun" => self.recognized = true,
            b"TestCase" => {
                self.abandon_case();
                let name = attribute(e, "name").unwrap_or_default();
                self.table.case(&name);
                self.case = Some(OpenCase {
                    name,
                    ..Default::default()
                });
            }
            b"Expression" => {
                self.expression = Some(Expression {
                    success: attribute(e, "success").as_deref() != Some("false"),
                    macro_name: attribute(e, "type").unwrap_or_default(),
                    location: location(e),
                    ..Default::default()
                });
            }
            b"Original" => self.collect(TextTarget::Original, None),
            b"Expanded" => self.collect(TextTarget::Expanded, None),
            b"Exception" | b"FatalErrorCondition" => self.collect(TextTarget::Exception, location(e)),
            b"Failure" => self.collect(TextTarget::Failure, location(e)),
            b"Skip" => self.collect(TextTarget::Skip, location(e)),
            b"OverallResult" => {
                let success = attribute(e, "success").as_deref() != Some("false");
                let skips = attribute(e, "skips")
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(0);
                self.finish_case(success, skips);
            }
            _ => {}
        }
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"Original" | b"Expanded" | b"Exception" | b"FatalErrorCondition" | b"Failure" | b"Skip" => {
                self.flush_text()
            }
            b"Expression" => {
                let Some(expression) = self.expression.take() else {
                    return;
                };
                if expression.success {
                    return;
                }
                if let Some(ref mut case) = self.case {
                    case.failures.push((expression.message(), expression.location));
                }
            }
            b"TestCase" => self.abandon_case(),
            _ => {}
        }
    }

    fn collect(&mut self, target: TextTarget, location: Option<SourceLocation>) {
        self.target = Some((target, location));
        self.text.clear();
    }

    fn flush_text(&mut self) {
        let Some((target, location)) = self.target.take() else {
            return;
        };
        let text = mem::take(&mut self.text).trim().to_string();

        match target {
            TextTarget::Original => {
                if let Some(ref mut expression) = self.expression {
                    expression.original = text;
                }
            }
            TextTarget::Expanded => {
                if let Some(ref mut expression) = self.expression {
                    expression.expanded = text;
                }
            }
            TextTarget::Exception => {
                if let Some(ref mut case) = self.case {
                    case.errors.push((text, location));
                }
            }
            TextTarget::Failure => {
                if let Some(ref mut case) = self.case {
                    case.failures.push((text, location));
                }
            }
            TextTarget::Skip => {
                if let Some(ref mut case) = self.case {
                    case.skip.get_or_insert(text);
                }
            }
        }
    }

    /// Apply the case's `OverallResult`
    fn finish_case(&mut self, success: bool, skips: u64) {
        let Some(case) = self.case.take() else {
            return;
        };
        let signals = self.table.case(&case.name);

        if case.skip.is_some() || skips > 0 {
            signals.skip(case.skip.unwrap_or_default());
            return;
        }
        if success {
            // Failures inside `[!mayfail]` or `CHECK_NOFAIL` do not count
            return;
        }
        for (message, location) in case.errors {
            signals.error(message, location);
        }
        for (message, location) in case.failures {
            signals.fail(message, location);
        }
        if signals.errors.is_empty() && signals.failures.is_empty() {
            signals.fail("test case failed", None);
        }
    }

    /// A case closed (or cut off) without a verdict
    fn abandon_case(&mut self) {
        let Some(case) = self.case.take() else {
            return;
        };
        let signals = self.table.case(&case.name);
        for (message, location) in case.errors {
            signals.error(message, location);
        }
        for (message, location) in case.failures {
            signals.fail(message, location);
        }
        if signals.errors.is_empty() {
            signals.error(CRASHED_MESSAGE, None);
        }
    }
}

fn attribute(e: &BytesStart, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key.as_bytes())
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

fn location(e: &BytesStart) -> Option<SourceLocation> {
    let file = attribute(e, "filename")?;
    let line = attribute(e, "line")?.parse().ok()?;
    Some(SourceLocation { file, line })
}

// ---------------------------------------------------------------------------
// Console reporter (`--success`): cases are named by the header block between
// two dash rules, results follow as `file:line: PASSED:` style lines.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultKind {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug)]
struct PendingResult {
    kind: ResultKind,
    location: Option<SourceLocation>,
    lines: Vec<String>,
}

fn parse_console(stdout: &str) -> ParseOutput {
    let lines: Vec<&str> = stdout.lines().collect();
    let mut table = CaseTable::new();
    let mut recognized = false;
    let mut current: Option<String> = None;
    let mut pending: Option<PendingResult> = None;
    let mut footer_cases: Option<usize> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];

        if is_rule(line, '-') {
            flush(&mut table, current.as_deref(), pending.take());
            if let Some((name, next)) = header_block(&lines, i) {
                recognized = true;
                table.case(&name);
                current = Some(name);
                i = next;
                continue;
            }
            i += 1;
            continue;
        }

        if is_rule(line, '=') {
            flush(&mut table, current.as_deref(), pending.take());
            current = None;
            i += 1;
            continue;
        }

        if FOOTERS.iter().any(|footer| line.starts_with(footer)) {
            recognized = true;
            footer_cases = footer_cases.or_else(|| footer_case_count(line));
        }

        if let Some((kind, location)) = result_header(line) {
            flush(&mut table, current.as_deref(), pending.take());
            pending = Some(PendingResult {
                kind,
                location,
                lines: Vec::new(),
            });
        } else if let Some(ref mut result) = pending {
            result.lines.push(line.trim_end().to_string());
        }
        i += 1;
    }
    flush(&mut table, current.as_deref(), pending.take());

    let outcomes = table.into_outcomes();

    // The console reporter prints no header for a case without assertions
    let mut binary_errors = Vec::new();
    if let Some(expected) = footer_cases {
        if expected > outcomes.len() {
            binary_errors.push(format!(
                "{} of {} test cases reported no result",
                expected - outcomes.len(),
                expected
            ));
        }
    }

    ParseOutput {
        outcomes,
        recognized,
        binary_errors,
    }
}

fn is_rule(line: &str, c: char) -> bool {
    let line = line.trim_end();
    line.len() >= 20 && line.chars().all(|x| x == c)
}

/// Read the header block opened by the dash rule at `start`. Returns the case
/// name and the index of the first line after the block.
///
/// The case name starts unindented and wraps at 79 columns. When it contains
/// `": "`, wrapped lines are indented to just past that separator; otherwise
/// they are not indented. Indented lines that are not continuations are the
/// active sections. The block is followed by the case location and a dotted
/// rule.
fn header_block(lines: &[&str], start: usize) -> Option<(String, usize)> {
    let close = (start + 1..lines.len()).find(|&idx| is_rule(lines[idx], '-'))?;
    let body = &lines[start + 1..close];

    let first = *body.first()?;
    if first.starts_with(' ') || first.trim().is_empty() {
        return None;
    }
    let continuation_indent = first.find(": ").map(|idx| idx + 2).unwrap_or(0);

    let mut name_lines = vec![first.trim_end()];
    for line in &body[1..] {
        let indent = line.len() - line.trim_start().len();
        if line.trim().is_empty() || indent != continuation_indent {
            break;
        }
        name_lines.push(line.trim());
    }

    let mut next = close + 1;
    // `file:line` then `.....`
    if next < lines.len() && parse_location(lines[next]).is_some() {
        next += 1;
    }
    if next < lines.len() && is_rule(lines[next], '.') {
        next += 1;
    }

    Some((name_lines.join(" "), next))
}

/// `All tests passed (3 assertions in 2 test cases)` or `test cases: 2 | ...`
fn footer_case_count(line: &str) -> Option<usize> {
    if let Some(rest) = line.strip_prefix("test cases:") {
        return leading_number(rest.trim_start());
    }
    if line.starts_with("All tests passed") {
        let (_, rest) = line.split_once(" in ")?;
        return leading_number(rest);
    }
    None
}

fn leading_number(text: &str) -> Option<usize> {
    let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn result_header(line: &str) -> Option<(ResultKind, Option<SourceLocation>)> {
    let line = line.trim_end();
    let markers = [
        (": FAILED - but was ok:", ResultKind::Passed),
        (": PASSED:", ResultKind::Passed),
        (": FAILED:", ResultKind::Failed),
        (": SKIPPED:", ResultKind::Skipped),
    ];
    markers.iter().find_map(|(marker, kind)| {
        line.strip_suffix(marker)
            .and_then(parse_location)
            .map(|location| (*kind, Some(location)))
    })
}

fn flush(table: &mut CaseTable, current: Option<&str>, pending: Option<PendingResult>) {
    let (Some(name), Some(result)) = (current, pending) else {
        return;
    };
    let signals = table.case(name);
    let message = result.lines.join("\n").trim().to_string();

    match result.kind {
        ResultKind::Passed => {}
        ResultKind::Failed => {
            if EXCEPTION_MARKERS.iter().any(|marker| message.contains(marker)) {
                signals.error(message, result.location);
            } else {
                signals.fail(message, result.location);
            }
        }
        ResultKind::Skipped => {
            let skip_message = message
                .split_once(SKIP_MESSAGE_MARKER)
                .map(|(_, rest)| rest.trim().to_string())
                .unwrap_or_default();
            signals.skip(skip_message);
        }
    }
}

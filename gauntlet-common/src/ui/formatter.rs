//! The formatter contract consumed by the controller, and its two
//! implementations: a spinner-backed one for interactive terminals and a
//! plain line printer for everything else.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossterm::style::Stylize;

use crate::eval::EvalDetails;

use super::coordinator::coordinator;
use super::progress::Spinner;

/// Completion handle for a setup/teardown task line.
pub trait TaskHandle: Send + Sync {
    /// Update the short status word while the task runs.
    fn update(&self, status: &str);
    fn complete(&self);
    fn fail(&self);
    fn error(&self);
}

/// Completion handle for a test line.
pub trait TestHandle: Send + Sync {
    fn update(&self, status: &str);
    /// Finish with one outcome per evaluator; any false fails the line.
    fn complete(&self, passed: &[bool]);
    fn error(&self);
}

/// Thin rendering surface consumed by the controller. Implementations are
/// responsible for their own synchronization: parallel workers share one
/// formatter.
pub trait Formatter: Send + Sync {
    fn set_task_column_width(&self, width: usize);
    fn set_test_column_width(&self, width: usize);
    fn start_task(&self, title: &str, status: &str) -> Box<dyn TaskHandle>;
    fn start_test(&self, id: &str, name: &str) -> Box<dyn TestHandle>;
    fn print_header(&self, header: &str);
    fn print_results(&self, pass: usize, fail: usize, ran: usize);
    fn print_pass(&self, name: &str, details: &EvalDetails);
    fn print_fail(&self, name: &str, details: &EvalDetails);
    fn print_empty(&self);
    fn print_error(&self, message: &str);
}

const INDENT: usize = 2;
const DETAIL_INDENT: usize = 7;

fn pad_with_periods(text: &str, width: usize) -> String {
    let dots = width.saturating_sub(text.len()) + 3;
    format!("{text} {} ", ".".repeat(dots))
}

fn zero_pad(value: usize) -> (String, String) {
    let text = value.to_string();
    let pad = 5usize.saturating_sub(text.len());
    ("0".repeat(pad), text)
}

fn detail_lines(details: &EvalDetails) -> Vec<String> {
    match details {
        EvalDetails::None => Vec::new(),
        EvalDetails::Text(text) => text.split('\n').map(|l| l.to_string()).collect(),
        EvalDetails::Code(code) => vec![code.to_string()],
        EvalDetails::TextMismatch { expected, actual } => vec![
            format!("{}: {}", "Expected".red(), expected),
            format!("{}: {}", "Actual".red(), actual),
        ],
        EvalDetails::CodeMismatch { expected, actual } => vec![
            format!("{}: {}", "Expected".red(), expected),
            format!("{}: {}", "Actual".red(), actual),
        ],
    }
}

/// Spinner-backed formatter for interactive terminals. Each started task
/// attaches its indicator to the output coordinator for the task's
/// lifetime, so debug output interleaves without tearing the line.
#[derive(Default)]
pub struct StandardFormatter {
    task_width: AtomicUsize,
    test_width: AtomicUsize,
}

impl StandardFormatter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Formatter for StandardFormatter {
    fn set_task_column_width(&self, width: usize) {
        self.task_width.store(width, Ordering::Relaxed);
    }

    fn set_test_column_width(&self, width: usize) {
        self.test_width.store(width, Ordering::Relaxed);
    }

    fn start_task(&self, title: &str, _status: &str) -> Box<dyn TaskHandle> {
        let width = self.task_width.load(Ordering::Relaxed);
        let message = format!(
            "{}{}",
            " ".repeat(INDENT),
            pad_with_periods(title, width)
        );
        let spinner = Spinner::start(message);
        coordinator().attach_indicator(Arc::clone(&spinner));
        Box::new(SpinnerTaskHandle { spinner })
    }

    fn start_test(&self, id: &str, name: &str) -> Box<dyn TestHandle> {
        let width = self.test_width.load(Ordering::Relaxed);
        let pad = 5usize.saturating_sub(id.len());
        let message = format!(
            "{}{}{}: {}",
            " ".repeat(INDENT),
            "0".repeat(pad).dark_grey(),
            id.cyan(),
            pad_with_periods(name, width)
        );
        let spinner = Spinner::start(message);
        coordinator().attach_indicator(Arc::clone(&spinner));
        Box::new(SpinnerTestHandle { spinner })
    }

    fn print_header(&self, header: &str) {
        println!("{} {}", "[+]".white().bold(), header.blue().bold());
    }

    fn print_results(&self, pass: usize, fail: usize, ran: usize) {
        self.print_header("Results");
        let indent = " ".repeat(INDENT);
        let (pad, value) = zero_pad(pass);
        println!("{indent}Pass: {}{}", pad.dark_grey(), value.green());
        let (pad, value) = zero_pad(fail);
        println!("{indent}Fail: {}{}", pad.dark_grey(), value.red());
        let (pad, value) = zero_pad(ran);
        println!("{indent}Ran:  {}{}", pad.dark_grey(), value.cyan());
    }

    fn print_pass(&self, name: &str, details: &EvalDetails) {
        println!(
            "{}+{}:",
            " ".repeat(DETAIL_INDENT - INDENT),
            name.green().bold()
        );
        for line in detail_lines(details) {
            println!("{}{}", " ".repeat(DETAIL_INDENT), line.cyan());
        }
    }

    fn print_fail(&self, name: &str, details: &EvalDetails) {
        println!(
            "{}-{}:",
            " ".repeat(DETAIL_INDENT - INDENT),
            name.red().bold()
        );
        for line in detail_lines(details) {
            println!("{}{}", " ".repeat(DETAIL_INDENT), line);
        }
    }

    fn print_empty(&self) {
        println!();
    }

    fn print_error(&self, message: &str) {
        println!("{}{}", " ".repeat(DETAIL_INDENT - INDENT), message.red());
    }
}

struct SpinnerTaskHandle {
    spinner: Arc<Spinner>,
}

impl SpinnerTaskHandle {
    fn finish(&self, word: &str, ok: bool) {
        coordinator().detach_indicator();
        if ok {
            self.spinner.stop(word);
        } else {
            self.spinner.stop_fail(word);
        }
    }
}

impl TaskHandle for SpinnerTaskHandle {
    fn update(&self, _status: &str) {}

    fn complete(&self) {
        self.finish("done", true);
    }

    fn fail(&self) {
        self.finish("failed", false);
    }

    fn error(&self) {
        self.finish("error", false);
    }
}

struct SpinnerTestHandle {
    spinner: Arc<Spinner>,
}

impl TestHandle for SpinnerTestHandle {
    fn update(&self, _status: &str) {}

    fn complete(&self, passed: &[bool]) {
        coordinator().detach_indicator();
        if passed.iter().all(|p| *p) {
            self.spinner.stop("passed");
        } else {
            self.spinner.stop_fail("failed");
        }
    }

    fn error(&self) {
        coordinator().detach_indicator();
        self.spinner.stop_fail("error");
    }
}

/// Formatter without indicators or colors, for non-tty output and tests.
#[derive(Default)]
pub struct PlainFormatter {
    task_width: AtomicUsize,
    test_width: AtomicUsize,
}

impl PlainFormatter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Formatter for PlainFormatter {
    fn set_task_column_width(&self, width: usize) {
        self.task_width.store(width, Ordering::Relaxed);
    }

    fn set_test_column_width(&self, width: usize) {
        self.test_width.store(width, Ordering::Relaxed);
    }

    fn start_task(&self, title: &str, _status: &str) -> Box<dyn TaskHandle> {
        let width = self.task_width.load(Ordering::Relaxed);
        Box::new(PlainTaskHandle {
            line: format!("{}{}", " ".repeat(INDENT), pad_with_periods(title, width)),
        })
    }

    fn start_test(&self, id: &str, name: &str) -> Box<dyn TestHandle> {
        let width = self.test_width.load(Ordering::Relaxed);
        Box::new(PlainTestHandle {
            line: format!(
                "{}{:>5}: {}",
                " ".repeat(INDENT),
                id,
                pad_with_periods(name, width)
            ),
        })
    }

    fn print_header(&self, header: &str) {
        println!("[+] {header}");
    }

    fn print_results(&self, pass: usize, fail: usize, ran: usize) {
        self.print_header("Results");
        let indent = " ".repeat(INDENT);
        println!("{indent}Pass: {pass:>5}");
        println!("{indent}Fail: {fail:>5}");
        println!("{indent}Ran:  {ran:>5}");
    }

    fn print_pass(&self, name: &str, details: &EvalDetails) {
        println!("{}+{}:", " ".repeat(DETAIL_INDENT - INDENT), name);
        for line in detail_lines(details) {
            println!("{}{}", " ".repeat(DETAIL_INDENT), line);
        }
    }

    fn print_fail(&self, name: &str, details: &EvalDetails) {
        println!("{}-{}:", " ".repeat(DETAIL_INDENT - INDENT), name);
        for line in detail_lines(details) {
            println!("{}{}", " ".repeat(DETAIL_INDENT), line);
        }
    }

    fn print_empty(&self) {
        println!();
    }

    fn print_error(&self, message: &str) {
        println!("{}{}", " ".repeat(DETAIL_INDENT - INDENT), message);
    }
}

struct PlainTaskHandle {
    line: String,
}

impl TaskHandle for PlainTaskHandle {
    fn update(&self, _status: &str) {}

    fn complete(&self) {
        println!("{}done", self.line);
    }

    fn fail(&self) {
        println!("{}failed", self.line);
    }

    fn error(&self) {
        println!("{}error", self.line);
    }
}

struct PlainTestHandle {
    line: String,
}

impl TestHandle for PlainTestHandle {
    fn update(&self, _status: &str) {}

    fn complete(&self, passed: &[bool]) {
        if passed.iter().all(|p| *p) {
            println!("{}passed", self.line);
        } else {
            println!("{}failed", self.line);
        }
    }

    fn error(&self) {
        println!("{}error", self.line);
    }
}

/// Formatter that swallows everything. Keeps controller tests quiet.
#[derive(Default)]
pub struct NullFormatter;

impl Formatter for NullFormatter {
    fn set_task_column_width(&self, _width: usize) {}
    fn set_test_column_width(&self, _width: usize) {}

    fn start_task(&self, _title: &str, _status: &str) -> Box<dyn TaskHandle> {
        Box::new(NullHandle)
    }

    fn start_test(&self, _id: &str, _name: &str) -> Box<dyn TestHandle> {
        Box::new(NullHandle)
    }

    fn print_header(&self, _header: &str) {}
    fn print_results(&self, _pass: usize, _fail: usize, _ran: usize) {}
    fn print_pass(&self, _name: &str, _details: &EvalDetails) {}
    fn print_fail(&self, _name: &str, _details: &EvalDetails) {}
    fn print_empty(&self) {}
    fn print_error(&self, _message: &str) {}
}

struct NullHandle;

impl TaskHandle for NullHandle {
    fn update(&self, _status: &str) {}
    fn complete(&self) {}
    fn fail(&self) {}
    fn error(&self) {}
}

impl TestHandle for NullHandle {
    fn update(&self, _status: &str) {}
    fn complete(&self, _passed: &[bool]) {}
    fn error(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_reaches_past_the_column_width() {
        assert_eq!(pad_with_periods("abc", 5), "abc ..... ");
        assert_eq!(pad_with_periods("abcdef", 5), "abcdef ... ");
    }

    #[test]
    fn zero_padding_is_five_wide() {
        let (pad, value) = zero_pad(7);
        assert_eq!(format!("{pad}{value}"), "00007");
        let (pad, value) = zero_pad(123456);
        assert_eq!(format!("{pad}{value}"), "123456");
    }

    #[test]
    fn mismatch_details_render_both_sides() {
        let lines = detail_lines(&EvalDetails::TextMismatch {
            expected: "a".into(),
            actual: "b".into(),
        });
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("a"));
        assert!(lines[1].contains("b"));
    }
}

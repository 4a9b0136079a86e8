//! Colored diagnostic rendering for uncaught exceptions and host-level
//! errors reaching the top of `ember-cli`. Bytecode carries no source
//! spans, so this is a flat reporter rather than the original's
//! span-aware rustc-style renderer: one exception kind, one message,
//! zero or more notes.

use colored::Colorize;
use std::fmt;

/// Severity of a reported diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Error,
    Warning,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorLevel::Error => write!(f, "{}", "error".red().bold()),
            ErrorLevel::Warning => write!(f, "{}", "warning".yellow().bold()),
        }
    }
}

/// A single reported message: an uncaught exception, or a host-level
/// failure (bad CLI args, a memory-quota misconfiguration, ...).
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: ErrorLevel,
    pub title: String,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(level: ErrorLevel, title: String) -> Self {
        Self {
            level,
            title,
            notes: Vec::new(),
        }
    }

    pub fn error(title: String) -> Self {
        Self::new(ErrorLevel::Error, title)
    }

    pub fn warning(title: String) -> Self {
        Self::new(ErrorLevel::Warning, title)
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    /// Reports an exception that reached the top frame unhandled:
    /// `kind` is the exception type's name (`"ZeroDivisionError"`), `args`
    /// the already-stringified elements of its argument tuple.
    pub fn uncaught_exception(kind: &str, args: &[String]) -> Self {
        let title = if args.is_empty() {
            kind.to_string()
        } else {
            format!("{}: {}", kind, args.join(", "))
        };
        Self::error(title).with_note("unhandled exception reached the top of the program".into())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}: {}", self.level, self.title.bold())?;
        for note in &self.notes {
            writeln!(f, " {} {}", "=".cyan().bold(), note.cyan())?;
        }
        Ok(())
    }
}

/// Prints a diagnostic to stderr.
pub fn print(diag: &Diagnostic) {
    eprint!("{}", diag);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncaught_exception_formats_kind_and_args() {
        let diag = Diagnostic::uncaught_exception("ZeroDivisionError", &["Division by zero".into()]);
        let rendered = format!("{}", diag);
        assert!(rendered.contains("ZeroDivisionError: Division by zero"));
    }

    #[test]
    fn uncaught_exception_with_no_args_prints_bare_kind() {
        let diag = Diagnostic::uncaught_exception("StopIteration", &[]);
        let rendered = format!("{}", diag);
        assert!(rendered.contains("StopIteration"));
    }
}

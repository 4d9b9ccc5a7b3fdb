//! Logging collaborator.
//!
//! The logger may be called from any thread and synchronises internally;
//! everything else in the runtime is single-threaded.

use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Message severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    None,
    Fatal,
    Error,
    Warning,
    Info,
    Debug,
    Verbose,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::None => "none",
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warning => "warn",
            Severity::Info => "info",
            Severity::Debug => "debug",
            Severity::Verbose => "verbose",
        };
        f.write_str(name)
    }
}

/// Logging sink.
pub trait Logger: Send + Sync {
    fn log(&self, message: &str, severity: Severity);

    fn flush(&self) {}
}

/// Colored console logger with a severity threshold.
pub struct ConsoleLogger {
    stream: Mutex<StandardStream>,
    threshold: Severity,
}

impl ConsoleLogger {
    pub fn new(threshold: Severity) -> Self {
        ConsoleLogger {
            stream: Mutex::new(StandardStream::stderr(ColorChoice::Auto)),
            threshold,
        }
    }

    fn color(severity: Severity) -> Option<Color> {
        match severity {
            Severity::Fatal | Severity::Error => Some(Color::Red),
            Severity::Warning => Some(Color::Yellow),
            Severity::Info => None,
            Severity::Debug => Some(Color::Cyan),
            Severity::Verbose => Some(Color::Blue),
            Severity::None => None,
        }
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        ConsoleLogger::new(Severity::Info)
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, message: &str, severity: Severity) {
        if severity == Severity::None || severity > self.threshold {
            return;
        }

        let mut stream = self.stream.lock();
        let mut spec = ColorSpec::new();
        spec.set_fg(Self::color(severity))
            .set_bold(severity <= Severity::Error);
        let _ = stream.set_color(&spec);
        let _ = writeln!(stream, "[{}] {}", severity, message);
        let _ = stream.reset();
    }

    fn flush(&self) {
        let _ = self.stream.lock().flush();
    }
}

/// Discards everything. Useful as a default in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _message: &str, _severity: Severity) {}
}

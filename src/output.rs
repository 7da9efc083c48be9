//! Human-readable progress lines.
//!
//! The identity resolver reports each rename through an [`OutputSink`]. What happens
//! to the line is up to the sink: [`ConsoleOutput`] prints it with colors,
//! [`TracingOutput`] forwards it to the `tracing` subscriber.

use colored::Colorize;
use std::fmt;

/// Severity of a progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for OutputLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Receiver for `(message, level)` progress lines.
pub trait OutputSink: Send + Sync {
    fn emit(&self, message: &str, level: OutputLevel);
}

/// Prints progress lines to stdout (errors to stderr), colored by level.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleOutput;

impl OutputSink for ConsoleOutput {
    fn emit(&self, message: &str, level: OutputLevel) {
        match level {
            OutputLevel::Debug => println!("{}", message.dimmed()),
            OutputLevel::Info => println!("{message}"),
            OutputLevel::Warn => println!("{}", message.yellow()),
            OutputLevel::Error => eprintln!("{}", message.red()),
        }
    }
}

/// Forwards progress lines to `tracing` under the `output` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOutput;

impl OutputSink for TracingOutput {
    fn emit(&self, message: &str, level: OutputLevel) {
        match level {
            OutputLevel::Debug => tracing::debug!(target: "output", "{}", message),
            OutputLevel::Info => tracing::info!(target: "output", "{}", message),
            OutputLevel::Warn => tracing::warn!(target: "output", "{}", message),
            OutputLevel::Error => tracing::error!(target: "output", "{}", message),
        }
    }
}

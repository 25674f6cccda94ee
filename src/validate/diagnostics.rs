//! Diagnostics and the sinks that receive them.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use serde::Serialize;

/// Diagnostic severity. Ordered so that `Error` is the greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A position in a source file; line and column are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Location {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: Location,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, location: Location, message: impl Into<String>) -> Self {
        Self { severity, location, message: message.into() }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.severity, self.message)
    }
}

/// Receives diagnostics from the validation thread.
pub trait DiagnosticSink: Send {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// Logs each diagnostic through `tracing` at a level matching its severity.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&mut self, d: Diagnostic) {
        match d.severity {
            Severity::Error => tracing::error!(location = %d.location, "{}", d.message),
            Severity::Warning => tracing::warn!(location = %d.location, "{}", d.message),
            Severity::Info => tracing::info!(location = %d.location, "{}", d.message),
        }
    }
}

/// Forwards diagnostics over a channel.
#[derive(Debug)]
pub struct ChannelSink(pub Sender<Diagnostic>);

impl DiagnosticSink for ChannelSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        // The receiver going away only means nobody is listening any more.
        let _ = self.0.send(diagnostic);
    }
}

/// Keeps every diagnostic in a shared list.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    diagnostics: Arc<Mutex<Vec<Diagnostic>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        if let Ok(mut d) = self.diagnostics.lock() {
            d.push(diagnostic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> Location {
        Location { file: PathBuf::from("src/a.ts"), line: 3, column: 7 }
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_display() {
        let d = Diagnostic::new(Severity::Warning, location(), "duplicate declaration 'x'");
        assert_eq!(d.to_string(), "src/a.ts:3:7: warning: duplicate declaration 'x'");
    }

    #[test]
    fn test_collecting_sink_shares_state() {
        let sink = CollectingSink::new();
        let mut writer = sink.clone();
        writer.report(Diagnostic::new(Severity::Info, location(), "x"));
        assert_eq!(sink.diagnostics().len(), 1);
    }

    #[test]
    fn test_channel_sink() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = ChannelSink(tx);
        sink.report(Diagnostic::new(Severity::Error, location(), "x"));
        assert!(rx.try_recv().unwrap().is_error());
    }
}

//! Diagnostic channel: pluggable printers plus the session-owned
//! append-only message handler.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::SourceRef;
use crate::error::{CompileError, Diagnostic, ErrorKind, Severity};

/// Sink that renders or stores diagnostics as they are recorded.
pub trait MessagePrinter {
    fn print(&self, diagnostic: &Diagnostic);
}

/// Default printer: human-readable text on stderr.
pub struct StderrPrinter;

impl MessagePrinter for StderrPrinter {
    fn print(&self, diagnostic: &Diagnostic) {
        eprintln!("{}", diagnostic);
    }
}

/// Routes diagnostics through the `log` facade.
pub struct LogPrinter;

impl MessagePrinter for LogPrinter {
    fn print(&self, diagnostic: &Diagnostic) {
        match diagnostic.severity {
            Severity::Info => log::info!("{}", diagnostic),
            Severity::Warning => log::warn!("{}", diagnostic),
            Severity::Error | Severity::Fatal => log::error!("{}", diagnostic),
        }
    }
}

/// Stores diagnostics in a shared buffer the embedder keeps a handle to.
#[derive(Clone, Default)]
pub struct CollectingPrinter {
    buffer: Rc<RefCell<Vec<Diagnostic>>>,
}

impl CollectingPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collected(&self) -> Vec<Diagnostic> {
        self.buffer.borrow().clone()
    }
}

impl MessagePrinter for CollectingPrinter {
    fn print(&self, diagnostic: &Diagnostic) {
        self.buffer.borrow_mut().push(diagnostic.clone());
    }
}

/// Records every diagnostic of a compiler session and counts errors.
///
/// Phases call [`MessageHandler::begin_phase`] and
/// [`MessageHandler::end_phase`]; the latter turns any error recorded since
/// the phase began into an aggregate [`CompileError`].
pub struct MessageHandler {
    printer: Box<dyn MessagePrinter>,
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    phase_start: usize,
    phase_errors: usize,
}

impl MessageHandler {
    pub fn new(printer: Box<dyn MessagePrinter>) -> Self {
        MessageHandler {
            printer,
            diagnostics: Vec::new(),
            error_count: 0,
            phase_start: 0,
            phase_errors: 0,
        }
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn message(
        &mut self,
        severity: Severity,
        kind: Option<ErrorKind>,
        message: impl Into<String>,
        src: Option<&SourceRef>,
        path: Option<&str>,
    ) {
        let diagnostic = Diagnostic::new(severity, kind, message, src, path);
        if diagnostic.is_error() {
            self.error_count += 1;
        }
        self.printer.print(&diagnostic);
        self.diagnostics.push(diagnostic);
    }

    pub fn error(
        &mut self,
        kind: ErrorKind,
        message: impl Into<String>,
        src: Option<&SourceRef>,
        path: Option<&str>,
    ) {
        self.message(Severity::Error, Some(kind), message, src, path);
    }

    pub fn warning(&mut self, message: impl Into<String>, src: Option<&SourceRef>, path: Option<&str>) {
        self.message(Severity::Warning, None, message, src, path);
    }

    /// Record a fatal diagnostic and build the error that aborts the phase.
    pub fn fatal(
        &mut self,
        kind: ErrorKind,
        message: impl Into<String>,
        src: Option<&SourceRef>,
    ) -> CompileError {
        let message = message.into();
        self.message(Severity::Fatal, Some(kind), message.clone(), src, None);
        CompileError {
            kind,
            message,
            diagnostics: self.diagnostics[self.phase_start..].to_vec(),
        }
    }

    pub fn begin_phase(&mut self) {
        self.phase_start = self.diagnostics.len();
        self.phase_errors = self.error_count;
    }

    /// Hard stop at a phase boundary if the phase recorded any error.
    pub fn end_phase(&mut self, abort_message: &str) -> Result<(), CompileError> {
        if self.error_count == self.phase_errors {
            return Ok(());
        }
        let kind = self.diagnostics[self.phase_start..]
            .iter()
            .find(|d| d.is_error())
            .and_then(|d| d.kind)
            .unwrap_or(ErrorKind::InvalidComponent);
        Err(self.fatal(kind, abort_message, None))
    }
}

impl Default for MessageHandler {
    fn default() -> Self {
        MessageHandler::new(Box::new(StderrPrinter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> (MessageHandler, CollectingPrinter) {
        let printer = CollectingPrinter::new();
        (MessageHandler::new(Box::new(printer.clone())), printer)
    }

    #[test]
    fn warnings_do_not_abort_a_phase() {
        let (mut msg, printer) = handler();
        msg.begin_phase();
        msg.warning("just a warning", None, None);
        assert!(msg.end_phase("aborted").is_ok());
        assert_eq!(printer.collected().len(), 1);
        assert_eq!(msg.error_count(), 0);
    }

    #[test]
    fn phase_with_errors_aborts_with_first_kind() {
        let (mut msg, _) = handler();
        msg.begin_phase();
        msg.error(ErrorKind::FieldOverlap, "first", None, Some("top.r"));
        msg.error(ErrorKind::AddressOverlap, "second", None, None);
        let err = msg.end_phase("placement aborted").unwrap_err();
        assert_eq!(err.kind, ErrorKind::FieldOverlap);
        assert_eq!(err.message, "placement aborted");
        // two errors plus the fatal abort record
        assert_eq!(err.diagnostics.len(), 3);
        assert!(err.has_kind(ErrorKind::AddressOverlap));
    }

    #[test]
    fn earlier_phase_errors_do_not_leak_into_next_phase() {
        let (mut msg, _) = handler();
        msg.begin_phase();
        msg.error(ErrorKind::UndefinedName, "x", None, None);
        assert!(msg.end_phase("first").is_err());
        msg.begin_phase();
        assert!(msg.end_phase("second").is_ok());
    }

    #[test]
    fn log_printer_still_records_diagnostics() {
        let mut msg = MessageHandler::new(Box::new(LogPrinter));
        msg.begin_phase();
        msg.warning("routed through log", None, None);
        msg.error(ErrorKind::InvalidValue, "bad value", None, None);
        assert_eq!(msg.diagnostics().len(), 2);
        assert_eq!(msg.error_count(), 1);
    }
}

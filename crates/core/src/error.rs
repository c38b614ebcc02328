use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ast::SourceRef;

/// Classification of every condition the compiler can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    SyntaxError,
    NameConflict,
    UndefinedName,
    UnknownProperty,
    PropertyTypeMismatch,
    PropertyNotApplicable,
    PropertyNotSet,
    UnresolvableExpression,
    FieldOverlap,
    AddressOverlap,
    InvalidStride,
    NoElaborationTarget,
    NotImplemented,
    OutOfBounds,
    Misaligned,
    InvalidArray,
    InvalidComponent,
    InvalidValue,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// One message on the diagnostic channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: u32,
    /// Hierarchical path of the offending instance, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        kind: Option<ErrorKind>,
        message: impl Into<String>,
        src: Option<&SourceRef>,
        path: Option<&str>,
    ) -> Self {
        Diagnostic {
            severity,
            kind,
            message: message.into(),
            file: src.map(|s| s.file.clone()),
            line: src.map_or(0, |s| s.line),
            path: path.map(str::to_owned),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }

    /// Serialize with every key present (null for missing values).
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "file":     self.file,
            "kind":     self.kind,
            "line":     self.line,
            "message":  self.message,
            "path":     self.path,
            "severity": self.severity,
        })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(file) = &self.file {
            write!(f, "\n  --> {}:{}", file, self.line)?;
        }
        if let Some(path) = &self.path {
            write!(f, "\n  in {}", path)?;
        }
        Ok(())
    }
}

/// Aggregate failure of a compile phase.
///
/// `kind` is the fatal condition itself for direct failures (e.g. a missing
/// elaboration target) and the first recorded error's kind when the phase was
/// aborted because of batched diagnostics. `diagnostics` holds every message
/// recorded during the failed phase.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind || self.diagnostics.iter().any(|d| d.kind == Some(kind))
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "diagnostics": self.diagnostics.iter().map(Diagnostic::to_json_value).collect::<Vec<_>>(),
            "kind":        self.kind,
            "message":     self.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_json_has_all_keys() {
        let d = Diagnostic::new(
            Severity::Error,
            Some(ErrorKind::FieldOverlap),
            "overlap",
            Some(&SourceRef::new("a.rdl", 3)),
            None,
        );
        let v = d.to_json_value();
        assert_eq!(v["kind"], "FieldOverlap");
        assert_eq!(v["severity"], "error");
        assert_eq!(v["line"], 3);
        assert!(v["path"].is_null());
    }

    #[test]
    fn has_kind_checks_batched_diagnostics() {
        let err = CompileError {
            kind: ErrorKind::NameConflict,
            message: "aborted".into(),
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                Some(ErrorKind::AddressOverlap),
                "x",
                None,
                Some("top.a"),
            )],
        };
        assert!(err.has_kind(ErrorKind::NameConflict));
        assert!(err.has_kind(ErrorKind::AddressOverlap));
        assert!(!err.has_kind(ErrorKind::FieldOverlap));
    }

    #[test]
    fn display_includes_location_and_path() {
        let d = Diagnostic::new(
            Severity::Warning,
            None,
            "unused",
            Some(&SourceRef::new("b.rdl", 9)),
            Some("top.r"),
        );
        let text = d.to_string();
        assert!(text.starts_with("warning: unused"));
        assert!(text.contains("b.rdl:9"));
        assert!(text.contains("in top.r"));
    }
}

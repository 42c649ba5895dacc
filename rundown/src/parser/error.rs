use std::fmt;
use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label, Severity};

/// A problem found while reading or transforming a document.
///
/// Malformed annotations are reported and dropped rather than aborting the
/// load, so most of these are warnings.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Range<usize>,
    pub file_id: usize,
    pub severity: Severity,
    /// Text under the source marker.
    pub label: Option<String>,
    pub notes: Vec<String>,
}

impl ParseError {
    fn at(severity: Severity, message: impl Into<String>, span: Range<usize>, file_id: usize) -> Self {
        ParseError {
            message: message.into(),
            span,
            file_id,
            severity,
            label: None,
            notes: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>, span: Range<usize>, file_id: usize) -> Self {
        Self::at(Severity::Error, message, span, file_id)
    }

    pub fn warning(message: impl Into<String>, span: Range<usize>, file_id: usize) -> Self {
        Self::at(Severity::Warning, message, span, file_id)
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }

    pub fn to_diagnostic(&self) -> Diagnostic<usize> {
        let mut label = Label::primary(self.file_id, self.span.clone());
        if let Some(text) = &self.label {
            label = label.with_message(text);
        }
        Diagnostic::new(self.severity)
            .with_message(&self.message)
            .with_labels(vec![label])
            .with_notes(self.notes.clone())
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_error() { "error" } else { "warning" };
        write!(f, "{kind}: {} (bytes {}..{})", self.message, self.span.start, self.span.end)
    }
}

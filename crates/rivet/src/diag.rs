//! Diagnostics produced by the front end, the classifier and the emitter.
//!
//! Front ends report spans in wrapped-source coordinates. The engine
//! translates them back to snippet coordinates before anything is stored
//! or shown to the user, see [`crate::wrap::Wrap::translate_span`].

use ariadne::{Config, Label, Report, ReportKind, Source};
use serde::Serialize;
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagKind {
    Syntax,
    /// A name that could not be resolved. Snippets failing only with these
    /// may become recoverable.
    Resolution { name: String },
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diag {
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: DiagKind,
    pub code: String,
    pub message: String,
    pub span: Range<usize>,
}

impl Diag {
    pub fn error(kind: DiagKind, code: impl Into<String>, message: impl Into<String>, span: Range<usize>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            code: code.into(),
            message: message.into(),
            span,
        }
    }

    pub fn syntax(message: impl Into<String>, span: Range<usize>) -> Self {
        Self::error(DiagKind::Syntax, "syntax", message, span)
    }

    pub fn semantic(code: impl Into<String>, message: impl Into<String>, span: Range<usize>) -> Self {
        Self::error(DiagKind::Semantic, code, message, span)
    }

    pub fn unresolved(name: impl Into<String>, what: &str, span: Range<usize>) -> Self {
        let name = name.into();
        let message = format!("cannot find symbol: {what} {name}");
        Self::error(DiagKind::Resolution { name }, "cant.resolve", message, span)
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>, span: Range<usize>) -> Self {
        Self {
            severity: Severity::Warning,
            kind: DiagKind::Semantic,
            code: code.into(),
            message: message.into(),
            span,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn unresolved_name(&self) -> Option<&str> {
        match &self.kind {
            DiagKind::Resolution { name } if self.is_error() => Some(name),
            _ => None,
        }
    }

    pub fn with_span(mut self, span: Range<usize>) -> Self {
        self.span = span;
        self
    }

    pub fn with_message(mut self, message: String) -> Self {
        self.message = message;
        self
    }
}

impl fmt::Display for Diag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{severity} [{}..{}]: {}", self.span.start, self.span.end, self.message)
    }
}

pub fn has_errors(diags: &[Diag]) -> bool {
    diags.iter().any(Diag::is_error)
}

/// True if there is at least one error and every error is a resolution failure.
pub fn only_resolution_errors(diags: &[Diag]) -> bool {
    let mut errors = diags.iter().filter(|diag| diag.is_error()).peekable();
    errors.peek().is_some() && errors.all(|diag| diag.unresolved_name().is_some())
}

/// Unresolved names in first-seen order, without duplicates.
pub fn unresolved_names(diags: &[Diag]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in diags.iter().filter_map(Diag::unresolved_name) {
        if !names.iter().any(|known| known == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Renders a diagnostic against the snippet source it was translated to.
pub fn render(diag: &Diag, name: &str, source: &str) -> String {
    let kind = match diag.severity {
        Severity::Error => ReportKind::Error,
        Severity::Warning => ReportKind::Warning,
    };
    let end = diag.span.end.min(source.len());
    let span = diag.span.start.min(end)..end;
    let mut buffer = Vec::new();
    let written = Report::build(kind, (name, span.clone()))
        .with_config(Config::default().with_color(false))
        .with_code(&diag.code)
        .with_message(&diag.message)
        .with_label(Label::new((name, span)).with_message(&diag.message))
        .finish()
        .write((name, Source::from(source)), &mut buffer);
    match written {
        Ok(()) => String::from_utf8_lossy(&buffer).into_owned(),
        Err(_) => diag.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_only() {
        let diags = vec![
            Diag::unresolved("g", "method", 0..1),
            Diag::warning("modifier", "ignored", 0..1),
            Diag::unresolved("h", "variable", 2..3),
        ];
        assert!(only_resolution_errors(&diags));
        assert_eq!(unresolved_names(&diags), vec!["g".to_string(), "h".to_string()]);

        let mixed = vec![Diag::unresolved("g", "method", 0..1), Diag::semantic("incompatible.types", "bad", 0..1)];
        assert!(!only_resolution_errors(&mixed));
        assert!(!only_resolution_errors(&[]));
    }

    #[test]
    fn duplicate_unresolved_names_collapse() {
        let diags = vec![
            Diag::unresolved("g", "method", 0..1),
            Diag::unresolved("g", "method", 4..5),
        ];
        assert_eq!(unresolved_names(&diags), vec!["g".to_string()]);
    }

    #[test]
    fn render_mentions_message() {
        let diag = Diag::unresolved("g", "method", 7..8);
        let rendered = render(&diag, "#1", "int f() { return g(); }");
        assert!(rendered.contains("cannot find symbol: method g"));
    }
}

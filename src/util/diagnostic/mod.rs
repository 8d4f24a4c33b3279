//! Compiler diagnostics
//!
//! A [`Diagnostic`] is a single compiler message with a stable code and a
//! source location. Its `Display` form is the one-line shape surfaced to
//! playground callers:
//!
//! ```text
//! (3,9): error E0201: undefined variable `x`
//! ```
//!
//! [`DiagnosticRenderer`] produces the multi-line, optionally colored form used
//! by the `check` command.

use std::fmt;

use owo_colors::OwoColorize;

use crate::util::span::{line_text, Span};

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    /// Check if this is error severity
    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Error)
    }
}

impl fmt::Display for Severity {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A single compiler message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level
    pub severity: Severity,
    /// Stable code (`E0201`, `W0001`, ...)
    pub code: &'static str,
    /// Rendered message
    pub message: String,
    /// Source location
    pub span: Span,
}

impl Diagnostic {
    /// Create an error diagnostic
    pub fn error(
        code: &'static str,
        message: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            span,
        }
    }

    /// Create a warning diagnostic
    pub fn warning(
        code: &'static str,
        message: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{}: {} {}: {}",
            self.span, self.severity, self.code, self.message
        )
    }
}

/// Ordered collection of diagnostics from one compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic
    pub fn push(
        &mut self,
        diagnostic: Diagnostic,
    ) {
        self.items.push(diagnostic);
    }

    /// Append every diagnostic of `other`
    pub fn extend(
        &mut self,
        other: Diagnostics,
    ) {
        self.items.extend(other.items);
    }

    /// Check if any diagnostic is an error
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.severity.is_error())
    }

    /// Number of error diagnostics
    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.severity.is_error()).count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.items.iter()
    }

    /// Sort by source position, keeping emission order for ties
    pub fn sort(&mut self) {
        self.items.sort_by_key(|d| d.span.start.offset);
    }

    /// Warnings only
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| !d.severity.is_error())
    }

    /// Every diagnostic on one line, separated by `", "`
    pub fn joined(&self) -> String {
        self.items
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Renderer configuration
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Enable ANSI colors
    pub use_colors: bool,
    /// Show the offending source line with a caret underline
    pub show_source: bool,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            use_colors: true,
            show_source: true,
        }
    }
}

/// Multi-line diagnostic renderer
#[derive(Debug, Clone, Default)]
pub struct DiagnosticRenderer {
    config: EmitterConfig,
}

impl DiagnosticRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EmitterConfig) -> Self {
        Self { config }
    }

    /// Render one diagnostic against its source
    pub fn render(
        &self,
        diagnostic: &Diagnostic,
        source_name: &str,
        source: &str,
    ) -> String {
        let mut output = String::new();

        let header = format!("{}[{}]", diagnostic.severity, diagnostic.code);
        if self.config.use_colors {
            match diagnostic.severity {
                Severity::Error => output.push_str(&header.red().bold().to_string()),
                Severity::Warning => output.push_str(&header.yellow().bold().to_string()),
            }
        } else {
            output.push_str(&header);
        }
        output.push_str(": ");
        output.push_str(&diagnostic.message);
        output.push('\n');

        let start = diagnostic.span.start;
        output.push_str(&format!(
            "  --> {}:{}:{}\n",
            source_name, start.line, start.column
        ));

        if self.config.show_source {
            if let Some(line) = line_text(source, start.line) {
                let gutter = start.line.to_string();
                let pad = " ".repeat(gutter.len());
                let width = if diagnostic.span.end.line == start.line {
                    diagnostic
                        .span
                        .end
                        .column
                        .saturating_sub(start.column)
                        .max(1)
                } else {
                    1
                };
                let carets = "^".repeat(width);
                let carets = if self.config.use_colors {
                    carets.red().to_string()
                } else {
                    carets
                };
                output.push_str(&format!("{} |\n", pad));
                output.push_str(&format!("{} | {}\n", gutter, line));
                output.push_str(&format!(
                    "{} | {}{}\n",
                    pad,
                    " ".repeat(start.column.saturating_sub(1)),
                    carets
                ));
            }
        }

        output
    }

    /// Render every diagnostic, separated by blank lines
    pub fn render_all(
        &self,
        diagnostics: &Diagnostics,
        source_name: &str,
        source: &str,
    ) -> String {
        diagnostics
            .iter()
            .map(|d| self.render(d, source_name, source))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

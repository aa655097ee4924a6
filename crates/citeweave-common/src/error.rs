//! Error types for citeweave.
//!
//! The render pipeline itself never fails; these cover the edges where input
//! is loaded from disk or deserialized.

use miette::{Diagnostic, NamedSource, SourceOffset, SourceSpan};
use std::borrow::Cow;

/// Main error type for citeweave operations
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum CiteweaveError {
    /// IO error
    #[error(transparent)]
    #[diagnostic(code(citeweave::io))]
    Io(#[from] std::io::Error),

    /// Parse error with source location
    #[error(transparent)]
    #[diagnostic_source]
    Parse(#[from] ParseError),

    /// Configuration could not be loaded or saved
    #[error("configuration error: {0}")]
    #[diagnostic(code(citeweave::config))]
    Config(String),
}

/// Parse error with source code location information
#[derive(thiserror::Error, Debug, Diagnostic)]
#[error("parse error: {}", self.kind)]
#[diagnostic(code(citeweave::parse))]
pub struct ParseError {
    #[diagnostic_source]
    kind: ParseErrorKind,
    #[source_code]
    src: NamedSource<Cow<'static, str>>,
    #[label("here")]
    err_location: SourceSpan,
    err_line_col: Option<(usize, usize)>,
    #[help]
    advice: Option<String>,
}

impl ParseError {
    /// Attach the text that failed to parse, recomputing the span against it.
    pub fn with_source(self, src: NamedSource<Cow<'static, str>>) -> Self {
        let location = match self.err_line_col {
            Some((line, column)) => SourceSpan::new(
                SourceOffset::from_location(src.inner(), line, column),
                self.err_location.len(),
            ),
            None => self.err_location,
        };
        Self {
            kind: self.kind,
            src,
            err_location: location,
            err_line_col: self.err_line_col,
            advice: self.advice,
        }
    }

    pub fn with_advice(mut self, advice: impl Into<String>) -> Self {
        self.advice = Some(advice.into());
        self
    }

    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }

    /// 1-based line and column of the failure, when known.
    pub fn line_col(&self) -> Option<(usize, usize)> {
        self.err_line_col
    }
}

#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum ParseErrorKind {
    #[error(transparent)]
    SerdeError(#[from] SerDeError),
}

/// Serialization/deserialization errors
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum SerDeError {
    #[error(transparent)]
    #[diagnostic(code(citeweave::parse::json))]
    Json(#[from] serde_json::Error),
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        let line = err.line();
        let column = err.column();
        let location = SourceSpan::new(SourceOffset::from(0), 0);
        Self {
            kind: ParseErrorKind::SerdeError(SerDeError::Json(err)),
            src: NamedSource::new("json", Cow::Borrowed("")),
            err_location: location,
            advice: None,
            err_line_col: (line > 0).then_some((line, column)),
        }
    }
}

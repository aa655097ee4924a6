//! TeX math spans to MathML via pulldown-latex.

use miette::Diagnostic;
use pulldown_latex::{
    Parser, Storage, config::DisplayMode, config::RenderConfig, mathml::push_mathml,
};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathDisplay {
    Inline,
    Block,
}

impl MathDisplay {
    pub fn class(self) -> &'static str {
        match self {
            MathDisplay::Inline => "math-inline",
            MathDisplay::Block => "math-display",
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum MathError {
    #[error("invalid TeX: {0}")]
    #[diagnostic(code(citeweave::math::parse))]
    Parse(String),

    #[error("could not write MathML: {0}")]
    #[diagnostic(code(citeweave::math::write))]
    Write(String),
}

/// Convert TeX source (delimiters already removed) to a `<math>` element.
pub fn to_mathml(tex: &str, display: MathDisplay) -> Result<String, MathError> {
    let storage = Storage::new();
    let parser = Parser::new(tex, &storage);
    let config = RenderConfig {
        display_mode: match display {
            MathDisplay::Inline => DisplayMode::Inline,
            MathDisplay::Block => DisplayMode::Block,
        },
        ..Default::default()
    };

    let events: Vec<_> = parser.collect();
    let errors: Vec<String> = events
        .iter()
        .filter_map(|e| e.as_ref().err().map(|err| err.to_string()))
        .collect();
    if !errors.is_empty() {
        return Err(MathError::Parse(errors.join("; ")));
    }

    let mut mathml = String::new();
    push_mathml(&mut mathml, events.into_iter(), config)
        .map_err(|e| MathError::Write(e.to_string()))?;
    Ok(mathml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_and_block() {
        let inline = to_mathml("x^2", MathDisplay::Inline).unwrap();
        assert!(inline.starts_with("<math"));
        assert!(inline.contains("</math>"));
        let block = to_mathml(r"\frac{a}{b}", MathDisplay::Block).unwrap();
        assert!(block.contains("<mfrac"));
    }

    #[test]
    fn unclosed_group_is_an_error() {
        let err = to_mathml(r"\frac{a", MathDisplay::Inline).unwrap_err();
        assert!(matches!(err, MathError::Parse(ref msg) if !msg.is_empty()));
    }
}

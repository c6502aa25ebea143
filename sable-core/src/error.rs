//! Compilation errors.
//!
//! Each pipeline stage fails on the first error it encounters and the
//! failure propagates to the caller unchanged, except for imports: a
//! failure inside an imported file is re-wrapped in [`CoreError::Import`]
//! so the chain records the `import` statement that pulled the file in.

use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostic::Diagnostic;
use crate::span::Span;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),

    #[error("standard library directory was not found at {0}")]
    MissingStdlib(PathBuf),

    /// Lexical error: malformed token, bad escape, indentation mismatch.
    #[error("{0}")]
    Lex(Diagnostic),

    /// Syntactic error: unexpected token, incomplete construct.
    #[error("{0}")]
    Parse(Diagnostic),

    /// Semantic/generation error: unresolved name, type mismatch, and the
    /// rest of the generator's taxonomy.
    #[error("{0}")]
    Generate(Diagnostic),

    /// Two generated modules could not be merged.
    #[error("{0}")]
    Link(Diagnostic),

    /// A nested compilation failed. `diagnostic` points at the importing
    /// statement; the original failure is preserved as the source.
    #[error("{diagnostic}")]
    Import {
        path: PathBuf,
        diagnostic: Diagnostic,
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    pub fn lex(message: impl Into<String>, span: Span) -> CoreError {
        CoreError::Lex(Diagnostic::error(message, span))
    }

    pub fn parse(message: impl Into<String>, span: Span) -> CoreError {
        CoreError::Parse(Diagnostic::error(message, span))
    }

    pub fn generate(message: impl Into<String>, span: Span) -> CoreError {
        CoreError::Generate(Diagnostic::error(message, span))
    }

    /// Wrap a nested compilation failure with the importing statement's
    /// span, preserving the inner error as the cause.
    pub fn import(path: PathBuf, span: Span, inner: CoreError) -> CoreError {
        let diagnostic =
            Diagnostic::error(format!("import of `{}` failed", path.display()), span);
        CoreError::Import {
            path,
            diagnostic,
            source: Box::new(inner),
        }
    }

    /// The diagnostic attached to this error, if it has a source span.
    ///
    /// I/O-level failures happen before any buffer exists and are reported
    /// as a bare message.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            CoreError::Lex(d)
            | CoreError::Parse(d)
            | CoreError::Generate(d)
            | CoreError::Link(d)
            | CoreError::Import { diagnostic: d, .. } => Some(d),
            CoreError::SourceIo(_) | CoreError::MissingStdlib(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::FileId;

    #[test]
    fn import_errors_keep_the_inner_failure() {
        let span = Span::new(FileId(0), 0, 6);
        let inner = CoreError::parse("unexpected token", Span::new(FileId(1), 3, 4));
        let wrapped = CoreError::import(PathBuf::from("lib.sbl"), span, inner);
        match &wrapped {
            CoreError::Import { path, source, .. } => {
                assert_eq!(path, &PathBuf::from("lib.sbl"));
                assert!(matches!(**source, CoreError::Parse(_)));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(wrapped.diagnostic().unwrap().span, span);
    }
}

//! Error conditions this core raises, and their severity classification.
//!
//! `CoreError` is the plain, source-location-carrying error type every
//! stage (codegen, peephole, layout, fixup, object layout, vocabulary)
//! returns or reports. It has no miette dependency — that lives in
//! [`crate::diagnostics::CoreDiagnostic`], built from a `CoreError` only
//! at the CLI boundary.

use thiserror::Error;

/// Where in the source a `CoreError` was raised, when known. Internal
/// invariant violations and I/O failures often have none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl SourceLoc {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        SourceLoc {
            file: Some(file.into()),
            line: Some(line),
        }
    }

    pub fn unknown() -> Self {
        SourceLoc::default()
    }
}

impl std::fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}"),
            (Some(file), None) => write!(f, "{file}"),
            _ => write!(f, "<unknown>"),
        }
    }
}

/// How a `CoreError` is handled once reported to `Diagnostics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Aborts the run, after releasing the vocabulary lock.
    Fatal,
    /// Counted; rings the terminal bell on the first one. Compilation
    /// continues but the unit's vocabulary write-back is suppressed.
    Error,
    /// Counted; compilation continues and the write-back proceeds.
    Warning,
    /// Not counted toward the error/warning totals; purely informative.
    Info,
}

/// Every condition this core can raise, in the classification section 7
/// describes.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{loc}: internal invariant violated: {detail}")]
    Internal { detail: String, loc: SourceLoc },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{loc}: unexpected end of input")]
    UnexpectedEof { loc: SourceLoc },

    #[error("forward reference resolved with conflicting value at {loc}")]
    ForwardRefConflict { loc: SourceLoc },

    #[error("{loc}: unknown opcode 0x{opcode:02x} at emit")]
    UnknownOpcodeAtEmit { opcode: u8, loc: SourceLoc },

    #[error("{loc}: cannot open include file '{path}'")]
    IncludeOpenFailed { path: String, loc: SourceLoc },

    #[error("{loc}: '{name}' redefined with a different value")]
    RedefinitionDifferentValue { name: String, loc: SourceLoc },

    #[error("{loc}: '{name}' referenced but never defined")]
    UndefinedAtEmit { name: String, loc: SourceLoc },

    #[error("{loc}: property '{name}' sent with more than one argument")]
    PropertyMultiArgSend { name: String, loc: SourceLoc },

    #[error("{loc}: variable block overflow ({count} slots, limit {limit})")]
    VariableBlockOverflow { count: usize, limit: usize, loc: SourceLoc },

    #[error("{loc}: syntax error: {detail}")]
    SyntaxError { detail: String, loc: SourceLoc },

    #[error("{loc}: '{name}' redefined with the same value")]
    RedefinitionSameValue { name: String, loc: SourceLoc },

    #[error("{loc}: selector '{name}' implicitly installed")]
    SelectorImplicitlyInstalled { name: String, loc: SourceLoc },

    #[error("{loc}: string literal truncated to {limit} bytes")]
    TruncatedStringLiteral { limit: usize, loc: SourceLoc },

    #[error("{loc}: break/continue depth exceeds loop nesting")]
    BreakContinueDepthExceeded { loc: SourceLoc },

    #[error("{loc}: selector '{name}' auto-installed")]
    SelectorAutoInstalled { name: String, loc: SourceLoc },
}

impl CoreError {
    pub fn severity(&self) -> Severity {
        match self {
            CoreError::Internal { .. }
            | CoreError::Io { .. }
            | CoreError::UnexpectedEof { .. }
            | CoreError::ForwardRefConflict { .. }
            | CoreError::UnknownOpcodeAtEmit { .. }
            | CoreError::IncludeOpenFailed { .. } => Severity::Fatal,

            CoreError::RedefinitionDifferentValue { .. }
            | CoreError::UndefinedAtEmit { .. }
            | CoreError::PropertyMultiArgSend { .. }
            | CoreError::VariableBlockOverflow { .. }
            | CoreError::SyntaxError { .. } => Severity::Error,

            CoreError::RedefinitionSameValue { .. }
            | CoreError::SelectorImplicitlyInstalled { .. }
            | CoreError::TruncatedStringLiteral { .. }
            | CoreError::BreakContinueDepthExceeded { .. } => Severity::Warning,

            CoreError::SelectorAutoInstalled { .. } => Severity::Info,
        }
    }

    pub fn loc(&self) -> Option<&SourceLoc> {
        match self {
            CoreError::Internal { loc, .. }
            | CoreError::UnexpectedEof { loc }
            | CoreError::ForwardRefConflict { loc }
            | CoreError::UnknownOpcodeAtEmit { loc, .. }
            | CoreError::IncludeOpenFailed { loc, .. }
            | CoreError::RedefinitionDifferentValue { loc, .. }
            | CoreError::UndefinedAtEmit { loc, .. }
            | CoreError::PropertyMultiArgSend { loc, .. }
            | CoreError::VariableBlockOverflow { loc, .. }
            | CoreError::SyntaxError { loc, .. }
            | CoreError::RedefinitionSameValue { loc, .. }
            | CoreError::SelectorImplicitlyInstalled { loc, .. }
            | CoreError::TruncatedStringLiteral { loc, .. }
            | CoreError::BreakContinueDepthExceeded { loc }
            | CoreError::SelectorAutoInstalled { loc, .. } => Some(loc),
            CoreError::Io { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_conditions_are_classified_fatal() {
        assert_eq!(
            CoreError::UnexpectedEof { loc: SourceLoc::unknown() }.severity(),
            Severity::Fatal
        );
        assert_eq!(
            CoreError::ForwardRefConflict { loc: SourceLoc::unknown() }.severity(),
            Severity::Fatal
        );
    }

    #[test]
    fn redefinition_same_value_is_a_warning_not_an_error() {
        assert_eq!(
            CoreError::RedefinitionSameValue {
                name: "foo".into(),
                loc: SourceLoc::unknown(),
            }
            .severity(),
            Severity::Warning
        );
    }

    #[test]
    fn selector_auto_installed_is_info_only() {
        assert_eq!(
            CoreError::SelectorAutoInstalled {
                name: "name".into(),
                loc: SourceLoc::unknown(),
            }
            .severity(),
            Severity::Info
        );
    }
}

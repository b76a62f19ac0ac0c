//! The `Diagnostics` accumulator implementing section 7's counted
//! severity model, and `CoreDiagnostic`, the `miette`-backed
//! presentation wrapper used only at the CLI boundary.
//!
//! Internal stages never see `CoreDiagnostic` — they report a
//! `CoreError` to a `Diagnostics` accumulator and get back a plain
//! `Result`. `main.rs` is the only place a `CoreError` is wrapped for
//! graphical rendering.

use miette::{Diagnostic as MietteDiagnostic, LabeledSpan, NamedSource, Severity as MietteSeverity};
use thiserror::Error;

use crate::errors::{CoreError, Severity};

/// One reported condition, retained for the end-of-run summary.
#[derive(Debug, Clone)]
pub struct Record {
    pub severity: Severity,
    pub message: String,
}

/// Accumulates Error/Warning/Info counts for one compilation unit and
/// rings the terminal bell on the first Error or Warning, matching the
/// reference compiler's behavior. Fatal conditions are never
/// accumulated — they propagate as `Err` for the caller to unwind on,
/// after releasing any held vocabulary lock.
#[derive(Default)]
pub struct Diagnostics {
    errors: u32,
    warnings: u32,
    records: Vec<Record>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn error_count(&self) -> u32 {
        self.errors
    }

    pub fn warning_count(&self) -> u32 {
        self.warnings
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// A non-zero error count suppresses the vocabulary write-back for
    /// this compilation unit even though `.hep`/`.scr` are still
    /// written.
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    /// Routes `err` by severity. Fatal is returned as `Err` without
    /// being accumulated; Error, Warning, and Info are recorded and
    /// `Ok(())` is returned so compilation continues.
    pub fn report(&mut self, err: CoreError) -> Result<(), CoreError> {
        let severity = err.severity();
        match severity {
            Severity::Fatal => return Err(err),
            Severity::Error => {
                self.errors += 1;
                self.ring_bell_on_first();
            }
            Severity::Warning => {
                self.warnings += 1;
                self.ring_bell_on_first();
            }
            Severity::Info => {}
        }
        self.records.push(Record {
            severity,
            message: err.to_string(),
        });
        Ok(())
    }

    fn ring_bell_on_first(&mut self) {
        if self.errors + self.warnings == 1 {
            use std::io::Write;
            let _ = write!(std::io::stderr(), "\x07");
        }
    }
}

/// A `CoreError` wrapped with the source snippet and labeled span
/// needed for `miette`'s graphical terminal renderer.
#[derive(Debug, Error)]
#[error("{inner}")]
pub struct CoreDiagnostic {
    inner: CoreError,
    src: Option<NamedSource>,
    span: Option<(usize, usize)>,
}

impl CoreDiagnostic {
    pub fn new(inner: CoreError) -> Self {
        CoreDiagnostic {
            inner,
            src: None,
            span: None,
        }
    }

    pub fn with_source(
        mut self,
        name: impl Into<String>,
        text: impl Into<String>,
        byte_start: usize,
        byte_len: usize,
    ) -> Self {
        self.src = Some(NamedSource::new(name, text));
        self.span = Some((byte_start, byte_len.max(1)));
        self
    }
}

impl MietteDiagnostic for CoreDiagnostic {
    fn severity(&self) -> Option<MietteSeverity> {
        Some(match self.inner.severity() {
            Severity::Fatal | Severity::Error => MietteSeverity::Error,
            Severity::Warning => MietteSeverity::Warning,
            Severity::Info => MietteSeverity::Advice,
        })
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        self.src.as_ref().map(|s| s as &dyn miette::SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let (start, len) = self.span?;
        Some(Box::new(std::iter::once(LabeledSpan::at(start..start + len, "here"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourceLoc;

    #[test]
    fn bell_rings_only_on_the_first_reported_error_or_warning() {
        let mut diags = Diagnostics::new();
        diags
            .report(CoreError::SyntaxError {
                detail: "bad token".into(),
                loc: SourceLoc::unknown(),
            })
            .unwrap();
        diags
            .report(CoreError::RedefinitionSameValue {
                name: "x".into(),
                loc: SourceLoc::unknown(),
            })
            .unwrap();
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
        assert_eq!(diags.records().len(), 2);
    }

    #[test]
    fn fatal_propagates_without_being_accumulated() {
        let mut diags = Diagnostics::new();
        let result = diags.report(CoreError::UnexpectedEof { loc: SourceLoc::unknown() });
        assert!(result.is_err());
        assert_eq!(diags.error_count(), 0);
        assert_eq!(diags.records().len(), 0);
    }

    #[test]
    fn info_is_recorded_but_not_counted() {
        let mut diags = Diagnostics::new();
        diags
            .report(CoreError::SelectorAutoInstalled {
                name: "name".into(),
                loc: SourceLoc::unknown(),
            })
            .unwrap();
        assert_eq!(diags.error_count(), 0);
        assert_eq!(diags.warning_count(), 0);
        assert_eq!(diags.records().len(), 1);
    }

    #[test]
    fn error_count_suppresses_write_back() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_errors());
        diags
            .report(CoreError::VariableBlockOverflow {
                count: 300,
                limit: 256,
                loc: SourceLoc::unknown(),
            })
            .unwrap();
        assert!(diags.has_errors());
    }
}

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Document-level failures. Parsing itself is total (malformed structure is
/// demoted to plain text), so the only errors that ever reach a caller are
/// stream/scan failures and writer misuse.
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum OrgError {
    #[error("could not tokenize input: {message}")]
    #[diagnostic(
        code(org::scan_failed),
        help("The input stream failed while being read line by line.")
    )]
    Scan { message: String },

    #[error("could not parse input: {message}")]
    #[diagnostic(
        code(org::parse_panicked),
        help("An internal invariant was violated during parsing; this is a bug in org-core.")
    )]
    Parse { message: String },

    #[error("could not write output: {message}")]
    #[diagnostic(code(org::write_failed))]
    Write { message: String },

    #[error("write was called before parse")]
    #[diagnostic(
        code(org::write_before_parse),
        help("Call Configuration::parse and check Document::error before writing.")
    )]
    WriteBeforeParse,

    #[error("malformed table formula target")]
    #[diagnostic(
        code(org::bad_formula_target),
        help("Targets look like @2$3, @2, $3, roman numeral rows, or A..B ranges.")
    )]
    BadFormulaTarget {
        #[source_code]
        src: NamedSource<String>,
        #[label("could not parse this cell reference")]
        span: SourceSpan,
    },
}

impl OrgError {
    /// Extracts a printable message from a caught panic payload.
    pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
        if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        }
    }
}

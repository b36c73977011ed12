use crate::span::Span;
use std::result;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A bug in the SSA builder itself: malformed CFG, stale referrers and
    /// the like. Fatal for the whole build.
    #[error("invariant violation in {function}: {message}")]
    Invariant { function: String, message: String },
    /// Ill-typed or incomplete input. Fatal only for the function being built.
    #[error("{function}: {span}: {message}")]
    Input {
        function: String,
        span: Span,
        message: String,
    },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("Generic error: {0}")]
    Generic(String),
}

impl Error {
    pub fn invariant(function: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Invariant {
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn input(function: impl Into<String>, span: Span, message: impl Into<String>) -> Self {
        Error::Input {
            function: function.into(),
            span,
            message: message.into(),
        }
    }

    pub fn is_invariant(&self) -> bool {
        matches!(self, Error::Invariant { .. })
    }
}

pub type Result<T> = result::Result<T, Error>;

// Convert from eyre::Report to our Error type
impl From<eyre::Report> for Error {
    fn from(err: eyre::Report) -> Self {
        Error::Generic(err.to_string())
    }
}

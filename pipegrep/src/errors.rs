//! Error types for the pipegrep library.
//!
//! Both variants are construction-time failures: once a [`crate::Grep`] has
//! been built, running it cannot fail through this type. Errors raised by a
//! source while it is being read are observed at the reader boundary and are
//! never surfaced through the match iterator (see [`crate::Grep::run`]).

use thiserror::Error;

/// Result type for pipegrep operations
pub type GrepResult<T> = Result<T, GrepError>;

/// Errors that can occur when building a search pipeline
#[derive(Error, Debug)]
pub enum GrepError {
    #[error("invalid thread count: {0} (must be at least 1)")]
    InvalidThreadCount(usize),
    #[error("invalid regex pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
}

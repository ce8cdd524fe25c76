//! # Errors
//!
//! Fatal failures of a translation. A table that cannot satisfy a request is
//! not an error: the request pipeline reports it as
//! [`PassOutcome::Skip`](crate::request_logic::PassOutcome).

use thiserror::Error;

/// Result type used across the engine.
pub type Result<T> = std::result::Result<T, AggError>;

#[derive(Error, Debug)]
pub enum AggError {
    /// The request body is not an object, or a structural key holds the wrong type.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("aggregation '{agg}' of kind '{kind}' requires '{field}'")]
    MissingField {
        agg: String,
        kind: String,
        field: String,
    },

    #[error("aggregation '{agg}' of kind '{kind}' has an invalid '{field}': {reason}")]
    InvalidField {
        agg: String,
        kind: String,
        field: String,
        reason: String,
    },

    #[error("aggregation '{agg}' must declare exactly one kind, found {found}")]
    UnknownKind { agg: String, found: String },

    #[error("unsupported query: {0}")]
    UnsupportedQuery(#[from] FilterError),

    #[error("no physical table matches '{0}'")]
    NoTables(String),

    #[error("catalog lookup failed: {0}")]
    Catalog(String),

    #[error("query against '{table}' failed: {message}")]
    Execution { table: String, message: String },
}

impl AggError {
    pub(crate) fn missing(agg: &str, kind: &str, field: &str) -> Self {
        Self::MissingField {
            agg: agg.to_string(),
            kind: kind.to_string(),
            field: field.to_string(),
        }
    }

    pub(crate) fn invalid(agg: &str, kind: &str, field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            agg: agg.to_string(),
            kind: kind.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the failure was caused by the request itself rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedRequest(_)
                | Self::MissingField { .. }
                | Self::InvalidField { .. }
                | Self::UnknownKind { .. }
                | Self::UnsupportedQuery(_)
        )
    }
}

/// Failure to turn a query clause into a SphinxQL boolean expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("unsupported clause '{0}'")]
    Unsupported(String),

    #[error("malformed '{clause}' clause: {reason}")]
    Malformed { clause: String, reason: String },

    #[error("cannot parse date '{0}'")]
    InvalidDate(String),
}

impl FilterError {
    pub(crate) fn malformed(clause: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            clause: clause.to_string(),
            reason: reason.into(),
        }
    }
}

//! Crate-wide error taxonomy.
//!
//! # Responsibility
//! - Give callers one error type that separates "bad input" from
//!   "bad store" from "bad connection".
//!
//! # Invariants
//! - `Validation` is only produced before any statement reaches the store.
//! - Store-facing variants keep the engine diagnostic verbatim and gain an
//!   operation context through [`OrmError::in_context`].

use thiserror::Error;

pub type OrmResult<T> = Result<T, OrmError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrmError {
    /// The store could not be reached, opened, or locked in time.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed descriptor, filter, options, or resource values.
    #[error("validation error: {0}")]
    Validation(String),

    /// A registered or expected shape conflicts with what the store holds.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A migration step failed; the whole run was rolled back.
    #[error("migration to version {version} failed at `{operation}`: {message}")]
    Migration {
        version: u32,
        operation: String,
        message: String,
    },

    /// The store rejected or failed a statement.
    #[error("query error: {0}")]
    Query(String),

    /// A store-level integrity rule was broken by a write.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// An expected row is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The adapter was used while closed.
    #[error("adapter is closed")]
    Closed,

    /// Queued work was cancelled or abandoned before producing a result.
    #[error("operation cancelled before completion")]
    Cancelled,
}

impl OrmError {
    /// Prefixes store-facing diagnostics with the operation that caused them.
    ///
    /// Validation, lifecycle and migration errors already carry their own
    /// context and are returned unchanged.
    pub fn in_context(self, context: impl AsRef<str>) -> Self {
        let context = context.as_ref();
        match self {
            Self::Query(message) => Self::Query(format!("{context}: {message}")),
            Self::ConstraintViolation(message) => {
                Self::ConstraintViolation(format!("{context}: {message}"))
            }
            Self::Connection(message) => Self::Connection(format!("{context}: {message}")),
            Self::NotFound(message) => Self::NotFound(format!("{context}: {message}")),
            other => other,
        }
    }

    /// Stable short code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Validation(_) => "validation",
            Self::SchemaMismatch(_) => "schema_mismatch",
            Self::Migration { .. } => "migration",
            Self::Query(_) => "query",
            Self::ConstraintViolation(_) => "constraint",
            Self::NotFound(_) => "not_found",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OrmError;

    #[test]
    fn in_context_prefixes_store_errors_only() {
        let query = OrmError::Query("no such table: items".into()).in_context("find table=items");
        assert_eq!(
            query,
            OrmError::Query("find table=items: no such table: items".into())
        );

        let validation = OrmError::Validation("bad".into()).in_context("save");
        assert_eq!(validation, OrmError::Validation("bad".into()));
    }

    #[test]
    fn migration_error_names_version_and_operation() {
        let err = OrmError::Migration {
            version: 3,
            operation: "add column items.title".into(),
            message: "duplicate column name: title".into(),
        };
        let text = err.to_string();
        assert!(text.contains("version 3"));
        assert!(text.contains("add column items.title"));
    }
}

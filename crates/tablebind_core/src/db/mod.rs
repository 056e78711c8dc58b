//! Store access: the pluggable statement interface, its SQLite
//! implementation, the serializing adapter, and schema migrations.
//!
//! # Responsibility
//! - Define the minimal contract consumed from a relational store.
//! - Own exactly one connection per adapter and serialize all work on it.
//!
//! # Invariants
//! - Statement text never embeds runtime values; they travel as
//!   positional parameters.
//! - Every transaction is released (commit or rollback) on every exit path.

pub(crate) mod adapter;
mod config;
mod dispatcher;
pub mod migrations;
mod sqlite;

pub use adapter::{Adapter, Opener, Transaction};
pub use config::{AdapterConfig, JournalMode};
pub use dispatcher::PendingOp;
pub use sqlite::SqliteStore;

use crate::error::OrmResult;
use crate::value::Value;

/// Result of one executed statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementOutcome {
    /// Rows changed by a write; `0` for queries.
    pub rows_affected: usize,
    /// Result rows of a query in store order; empty for writes.
    pub rows: Vec<Vec<Value>>,
    /// Identity generated by the most recent insert on the connection.
    pub last_insert_id: Option<i64>,
}

/// Statement interface of the backing relational store.
///
/// Implementations are owned by a single dispatcher thread and are never
/// called concurrently.
pub trait Store: Send {
    fn execute(&mut self, sql: &str, params: &[Value]) -> OrmResult<StatementOutcome>;
    fn begin(&mut self) -> OrmResult<()>;
    fn commit(&mut self) -> OrmResult<()>;
    fn rollback(&mut self) -> OrmResult<()>;
    /// Only used by migrations to find descriptors without a table.
    fn table_exists(&mut self, table: &str) -> OrmResult<bool>;
    fn location(&self) -> &str;
}

//! Typed object-relational mapping over an embedded SQLite store.
//!
//! Applications describe tables as [`ResourceDescriptor`]s, bring the
//! schema to a version with [`Repository::migrate`], and then create,
//! save, query and delete [`Resource`] instances. Every store access runs
//! on the adapter's single dispatcher thread; each operation exists in a
//! blocking form and a queued `_async` form returning a [`PendingOp`].

pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
mod sql;
pub mod value;

pub use db::migrations::{MigrationOutcome, MigrationStep, SchemaOp};
pub use db::{
    Adapter, AdapterConfig, JournalMode, Opener, PendingOp, SqliteStore, StatementOutcome, Store,
    Transaction,
};
pub use error::{OrmError, OrmResult};
pub use logging::{
    default_log_level, init_logging, logging_status, LogTarget, LoggingConfig, LoggingError,
};
pub use model::descriptor::{ForeignKey, PropertyDef, ResourceDescriptor};
pub use model::resource::Resource;
pub use query::filter::{Connective, Filter, Operator};
pub use query::options::{FindOptions, OrderBy, SortDirection};
pub use repo::{Repository, ResultIter, ResultSet};
pub use value::{Value, ValueType};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

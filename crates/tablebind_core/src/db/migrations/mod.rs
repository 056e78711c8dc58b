//! Versioned schema migration.
//!
//! # Responsibility
//! - Bring the physical schema of a descriptor set to a target version.
//! - Record every applied version in a bookkeeping table.
//!
//! # Invariants
//! - A run is one transaction: all steps apply, or none do and the
//!   recorded version is unchanged.
//! - Versions are applied at most once; re-running a finished migration is
//!   a successful no-op.
//! - Step versions are positive and strictly increasing.

mod schema;

pub use schema::{MigrationStep, SchemaOp};

use crate::db::adapter::run_in_transaction;
use crate::db::Store;
use crate::error::{OrmError, OrmResult};
use crate::model::descriptor::ResourceDescriptor;
use crate::sql;
use crate::value::Value;
use log::{error, info};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Reserved relation holding one row per applied schema version.
pub const VERSION_TABLE: &str = "_tablebind_version";

/// What a migration run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from_version: u32,
    pub to_version: u32,
    /// Versions applied by this run, ascending; empty for a no-op.
    pub applied_versions: Vec<u32>,
    pub created_tables: Vec<String>,
}

impl MigrationOutcome {
    pub fn is_noop(&self) -> bool {
        self.applied_versions.is_empty()
    }
}

/// Checks target, descriptors and steps before anything reaches a store.
pub(crate) fn validate_plan(
    target: u32,
    descriptors: &[Arc<ResourceDescriptor>],
    steps: &[MigrationStep],
) -> OrmResult<()> {
    if target == 0 {
        return Err(OrmError::Validation(
            "target schema version must be at least 1".into(),
        ));
    }

    let mut tables = HashSet::new();
    for descriptor in descriptors {
        descriptor.validate()?;
        if let Some(property) = descriptor
            .properties
            .iter()
            .find(|property| property.since_version > target)
        {
            return Err(OrmError::Validation(format!(
                "{}.{} arrives in version {} beyond target {target}",
                descriptor.table, property.name, property.since_version
            )));
        }
        if !tables.insert(descriptor.table.as_str()) {
            return Err(OrmError::Validation(format!(
                "table `{}` appears twice in one migration",
                descriptor.table
            )));
        }
    }

    let mut previous = 0;
    for step in steps {
        if step.version <= previous {
            return Err(OrmError::Validation(format!(
                "migration step versions must be positive and strictly increasing; {} follows {}",
                step.version, previous
            )));
        }
        previous = step.version;
        step.operations.iter().try_for_each(SchemaOp::validate)?;
    }
    Ok(())
}

/// Reads the recorded schema version, `0` for a never-migrated store.
pub fn current_version(store: &mut dyn Store) -> OrmResult<u32> {
    if !store.table_exists(VERSION_TABLE)? {
        return Ok(0);
    }
    read_version(store)
}

fn read_version(store: &mut dyn Store) -> OrmResult<u32> {
    let outcome = store.execute(
        &format!(
            "SELECT COALESCE(MAX(version), 0) FROM {}",
            sql::quote_ident(VERSION_TABLE)
        ),
        &[],
    )?;
    let raw = outcome
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(Value::as_i64)
        .unwrap_or(0);
    u32::try_from(raw)
        .map_err(|_| OrmError::SchemaMismatch(format!("recorded schema version {raw} is invalid")))
}

/// Applies everything between the recorded version and `target`.
///
/// For each version `v` in `(current, target]`: columns introduced in `v`
/// are added to tables that already existed, then the caller's step for
/// `v` runs, then `v` is recorded. Tables missing for any descriptor are
/// created first, with every column that exists at `target`.
pub(crate) fn migrate(
    store: &mut dyn Store,
    target: u32,
    descriptors: &[Arc<ResourceDescriptor>],
    steps: &[MigrationStep],
) -> OrmResult<MigrationOutcome> {
    let started_at = Instant::now();
    info!("event=migration module=db status=start target_version={target}");

    let result = run_in_transaction(store, |tx| {
        let store = tx.store();
        store
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (version INTEGER NOT NULL PRIMARY KEY, applied_at INTEGER NOT NULL)",
                    sql::quote_ident(VERSION_TABLE)
                ),
                &[],
            )
            .map_err(|err| failure(target, "create bookkeeping table", err))?;
        let current = read_version(store).map_err(|err| failure(target, "read version", err))?;

        let mut outcome = MigrationOutcome {
            from_version: current,
            to_version: current.max(target),
            applied_versions: Vec::new(),
            created_tables: Vec::new(),
        };
        if current >= target {
            return Ok(outcome);
        }

        let first = current + 1;
        for descriptor in descriptors {
            let exists = store
                .table_exists(&descriptor.table)
                .map_err(|err| {
                    failure(first, &format!("inspect table {}", descriptor.table), err)
                })?;
            if !exists {
                let op = SchemaOp::CreateTable(Arc::clone(descriptor));
                apply(store, first, target, &op)?;
                outcome.created_tables.push(descriptor.table.clone());
            }
        }

        for version in first..=target {
            if version > 1 {
                for descriptor in descriptors {
                    if outcome.created_tables.contains(&descriptor.table) {
                        continue;
                    }
                    for property in descriptor
                        .properties
                        .iter()
                        .filter(|property| property.since_version == version)
                    {
                        let op = SchemaOp::AddColumn {
                            table: descriptor.table.clone(),
                            property: property.clone(),
                        };
                        apply(store, version, target, &op)?;
                    }
                }
            }

            if let Some(step) = steps.iter().find(|step| step.version == version) {
                for op in &step.operations {
                    apply(store, version, target, op)?;
                }
            }

            store
                .execute(
                    &format!(
                        "INSERT INTO {} (version, applied_at) VALUES (?, ?)",
                        sql::quote_ident(VERSION_TABLE)
                    ),
                    &[Value::from(version), Value::Integer(now_epoch_ms())],
                )
                .map_err(|err| failure(version, "record version", err))?;
            outcome.applied_versions.push(version);
        }

        Ok(outcome)
    });

    let result = result.map_err(|err| match err {
        migration @ OrmError::Migration { .. } => migration,
        other => failure(target, "commit", other),
    });

    match &result {
        Ok(outcome) if outcome.is_noop() => info!(
            "event=migration module=db status=skipped current_version={} target_version={target} duration_ms={}",
            outcome.from_version,
            started_at.elapsed().as_millis()
        ),
        Ok(outcome) => info!(
            "event=migration module=db status=ok from_version={} to_version={} created_tables={} duration_ms={}",
            outcome.from_version,
            outcome.to_version,
            outcome.created_tables.len(),
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=migration module=db status=error target_version={target} duration_ms={} error_code={} error={err}",
            started_at.elapsed().as_millis(),
            err.code()
        ),
    }
    result
}

fn apply(store: &mut dyn Store, version: u32, target: u32, op: &SchemaOp) -> OrmResult<()> {
    for statement in op.statements(target) {
        store
            .execute(&statement, &[])
            .map_err(|err| failure(version, &op.describe(), err))?;
    }
    Ok(())
}

fn failure(version: u32, operation: &str, err: OrmError) -> OrmError {
    OrmError::Migration {
        version,
        operation: operation.to_string(),
        message: err.to_string(),
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

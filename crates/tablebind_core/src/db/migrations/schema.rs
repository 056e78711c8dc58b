//! Schema operations and versioned migration steps.

use crate::error::{OrmError, OrmResult};
use crate::model::descriptor::{check_identifier, PropertyDef, ResourceDescriptor};
use crate::sql;
use std::sync::Arc;

/// One schema change.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOp {
    /// Creates the descriptor's table if missing.
    CreateTable(Arc<ResourceDescriptor>),
    AddColumn {
        table: String,
        property: PropertyDef,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        unique: bool,
    },
    DropTable(String),
    /// Caller-authored DDL; it is executed without parameters.
    Statement(String),
}

impl SchemaOp {
    /// Short human-readable name used in errors and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::CreateTable(descriptor) => format!("create table {}", descriptor.table),
            Self::AddColumn { table, property } => {
                format!("add column {table}.{}", property.name)
            }
            Self::CreateIndex { name, table, .. } => format!("create index {name} on {table}"),
            Self::DropTable(table) => format!("drop table {table}"),
            Self::Statement(text) => {
                let head: String = text.chars().take(40).collect();
                format!("statement `{head}`")
            }
        }
    }

    pub(crate) fn validate(&self) -> OrmResult<()> {
        match self {
            Self::CreateTable(descriptor) => descriptor.validate(),
            Self::AddColumn { table, property } => {
                check_identifier("table", table)?;
                check_identifier("property", &property.name)
            }
            Self::CreateIndex {
                name,
                table,
                columns,
                ..
            } => {
                check_identifier("index", name)?;
                check_identifier("table", table)?;
                if columns.is_empty() {
                    return Err(OrmError::Validation(format!(
                        "index `{name}` names no columns"
                    )));
                }
                columns
                    .iter()
                    .try_for_each(|column| check_identifier("column", column))
            }
            Self::DropTable(table) => check_identifier("table", table),
            Self::Statement(text) if text.trim().is_empty() => {
                Err(OrmError::Validation("empty migration statement".into()))
            }
            Self::Statement(_) => Ok(()),
        }
    }

    /// Statements implementing the operation when migrating to `target`.
    pub(crate) fn statements(&self, target: u32) -> Vec<String> {
        match self {
            Self::CreateTable(descriptor) => vec![sql::create_table(descriptor, target)],
            Self::AddColumn { table, property } => sql::add_column(table, property),
            Self::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                vec![sql::create_index(name, table, &columns, *unique)]
            }
            Self::DropTable(table) => vec![sql::drop_table(table)],
            Self::Statement(text) => vec![text.clone()],
        }
    }
}

/// Schema operations that together move the store to `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStep {
    pub version: u32,
    pub operations: Vec<SchemaOp>,
}

impl MigrationStep {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            operations: Vec::new(),
        }
    }

    pub fn op(mut self, op: SchemaOp) -> Self {
        self.operations.push(op);
        self
    }
}

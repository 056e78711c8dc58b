//! Statement text generation.
//!
//! # Responsibility
//! - Produce DML and DDL text for validated descriptors.
//! - Keep every runtime value out of the text (positional `?` only).
//!
//! # Invariants
//! - Identifiers are validated upstream and always double-quoted here.
//! - The only literals ever rendered are descriptor-declared column
//!   defaults in DDL, escaped by [`ddl_literal`].

use crate::model::descriptor::{PropertyDef, ResourceDescriptor};
use crate::value::{Value, ValueType};

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.map(quote_ident).collect::<Vec<_>>().join(", ")
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// `SELECT <all columns> FROM <table>` with optional condition, ordering,
/// and `LIMIT ? OFFSET ?` placeholders.
pub(crate) fn select(
    descriptor: &ResourceDescriptor,
    condition: Option<&str>,
    order: Option<&str>,
    paged: bool,
) -> String {
    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list(descriptor.properties.iter().map(|p| p.name.as_str())),
        quote_ident(&descriptor.table)
    );
    if let Some(condition) = condition {
        sql.push_str(" WHERE ");
        sql.push_str(condition);
    }
    if let Some(order) = order {
        sql.push_str(" ORDER BY ");
        sql.push_str(order);
    }
    if paged {
        sql.push_str(" LIMIT ? OFFSET ?");
    }
    sql
}

pub(crate) fn count(descriptor: &ResourceDescriptor, condition: Option<&str>) -> String {
    let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&descriptor.table));
    if let Some(condition) = condition {
        sql.push_str(" WHERE ");
        sql.push_str(condition);
    }
    sql
}

pub(crate) fn insert(descriptor: &ResourceDescriptor, columns: &[usize]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&descriptor.table));
    }
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&descriptor.table),
        column_list(
            columns
                .iter()
                .map(|index| descriptor.properties[*index].name.as_str())
        ),
        placeholders(columns.len())
    )
}

/// `UPDATE ... SET a = ?, b = ? WHERE pk = ?`; the key is the last parameter.
pub(crate) fn update(descriptor: &ResourceDescriptor, columns: &[usize]) -> String {
    let assignments = columns
        .iter()
        .map(|index| format!("{} = ?", quote_ident(&descriptor.properties[*index].name)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_ident(&descriptor.table),
        assignments,
        quote_ident(&descriptor.primary_key)
    )
}

pub(crate) fn exists_by_key(descriptor: &ResourceDescriptor) -> String {
    format!(
        "SELECT 1 FROM {} WHERE {} = ?",
        quote_ident(&descriptor.table),
        quote_ident(&descriptor.primary_key)
    )
}

pub(crate) fn delete_by_key(descriptor: &ResourceDescriptor) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?",
        quote_ident(&descriptor.table),
        quote_ident(&descriptor.primary_key)
    )
}

fn column_definition(property: &PropertyDef, inline_unique: bool) -> String {
    let mut sql = format!(
        "{} {}",
        quote_ident(&property.name),
        property.value_type.sql_type()
    );
    if !property.nullable {
        sql.push_str(" NOT NULL");
    }
    if inline_unique && property.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(reference) = &property.references {
        sql.push_str(&format!(
            " REFERENCES {}({})",
            quote_ident(&reference.table),
            quote_ident(&reference.column)
        ));
    }
    sql
}

/// Table creation with every column that exists at `version`.
pub(crate) fn create_table(descriptor: &ResourceDescriptor, version: u32) -> String {
    let mut columns = Vec::new();
    for property in descriptor.properties_at(version) {
        if property.name == descriptor.primary_key {
            let mut pk = format!(
                "{} {} PRIMARY KEY",
                quote_ident(&property.name),
                property.value_type.sql_type()
            );
            if property.value_type == ValueType::Integer {
                pk.push_str(" AUTOINCREMENT");
            } else {
                pk.push_str(" NOT NULL");
            }
            columns.push(pk);
        } else {
            columns.push(column_definition(property, true));
        }
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&descriptor.table),
        columns.join(", ")
    )
}

/// `ALTER TABLE ... ADD COLUMN`, plus a unique index when required since
/// the store cannot add a column with an inline `UNIQUE` constraint.
pub(crate) fn add_column(table: &str, property: &PropertyDef) -> Vec<String> {
    let mut column = column_definition(property, false);
    if !property.nullable {
        let default = property
            .default
            .clone()
            .unwrap_or_else(|| property.value_type.zero_value());
        column.push_str(" DEFAULT ");
        column.push_str(&ddl_literal(&default));
    }
    let mut statements = vec![format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table),
        column
    )];
    if property.unique {
        statements.push(create_index(
            &format!("ux_{table}_{}", property.name),
            table,
            &[property.name.as_str()],
            true,
        ));
    }
    statements
}

pub(crate) fn create_index(name: &str, table: &str, columns: &[&str], unique: bool) -> String {
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        quote_ident(name),
        quote_ident(table),
        column_list(columns.iter().copied())
    )
}

pub(crate) fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

/// Renders a schema default as a SQL literal.
pub(crate) fn ddl_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(value) => i64::from(*value).to_string(),
        Value::Integer(value) => value.to_string(),
        Value::Real(value) if value.is_finite() => format!("{value:?}"),
        Value::Real(_) => "NULL".to_string(),
        Value::Text(value) => format!("'{}'", value.replace('\'', "''")),
        Value::Blob(bytes) => {
            let hex: String = bytes.iter().map(|byte| format!("{byte:02X}")).collect();
            format!("X'{hex}'")
        }
    }
}

//! Resource descriptors: how one entity kind maps onto one table.
//!
//! # Responsibility
//! - Hold the declarative table shape (name, identity column, properties).
//! - Reject malformed shapes before they can reach the store.
//!
//! # Invariants
//! - Exactly one primary key, present in `properties`, typed integer or text.
//! - Property names are unique and valid identifiers.
//! - A descriptor is immutable once built or registered.

use crate::error::{OrmError, OrmResult};
use crate::value::{Value, ValueType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Table prefix reserved for bookkeeping relations.
pub const RESERVED_TABLE_PREFIX: &str = "_tablebind_";

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid")
});

/// Returns an error unless `name` is safe to use as a quoted identifier.
pub(crate) fn check_identifier(kind: &str, name: &str) -> OrmResult<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(OrmError::Validation(format!(
            "invalid {kind} name `{name}`; expected [A-Za-z_][A-Za-z0-9_]*"
        )))
    }
}

/// Foreign-key target of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

fn first_version() -> u32 {
    1
}

/// One mapped property (column).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub unique: bool,
    /// Schema version that introduced the column.
    #[serde(default = "first_version")]
    pub since_version: u32,
    #[serde(default)]
    pub references: Option<ForeignKey>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            nullable: false,
            default: None,
            unique: false,
            since_version: 1,
            references: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Integer)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Text)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Real)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Boolean)
    }

    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Blob)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn since_version(mut self, version: u32) -> Self {
        self.since_version = version;
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    /// Value the property starts with in a fresh instance.
    pub fn initial_value(&self) -> Value {
        match &self.default {
            Some(value) => value.clone(),
            None if self.nullable => Value::Null,
            None => self.value_type.zero_value(),
        }
    }

    /// Checks `value` against type and nullability, returning the
    /// normalized value to store.
    pub(crate) fn conform(&self, table: &str, value: Value) -> OrmResult<Value> {
        let kind = value.kind();
        let conformed = value.conform_to(self.value_type).ok_or_else(|| {
            OrmError::Validation(format!(
                "{table}.{} expects {} but got {kind}",
                self.name, self.value_type
            ))
        })?;
        if conformed.is_null() && !self.nullable {
            return Err(OrmError::Validation(format!(
                "{table}.{} is not nullable",
                self.name
            )));
        }
        Ok(conformed)
    }
}

/// Static metadata describing one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub table: String,
    pub primary_key: String,
    pub properties: Vec<PropertyDef>,
}

impl ResourceDescriptor {
    pub fn builder(table: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            table: table.into(),
            primary_key: None,
            properties: Vec::new(),
        }
    }

    /// Validates the descriptor shape.
    ///
    /// # Errors
    /// - `Validation` for invalid identifiers, duplicate properties, a
    ///   missing or mistyped primary key, bad defaults, or a zero
    ///   `since_version`.
    pub fn validate(&self) -> OrmResult<()> {
        check_identifier("table", &self.table)?;
        if self.table.starts_with(RESERVED_TABLE_PREFIX) || self.table.starts_with("sqlite_") {
            return Err(OrmError::Validation(format!(
                "table name `{}` is reserved",
                self.table
            )));
        }
        if self.properties.is_empty() {
            return Err(OrmError::Validation(format!(
                "descriptor `{}` declares no properties",
                self.table
            )));
        }

        let mut seen = HashSet::new();
        for property in &self.properties {
            check_identifier("property", &property.name)?;
            if !seen.insert(property.name.as_str()) {
                return Err(OrmError::Validation(format!(
                    "duplicate property `{}` in `{}`",
                    property.name, self.table
                )));
            }
            if property.since_version == 0 {
                return Err(OrmError::Validation(format!(
                    "{}.{} since_version must be positive",
                    self.table, property.name
                )));
            }
            if let Some(default) = &property.default {
                property.conform(&self.table, default.clone())?;
            }
            if let Some(reference) = &property.references {
                check_identifier("table", &reference.table)?;
                check_identifier("column", &reference.column)?;
            }
        }

        let primary = self.primary_key_property().ok_or_else(|| {
            OrmError::Validation(format!(
                "primary key `{}` is not a property of `{}`",
                self.primary_key, self.table
            ))
        })?;
        if !matches!(primary.value_type, ValueType::Integer | ValueType::Text) {
            return Err(OrmError::Validation(format!(
                "primary key {}.{} must be integer or text, not {}",
                self.table, primary.name, primary.value_type
            )));
        }
        if primary.since_version != 1 {
            return Err(OrmError::Validation(format!(
                "primary key {}.{} must exist from version 1",
                self.table, primary.name
            )));
        }

        Ok(())
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|property| property.name == name)
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties
            .iter()
            .position(|property| property.name == name)
    }

    /// Looks up a property or fails with a validation error.
    pub(crate) fn require_property(&self, name: &str) -> OrmResult<(usize, &PropertyDef)> {
        self.properties
            .iter()
            .enumerate()
            .find(|(_, property)| property.name == name)
            .ok_or_else(|| {
                OrmError::Validation(format!("`{}` has no property `{name}`", self.table))
            })
    }

    pub fn primary_key_property(&self) -> Option<&PropertyDef> {
        self.property(&self.primary_key)
    }

    pub(crate) fn primary_key_index(&self) -> usize {
        // Validated descriptors always contain their primary key.
        self.property_index(&self.primary_key).unwrap_or(0)
    }

    /// Whether the store generates the identity (integer keys).
    pub fn has_generated_key(&self) -> bool {
        self.primary_key_property()
            .is_some_and(|property| property.value_type == ValueType::Integer)
    }

    /// Properties whose column exists once the schema reaches `version`.
    pub fn properties_at(&self, version: u32) -> impl Iterator<Item = &PropertyDef> {
        self.properties
            .iter()
            .filter(move |property| property.since_version <= version)
    }
}

/// Fluent construction of a validated [`ResourceDescriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    table: String,
    primary_key: Option<String>,
    properties: Vec<PropertyDef>,
}

impl DescriptorBuilder {
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    pub fn property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    pub fn build(self) -> OrmResult<ResourceDescriptor> {
        let primary_key = self.primary_key.ok_or_else(|| {
            OrmError::Validation(format!("descriptor `{}` has no primary key", self.table))
        })?;
        let descriptor = ResourceDescriptor {
            table: self.table,
            primary_key,
            properties: self.properties,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

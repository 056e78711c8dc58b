//! Live resource instances bound to zero or one row.
//!
//! # Responsibility
//! - Hold one value per descriptor property plus dirty/persisted state.
//! - Route persistence through the owning repository.
//!
//! # Invariants
//! - `values` has exactly one entry per descriptor property, in order.
//! - The primary-key value cannot change once the instance is persisted.
//! - The repository back-reference is weak; instances never keep a
//!   repository alive and the repository never tracks instances.

use crate::error::{OrmError, OrmResult};
use crate::model::descriptor::ResourceDescriptor;
use crate::repo::repository::{Repository, RepositoryShared};
use crate::value::{Value, ValueType};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone)]
pub struct Resource {
    descriptor: Arc<ResourceDescriptor>,
    values: Vec<Value>,
    dirty: BTreeSet<usize>,
    persisted: bool,
    repository: Weak<RepositoryShared>,
}

impl Resource {
    /// Fresh, unpersisted instance holding each property's initial value.
    pub(crate) fn new_unpersisted(
        descriptor: Arc<ResourceDescriptor>,
        repository: Weak<RepositoryShared>,
    ) -> Self {
        let values = descriptor
            .properties
            .iter()
            .map(|property| property.initial_value())
            .collect();
        Self {
            descriptor,
            values,
            dirty: BTreeSet::new(),
            persisted: false,
            repository,
        }
    }

    /// Instance loaded from a stored row, already decoded and in order.
    pub(crate) fn from_stored(
        descriptor: Arc<ResourceDescriptor>,
        values: Vec<Value>,
        repository: Weak<RepositoryShared>,
    ) -> Self {
        Self {
            descriptor,
            values,
            dirty: BTreeSet::new(),
            persisted: true,
            repository,
        }
    }

    pub fn descriptor(&self) -> &Arc<ResourceDescriptor> {
        &self.descriptor
    }

    pub fn table(&self) -> &str {
        &self.descriptor.table
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.descriptor
            .property_index(name)
            .map(|index| &self.values[index])
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Sets one property and marks it dirty when the value changes.
    ///
    /// Type and nullability are checked when the instance is saved.
    ///
    /// # Errors
    /// - `Validation` for unknown properties or a primary-key change on a
    ///   persisted instance.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> OrmResult<()> {
        let (index, property) = self.descriptor.require_property(name)?;
        let value = value.into();
        if index == self.descriptor.primary_key_index() && self.persisted {
            if self.values[index] == value {
                return Ok(());
            }
            return Err(OrmError::Validation(format!(
                "primary key {}.{} is immutable once persisted",
                self.descriptor.table, property.name
            )));
        }
        let value = match (property.value_type, value) {
            (ValueType::Real, Value::Integer(raw)) => Value::Real(raw as f64),
            (_, other) => other,
        };
        if self.values[index] != value {
            self.values[index] = value;
            self.dirty.insert(index);
        }
        Ok(())
    }

    /// `(name, value)` pairs in descriptor order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.descriptor
            .properties
            .iter()
            .map(|property| property.name.as_str())
            .zip(self.values.iter())
    }

    pub fn primary_key(&self) -> &Value {
        &self.values[self.descriptor.primary_key_index()]
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_properties(&self) -> Vec<&str> {
        self.dirty
            .iter()
            .map(|index| self.descriptor.properties[*index].name.as_str())
            .collect()
    }

    /// Saves through the owning repository.
    ///
    /// # Errors
    /// - `Validation` when the repository has been dropped.
    /// - Any error of [`Repository::save`].
    pub fn save(&mut self) -> OrmResult<()> {
        self.repository()?.save(self)
    }

    /// Deletes through the owning repository.
    pub fn delete(&mut self) -> OrmResult<()> {
        self.repository()?.delete(self)
    }

    fn repository(&self) -> OrmResult<Repository> {
        Repository::from_weak(&self.repository).ok_or_else(|| {
            OrmError::Validation(format!(
                "resource of `{}` is detached from its repository",
                self.descriptor.table
            ))
        })
    }

    pub(crate) fn raw_values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn dirty_indexes(&self) -> &BTreeSet<usize> {
        &self.dirty
    }

    pub(crate) fn belongs_to(&self, repository: &Arc<RepositoryShared>) -> bool {
        std::ptr::eq(self.repository.as_ptr(), Arc::as_ptr(repository))
    }

    /// Whether the identity still has to be generated on insert.
    pub(crate) fn needs_generated_key(&self) -> bool {
        !self.persisted && self.primary_key().is_zero()
    }

    /// Checks every value against the descriptor and normalizes it.
    pub(crate) fn validate(&mut self) -> OrmResult<()> {
        let pk_index = self.descriptor.primary_key_index();
        let generated = self.needs_generated_key();
        for (index, property) in self.descriptor.properties.iter().enumerate() {
            if index == pk_index && generated {
                continue;
            }
            let conformed = property.conform(&self.descriptor.table, self.values[index].clone())?;
            self.values[index] = conformed;
        }
        Ok(())
    }

    /// Stores a core-generated identity ahead of the insert.
    pub(crate) fn assign_key(&mut self, primary_key: Value) {
        let pk_index = self.descriptor.primary_key_index();
        self.values[pk_index] = primary_key;
    }

    pub(crate) fn apply_insert(&mut self, primary_key: Value) {
        let pk_index = self.descriptor.primary_key_index();
        self.values[pk_index] = primary_key;
        self.persisted = true;
        self.dirty.clear();
    }

    pub(crate) fn apply_update(&mut self) {
        self.dirty.clear();
    }

    /// Unbinds the instance from its row; a later save inserts again.
    pub(crate) fn apply_delete(&mut self) {
        self.persisted = false;
        self.dirty = (0..self.values.len()).collect();
    }
}

//! Repository: descriptor registry plus CRUD, query, and migration entry
//! points over one adapter.
//!
//! # Responsibility
//! - Track which descriptors are known and reject shape conflicts.
//! - Translate resource operations into statements on the adapter queue.
//! - Decode stored rows back into typed resources.
//!
//! # Invariants
//! - Validation failures are reported before any work is queued, so they
//!   never touch the store.
//! - Every write is a single statement or one transaction; a failed write
//!   leaves the instance's persisted state unchanged.
//! - Instances hold only a weak back-reference to the repository.

use super::result_set::ResultSet;
use crate::db::adapter::run_in_transaction;
use crate::db::migrations::{self, MigrationOutcome, MigrationStep};
use crate::db::{Adapter, PendingOp, Store};
use crate::error::{OrmError, OrmResult};
use crate::model::descriptor::ResourceDescriptor;
use crate::model::resource::Resource;
use crate::query::filter::Filter;
use crate::query::options::FindOptions;
use crate::sql;
use crate::value::Value;
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;
use uuid::Uuid;

/// Cheaply clonable handle; clones share the registry and adapter.
#[derive(Debug, Clone)]
pub struct Repository {
    shared: Arc<RepositoryShared>,
}

#[derive(Debug)]
pub(crate) struct RepositoryShared {
    adapter: Adapter,
    registry: RwLock<HashMap<String, Arc<ResourceDescriptor>>>,
}

impl RepositoryShared {
    fn reconcile(&self, descriptors: &[Arc<ResourceDescriptor>]) {
        let mut registry = self.registry.write();
        for descriptor in descriptors {
            registry.insert(descriptor.table.clone(), Arc::clone(descriptor));
        }
    }
}

impl Repository {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            shared: Arc::new(RepositoryShared {
                adapter,
                registry: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn from_weak(shared: &Weak<RepositoryShared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.shared.adapter
    }

    /// Registers a descriptor without touching the store.
    ///
    /// Registering an identical descriptor again returns the existing one.
    ///
    /// # Errors
    /// - `Validation` for an invalid descriptor.
    /// - `SchemaMismatch` when the table is already registered with a
    ///   different shape.
    pub fn register(
        &self,
        descriptor: impl Into<Arc<ResourceDescriptor>>,
    ) -> OrmResult<Arc<ResourceDescriptor>> {
        let descriptor = descriptor.into();
        descriptor.validate()?;
        let mut registry = self.shared.registry.write();
        match registry.get(&descriptor.table) {
            Some(known) if **known == *descriptor => Ok(Arc::clone(known)),
            Some(_) => Err(OrmError::SchemaMismatch(format!(
                "table `{}` is already registered with a different shape",
                descriptor.table
            ))),
            None => {
                registry.insert(descriptor.table.clone(), Arc::clone(&descriptor));
                Ok(descriptor)
            }
        }
    }

    pub fn descriptor(&self, table: &str) -> Option<Arc<ResourceDescriptor>> {
        self.shared.registry.read().get(table).cloned()
    }

    pub fn registered_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.shared.registry.read().keys().cloned().collect();
        tables.sort();
        tables
    }

    /// Resolves `descriptor` to the registered instance of the same shape.
    fn resolve(&self, descriptor: &ResourceDescriptor) -> OrmResult<Arc<ResourceDescriptor>> {
        match self.shared.registry.read().get(&descriptor.table) {
            Some(known) if **known == *descriptor => Ok(Arc::clone(known)),
            Some(_) => Err(OrmError::SchemaMismatch(format!(
                "descriptor for `{}` differs from the registered one",
                descriptor.table
            ))),
            None => Err(OrmError::Validation(format!(
                "table `{}` is not registered",
                descriptor.table
            ))),
        }
    }

    fn ensure_open(&self) -> OrmResult<()> {
        if self.shared.adapter.is_open() {
            Ok(())
        } else {
            Err(OrmError::Closed)
        }
    }

    fn check_owned(&self, resource: &Resource) -> OrmResult<()> {
        if resource.belongs_to(&self.shared) {
            Ok(())
        } else {
            Err(OrmError::Validation(format!(
                "resource of `{}` belongs to another repository",
                resource.table()
            )))
        }
    }

    fn weak(&self) -> Weak<RepositoryShared> {
        Arc::downgrade(&self.shared)
    }

    /// Creates an unpersisted instance; nothing is written until `save`.
    ///
    /// # Errors
    /// - `Closed` when the adapter is not open.
    /// - `Validation` for unknown property names, values of the wrong type,
    ///   or `NULL` for a non-nullable property.
    pub fn create<I, K, V>(
        &self,
        descriptor: &ResourceDescriptor,
        initial: I,
    ) -> OrmResult<Resource>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.ensure_open()?;
        let descriptor = self.resolve(descriptor)?;
        let mut resource = Resource::new_unpersisted(Arc::clone(&descriptor), self.weak());
        for (name, value) in initial {
            let name = name.as_ref();
            let (_, property) = descriptor.require_property(name)?;
            let value = property.conform(&descriptor.table, value.into())?;
            resource.set(name, value)?;
        }
        Ok(resource)
    }

    /// Inserts or updates `resource` and refreshes it in place.
    pub fn save(&self, resource: &mut Resource) -> OrmResult<()> {
        *resource = self.save_async(resource.clone()).wait()?;
        Ok(())
    }

    /// Queued save; the handle yields the saved instance.
    ///
    /// # Errors
    /// - `Validation` for type, nullability, ownership or registration
    ///   problems, reported without store access.
    /// - `ConstraintViolation` when the store rejects the row.
    /// - `NotFound` when an update matches no row.
    pub fn save_async(&self, mut resource: Resource) -> PendingOp<Resource> {
        if let Err(err) = self.prepare_write(&mut resource) {
            return PendingOp::ready(Err(err));
        }
        self.shared.adapter.run(move |store| {
            write_resource(store, &mut resource)?;
            Ok(resource)
        })
    }

    /// Saves every instance inside one transaction.
    pub fn save_all(&self, resources: &mut [Resource]) -> OrmResult<()> {
        let saved = self.save_all_async(resources.to_vec()).wait()?;
        for (slot, resource) in resources.iter_mut().zip(saved) {
            *slot = resource;
        }
        Ok(())
    }

    /// Queued batch save; either every instance is written or none is.
    pub fn save_all_async(&self, mut resources: Vec<Resource>) -> PendingOp<Vec<Resource>> {
        if let Err(err) = resources
            .iter_mut()
            .try_for_each(|resource| self.prepare_write(resource))
        {
            return PendingOp::ready(Err(err));
        }
        self.shared.adapter.run(move |store| {
            run_in_transaction(store, move |tx| {
                for resource in &mut resources {
                    write_resource(tx.store(), resource)?;
                }
                Ok(resources)
            })
        })
    }

    fn prepare_write(&self, resource: &mut Resource) -> OrmResult<()> {
        self.ensure_open()?;
        self.check_owned(resource)?;
        self.resolve(resource.descriptor())?;
        resource.validate()
    }

    /// Deletes the row bound to `resource`; the instance becomes unpersisted.
    pub fn delete(&self, resource: &mut Resource) -> OrmResult<()> {
        *resource = self.delete_async(resource.clone()).wait()?;
        Ok(())
    }

    /// Queued delete.
    ///
    /// # Errors
    /// - `NotFound` when the instance has no primary key or no row
    ///   matches it.
    pub fn delete_async(&self, mut resource: Resource) -> PendingOp<Resource> {
        let prepared = self
            .ensure_open()
            .and_then(|()| self.check_owned(&resource))
            .and_then(|()| self.resolve(resource.descriptor()));
        let descriptor = match prepared {
            Ok(descriptor) => descriptor,
            Err(err) => return PendingOp::ready(Err(err)),
        };
        let key = resource.primary_key().clone();
        if key.is_zero() {
            return PendingOp::ready(Err(OrmError::NotFound(format!(
                "`{}` instance has no primary key",
                descriptor.table
            ))));
        }
        self.shared.adapter.run(move |store| {
            let started_at = Instant::now();
            let context = format!("delete table={} key={key}", descriptor.table);
            let outcome = store
                .execute(&sql::delete_by_key(&descriptor), &[key.clone()])
                .map_err(|err| err.in_context(&context))?;
            if outcome.rows_affected == 0 {
                warn!(
                    "event=resource_delete module=repo status=error table={} error_code=not_found",
                    descriptor.table
                );
                return Err(OrmError::NotFound(format!(
                    "no `{}` row with {} = {key}",
                    descriptor.table, descriptor.primary_key
                )));
            }
            resource.apply_delete();
            debug!(
                "event=resource_delete module=repo status=ok table={} duration_ms={}",
                descriptor.table,
                started_at.elapsed().as_millis()
            );
            Ok(resource)
        })
    }

    /// Fetches the first matching instance in primary-key order.
    pub fn find_one(
        &self,
        descriptor: &ResourceDescriptor,
        filter: Option<&Filter>,
    ) -> OrmResult<Resource> {
        self.find_one_async(descriptor, filter.cloned()).wait()
    }

    /// Queued `find_one`.
    ///
    /// # Errors
    /// - `NotFound` when nothing matches.
    /// - `SchemaMismatch` when a primary-key lookup matches more than one
    ///   row, or a stored value does not decode to its declared type.
    pub fn find_one_async(
        &self,
        descriptor: &ResourceDescriptor,
        filter: Option<Filter>,
    ) -> PendingOp<Resource> {
        let descriptor = match self.prepare_read(descriptor, filter.as_ref()) {
            Ok(descriptor) => descriptor,
            Err(err) => return PendingOp::ready(Err(err)),
        };
        let order = FindOptions::new().order_sql(&descriptor);
        let weak = self.weak();
        self.shared.adapter.run(move |store| {
            let mut rows = select_rows(store, &descriptor, filter.as_ref(), &order, 0, Some(2))?;
            let lookup = filter
                .as_ref()
                .is_some_and(|filter| filter.is_primary_key_lookup(&descriptor));
            if rows.len() > 1 && lookup {
                return Err(OrmError::SchemaMismatch(format!(
                    "primary-key lookup on `{}` matched more than one row",
                    descriptor.table
                )));
            }
            if rows.is_empty() {
                return Err(OrmError::NotFound(format!(
                    "no `{}` row matches {}",
                    descriptor.table,
                    describe_filter(filter.as_ref())
                )));
            }
            decode_row(&descriptor, rows.swap_remove(0), weak)
        })
    }

    pub fn find_by_id(
        &self,
        descriptor: &ResourceDescriptor,
        key: impl Into<Value>,
    ) -> OrmResult<Resource> {
        self.find_by_id_async(descriptor, key).wait()
    }

    pub fn find_by_id_async(
        &self,
        descriptor: &ResourceDescriptor,
        key: impl Into<Value>,
    ) -> PendingOp<Resource> {
        match Filter::primary_key(descriptor, key) {
            Ok(filter) => self.find_one_async(descriptor, Some(filter)),
            Err(err) => PendingOp::ready(Err(err)),
        }
    }

    /// Builds a lazy result set; no statement runs until it is read.
    pub fn find(
        &self,
        descriptor: &ResourceDescriptor,
        filter: Option<Filter>,
        options: FindOptions,
    ) -> OrmResult<ResultSet> {
        let descriptor = self.prepare_read(descriptor, filter.as_ref())?;
        options.validate(&descriptor)?;
        Ok(ResultSet::new(self.clone(), descriptor, filter, options))
    }

    pub fn count(
        &self,
        descriptor: &ResourceDescriptor,
        filter: Option<&Filter>,
    ) -> OrmResult<u64> {
        self.count_async(descriptor, filter.cloned()).wait()
    }

    pub fn count_async(
        &self,
        descriptor: &ResourceDescriptor,
        filter: Option<Filter>,
    ) -> PendingOp<u64> {
        match self.prepare_read(descriptor, filter.as_ref()) {
            Ok(descriptor) => self.count_window_async(descriptor, filter, 0, None),
            Err(err) => PendingOp::ready(Err(err)),
        }
    }

    fn prepare_read(
        &self,
        descriptor: &ResourceDescriptor,
        filter: Option<&Filter>,
    ) -> OrmResult<Arc<ResourceDescriptor>> {
        self.ensure_open()?;
        let descriptor = self.resolve(descriptor)?;
        if let Some(filter) = filter {
            filter.check_target(&descriptor)?;
        }
        Ok(descriptor)
    }

    /// Rows `[offset, offset + limit)` of the ordered match list.
    pub(crate) fn select_async(
        &self,
        descriptor: Arc<ResourceDescriptor>,
        filter: Option<Filter>,
        order: String,
        offset: u64,
        limit: Option<u64>,
    ) -> PendingOp<Vec<Resource>> {
        let weak = self.weak();
        self.shared.adapter.run(move |store| {
            select_rows(store, &descriptor, filter.as_ref(), &order, offset, limit)?
                .into_iter()
                .map(|row| decode_row(&descriptor, row, weak.clone()))
                .collect()
        })
    }

    /// Number of matches left after skipping `offset`, capped by `limit`.
    pub(crate) fn count_window_async(
        &self,
        descriptor: Arc<ResourceDescriptor>,
        filter: Option<Filter>,
        offset: u64,
        limit: Option<u64>,
    ) -> PendingOp<u64> {
        self.shared.adapter.run(move |store| {
            let fragment = filter.as_ref().map(Filter::to_sql);
            let params = fragment
                .as_ref()
                .map(|fragment| fragment.params.clone())
                .unwrap_or_default();
            let statement = sql::count(&descriptor, fragment.as_ref().map(|f| f.sql.as_str()));
            let outcome = store
                .execute(&statement, &params)
                .map_err(|err| err.in_context(format!("count table={}", descriptor.table)))?;
            let total = outcome
                .rows
                .first()
                .and_then(|row| row.first())
                .and_then(Value::as_i64)
                .unwrap_or(0)
                .max(0) as u64;
            let remaining = total.saturating_sub(offset);
            Ok(limit.map_or(remaining, |limit| remaining.min(limit)))
        })
    }

    /// Brings `descriptors` to schema version `target`.
    pub fn migrate(
        &self,
        target: u32,
        descriptors: &[Arc<ResourceDescriptor>],
    ) -> OrmResult<MigrationOutcome> {
        self.migrate_async(target, descriptors).wait()
    }

    pub fn migrate_async(
        &self,
        target: u32,
        descriptors: &[Arc<ResourceDescriptor>],
    ) -> PendingOp<MigrationOutcome> {
        self.migrate_with_steps_async(target, descriptors, Vec::new())
    }

    /// Migration with caller-authored steps keyed by version.
    pub fn migrate_with_steps(
        &self,
        target: u32,
        descriptors: &[Arc<ResourceDescriptor>],
        steps: Vec<MigrationStep>,
    ) -> OrmResult<MigrationOutcome> {
        self.migrate_with_steps_async(target, descriptors, steps).wait()
    }

    /// Queued migration; on success every descriptor is registered.
    ///
    /// # Errors
    /// - `Validation` for a bad target, descriptor set, or step list,
    ///   reported without store access. A descriptor declaring a property
    ///   whose `since_version` exceeds `target` is a bad descriptor set.
    /// - `Migration` naming the failing version and operation; the recorded
    ///   version is unchanged.
    pub fn migrate_with_steps_async(
        &self,
        target: u32,
        descriptors: &[Arc<ResourceDescriptor>],
        steps: Vec<MigrationStep>,
    ) -> PendingOp<MigrationOutcome> {
        if let Err(err) = self
            .ensure_open()
            .and_then(|()| migrations::validate_plan(target, descriptors, &steps))
        {
            return PendingOp::ready(Err(err));
        }
        let descriptors = descriptors.to_vec();
        let shared = self.weak();
        self.shared.adapter.run(move |store| {
            let outcome = migrations::migrate(store, target, &descriptors, &steps)?;
            if let Some(shared) = shared.upgrade() {
                shared.reconcile(&descriptors);
            }
            Ok(outcome)
        })
    }

    /// Recorded schema version; `0` for a never-migrated store.
    pub fn schema_version(&self) -> OrmResult<u32> {
        self.schema_version_async().wait()
    }

    pub fn schema_version_async(&self) -> PendingOp<u32> {
        self.shared
            .adapter
            .run(|store| migrations::current_version(store))
    }
}

fn write_resource(store: &mut dyn Store, resource: &mut Resource) -> OrmResult<()> {
    let started_at = Instant::now();
    let descriptor = Arc::clone(resource.descriptor());
    let pk_index = descriptor.primary_key_index();

    if !resource.is_persisted() {
        let generated = resource.needs_generated_key();
        let rowid_key = generated && descriptor.has_generated_key();
        if generated && !rowid_key {
            resource.assign_key(Value::Text(Uuid::new_v4().to_string()));
        }
        let columns: Vec<usize> = (0..descriptor.properties.len())
            .filter(|index| !(rowid_key && *index == pk_index))
            .collect();
        let params: Vec<Value> = columns
            .iter()
            .map(|index| resource.raw_values()[*index].clone())
            .collect();
        let outcome = store
            .execute(&sql::insert(&descriptor, &columns), &params)
            .map_err(|err| {
                log_save_error(&descriptor.table, "insert", &err);
                err.in_context(format!("insert table={}", descriptor.table))
            })?;
        let key = if rowid_key {
            let rowid = outcome.last_insert_id.ok_or_else(|| {
                OrmError::Query(format!(
                    "insert into `{}` reported no generated key",
                    descriptor.table
                ))
            })?;
            Value::Integer(rowid)
        } else {
            resource.primary_key().clone()
        };
        resource.apply_insert(key);
        debug!(
            "event=resource_save module=repo status=ok op=insert table={} generated_key={generated} duration_ms={}",
            descriptor.table,
            started_at.elapsed().as_millis()
        );
        return Ok(());
    }

    let key = resource.primary_key().clone();
    let context = format!("update table={} key={key}", descriptor.table);
    let columns: Vec<usize> = if resource.is_dirty() {
        resource
            .dirty_indexes()
            .iter()
            .copied()
            .filter(|index| *index != pk_index)
            .collect()
    } else {
        (0..descriptor.properties.len())
            .filter(|index| *index != pk_index)
            .collect()
    };

    let matched = if columns.is_empty() {
        let outcome = store
            .execute(&sql::exists_by_key(&descriptor), &[key.clone()])
            .map_err(|err| err.in_context(&context))?;
        !outcome.rows.is_empty()
    } else {
        let mut params: Vec<Value> = columns
            .iter()
            .map(|index| resource.raw_values()[*index].clone())
            .collect();
        params.push(key.clone());
        let outcome = store
            .execute(&sql::update(&descriptor, &columns), &params)
            .map_err(|err| {
                log_save_error(&descriptor.table, "update", &err);
                err.in_context(&context)
            })?;
        outcome.rows_affected > 0
    };
    if !matched {
        return Err(OrmError::NotFound(format!(
            "no `{}` row with {} = {key}",
            descriptor.table, descriptor.primary_key
        )));
    }

    resource.apply_update();
    debug!(
        "event=resource_save module=repo status=ok op=update table={} columns={} duration_ms={}",
        descriptor.table,
        columns.len(),
        started_at.elapsed().as_millis()
    );
    Ok(())
}

fn log_save_error(table: &str, op: &str, err: &OrmError) {
    warn!(
        "event=resource_save module=repo status=error op={op} table={table} error_code={} error={err}",
        err.code()
    );
}

fn select_rows(
    store: &mut dyn Store,
    descriptor: &ResourceDescriptor,
    filter: Option<&Filter>,
    order: &str,
    offset: u64,
    limit: Option<u64>,
) -> OrmResult<Vec<Vec<Value>>> {
    let started_at = Instant::now();
    let fragment = filter.map(Filter::to_sql);
    let statement = sql::select(
        descriptor,
        fragment.as_ref().map(|fragment| fragment.sql.as_str()),
        Some(order),
        true,
    );
    let mut params = fragment.map(|fragment| fragment.params).unwrap_or_default();
    // SQLite treats a negative LIMIT as unbounded and a negative OFFSET as zero.
    let limit = limit.map_or(-1, |limit| i64::try_from(limit).unwrap_or(-1));
    let offset = i64::try_from(offset).map_err(|_| {
        OrmError::Validation(format!("offset {offset} out of range for `{}`", descriptor.table))
    })?;
    params.push(Value::Integer(limit));
    params.push(Value::Integer(offset));

    let outcome = store.execute(&statement, &params).map_err(|err| {
        err.in_context(format!(
            "find table={} filter={}",
            descriptor.table,
            describe_filter(filter)
        ))
    })?;
    debug!(
        "event=resource_find module=repo status=ok table={} rows={} offset={offset} duration_ms={}",
        descriptor.table,
        outcome.rows.len(),
        started_at.elapsed().as_millis()
    );
    Ok(outcome.rows)
}

fn describe_filter(filter: Option<&Filter>) -> String {
    filter.map_or_else(|| "<all>".to_string(), |filter| filter.to_sql().sql)
}

fn decode_row(
    descriptor: &Arc<ResourceDescriptor>,
    row: Vec<Value>,
    repository: Weak<RepositoryShared>,
) -> OrmResult<Resource> {
    if row.len() != descriptor.properties.len() {
        return Err(OrmError::SchemaMismatch(format!(
            "`{}` row has {} columns, descriptor declares {}",
            descriptor.table,
            row.len(),
            descriptor.properties.len()
        )));
    }
    let values = descriptor
        .properties
        .iter()
        .zip(row)
        .map(|(property, raw)| {
            let stored = raw.kind();
            Value::decode(raw, property.value_type).ok_or_else(|| {
                OrmError::SchemaMismatch(format!(
                    "`{}.{}` holds {stored}, declared {}",
                    descriptor.table, property.name, property.value_type
                ))
            })
        })
        .collect::<OrmResult<Vec<Value>>>()?;
    Ok(Resource::from_stored(
        Arc::clone(descriptor),
        values,
        repository,
    ))
}

#[cfg(test)]
mod tests {
    use super::decode_row;
    use crate::error::OrmError;
    use crate::model::descriptor::{PropertyDef, ResourceDescriptor};
    use crate::value::Value;
    use std::sync::{Arc, Weak};

    fn flags() -> Arc<ResourceDescriptor> {
        Arc::new(
            ResourceDescriptor::builder("flags")
                .primary_key("id")
                .property(PropertyDef::integer("id"))
                .property(PropertyDef::boolean("enabled"))
                .property(PropertyDef::real("weight").nullable())
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn decode_row_restores_declared_types() {
        let resource = decode_row(
            &flags(),
            vec![Value::Integer(3), Value::Integer(1), Value::Integer(2)],
            Weak::new(),
        )
        .unwrap();
        assert!(resource.is_persisted());
        assert_eq!(resource.get("enabled"), Some(&Value::Bool(true)));
        assert_eq!(resource.get("weight"), Some(&Value::Real(2.0)));
    }

    #[test]
    fn decode_row_rejects_foreign_storage_classes() {
        let err = decode_row(
            &flags(),
            vec![Value::Integer(3), Value::Text("yes".into()), Value::Null],
            Weak::new(),
        )
        .unwrap_err();
        assert!(
            matches!(err, OrmError::SchemaMismatch(message) if message.contains("flags.enabled"))
        );
    }

    #[test]
    fn detached_resources_cannot_save() {
        let mut resource = decode_row(
            &flags(),
            vec![Value::Integer(3), Value::Integer(0), Value::Null],
            Weak::new(),
        )
        .unwrap();
        assert!(matches!(resource.save(), Err(OrmError::Validation(_))));
    }
}

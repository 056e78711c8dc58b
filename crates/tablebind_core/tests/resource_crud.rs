use std::sync::Arc;
use tablebind_core::{
    Adapter, Filter, OrmError, PropertyDef, Repository, ResourceDescriptor, Value,
};

fn items() -> Arc<ResourceDescriptor> {
    Arc::new(
        ResourceDescriptor::builder("items")
            .primary_key("id")
            .property(PropertyDef::integer("id"))
            .property(PropertyDef::text("url"))
            .build()
            .unwrap(),
    )
}

fn users() -> Arc<ResourceDescriptor> {
    Arc::new(
        ResourceDescriptor::builder("users")
            .primary_key("handle")
            .property(PropertyDef::text("handle"))
            .property(PropertyDef::text("email").unique())
            .property(PropertyDef::integer("age").nullable())
            .property(PropertyDef::boolean("active").default_value(true))
            .build()
            .unwrap(),
    )
}

fn setup() -> (Repository, Arc<ResourceDescriptor>, Arc<ResourceDescriptor>) {
    let repository = Repository::new(Adapter::connect(":memory:").unwrap());
    let items = items();
    let users = users();
    repository
        .migrate(1, &[Arc::clone(&items), Arc::clone(&users)])
        .unwrap();
    (repository, items, users)
}

#[test]
fn saved_item_gets_generated_id_and_round_trips() {
    let (repository, items, _) = setup();

    let mut item = repository
        .create(&items, [("url", "http://example.org")])
        .unwrap();
    assert!(!item.is_persisted());
    item.save().unwrap();
    assert!(item.is_persisted());
    assert_eq!(item.primary_key(), &Value::Integer(1));

    let filter = Filter::eq(&items, "id", 1).unwrap();
    let found = repository.find_one(&items, Some(&filter)).unwrap();
    assert_eq!(found.get_i64("id"), Some(1));
    assert_eq!(found.get_str("url"), Some("http://example.org"));
    assert!(!found.is_dirty());
}

#[test]
fn generated_ids_are_distinct_and_increasing() {
    let (repository, items, _) = setup();
    let mut ids = Vec::new();
    for n in 0..5 {
        let mut item = repository
            .create(&items, [("url", format!("http://example.org/{n}"))])
            .unwrap();
        repository.save(&mut item).unwrap();
        ids.push(item.get_i64("id").unwrap());
    }
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn updates_write_only_dirty_properties() {
    let (repository, _, users) = setup();
    let mut user = repository
        .create(
            &users,
            [
                ("handle", Value::from("ada")),
                ("email", Value::from("ada@example.org")),
            ],
        )
        .unwrap();
    user.save().unwrap();
    assert_eq!(user.primary_key(), &Value::from("ada"));

    let mut stale = repository.find_by_id(&users, "ada").unwrap();

    user.set("age", 36).unwrap();
    assert_eq!(user.dirty_properties(), vec!["age"]);
    user.save().unwrap();
    assert!(!user.is_dirty());

    stale.set("email", "lovelace@example.org").unwrap();
    stale.save().unwrap();

    let fresh = repository.find_by_id(&users, "ada").unwrap();
    assert_eq!(fresh.get_i64("age"), Some(36));
    assert_eq!(fresh.get_str("email"), Some("lovelace@example.org"));
    assert_eq!(fresh.get("active"), Some(&Value::Bool(true)));
}

#[test]
fn primary_key_is_immutable_once_persisted() {
    let (repository, items, _) = setup();
    let mut item = repository.create(&items, [("url", "a")]).unwrap();
    item.save().unwrap();
    let err = item.set("id", 99).unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
}

#[test]
fn text_primary_keys_are_generated_when_empty() {
    let (repository, _, users) = setup();
    let mut user = repository
        .create(&users, [("email", "anon@example.org")])
        .unwrap();
    user.save().unwrap();
    let handle = user.get_str("handle").unwrap().to_string();
    assert_eq!(handle.len(), 36);
    assert!(repository.find_by_id(&users, handle.as_str()).is_ok());
}

#[test]
fn deleting_twice_reports_not_found() {
    let (repository, items, _) = setup();
    let mut item = repository.create(&items, [("url", "gone")]).unwrap();
    item.save().unwrap();
    let id = item.get_i64("id").unwrap();

    item.delete().unwrap();
    assert!(!item.is_persisted());
    assert!(matches!(
        repository.find_by_id(&items, id),
        Err(OrmError::NotFound(_))
    ));

    let mut again = item.clone();
    again.set("id", id).unwrap();
    let err = repository.delete(&mut again);
    assert!(matches!(err, Err(OrmError::NotFound(_))));
}

#[test]
fn deleted_instances_insert_again_on_save() {
    let (repository, items, _) = setup();
    let mut item = repository.create(&items, [("url", "back")]).unwrap();
    item.save().unwrap();
    item.delete().unwrap();
    item.save().unwrap();
    assert!(item.is_persisted());
    assert_eq!(repository.count(&items, None).unwrap(), 1);
}

#[test]
fn unsaved_instances_cannot_be_deleted() {
    let (repository, items, _) = setup();
    let mut item = repository.create(&items, [("url", "never saved")]).unwrap();
    assert!(matches!(item.delete(), Err(OrmError::NotFound(_))));
}

#[test]
fn unique_violations_surface_as_constraint_errors() {
    let (repository, _, users) = setup();
    let mut first = repository
        .create(&users, [("handle", "a"), ("email", "same@example.org")])
        .unwrap();
    first.save().unwrap();

    let mut second = repository
        .create(&users, [("handle", "b"), ("email", "same@example.org")])
        .unwrap();
    let err = second.save().unwrap_err();
    assert!(matches!(err, OrmError::ConstraintViolation(_)));
    assert!(!second.is_persisted());
}

#[test]
fn updating_a_vanished_row_is_not_found() {
    let (repository, items, _) = setup();
    let mut item = repository.create(&items, [("url", "x")]).unwrap();
    item.save().unwrap();
    let mut copy = repository.find_by_id(&items, item.get_i64("id").unwrap()).unwrap();
    item.delete().unwrap();

    copy.set("url", "y").unwrap();
    assert!(matches!(copy.save(), Err(OrmError::NotFound(_))));
}

#[test]
fn type_and_nullability_errors_are_validation_errors() {
    let (repository, items, users) = setup();

    assert!(matches!(
        repository.create(&items, [("url", 5)]),
        Err(OrmError::Validation(_))
    ));
    assert!(matches!(
        repository.create(&items, [("url", Value::Null)]),
        Err(OrmError::Validation(_))
    ));

    let mut wrong_type = repository.create(&items, [("url", "ok")]).unwrap();
    wrong_type.set("url", 5).unwrap();
    assert!(matches!(wrong_type.save(), Err(OrmError::Validation(_))));

    let mut missing_email = repository.create(&users, [("handle", "z")]).unwrap();
    missing_email.set("email", Value::Null).unwrap();
    assert!(matches!(missing_email.save(), Err(OrmError::Validation(_))));

    assert!(matches!(
        repository.create(&items, [("title", "nope")]),
        Err(OrmError::Validation(_))
    ));
}

#[test]
fn save_all_is_all_or_nothing() {
    let (repository, _, users) = setup();
    let mut batch = vec![
        repository
            .create(&users, [("handle", "one"), ("email", "dup@example.org")])
            .unwrap(),
        repository
            .create(&users, [("handle", "two"), ("email", "dup@example.org")])
            .unwrap(),
    ];
    let err = repository.save_all(&mut batch).unwrap_err();
    assert!(matches!(err, OrmError::ConstraintViolation(_)));
    assert!(batch.iter().all(|user| !user.is_persisted()));
    assert_eq!(repository.count(&users, None).unwrap(), 0);
}

#[test]
fn unregistered_and_conflicting_descriptors_are_rejected() {
    let repository = Repository::new(Adapter::connect(":memory:").unwrap());
    let items = items();
    assert!(matches!(
        repository.create(&items, [("url", "x")]),
        Err(OrmError::Validation(_))
    ));

    repository.register(Arc::clone(&items)).unwrap();
    let reshaped = ResourceDescriptor::builder("items")
        .primary_key("id")
        .property(PropertyDef::integer("id"))
        .property(PropertyDef::text("url").nullable())
        .build()
        .unwrap();
    assert!(matches!(
        repository.register(reshaped),
        Err(OrmError::SchemaMismatch(_))
    ));
}

#[test]
fn instances_outliving_their_repository_are_detached() {
    let (repository, items, _) = setup();
    let mut item = repository.create(&items, [("url", "orphan")]).unwrap();
    drop(repository);
    assert!(matches!(item.save(), Err(OrmError::Validation(_))));
}

#[test]
fn file_backed_stores_persist_across_adapters() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("items.db");
    let location = path.to_str().unwrap();
    let items = items();

    {
        let repository = Repository::new(Adapter::connect(location).unwrap());
        repository.migrate(1, &[Arc::clone(&items)]).unwrap();
        let mut item = repository.create(&items, [("url", "kept")]).unwrap();
        item.save().unwrap();
        repository.adapter().close().unwrap();
    }

    let repository = Repository::new(Adapter::connect(location).unwrap());
    repository.migrate(1, &[Arc::clone(&items)]).unwrap();
    let found = repository.find_by_id(&items, 1).unwrap();
    assert_eq!(found.get_str("url"), Some("kept"));
}

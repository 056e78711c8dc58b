use std::sync::Arc;
use tablebind_core::{
    Adapter, MigrationStep, OrmError, PropertyDef, Repository, ResourceDescriptor, SchemaOp, Value,
};

fn notes_v1() -> Arc<ResourceDescriptor> {
    Arc::new(
        ResourceDescriptor::builder("notes")
            .primary_key("id")
            .property(PropertyDef::integer("id"))
            .property(PropertyDef::text("body"))
            .build()
            .unwrap(),
    )
}

fn notes_v2() -> Arc<ResourceDescriptor> {
    Arc::new(
        ResourceDescriptor::builder("notes")
            .primary_key("id")
            .property(PropertyDef::integer("id"))
            .property(PropertyDef::text("body"))
            .property(
                PropertyDef::text("title")
                    .default_value("untitled")
                    .since_version(2),
            )
            .property(PropertyDef::integer("pinned").nullable().since_version(2))
            .build()
            .unwrap(),
    )
}

fn repository() -> Repository {
    Repository::new(Adapter::connect(":memory:").unwrap())
}

fn column_names(repository: &Repository, table: &str) -> Vec<String> {
    let outcome = repository
        .adapter()
        .execute(&format!("SELECT name FROM pragma_table_info('{table}')"), &[])
        .unwrap();
    outcome
        .rows
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect()
}

#[test]
fn fresh_store_is_created_and_versioned() {
    let repository = repository();
    assert_eq!(repository.schema_version().unwrap(), 0);

    let outcome = repository.migrate(1, &[notes_v1()]).unwrap();
    assert_eq!(outcome.from_version, 0);
    assert_eq!(outcome.to_version, 1);
    assert_eq!(outcome.applied_versions, vec![1]);
    assert_eq!(outcome.created_tables, vec!["notes".to_string()]);
    assert_eq!(repository.schema_version().unwrap(), 1);
    assert_eq!(repository.registered_tables(), vec!["notes".to_string()]);
}

#[test]
fn rerunning_a_finished_migration_is_a_noop() {
    let repository = repository();
    repository.migrate(1, &[notes_v1()]).unwrap();
    let again = repository.migrate(1, &[notes_v1()]).unwrap();
    assert!(again.is_noop());
    assert_eq!(again.from_version, 1);
    assert_eq!(repository.schema_version().unwrap(), 1);

    let versions = repository
        .adapter()
        .execute("SELECT COUNT(*) FROM _tablebind_version", &[])
        .unwrap();
    assert_eq!(versions.rows, vec![vec![Value::Integer(1)]]);
}

#[test]
fn columns_introduced_later_are_added_to_existing_tables() {
    let repository = repository();
    repository.migrate(1, &[notes_v1()]).unwrap();
    let v1 = notes_v1();
    let mut note = repository.create(&v1, [("body", "kept")]).unwrap();
    note.save().unwrap();

    let outcome = repository.migrate(2, &[notes_v2()]).unwrap();
    assert_eq!(outcome.applied_versions, vec![2]);
    assert!(outcome.created_tables.is_empty());
    assert_eq!(
        column_names(&repository, "notes"),
        vec!["id", "body", "title", "pinned"]
    );

    let v2 = notes_v2();
    let loaded = repository.find_by_id(&v2, 1).unwrap();
    assert_eq!(loaded.get_str("body"), Some("kept"));
    assert_eq!(loaded.get_str("title"), Some("untitled"));
    assert_eq!(loaded.get("pinned"), Some(&Value::Null));
}

#[test]
fn skipping_versions_creates_tables_with_the_target_shape() {
    let repository = repository();
    let outcome = repository.migrate(3, &[notes_v2()]).unwrap();
    assert_eq!(outcome.applied_versions, vec![1, 2, 3]);
    assert_eq!(
        column_names(&repository, "notes"),
        vec!["id", "body", "title", "pinned"]
    );
    assert_eq!(repository.schema_version().unwrap(), 3);
}

#[test]
fn failed_step_rolls_back_the_whole_run() {
    let repository = repository();
    repository.migrate(1, &[notes_v1()]).unwrap();

    let steps = vec![MigrationStep::new(2).op(SchemaOp::Statement(
        "CREATE TABLE broken (".to_string(),
    ))];
    let err = repository
        .migrate_with_steps(2, &[notes_v2()], steps)
        .unwrap_err();
    match err {
        OrmError::Migration { version, operation, .. } => {
            assert_eq!(version, 2);
            assert!(operation.starts_with("statement"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(repository.schema_version().unwrap(), 1);
    assert_eq!(column_names(&repository, "notes"), vec!["id", "body"]);
    // The registry keeps the shape that matches the store.
    assert_eq!(repository.descriptor("notes"), Some(notes_v1()));
}

#[test]
fn custom_steps_run_at_their_version() {
    let repository = repository();
    let steps = vec![
        MigrationStep::new(1).op(SchemaOp::CreateIndex {
            name: "ux_notes_body".into(),
            table: "notes".into(),
            columns: vec!["body".into()],
            unique: true,
        }),
        MigrationStep::new(2).op(SchemaOp::Statement(
            "INSERT INTO notes (body) VALUES ('seeded')".into(),
        )),
    ];
    repository
        .migrate_with_steps(2, &[notes_v1()], steps)
        .unwrap();

    let v1 = notes_v1();
    assert_eq!(repository.count(&v1, None).unwrap(), 1);
    let mut duplicate = repository.create(&v1, [("body", "seeded")]).unwrap();
    assert!(matches!(
        duplicate.save(),
        Err(OrmError::ConstraintViolation(_))
    ));
}

#[test]
fn invalid_plans_never_touch_the_store() {
    let repository = repository();

    assert!(matches!(
        repository.migrate(0, &[notes_v1()]),
        Err(OrmError::Validation(_))
    ));

    let unordered = vec![MigrationStep::new(2), MigrationStep::new(2)];
    assert!(matches!(
        repository.migrate_with_steps(3, &[notes_v1()], unordered),
        Err(OrmError::Validation(_))
    ));

    assert!(matches!(
        repository.migrate(1, &[notes_v1(), notes_v1()]),
        Err(OrmError::Validation(_))
    ));

    assert!(matches!(
        repository.migrate(1, &[notes_v2()]),
        Err(OrmError::Validation(_))
    ));
    assert!(repository.descriptor("notes").is_none());

    assert_eq!(repository.schema_version().unwrap(), 0);
    let tables = repository
        .adapter()
        .execute("SELECT name FROM sqlite_master WHERE type = 'table'", &[])
        .unwrap();
    assert!(tables.rows.is_empty());
}

#[test]
fn descriptors_load_from_json() {
    let descriptor: ResourceDescriptor = serde_json::from_str(
        r#"{
            "table": "bookmarks",
            "primary_key": "id",
            "properties": [
                {"name": "id", "type": "integer"},
                {"name": "url", "type": "text", "unique": true},
                {"name": "starred", "type": "boolean", "default": false}
            ]
        }"#,
    )
    .unwrap();
    let descriptor = Arc::new(descriptor);

    let repository = repository();
    repository.migrate(1, &[Arc::clone(&descriptor)]).unwrap();
    let mut bookmark = repository
        .create(&descriptor, [("url", "https://example.org")])
        .unwrap();
    bookmark.save().unwrap();
    let loaded = repository.find_by_id(&descriptor, 1).unwrap();
    assert_eq!(loaded.get("starred"), Some(&Value::Bool(false)));
}

#[test]
fn migration_survives_reopening_a_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.db");
    let location = path.to_str().unwrap();

    {
        let repository = Repository::new(Adapter::connect(location).unwrap());
        repository.migrate(1, &[notes_v1()]).unwrap();
        repository.adapter().close().unwrap();
    }

    let repository = Repository::new(Adapter::connect(location).unwrap());
    assert_eq!(repository.schema_version().unwrap(), 1);
    let outcome = repository.migrate(2, &[notes_v2()]).unwrap();
    assert_eq!(outcome.from_version, 1);
    assert_eq!(outcome.applied_versions, vec![2]);
}

#[test]
fn columns_beyond_the_target_version_are_rejected() {
    let repository = repository();
    repository.migrate(1, &[notes_v1()]).unwrap();

    let err = repository.migrate(1, &[notes_v2()]).unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
    assert_eq!(repository.descriptor("notes"), Some(notes_v1()));

    let mut note = repository
        .create(&notes_v1(), [("body", "still v1")])
        .unwrap();
    note.save().unwrap();
    assert_eq!(column_names(&repository, "notes"), vec!["id", "body"]);
}

//! Integration tests for failed commits and lifecycle hooks.

use ormline_core::{CoreError, DriverError, EventType, PrimaryKey, Value};
use ormline_memory::FailPoint;
use ormline_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn failed_insert_rolls_back_and_requeues() {
    init_test_logging();
    let mut ctx = TestContext::library();
    let (author, books) = scenarios::author_with_books(&mut ctx, "Ann", 2).unwrap();
    ctx.driver.fail_on(FailPoint::Insert("Book".into()));

    let err = ctx.commit().unwrap_err();
    assert!(matches!(err, CoreError::Driver(DriverError::Injected(_))));
    assert_eq!(ctx.driver.row_count("Author"), 0);
    assert_eq!(ctx.driver.open_transactions(), 0);
    assert_eq!(ctx.primary_key(author).unwrap(), None);
    assert!(ctx.identity_map().is_empty());
    assert!(ctx.snapshot(author).is_none());
    assert_eq!(ctx.stats().transactions_rolled_back(), 1);

    let summary = ctx.commit().unwrap();
    assert_eq!(summary.created, 3);
    assert_eq!(ctx.driver.row_count("Book"), 2);
    let author_pk = ctx.primary_key(author).unwrap().unwrap();
    assert_eq!(author_pk, PrimaryKey::single(1));
    for book in books {
        assert!(ctx.is_managed(book));
    }
}

#[test]
fn failed_transaction_commit_restores_state() {
    let mut ctx = TestContext::library();
    let (author, _) = scenarios::author_with_books(&mut ctx, "Ann", 1).unwrap();
    ctx.driver.fail_on(FailPoint::Commit);

    assert!(ctx.commit().is_err());
    assert_eq!(ctx.driver.row_count("Author"), 0);
    assert_eq!(ctx.primary_key(author).unwrap(), None);

    ctx.commit().unwrap();
    assert_eq!(ctx.driver.row_count("Author"), 1);
}

#[test]
fn failed_commit_inside_caller_transaction_rolls_back() {
    let mut ctx = TestContext::library();
    ctx.begin_transaction().unwrap();
    let (author, _) = scenarios::author_with_books(&mut ctx, "Ann", 1).unwrap();
    ctx.driver.fail_on(FailPoint::Insert("Book".into()));

    assert!(ctx.commit_transaction().is_err());
    assert!(!ctx.is_in_transaction());
    assert_eq!(ctx.driver.row_count("Author"), 0);
    assert_eq!(ctx.primary_key(author).unwrap(), None);
    assert_eq!(ctx.driver.open_transactions(), 0);
}

#[test]
fn failed_update_keeps_pending_change() {
    let mut ctx = TestContext::library();
    let (author, _) = scenarios::author_with_books(&mut ctx, "Ann", 1).unwrap();
    ctx.commit().unwrap();

    ctx.set_field(author, "name", Value::from("Anne")).unwrap();
    ctx.driver.fail_on(FailPoint::Update("Author".into()));
    assert!(ctx.commit().is_err());
    assert_eq!(
        ctx.snapshot(author).unwrap().get("name"),
        Some(&Value::from("Ann").into())
    );

    let summary = ctx.commit().unwrap();
    assert_eq!(summary.updated, 1);
    let row = ctx.driver.row("Author", &PrimaryKey::single(1)).unwrap();
    assert_eq!(row.get("name"), Some(&Value::from("Anne")));
}

#[test]
fn failed_delete_is_retried() {
    let mut ctx = TestContext::library();
    let author = ctx.create("Author", [("name", "Ann")]).unwrap();
    ctx.persist(author).unwrap();
    ctx.commit().unwrap();

    ctx.remove(author).unwrap();
    ctx.driver.fail_on(FailPoint::Delete("Author".into()));
    assert!(ctx.commit().is_err());
    assert!(ctx.is_scheduled_for_removal(author));
    assert_eq!(ctx.driver.row_count("Author"), 1);

    let summary = ctx.commit().unwrap();
    assert_eq!(summary.deleted, 1);
    assert_eq!(ctx.driver.row_count("Author"), 0);
}

#[test]
fn failed_collection_sync_restores_membership_diff() {
    let mut ctx = TestContext::library();
    let (_, books) = scenarios::author_with_books(&mut ctx, "Ann", 1).unwrap();
    let tag = ctx.create("Tag", [("name", "rust")]).unwrap();
    ctx.add_to_collection(books[0], "tags", &[tag]).unwrap();
    ctx.driver.fail_on(FailPoint::Synchronize("Book".into()));

    assert!(ctx.commit().is_err());
    assert!(ctx.driver.pivot("Book", "tags").is_empty());
    assert_eq!(ctx.driver.row_count("Tag"), 0);

    let summary = ctx.commit().unwrap();
    assert_eq!(summary.collections_synchronized, 1);
    assert_eq!(ctx.driver.pivot("Book", "tags").len(), 1);
}

#[test]
fn unresolvable_foreign_key_is_a_driver_error() {
    let mut ctx = TestContext::library();
    let book = ctx.create("Book", [("title", "Dune")]).unwrap();
    ctx.set_field(book, "author", Value::Integer(42)).unwrap();
    ctx.persist(book).unwrap();

    let err = ctx.commit().unwrap_err();
    match err {
        CoreError::Driver(DriverError::ConstraintViolation { constraint }) => {
            assert_eq!(constraint, "fk_book_author");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn hooks_fire_around_writes() {
    let mut ctx = TestContext::new(versioned_metadata());
    let recorder = Arc::new(RecordingSubscriber::new());
    ctx.subscribe(recorder.clone());

    let doc = ctx.create("Document", [("id", "d1"), ("title", "Draft")]).unwrap();
    ctx.persist(doc).unwrap();
    ctx.commit().unwrap();

    assert_eq!(
        recorder.event_types(),
        vec![
            EventType::BeforeFlush,
            EventType::OnFlush,
            EventType::BeforeCreate,
            EventType::AfterCreate,
            EventType::AfterFlush,
        ]
    );
    let on_flush = &recorder.events()[1];
    assert_eq!(on_flush.change_sets, 1);
    assert_eq!(recorder.events()[2].entity_name.as_deref(), Some("Document"));

    recorder.reset();
    ctx.remove(doc).unwrap();
    ctx.commit().unwrap();
    assert_eq!(recorder.count(EventType::BeforeDelete), 1);
    assert_eq!(recorder.count(EventType::AfterDelete), 1);
}

#[test]
fn before_hook_changes_are_written() {
    let mut ctx = TestContext::new(versioned_metadata());
    ctx.subscribe(Arc::new(
        RecordingSubscriber::new()
            .only("Document")
            .stamp(EventType::BeforeCreate, "title", "stamped"),
    ));

    let doc = ctx.create("Document", [("id", "d1")]).unwrap();
    ctx.persist(doc).unwrap();
    ctx.commit().unwrap();

    let row = ctx.driver.row("Document", &PrimaryKey::single("d1")).unwrap();
    assert_eq!(row.get("title"), Some(&Value::from("stamped")));
    assert_eq!(ctx.value(doc, "title").unwrap(), Value::from("stamped"));
    assert!(ctx.commit().unwrap().is_empty());
}

#[test]
fn failing_hook_aborts_commit() {
    let mut ctx = TestContext::new(versioned_metadata());
    let doc = ctx.create("Document", [("id", "d1"), ("title", "Draft")]).unwrap();
    ctx.persist(doc).unwrap();
    ctx.commit().unwrap();

    let recorder = Arc::new(RecordingSubscriber::new().fail_on(EventType::BeforeUpdate));
    ctx.subscribe(recorder.clone());
    ctx.set_field(doc, "title", Value::from("Final")).unwrap();

    let err = ctx.commit().unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation { .. }));
    assert_eq!(recorder.count(EventType::AfterFlush), 0);
    let row = ctx.driver.row("Document", &PrimaryKey::single("d1")).unwrap();
    assert_eq!(row.get("title"), Some(&Value::from("Draft")));
    assert_eq!(ctx.value(doc, "version").unwrap(), Value::Integer(1));
}

#[test]
fn failing_after_flush_hook_keeps_the_commit() {
    let mut ctx = TestContext::new(versioned_metadata());
    let recorder = Arc::new(RecordingSubscriber::new().fail_on(EventType::AfterFlush));
    ctx.subscribe(recorder.clone());

    let doc = ctx.create("Document", [("id", "d1"), ("title", "Draft")]).unwrap();
    ctx.persist(doc).unwrap();
    let summary = ctx.commit().unwrap();

    assert_eq!(summary.created, 1);
    assert_eq!(recorder.count(EventType::AfterFlush), 1);
    assert_eq!(ctx.stats().failed_commits(), 0);
    let row = ctx.driver.row("Document", &PrimaryKey::single("d1")).unwrap();
    assert_eq!(row.get("title"), Some(&Value::from("Draft")));
    assert!(ctx.is_managed(doc));
    assert!(ctx.commit().unwrap().is_empty());
}

#[test]
fn hooks_are_filtered_by_entity_type() {
    let mut ctx = TestContext::library();
    let recorder = Arc::new(RecordingSubscriber::new().only("Book"));
    ctx.subscribe(recorder.clone());

    scenarios::author_with_books(&mut ctx, "Ann", 2).unwrap();
    ctx.commit().unwrap();
    assert_eq!(recorder.count(EventType::BeforeCreate), 2);
    assert!(recorder
        .events()
        .iter()
        .filter_map(|e| e.entity_name.as_deref())
        .all(|name| name == "Book"));
}

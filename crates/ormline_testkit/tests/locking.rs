//! Integration tests for versioning and locks.

use ormline_core::{CoreError, DriverError, LockMode, PrimaryKey, UnitOfWorkConfig, Value};
use ormline_memory::MemoryDriverConfig;
use ormline_testkit::prelude::*;

fn committed_document(ctx: &mut TestContext) -> ormline_core::EntityToken {
    let doc = ctx
        .create("Document", [("id", "d1"), ("title", "Draft")])
        .unwrap();
    ctx.persist(doc).unwrap();
    ctx.commit().unwrap();
    doc
}

#[test]
fn insert_stamps_initial_version() {
    let mut ctx = TestContext::new(versioned_metadata());
    let doc = committed_document(&mut ctx);

    assert_eq!(ctx.value(doc, "version").unwrap(), Value::Integer(1));
    let row = ctx.driver.row("Document", &PrimaryKey::single("d1")).unwrap();
    assert_eq!(row.get("version"), Some(&Value::Integer(1)));
}

#[test]
fn initial_version_is_configurable() {
    let mut ctx = TestContext::with_config(
        versioned_metadata(),
        UnitOfWorkConfig::new().initial_version(0),
        MemoryDriverConfig::default(),
    );
    let doc = committed_document(&mut ctx);
    assert_eq!(ctx.value(doc, "version").unwrap(), Value::Integer(0));
}

#[test]
fn update_increments_version() {
    let mut ctx = TestContext::new(versioned_metadata());
    let doc = committed_document(&mut ctx);

    ctx.set_field(doc, "title", Value::from("Final")).unwrap();
    ctx.commit().unwrap();
    assert_eq!(ctx.value(doc, "version").unwrap(), Value::Integer(2));
    let row = ctx.driver.row("Document", &PrimaryKey::single("d1")).unwrap();
    assert_eq!(row.get("title"), Some(&Value::from("Final")));
    assert_eq!(row.get("version"), Some(&Value::Integer(2)));
}

#[test]
fn stale_update_fails_and_keeps_state() {
    let mut ctx = TestContext::new(versioned_metadata());
    let doc = committed_document(&mut ctx);

    let mut other = ctx.reopen();
    let theirs = other.load("Document", &PrimaryKey::single("d1")).unwrap().unwrap();
    other.set_field(theirs, "title", Value::from("Theirs")).unwrap();
    other.commit().unwrap();

    ctx.set_field(doc, "title", Value::from("Mine")).unwrap();
    let err = ctx.commit().unwrap_err();
    assert!(matches!(
        err,
        CoreError::Driver(DriverError::OptimisticLock { .. })
    ));

    assert_eq!(ctx.value(doc, "version").unwrap(), Value::Integer(1));
    assert_eq!(ctx.value(doc, "title").unwrap(), Value::from("Mine"));
    let baseline = ctx.snapshot(doc).unwrap();
    assert_eq!(baseline.get("title"), Some(&Value::from("Draft").into()));
    assert_eq!(ctx.stats().failed_commits(), 1);

    let row = ctx.driver.row("Document", &PrimaryKey::single("d1")).unwrap();
    assert_eq!(row.get("title"), Some(&Value::from("Theirs")));
    assert!(ctx.commit().is_err());
}

#[test]
fn optimistic_lock_compares_versions() {
    let mut ctx = TestContext::new(versioned_metadata());
    let doc = committed_document(&mut ctx);

    ctx.lock(doc, LockMode::Optimistic, Some(Value::Integer(1))).unwrap();
    ctx.lock(doc, LockMode::Optimistic, None).unwrap();
    let baseline = ctx.snapshot(doc).cloned();
    let err = ctx
        .lock(doc, LockMode::Optimistic, Some(Value::Integer(3)))
        .unwrap_err();
    match err {
        CoreError::LockVersionMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, Value::Integer(3));
            assert_eq!(actual, Value::Integer(1));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(ctx.is_managed(doc));
    assert_eq!(ctx.get_by_id("Document", &PrimaryKey::single("d1")), Some(doc));
    assert_eq!(ctx.snapshot(doc).cloned(), baseline);
    assert_eq!(ctx.value(doc, "version").unwrap(), Value::Integer(1));
    assert!(ctx.commit().unwrap().is_empty());
}

#[test]
fn optimistic_lock_loads_reference() {
    let mut ctx = TestContext::new(versioned_metadata());
    committed_document(&mut ctx);

    let mut other = ctx.reopen();
    let reference = other.reference("Document", &PrimaryKey::single("d1")).unwrap();
    other
        .lock(reference, LockMode::Optimistic, Some(Value::Integer(1)))
        .unwrap();
    assert!(other.entity(reference).unwrap().is_initialized());
}

#[test]
fn optimistic_lock_needs_version_field() {
    let mut ctx = TestContext::library();
    let author = ctx.create("Author", [("name", "Ann")]).unwrap();
    ctx.persist(author).unwrap();
    ctx.commit().unwrap();

    let err = ctx.lock(author, LockMode::Optimistic, None).unwrap_err();
    assert!(matches!(err, CoreError::NotVersioned { .. }));
}

#[test]
fn lock_needs_managed_entity() {
    let mut ctx = TestContext::new(versioned_metadata());
    let doc = ctx.create("Document", [("id", "d2")]).unwrap();
    let err = ctx.lock(doc, LockMode::Optimistic, None).unwrap_err();
    assert!(matches!(err, CoreError::EntityNotManaged { .. }));
}

#[test]
fn pessimistic_lock_needs_transaction() {
    let mut ctx = TestContext::new(versioned_metadata());
    let doc = committed_document(&mut ctx);

    let err = ctx.lock(doc, LockMode::PessimisticWrite, None).unwrap_err();
    assert!(matches!(err, CoreError::TransactionRequired));
    let err = ctx
        .load_locked("Document", &PrimaryKey::single("d1"), LockMode::PessimisticRead)
        .unwrap_err();
    assert!(matches!(err, CoreError::TransactionRequired));

    ctx.driver.clear_journal();
    ctx.begin_transaction().unwrap();
    ctx.lock(doc, LockMode::PessimisticWrite, None).unwrap();
    let locked = ctx
        .load_locked("Document", &PrimaryKey::single("d1"), LockMode::PessimisticRead)
        .unwrap();
    assert_eq!(locked, Some(doc));
    ctx.commit_transaction().unwrap();

    let lines: Vec<String> = ctx.driver.journal().iter().map(ToString::to_string).collect();
    assert_eq!(
        lines,
        vec![
            "BEGIN tx:2",
            "LOCK Document d1 PessimisticWrite",
            "LOCK Document d1 PessimisticRead",
            "COMMIT tx:2",
        ]
    );
}

#[test]
fn optimistic_locked_load_checks_version_field() {
    let mut ctx = TestContext::new(versioned_metadata());
    committed_document(&mut ctx);

    let mut other = ctx.reopen();
    let doc = other
        .load_locked("Document", &PrimaryKey::single("d1"), LockMode::Optimistic)
        .unwrap();
    assert!(doc.is_some());
}

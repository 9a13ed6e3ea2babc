//! Integration tests for cascades, collections and orphan removal.

use ormline_core::{CoreError, FieldValue, UnitOfWorkConfig};
use ormline_memory::MemoryDriverConfig;
use ormline_testkit::prelude::*;

fn writes(ctx: &TestContext) -> Vec<String> {
    ctx.driver
        .journal()
        .iter()
        .map(ToString::to_string)
        .filter(|line| !line.starts_with("BEGIN") && !line.starts_with("COMMIT"))
        .collect()
}

#[test]
fn setting_owning_side_updates_inverse_collection() {
    let mut ctx = TestContext::library();
    let author = ctx.create("Author", [("name", "Ann")]).unwrap();
    let book = ctx.create("Book", [("title", "Dune")]).unwrap();

    ctx.set_field(book, "author", author).unwrap();
    assert_eq!(ctx.collection_items(author, "books").unwrap(), vec![book]);

    let other = ctx.create("Author", [("name", "Bob")]).unwrap();
    ctx.set_field(book, "author", other).unwrap();
    assert!(ctx.collection_items(author, "books").unwrap().is_empty());
    assert_eq!(ctx.collection_items(other, "books").unwrap(), vec![book]);
}

#[test]
fn propagation_can_be_disabled() {
    let mut ctx = TestContext::with_config(
        library_metadata(),
        UnitOfWorkConfig::new().propagate_relations(false),
        MemoryDriverConfig::default(),
    );
    let author = ctx.create("Author", [("name", "Ann")]).unwrap();
    let book = ctx.create("Book", [("title", "Dune")]).unwrap();
    ctx.set_field(book, "author", author).unwrap();
    assert!(ctx.collection_items(author, "books").unwrap().is_empty());
}

#[test]
fn persist_cascades_through_collection() {
    let mut ctx = TestContext::library();
    let author = ctx.create("Author", [("name", "Ann")]).unwrap();
    let book = ctx.create("Book", [("title", "Dune")]).unwrap();
    ctx.add_to_collection(author, "books", &[book]).unwrap();
    assert_eq!(
        ctx.field(book, "author").unwrap().and_then(FieldValue::as_entity),
        Some(author)
    );

    ctx.persist(author).unwrap();
    let summary = ctx.commit().unwrap();
    assert_eq!(summary.created, 2);
    assert_eq!(ctx.driver.row_count("Book"), 1);
}

#[test]
fn remove_cascades_in_reverse_order() {
    let mut ctx = TestContext::library();
    let (author, books) = scenarios::author_with_books(&mut ctx, "Ann", 2).unwrap();
    ctx.commit().unwrap();
    ctx.driver.clear_journal();

    ctx.remove(author).unwrap();
    for book in &books {
        assert!(ctx.is_scheduled_for_removal(*book));
    }

    let summary = ctx.commit().unwrap();
    assert_eq!(summary.deleted, 3);
    assert_eq!(
        writes(&ctx),
        vec!["DELETE Book 1", "DELETE Book 2", "DELETE Author 1"]
    );
    assert!(ctx.identity_map().is_empty());
}

#[test]
fn removed_collection_item_is_deleted_as_orphan() {
    let mut ctx = TestContext::library();
    let (author, books) = scenarios::author_with_books(&mut ctx, "Ann", 2).unwrap();
    ctx.commit().unwrap();
    ctx.driver.clear_journal();

    ctx.remove_from_collection(author, "books", &books[..1]).unwrap();
    assert!(ctx.is_scheduled_for_removal(books[0]));

    let summary = ctx.commit().unwrap();
    assert_eq!(summary.deleted, 1);
    assert_eq!(writes(&ctx), vec!["DELETE Book 1"]);
    assert_eq!(ctx.driver.row_count("Book"), 1);
    assert_eq!(ctx.collection_items(author, "books").unwrap(), vec![books[1]]);
}

#[test]
fn adding_back_cancels_orphan_removal() {
    let mut ctx = TestContext::library();
    let (author, books) = scenarios::author_with_books(&mut ctx, "Ann", 1).unwrap();
    ctx.commit().unwrap();

    ctx.remove_from_collection(author, "books", &books).unwrap();
    ctx.add_to_collection(author, "books", &books).unwrap();
    assert!(!ctx.is_scheduled_for_removal(books[0]));

    let summary = ctx.commit().unwrap();
    assert!(summary.is_empty());
    assert_eq!(ctx.driver.row_count("Book"), 1);
}

#[test]
fn wrong_item_type_is_rejected() {
    let mut ctx = TestContext::library();
    let author = ctx.create("Author", [("name", "Ann")]).unwrap();
    let other = ctx.create("Author", [("name", "Bob")]).unwrap();

    let err = ctx.add_to_collection(author, "books", &[other]).unwrap_err();
    assert!(matches!(err, CoreError::NotAnEntity { .. }));
    let err = ctx.set_field(author, "name", other).unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation { .. }));
    let err = ctx.set_field(author, "missing", "x").unwrap_err();
    assert!(matches!(err, CoreError::UnknownProperty { .. }));
}

#[test]
fn many_to_many_writes_pivot_rows() {
    let mut ctx = TestContext::library();
    let (_, books) = scenarios::author_with_books(&mut ctx, "Ann", 1).unwrap();
    let rust = ctx.create("Tag", [("name", "rust")]).unwrap();
    let orm = ctx.create("Tag", [("name", "orm")]).unwrap();
    ctx.set_field(books[0], "tags", vec![rust, orm]).unwrap();

    let summary = ctx.commit().unwrap();
    assert_eq!(summary.created, 4);
    assert_eq!(summary.collections_synchronized, 1);
    assert_eq!(
        ctx.driver.pivot("Book", "tags"),
        vec![
            ("1".to_string(), "1".to_string()),
            ("1".to_string(), "2".to_string())
        ]
    );

    ctx.driver.clear_journal();
    ctx.remove_from_collection(books[0], "tags", &[rust]).unwrap();
    let summary = ctx.commit().unwrap();
    assert_eq!(summary.collections_synchronized, 1);
    assert_eq!(writes(&ctx), vec!["UNLINK Book.tags 1 -> 1"]);
    assert_eq!(ctx.driver.row_count("Tag"), 2);
}

#[test]
fn inverse_side_needs_loaded_owning_side() {
    let mut ctx = TestContext::library();
    let (author, books) = scenarios::author_with_books(&mut ctx, "Ann", 2).unwrap();
    let tag = ctx.create("Tag", [("name", "rust")]).unwrap();
    ctx.add_to_collection(books[0], "tags", &[tag]).unwrap();
    ctx.persist(author).unwrap();
    ctx.commit().unwrap();
    let tag_pk = ctx.primary_key(tag).unwrap().unwrap();
    let second_pk = ctx.primary_key(books[1]).unwrap().unwrap();

    let mut other = ctx.reopen();
    let tag = other.load("Tag", &tag_pk).unwrap().unwrap();
    let err = other.collection_items(tag, "books").unwrap_err();
    assert!(matches!(err, CoreError::CollectionNotInitialized { .. }));

    other.init_collection(tag, "books").unwrap();
    assert_eq!(other.collection_items(tag, "books").unwrap().len(), 1);

    let second = other.load("Book", &second_pk).unwrap().unwrap();
    let err = other.add_to_collection(tag, "books", &[second]).unwrap_err();
    assert!(matches!(err, CoreError::InverseCollectionModification { .. }));

    other.init_collection(second, "tags").unwrap();
    other.add_to_collection(tag, "books", &[second]).unwrap();
    assert_eq!(other.collection_items(second, "tags").unwrap(), vec![tag]);

    let summary = other.commit().unwrap();
    assert_eq!(summary.collections_synchronized, 1);
    assert_eq!(ctx.driver.pivot("Book", "tags").len(), 2);
}

#[test]
fn self_referencing_tags_are_linked_after_insert() {
    let mut ctx = TestContext::library();
    let first = ctx.create("Tag", [("name", "first")]).unwrap();
    let second = ctx.create("Tag", [("name", "second")]).unwrap();
    ctx.set_field(first, "related", vec![second]).unwrap();
    ctx.set_field(second, "related", vec![first]).unwrap();
    ctx.persist(first).unwrap();

    let summary = ctx.commit().unwrap();
    assert_eq!(summary.created, 2);
    assert_eq!(summary.extra_updates, 1);
    assert_eq!(summary.collections_synchronized, 2);
    assert_eq!(ctx.driver.pivot("Tag", "related").len(), 2);
    assert_eq!(ctx.collection_items(second, "related").unwrap(), vec![first]);
    assert!(ctx.commit().unwrap().is_empty());
}

#[test]
fn deferred_placeholder_collection_is_released_after_commit() {
    let mut ctx = TestContext::library();
    let first = ctx.create("Tag", [("name", "first")]).unwrap();
    let second = ctx.create("Tag", [("name", "second")]).unwrap();
    ctx.set_field(first, "related", vec![second]).unwrap();
    ctx.set_field(second, "related", vec![first]).unwrap();
    ctx.persist(first).unwrap();
    ctx.commit().unwrap();

    let graph = ctx.graph();
    assert!(graph.collections().all(|c| graph.is_attached(c)));
    let live: Vec<_> = graph.collections().map(|c| c.id()).collect();
    assert_eq!(
        live,
        vec![
            ctx.entity(first).unwrap().collection("related").unwrap(),
            ctx.entity(second).unwrap().collection("related").unwrap(),
        ]
    );

    ctx.clear();
    assert_eq!(ctx.graph().collections().count(), 2);
    assert_eq!(ctx.graph().len(), 2);
}

#[test]
fn uninitialized_collection_rejects_changes() {
    let mut ctx = TestContext::library();
    let (author, books) = scenarios::author_with_books(&mut ctx, "Ann", 1).unwrap();
    ctx.commit().unwrap();
    let author_pk = ctx.primary_key(author).unwrap().unwrap();
    let book_pk = ctx.primary_key(books[0]).unwrap().unwrap();

    let mut other = ctx.reopen();
    let author = other.load("Author", &author_pk).unwrap().unwrap();
    let book = other.load("Book", &book_pk).unwrap().unwrap();
    let err = other.remove_from_collection(author, "books", &[book]).unwrap_err();
    assert!(matches!(err, CoreError::CollectionNotInitialized { .. }));
}

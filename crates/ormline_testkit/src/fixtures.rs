//! Test fixtures: schemas, units of work over the in-memory driver and
//! common scenarios.

use ormline_core::{
    Cascade, EntityMeta, IdStrategy, MetadataStorage, RelationMeta, UnitOfWork, UnitOfWorkConfig,
};
use ormline_memory::{MemoryDriver, MemoryDriverConfig};
use std::sync::Arc;

/// A unit of work over an in-memory driver.
pub struct TestContext {
    /// The driver, shared with the unit of work.
    pub driver: Arc<MemoryDriver>,
    /// The unit of work.
    pub uow: UnitOfWork<MemoryDriver>,
}

impl TestContext {
    /// Creates a context for a schema with default configurations.
    pub fn new(metadata: Arc<MetadataStorage>) -> Self {
        Self::with_config(metadata, UnitOfWorkConfig::default(), MemoryDriverConfig::default())
    }

    /// Creates a context with custom configurations.
    pub fn with_config(
        metadata: Arc<MetadataStorage>,
        config: UnitOfWorkConfig,
        driver_config: MemoryDriverConfig,
    ) -> Self {
        let driver = Arc::new(MemoryDriver::with_config(Arc::clone(&metadata), driver_config));
        let uow = UnitOfWork::with_config(Arc::clone(&driver), metadata, config);
        Self { driver, uow }
    }

    /// Creates a context over the library schema.
    pub fn library() -> Self {
        Self::new(library_metadata())
    }

    /// Creates a fresh unit of work over the same driver, as a second
    /// request would.
    pub fn reopen(&self) -> UnitOfWork<MemoryDriver> {
        UnitOfWork::new(Arc::clone(&self.driver), Arc::clone(self.uow.metadata()))
    }
}

impl std::ops::Deref for TestContext {
    type Target = UnitOfWork<MemoryDriver>;

    fn deref(&self) -> &Self::Target {
        &self.uow
    }
}

impl std::ops::DerefMut for TestContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.uow
    }
}

/// The library schema.
///
/// - `Author { id, name, books }`: `books` is the inverse side of
///   `Book.author`, cascading persist, remove and merge, with orphan removal
/// - `Book { id, title, author, publisher, tags }`: `author` is required,
///   `publisher` optional, `tags` owns a many-to-many with `Tag.books`
/// - `Publisher { id, name, version }`: versioned
/// - `Tag { id, name, books, related }`: `related` is a self-referencing
///   many-to-many cascading persist
///
/// All keys are generated by increment.
pub fn library_metadata() -> Arc<MetadataStorage> {
    let mut metadata = MetadataStorage::new();
    metadata
        .register(
            EntityMeta::new("Author")
                .primary_key("id")
                .id_strategy(IdStrategy::Increment)
                .scalar("name")
                .relation(
                    "books",
                    RelationMeta::to_many_inverse("Book", "author")
                        .cascade(&[Cascade::All])
                        .orphan_removal(),
                ),
        )
        .register(
            EntityMeta::new("Book")
                .primary_key("id")
                .id_strategy(IdStrategy::Increment)
                .scalar("title")
                .relation(
                    "author",
                    RelationMeta::to_one("Author").required().inversed_by("books"),
                )
                .relation("publisher", RelationMeta::to_one("Publisher"))
                .relation(
                    "tags",
                    RelationMeta::to_many("Tag").inversed_by("books"),
                ),
        )
        .register(
            EntityMeta::new("Publisher")
                .primary_key("id")
                .id_strategy(IdStrategy::Increment)
                .scalar("name")
                .version("version"),
        )
        .register(
            EntityMeta::new("Tag")
                .primary_key("id")
                .id_strategy(IdStrategy::Increment)
                .scalar("name")
                .relation("books", RelationMeta::to_many_inverse("Book", "tags"))
                .relation(
                    "related",
                    RelationMeta::to_many("Tag").cascade(&[Cascade::Persist]),
                ),
        );
    Arc::new(metadata)
}

/// Three types `A`, `B`, `C` referencing each other in a cycle
/// `A.b -> B`, `B.c -> C`, `C.a -> A`, all cascading persist.
pub fn cycle_metadata(required: bool) -> Arc<MetadataStorage> {
    let edge = |target: &str| {
        let relation = RelationMeta::to_one(target).cascade(&[Cascade::Persist]);
        if required {
            relation.required()
        } else {
            relation
        }
    };
    let mut metadata = MetadataStorage::new();
    for (name, field, target) in [("A", "b", "B"), ("B", "c", "C"), ("C", "a", "A")] {
        metadata.register(
            EntityMeta::new(name)
                .primary_key("id")
                .id_strategy(IdStrategy::Increment)
                .scalar("label")
                .relation(field, edge(target)),
        );
    }
    Arc::new(metadata)
}

/// A single versioned type with assigned keys.
pub fn versioned_metadata() -> Arc<MetadataStorage> {
    let mut metadata = MetadataStorage::new();
    metadata.register(
        EntityMeta::new("Document")
            .primary_key("id")
            .scalar("title")
            .version("version"),
    );
    Arc::new(metadata)
}

/// Common scenarios on the library schema.
pub mod scenarios {
    use ormline_core::{CoreResult, Driver, EntityToken, UnitOfWork};

    /// Creates and persists an author with `count` new books.
    ///
    /// Returns the author and the books, not yet committed.
    pub fn author_with_books<D: Driver>(
        uow: &mut UnitOfWork<D>,
        name: &str,
        count: usize,
    ) -> CoreResult<(EntityToken, Vec<EntityToken>)> {
        let author = uow.create("Author", [("name", name)])?;
        let mut books = Vec::with_capacity(count);
        for i in 0..count {
            let title = format!("{name} #{}", i + 1);
            let book = uow.create("Book", [("title", title.as_str())])?;
            uow.set_field(book, "author", author)?;
            books.push(book);
        }
        uow.add_to_collection(author, "books", &books)?;
        uow.persist(author)?;
        Ok((author, books))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_validate() {
        library_metadata().validate().unwrap();
        cycle_metadata(true).validate().unwrap();
        cycle_metadata(false).validate().unwrap();
        versioned_metadata().validate().unwrap();
    }

    #[test]
    fn context_derefs_to_unit_of_work() {
        let ctx = TestContext::library();
        assert!(!ctx.is_in_transaction());
        assert_eq!(ctx.identity_map().len(), 0);
    }
}

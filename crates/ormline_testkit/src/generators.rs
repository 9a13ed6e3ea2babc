//! Property-based test generators using proptest.
//!
//! Provides strategies for random schemas and values.

use ormline_core::{
    Cascade, EntityMeta, IdStrategy, MetadataStorage, RelationMeta, Value,
};
use proptest::prelude::*;
use std::sync::Arc;

/// A to-one owning relation between two generated types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEdge {
    /// Index of the type holding the foreign key.
    pub from: usize,
    /// Index of the referenced type.
    pub to: usize,
    /// Whether the foreign key is NOT NULL.
    pub required: bool,
}

/// A generated schema: `types` entity types `T0..Tn` connected by to-one
/// relations. Edge `k` is stored in field `ref{k}` of its `from` type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeGraph {
    /// Number of types.
    pub types: usize,
    /// Relations.
    pub edges: Vec<TypeEdge>,
}

impl TypeGraph {
    /// Name of the type at `index`.
    #[must_use]
    pub fn type_name(index: usize) -> String {
        format!("T{index}")
    }

    /// Name of the field holding edge `index`.
    #[must_use]
    pub fn field_name(index: usize) -> String {
        format!("ref{index}")
    }

    /// All type names in index order.
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        (0..self.types).map(Self::type_name).collect()
    }

    /// Builds the metadata. Every relation cascades persist and every key
    /// is generated by increment.
    #[must_use]
    pub fn metadata(&self) -> Arc<MetadataStorage> {
        let mut metas: Vec<EntityMeta> = (0..self.types)
            .map(|i| {
                EntityMeta::new(&Self::type_name(i))
                    .primary_key("id")
                    .id_strategy(IdStrategy::Increment)
                    .scalar("label")
            })
            .collect();
        for (k, edge) in self.edges.iter().enumerate() {
            let mut relation =
                RelationMeta::to_one(&Self::type_name(edge.to)).cascade(&[Cascade::Persist]);
            if edge.required {
                relation = relation.required();
            }
            let meta = std::mem::replace(&mut metas[edge.from], EntityMeta::new(""));
            metas[edge.from] = meta.relation(&Self::field_name(k), relation);
        }

        let mut metadata = MetadataStorage::new();
        for meta in metas {
            metadata.register(meta);
        }
        Arc::new(metadata)
    }
}

/// Strategy for arbitrary schemas of up to `max_types` types, cycles and
/// self-references included.
pub fn type_graph_strategy(max_types: usize, max_edges: usize) -> impl Strategy<Value = TypeGraph> {
    (1..=max_types).prop_flat_map(move |types| {
        prop::collection::vec((0..types, 0..types, any::<bool>()), 0..=max_edges).prop_map(
            move |edges| TypeGraph {
                types,
                edges: edges
                    .into_iter()
                    .map(|(from, to, required)| TypeEdge { from, to, required })
                    .collect(),
            },
        )
    })
}

/// Strategy for acyclic schemas: every edge points at a lower type index.
pub fn acyclic_type_graph_strategy(
    max_types: usize,
    max_edges: usize,
) -> impl Strategy<Value = TypeGraph> {
    (2..=max_types.max(2)).prop_flat_map(move |types| {
        let edge = (1..types, any::<prop::sample::Index>(), any::<bool>());
        prop::collection::vec(edge, 0..=max_edges)
            .prop_map(move |edges| TypeGraph {
                types,
                edges: edges
                    .into_iter()
                    .map(|(from, to, required)| TypeEdge {
                        from,
                        to: to.index(from),
                        required,
                    })
                    .collect(),
            })
    })
}

/// Strategy for scalar values usable as entity fields.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
    ]
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

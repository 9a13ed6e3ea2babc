//! Commit order calculator.
//!
//! Orders entity types so that a type is written after every type it holds
//! a foreign key to. Edges carry a weight: `1` for a required relation,
//! `0` for an optional one. The sort is a depth-first post-order walk that
//! tolerates cycles. When a cycle is closed through a lighter edge, the
//! lighter edge is the one violated. A cycle made only of required edges
//! still yields a deterministic order; the commit coordinator resolves the
//! violated reference with an extra update.

use crate::metadata::{MetadataStorage, RelationKind};
use std::collections::HashMap;

/// Weight of an edge created by a non-nullable relation.
pub const REQUIRED: u8 = 1;
/// Weight of an edge created by a nullable relation.
pub const OPTIONAL: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    NotVisited,
    InProgress,
    Visited,
}

#[derive(Debug)]
struct Node {
    name: String,
    state: NodeState,
    /// Outgoing edges `(to, weight)` in insertion order.
    dependencies: Vec<(usize, u8)>,
}

/// Cycle-tolerant topological sort over entity type names.
#[derive(Debug, Default)]
pub struct CommitOrderCalculator {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    sorted: Vec<usize>,
}

impl CommitOrderCalculator {
    /// Creates an empty calculator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph for the given types from their owning to-one relations.
    ///
    /// Relations whose target is not among `types` add no edge.
    #[must_use]
    pub fn for_types<'a>(
        metadata: &MetadataStorage,
        types: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut calc = Self::new();
        let types: Vec<&str> = types.into_iter().collect();
        for name in &types {
            calc.add_node(name);
        }
        for name in &types {
            let Some(meta) = metadata.find(name) else {
                continue;
            };
            for (_, relation) in meta.relations() {
                if relation.kind != RelationKind::ToOneOwning || !calc.has_node(&relation.target) {
                    continue;
                }
                let weight = if relation.nullable { OPTIONAL } else { REQUIRED };
                calc.add_dependency(&relation.target, name, weight);
            }
        }
        calc
    }

    /// Returns true if a node for `name` exists.
    #[must_use]
    pub fn has_node(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Adds a node. Adding an existing node is a no-op.
    pub fn add_node(&mut self, name: &str) {
        if self.has_node(name) {
            return;
        }
        self.index.insert(name.to_string(), self.nodes.len());
        self.nodes.push(Node {
            name: name.to_string(),
            state: NodeState::NotVisited,
            dependencies: Vec::new(),
        });
    }

    /// Adds an edge meaning `to` must be written after `from`.
    ///
    /// Both nodes are added if missing. Repeating an edge keeps the heavier weight.
    pub fn add_dependency(&mut self, from: &str, to: &str, weight: u8) {
        self.add_node(from);
        self.add_node(to);
        let (from, to) = (self.index[from], self.index[to]);
        let deps = &mut self.nodes[from].dependencies;
        match deps.iter_mut().find(|(target, _)| *target == to) {
            Some(edge) => edge.1 = edge.1.max(weight),
            None => deps.push((to, weight)),
        }
    }

    /// Computes the order. Every node appears exactly once.
    pub fn sort(&mut self) -> Vec<String> {
        for node in &mut self.nodes {
            node.state = NodeState::NotVisited;
        }
        self.sorted.clear();

        for vertex in 0..self.nodes.len() {
            if self.nodes[vertex].state == NodeState::NotVisited {
                self.visit(vertex);
            }
        }

        let sorted = std::mem::take(&mut self.sorted);
        sorted
            .into_iter()
            .rev()
            .map(|i| self.nodes[i].name.clone())
            .collect()
    }

    fn visit(&mut self, vertex: usize) {
        self.nodes[vertex].state = NodeState::InProgress;

        let edges = self.nodes[vertex].dependencies.clone();
        for (adjacent, weight) in edges {
            match self.nodes[adjacent].state {
                NodeState::Visited => {}
                NodeState::InProgress => self.visit_open_node(vertex, adjacent, weight),
                NodeState::NotVisited => self.visit(adjacent),
            }
        }

        if self.nodes[vertex].state != NodeState::Visited {
            self.nodes[vertex].state = NodeState::Visited;
            self.sorted.push(vertex);
        }
    }

    /// Handles a back edge `vertex -> adjacent` into a node still on the path.
    ///
    /// If `adjacent` depends on `vertex` through a lighter edge, that lighter
    /// edge is the one to violate: `adjacent` is finished first.
    fn visit_open_node(&mut self, vertex: usize, adjacent: usize, weight: u8) {
        let back_edge = self.nodes[adjacent]
            .dependencies
            .iter()
            .find(|(to, _)| *to == vertex)
            .map(|(_, w)| *w);
        match back_edge {
            Some(back) if back < weight => {}
            _ => return,
        }

        let edges = self.nodes[adjacent].dependencies.clone();
        for (next, _) in edges {
            if self.nodes[next].state == NodeState::NotVisited {
                self.visit(next);
            }
        }
        self.nodes[adjacent].state = NodeState::Visited;
        self.sorted.push(adjacent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityMeta, RelationMeta};

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn dependency_comes_first() {
        let mut calc = CommitOrderCalculator::new();
        calc.add_node("Book");
        calc.add_node("Author");
        calc.add_dependency("Author", "Book", REQUIRED);
        assert_eq!(calc.sort(), vec!["Author", "Book"]);
    }

    #[test]
    fn chain_and_independent_nodes() {
        let mut calc = CommitOrderCalculator::new();
        for name in ["Review", "Book", "Author", "Genre"] {
            calc.add_node(name);
        }
        calc.add_dependency("Book", "Review", REQUIRED);
        calc.add_dependency("Author", "Book", OPTIONAL);

        let order = calc.sort();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "Author") < position(&order, "Book"));
        assert!(position(&order, "Book") < position(&order, "Review"));
    }

    #[test]
    fn optional_edge_yields_in_mixed_cycle() {
        // User.profile is optional, Profile.user is required:
        // Profile must come after User.
        let mut calc = CommitOrderCalculator::new();
        calc.add_node("Profile");
        calc.add_node("User");
        calc.add_dependency("Profile", "User", OPTIONAL);
        calc.add_dependency("User", "Profile", REQUIRED);
        let order = calc.sort();
        assert_eq!(order, vec!["User", "Profile"]);

        let mut calc = CommitOrderCalculator::new();
        calc.add_node("User");
        calc.add_node("Profile");
        calc.add_dependency("User", "Profile", REQUIRED);
        calc.add_dependency("Profile", "User", OPTIONAL);
        assert_eq!(calc.sort(), vec!["User", "Profile"]);
    }

    #[test]
    fn required_cycle_is_deterministic() {
        let build = || {
            let mut calc = CommitOrderCalculator::new();
            for name in ["A", "B", "C"] {
                calc.add_node(name);
            }
            // A.b -> B, B.c -> C, C.a -> A, all required.
            calc.add_dependency("B", "A", REQUIRED);
            calc.add_dependency("C", "B", REQUIRED);
            calc.add_dependency("A", "C", REQUIRED);
            calc
        };
        let first = build().sort();
        assert_eq!(first, build().sort());
        assert_eq!(first, vec!["A", "C", "B"]);
    }

    #[test]
    fn self_reference_is_ignored() {
        let mut calc = CommitOrderCalculator::new();
        calc.add_dependency("Category", "Category", OPTIONAL);
        assert_eq!(calc.sort(), vec!["Category"]);
    }

    #[test]
    fn repeated_edge_keeps_heavier_weight() {
        let mut calc = CommitOrderCalculator::new();
        calc.add_dependency("A", "B", OPTIONAL);
        calc.add_dependency("A", "B", REQUIRED);
        assert_eq!(calc.nodes[0].dependencies, vec![(1, REQUIRED)]);
    }

    #[test]
    fn built_from_metadata() {
        let mut storage = MetadataStorage::new();
        storage
            .register(EntityMeta::new("Author").primary_key("id"))
            .register(
                EntityMeta::new("Book")
                    .primary_key("id")
                    .relation("author", RelationMeta::to_one("Author").required())
                    .relation("publisher", RelationMeta::to_one("Publisher")),
            );

        let mut calc = CommitOrderCalculator::for_types(&storage, ["Book", "Author"]);
        assert_eq!(calc.sort(), vec!["Author", "Book"]);
    }
}

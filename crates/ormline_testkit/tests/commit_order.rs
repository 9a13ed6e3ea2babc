//! Integration tests for write ordering and forward-reference resolution.

use ormline_core::{CommitOrderCalculator, EntityToken, Value};
use ormline_testkit::prelude::*;
use proptest::prelude::*;

fn insert_order(ctx: &TestContext) -> Vec<String> {
    ctx.driver
        .journal()
        .iter()
        .map(ToString::to_string)
        .filter(|line| line.starts_with("INSERT"))
        .collect()
}

/// Creates `A -> B -> C -> A` and persists the cycle from `A`.
fn build_cycle(ctx: &mut TestContext) -> [EntityToken; 3] {
    let a = ctx.create("A", [("label", "a")]).unwrap();
    let b = ctx.create("B", [("label", "b")]).unwrap();
    let c = ctx.create("C", [("label", "c")]).unwrap();
    ctx.set_field(a, "b", b).unwrap();
    ctx.set_field(b, "c", c).unwrap();
    ctx.set_field(c, "a", a).unwrap();
    ctx.persist(a).unwrap();
    [a, b, c]
}

fn assert_cycle_stored(ctx: &TestContext, entities: [EntityToken; 3]) {
    let [a, b, c] = entities;
    for (owner, name, field, target) in [(a, "A", "b", b), (b, "B", "c", c), (c, "C", "a", a)] {
        let pk = ctx.primary_key(owner).unwrap().unwrap();
        let target_pk = ctx.primary_key(target).unwrap().unwrap();
        let row = ctx.driver.row(name, &pk).unwrap();
        assert_eq!(row.get(field), Some(&target_pk.to_value()), "{name}.{field}");
    }
}

#[test]
fn dependency_is_inserted_first_regardless_of_persist_order() {
    let mut ctx = TestContext::library();
    let book = ctx.create("Book", [("title", "Dune")]).unwrap();
    let author = ctx.create("Author", [("name", "Frank")]).unwrap();
    ctx.set_field(book, "author", author).unwrap();
    ctx.persist(book).unwrap();
    ctx.persist(author).unwrap();

    ctx.commit().unwrap();
    assert_eq!(insert_order(&ctx), vec!["INSERT Author 1", "INSERT Book 1"]);
}

#[test]
fn required_cycle_needs_one_extra_update() {
    init_test_logging();
    let mut ctx = TestContext::new(cycle_metadata(true));
    let entities = build_cycle(&mut ctx);

    let summary = ctx.commit().unwrap();
    assert_eq!(summary.created, 3);
    assert_eq!(summary.extra_updates, 1);
    assert_eq!(summary.commit_order.len(), 3);
    assert_cycle_stored(&ctx, entities);

    assert!(ctx.commit().unwrap().is_empty());
}

#[test]
fn optional_cycle_is_stored_completely() {
    let mut ctx = TestContext::new(cycle_metadata(false));
    let entities = build_cycle(&mut ctx);

    let summary = ctx.commit().unwrap();
    assert_eq!(summary.created, 3);
    assert_eq!(summary.extra_updates, 1);
    assert_cycle_stored(&ctx, entities);
}

#[test]
fn self_reference_is_written_after_insert() {
    let graph = TypeGraph {
        types: 1,
        edges: vec![TypeEdge {
            from: 0,
            to: 0,
            required: false,
        }],
    };
    let mut ctx = TestContext::new(graph.metadata());
    let node = ctx.create("T0", [("label", "self")]).unwrap();
    ctx.set_field(node, "ref0", node).unwrap();
    ctx.persist(node).unwrap();

    let summary = ctx.commit().unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(summary.extra_updates, 1);
    let lines: Vec<String> = ctx.driver.journal().iter().map(ToString::to_string).collect();
    assert!(lines.contains(&"UPDATE T0 1 [ref0]".to_string()));
    let row = ctx.driver.row("T0", &ormline_core::PrimaryKey::single(1)).unwrap();
    assert_eq!(row.get("ref0"), Some(&Value::Integer(1)));
}

#[test]
fn deletes_run_after_updates_in_reverse_order() {
    let mut ctx = TestContext::library();
    let (author, books) = scenarios::author_with_books(&mut ctx, "Ann", 1).unwrap();
    let publisher = ctx.create("Publisher", [("name", "Ace")]).unwrap();
    ctx.persist(publisher).unwrap();
    ctx.commit().unwrap();
    ctx.driver.clear_journal();

    ctx.set_field(publisher, "name", Value::from("Ace Books")).unwrap();
    ctx.remove(author).unwrap();
    ctx.commit().unwrap();

    let lines: Vec<String> = ctx
        .driver
        .journal()
        .iter()
        .map(ToString::to_string)
        .filter(|l| !l.starts_with("BEGIN") && !l.starts_with("COMMIT"))
        .collect();
    assert_eq!(
        lines,
        vec![
            "UPDATE Publisher 1 [name, version]",
            "DELETE Book 1",
            "DELETE Author 1",
        ]
    );
    assert!(!ctx.is_managed(books[0]));
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn order_respects_every_edge_of_acyclic_schema(graph in acyclic_type_graph_strategy(6, 10)) {
        let metadata = graph.metadata();
        let names = graph.type_names();
        let order =
            CommitOrderCalculator::for_types(&metadata, names.iter().map(String::as_str)).sort();

        prop_assert_eq!(order.len(), graph.types);
        let position = |i: usize| order.iter().position(|n| *n == TypeGraph::type_name(i));
        for edge in &graph.edges {
            prop_assert!(position(edge.to) < position(edge.from));
        }
    }

    #[test]
    fn order_is_a_permutation(graph in type_graph_strategy(6, 12)) {
        let metadata = graph.metadata();
        let names = graph.type_names();
        let mut order =
            CommitOrderCalculator::for_types(&metadata, names.iter().map(String::as_str)).sort();
        order.sort();
        let mut expected = names.clone();
        expected.sort();
        prop_assert_eq!(order, expected);
    }

    #[test]
    fn any_schema_commits_with_every_reference_resolved(graph in type_graph_strategy(4, 6)) {
        let mut ctx = TestContext::new(graph.metadata());
        let entities: Vec<EntityToken> = (0..graph.types)
            .map(|i| ctx.create(&TypeGraph::type_name(i), [("label", "x")]).unwrap())
            .collect();
        for (k, edge) in graph.edges.iter().enumerate() {
            ctx.set_field(entities[edge.from], &TypeGraph::field_name(k), entities[edge.to])
                .unwrap();
        }
        for token in &entities {
            ctx.persist(*token).unwrap();
        }

        let summary = ctx.commit().unwrap();
        prop_assert_eq!(summary.created, graph.types);

        for (k, edge) in graph.edges.iter().enumerate() {
            let name = TypeGraph::type_name(edge.from);
            let pk = ctx.primary_key(entities[edge.from]).unwrap().unwrap();
            let target_pk = ctx.primary_key(entities[edge.to]).unwrap().unwrap();
            let row = ctx.driver.row(&name, &pk).unwrap();
            prop_assert_eq!(row.get(&TypeGraph::field_name(k)), Some(&target_pk.to_value()));
        }
        prop_assert!(ctx.commit().unwrap().is_empty());
    }
}

//! Contract suite executed against every engine. The in-memory engine is the
//! reference; the relational and key-value engines must be behaviorally
//! indistinguishable through the trait.

use std::collections::HashSet;

use serde_json::json;
use tempfile::TempDir;

use anygraph::{
    EndpointPolicy, GraphBackend, GraphOptions, GraphStoreError, MemoryBackend, Metadata, NodeId,
    RedbBackend, SqliteBackend, SqliteTables, Teardown,
};

fn meta(value: serde_json::Value) -> Metadata {
    value.as_object().cloned().unwrap_or_default()
}

struct Engine {
    name: &'static str,
    backend: Box<dyn GraphBackend>,
    _dir: Option<TempDir>,
}

fn engines(options: GraphOptions) -> Vec<Engine> {
    let dir = TempDir::new().expect("tempdir");
    let redb = RedbBackend::open(dir.path().join("graph.redb"), options).expect("redb backend");
    vec![
        Engine {
            name: "memory",
            backend: Box::new(MemoryBackend::new(options)),
            _dir: None,
        },
        Engine {
            name: "sqlite",
            backend: Box::new(
                SqliteBackend::open_in_memory(options, SqliteTables::default())
                    .expect("sqlite backend"),
            ),
            _dir: None,
        },
        Engine {
            name: "redb",
            backend: Box::new(redb),
            _dir: Some(dir),
        },
    ]
}

fn collect_node_ids(backend: &dyn GraphBackend) -> HashSet<NodeId> {
    backend
        .all_nodes(false)
        .expect("node iterator")
        .map(|entry| entry.expect("node entry").0)
        .collect()
}

#[test]
fn test_has_node_lifecycle() {
    for engine in engines(GraphOptions::undirected()) {
        let backend = &engine.backend;
        let a = NodeId::from("a");
        assert!(!backend.has_node(&a).unwrap(), "{}", engine.name);
        backend.add_node(a.clone(), meta(json!({"k": 1}))).unwrap();
        assert!(backend.has_node(&a).unwrap(), "{}", engine.name);
        assert_eq!(
            backend.get_node(&a).unwrap(),
            meta(json!({"k": 1})),
            "{}",
            engine.name
        );
        // Idempotent re-read.
        assert_eq!(backend.get_node(&a).unwrap(), meta(json!({"k": 1})));
    }
}

#[test]
fn test_upsert_replaces_metadata_without_duplicating() {
    for engine in engines(GraphOptions::undirected()) {
        let backend = &engine.backend;
        let n = NodeId::from("n");
        backend.add_node(n.clone(), meta(json!({"v": 1}))).unwrap();
        backend.add_node(n.clone(), meta(json!({"v": 2}))).unwrap();
        assert_eq!(backend.node_count().unwrap(), 1, "{}", engine.name);
        assert_eq!(
            backend.get_node(&n).unwrap(),
            meta(json!({"v": 2})),
            "{}",
            engine.name
        );
    }
}

#[test]
fn test_empty_metadata_distinct_from_absent() {
    for engine in engines(GraphOptions::undirected()) {
        let backend = &engine.backend;
        backend
            .add_node(NodeId::from("present"), Metadata::new())
            .unwrap();
        assert_eq!(
            backend.get_node(&NodeId::from("present")).unwrap(),
            Metadata::new(),
            "{}",
            engine.name
        );
        assert!(
            matches!(
                backend.get_node(&NodeId::from("missing")),
                Err(GraphStoreError::NotFound(_))
            ),
            "{}",
            engine.name
        );
    }
}

#[test]
fn test_undirected_edge_identity() {
    for engine in engines(GraphOptions::undirected()) {
        let backend = &engine.backend;
        backend
            .add_edge(
                NodeId::from("u"),
                NodeId::from("v"),
                meta(json!({"w": 7})),
            )
            .unwrap();
        assert_eq!(
            backend
                .get_edge(&NodeId::from("v"), &NodeId::from("u"))
                .unwrap(),
            meta(json!({"w": 7})),
            "{}",
            engine.name
        );
        assert!(
            backend
                .has_edge(&NodeId::from("v"), &NodeId::from("u"))
                .unwrap()
        );
        assert_eq!(backend.edge_count().unwrap(), 1, "{}", engine.name);
    }
}

#[test]
fn test_directed_edges_are_ordered_pairs() {
    for engine in engines(GraphOptions::directed()) {
        let backend = &engine.backend;
        backend
            .add_edge(NodeId::from("u"), NodeId::from("v"), Metadata::new())
            .unwrap();
        assert!(
            backend
                .has_edge(&NodeId::from("u"), &NodeId::from("v"))
                .unwrap(),
            "{}",
            engine.name
        );
        assert!(
            !backend
                .has_edge(&NodeId::from("v"), &NodeId::from("u"))
                .unwrap(),
            "{}",
            engine.name
        );
    }
}

#[test]
fn test_edge_upsert_replaces_metadata() {
    for engine in engines(GraphOptions::directed()) {
        let backend = &engine.backend;
        backend
            .add_edge(NodeId::from("u"), NodeId::from("v"), meta(json!({"w": 1})))
            .unwrap();
        backend
            .add_edge(NodeId::from("u"), NodeId::from("v"), meta(json!({"w": 2})))
            .unwrap();
        assert_eq!(backend.edge_count().unwrap(), 1, "{}", engine.name);
        assert_eq!(
            backend
                .get_edge(&NodeId::from("u"), &NodeId::from("v"))
                .unwrap(),
            meta(json!({"w": 2})),
            "{}",
            engine.name
        );
    }
}

#[test]
fn test_enumeration_completeness_and_restartability() {
    for engine in engines(GraphOptions::undirected()) {
        let backend = &engine.backend;
        for id in ["a", "b", "c"] {
            backend.add_node(NodeId::from(id), Metadata::new()).unwrap();
        }
        let expected: HashSet<NodeId> = ["a", "b", "c"].into_iter().map(NodeId::from).collect();
        let first = collect_node_ids(backend.as_ref());
        let second = collect_node_ids(backend.as_ref());
        assert_eq!(first, expected, "{}", engine.name);
        assert_eq!(second, expected, "{}", engine.name);
    }
}

#[test]
fn test_enumeration_with_metadata() {
    for engine in engines(GraphOptions::undirected()) {
        let backend = &engine.backend;
        backend
            .add_node(NodeId::from("a"), meta(json!({"x": 1})))
            .unwrap();
        let entries: Vec<_> = backend
            .all_nodes(true)
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(entries.len(), 1, "{}", engine.name);
        assert_eq!(entries[0].1.as_ref().unwrap(), &meta(json!({"x": 1})));

        backend
            .add_edge(NodeId::from("a"), NodeId::from("b"), meta(json!({"w": 2})))
            .unwrap();
        let edges: Vec<_> = backend
            .all_edges(true)
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(edges.len(), 1, "{}", engine.name);
        assert_eq!(edges[0].2.as_ref().unwrap(), &meta(json!({"w": 2})));
    }
}

#[test]
fn test_degree_scenario_directed() {
    for engine in engines(GraphOptions::directed()) {
        let backend = &engine.backend;
        backend
            .add_edge(NodeId::from("a"), NodeId::from("b"), Metadata::new())
            .unwrap();
        backend
            .add_edge(NodeId::from("a"), NodeId::from("c"), Metadata::new())
            .unwrap();
        assert_eq!(
            backend.out_degree(&NodeId::from("a")).unwrap(),
            2,
            "{}",
            engine.name
        );
        assert_eq!(backend.in_degree(&NodeId::from("a")).unwrap(), 0);
        assert_eq!(backend.degree(&NodeId::from("b")).unwrap(), 1);
    }
}

#[test]
fn test_degree_undirected_all_equal() {
    for engine in engines(GraphOptions::undirected()) {
        let backend = &engine.backend;
        backend
            .add_edge(NodeId::from("a"), NodeId::from("b"), Metadata::new())
            .unwrap();
        backend
            .add_edge(NodeId::from("c"), NodeId::from("a"), Metadata::new())
            .unwrap();
        let a = NodeId::from("a");
        assert_eq!(backend.degree(&a).unwrap(), 2, "{}", engine.name);
        assert_eq!(backend.in_degree(&a).unwrap(), 2, "{}", engine.name);
        assert_eq!(backend.out_degree(&a).unwrap(), 2, "{}", engine.name);
    }
}

#[test]
fn test_degree_of_missing_node_signals_not_found() {
    for engine in engines(GraphOptions::directed()) {
        let backend = &engine.backend;
        for result in [
            backend.degree(&NodeId::from("ghost")),
            backend.in_degree(&NodeId::from("ghost")),
            backend.out_degree(&NodeId::from("ghost")),
            backend.neighbors(&NodeId::from("ghost")).map(|_| 0),
        ] {
            assert!(
                matches!(result, Err(GraphStoreError::NotFound(_))),
                "{}",
                engine.name
            );
        }
    }
}

#[test]
fn test_neighbors_and_predecessors() {
    for engine in engines(GraphOptions::directed()) {
        let backend = &engine.backend;
        backend
            .add_edge(NodeId::from("a"), NodeId::from("b"), Metadata::new())
            .unwrap();
        backend
            .add_edge(NodeId::from("c"), NodeId::from("b"), Metadata::new())
            .unwrap();
        let mut succ = backend.neighbors(&NodeId::from("a")).unwrap();
        succ.sort();
        assert_eq!(succ, vec![NodeId::from("b")], "{}", engine.name);
        let mut pred = backend.predecessors(&NodeId::from("b")).unwrap();
        pred.sort();
        assert_eq!(
            pred,
            vec![NodeId::from("a"), NodeId::from("c")],
            "{}",
            engine.name
        );
    }
}

#[test]
fn test_missing_endpoints_are_created_empty_by_default() {
    for engine in engines(GraphOptions::directed()) {
        let backend = &engine.backend;
        backend
            .add_edge(NodeId::from("u"), NodeId::from("v"), Metadata::new())
            .unwrap();
        assert!(backend.has_node(&NodeId::from("u")).unwrap(), "{}", engine.name);
        assert_eq!(
            backend.get_node(&NodeId::from("v")).unwrap(),
            Metadata::new(),
            "{}",
            engine.name
        );
    }
}

#[test]
fn test_endpoint_policy_reject() {
    let options = GraphOptions {
        missing_endpoints: EndpointPolicy::Reject,
        ..GraphOptions::directed()
    };
    for engine in engines(options) {
        let backend = &engine.backend;
        let result = backend.add_edge(NodeId::from("u"), NodeId::from("v"), Metadata::new());
        assert!(
            matches!(result, Err(GraphStoreError::InvalidEndpoint(_))),
            "{}",
            engine.name
        );
        assert!(!backend.has_node(&NodeId::from("u")).unwrap(), "{}", engine.name);
        assert_eq!(backend.edge_count().unwrap(), 0, "{}", engine.name);

        backend.add_node(NodeId::from("u"), Metadata::new()).unwrap();
        backend.add_node(NodeId::from("v"), Metadata::new()).unwrap();
        backend
            .add_edge(NodeId::from("u"), NodeId::from("v"), Metadata::new())
            .unwrap();
        assert_eq!(backend.edge_count().unwrap(), 1, "{}", engine.name);
    }
}

#[test]
fn test_no_upsert_mode_signals_already_exists() {
    let options = GraphOptions {
        upsert: false,
        ..GraphOptions::directed()
    };
    for engine in engines(options) {
        let backend = &engine.backend;
        backend
            .add_node(NodeId::from("n"), meta(json!({"v": 1})))
            .unwrap();
        assert!(
            matches!(
                backend.add_node(NodeId::from("n"), meta(json!({"v": 2}))),
                Err(GraphStoreError::AlreadyExists(_))
            ),
            "{}",
            engine.name
        );
        // First write survives.
        assert_eq!(backend.get_node(&NodeId::from("n")).unwrap(), meta(json!({"v": 1})));

        backend
            .add_edge(NodeId::from("n"), NodeId::from("m"), Metadata::new())
            .unwrap();
        assert!(
            matches!(
                backend.add_edge(NodeId::from("n"), NodeId::from("m"), Metadata::new()),
                Err(GraphStoreError::AlreadyExists(_))
            ),
            "{}",
            engine.name
        );
    }
}

#[test]
fn test_remove_node_cascades_to_incident_edges() {
    for engine in engines(GraphOptions::directed()) {
        let backend = &engine.backend;
        backend
            .add_edge(NodeId::from("a"), NodeId::from("b"), Metadata::new())
            .unwrap();
        backend
            .add_edge(NodeId::from("c"), NodeId::from("a"), Metadata::new())
            .unwrap();
        backend
            .add_edge(NodeId::from("b"), NodeId::from("c"), Metadata::new())
            .unwrap();

        backend.remove_node(&NodeId::from("a")).unwrap();
        assert!(!backend.has_node(&NodeId::from("a")).unwrap(), "{}", engine.name);
        assert_eq!(backend.edge_count().unwrap(), 1, "{}", engine.name);
        assert!(
            !backend
                .has_edge(&NodeId::from("c"), &NodeId::from("a"))
                .unwrap(),
            "{}",
            engine.name
        );
        assert_eq!(backend.out_degree(&NodeId::from("c")).unwrap(), 0);

        assert!(matches!(
            backend.remove_node(&NodeId::from("a")),
            Err(GraphStoreError::NotFound(_))
        ));
    }
}

#[test]
fn test_remove_edge() {
    for engine in engines(GraphOptions::undirected()) {
        let backend = &engine.backend;
        backend
            .add_edge(NodeId::from("a"), NodeId::from("b"), Metadata::new())
            .unwrap();
        backend
            .remove_edge(&NodeId::from("b"), &NodeId::from("a"))
            .unwrap();
        assert_eq!(backend.edge_count().unwrap(), 0, "{}", engine.name);
        // Endpoints stay.
        assert!(backend.has_node(&NodeId::from("a")).unwrap());
        assert!(matches!(
            backend.remove_edge(&NodeId::from("a"), &NodeId::from("b")),
            Err(GraphStoreError::NotFound(_))
        ));
    }
}

#[test]
fn test_teardown_requires_confirmation() {
    for engine in engines(GraphOptions::undirected()) {
        let backend = &engine.backend;
        backend.add_node(NodeId::from("a"), Metadata::new()).unwrap();
        assert!(
            matches!(
                backend.teardown(Teardown::Cancel),
                Err(GraphStoreError::TeardownNotConfirmed)
            ),
            "{}",
            engine.name
        );
        // Nothing was deleted.
        assert_eq!(backend.node_count().unwrap(), 1, "{}", engine.name);
        backend.teardown(Teardown::YesIAmSure).unwrap();
    }
}

#[test]
fn test_int_and_str_ids_do_not_collide() {
    for engine in engines(GraphOptions::undirected()) {
        let backend = &engine.backend;
        backend
            .add_node(NodeId::Int(1), meta(json!({"kind": "int"})))
            .unwrap();
        backend
            .add_node(NodeId::from("1"), meta(json!({"kind": "str"})))
            .unwrap();
        assert_eq!(backend.node_count().unwrap(), 2, "{}", engine.name);
        assert_eq!(
            backend.get_node(&NodeId::Int(1)).unwrap(),
            meta(json!({"kind": "int"}))
        );
        assert_eq!(
            backend.get_node(&NodeId::from("1")).unwrap(),
            meta(json!({"kind": "str"}))
        );
    }
}

#[test]
fn test_metadata_round_trips_structured_values() {
    for engine in engines(GraphOptions::undirected()) {
        let backend = &engine.backend;
        let payload = meta(json!({
            "name": "hub",
            "weight": 2.5,
            "tags": ["x", "y"],
            "nested": {"deep": [1, 2, 3]},
            "flag": null,
        }));
        backend.add_node(NodeId::from("n"), payload.clone()).unwrap();
        assert_eq!(backend.get_node(&NodeId::from("n")).unwrap(), payload, "{}", engine.name);
    }
}

//! Property tests for graph convergence
//!
//! Hubs that apply the same add operations in any order, or exchange full
//! snapshots, end with the same element IDs. Hubs that see each producer's
//! add, update and delete stream in order, but interleaved differently
//! across producers, end with the same elements.

use proptest::prelude::*;
use std::collections::BTreeSet;
use topohub_core::graph::{Edge, Graph, Metadata, Node};
use topohub_core::storage::MemoryBackend;
use topohub_core::{ChangeSource, Snapshot};

#[derive(Debug, Clone)]
enum AddOp {
    Node { id: u8, host: u8 },
    Edge { id: u8, host: u8, parent: u8, child: u8 },
}

/// Content is a function of the ID so replays of the same ID agree
fn node(id: u8, host: u8) -> Node {
    let mut metadata = Metadata::new();
    metadata.insert("Index".into(), serde_json::json!(id));
    Node::new(format!("n{}", id), format!("h{}", host), metadata)
}

fn edge(id: u8, host: u8, parent: u8, child: u8) -> Edge {
    Edge::new(
        format!("e{}", id),
        format!("h{}", host),
        format!("n{}", parent),
        format!("n{}", child),
        Metadata::new(),
    )
}

/// Ops keyed by ID; a later op for the same ID replaces the earlier one
fn ops_strategy() -> impl Strategy<Value = Vec<AddOp>> {
    let op = prop_oneof![
        (0u8..16, 0u8..3).prop_map(|(id, host)| AddOp::Node { id, host }),
        (0u8..16, 0u8..3, 0u8..16, 0u8..16).prop_map(|(id, host, parent, child)| {
            AddOp::Edge {
                id,
                host,
                parent,
                child,
            }
        }),
    ];
    prop::collection::vec(op, 1..40).prop_map(|ops| {
        let mut seen_nodes = BTreeSet::new();
        let mut seen_edges = BTreeSet::new();
        ops.into_iter()
            .filter(|op| match op {
                AddOp::Node { id, .. } => seen_nodes.insert(*id),
                AddOp::Edge { id, .. } => seen_edges.insert(*id),
            })
            .collect()
    })
}

/// One message of a producer's stream; IDs are local to the producer
#[derive(Debug, Clone)]
enum StreamOp {
    AddNode(u8),
    UpdateNode(u8, u8),
    DeleteNode(u8),
    AddEdge(u8),
    UpdateEdge(u8, u8),
    DeleteEdge(u8),
}

fn stream_node(host: usize, id: u8, value: Option<u8>) -> Node {
    let mut metadata = Metadata::new();
    if let Some(value) = value {
        metadata.insert("Value".into(), serde_json::json!(value));
    }
    Node::new(format!("h{}-n{}", host, id), format!("h{}", host), metadata)
}

/// Endpoints are a function of the ID so every add of it agrees
fn stream_edge(host: usize, id: u8, value: Option<u8>) -> Edge {
    let mut metadata = Metadata::new();
    if let Some(value) = value {
        metadata.insert("Value".into(), serde_json::json!(value));
    }
    Edge::new(
        format!("h{}-e{}", host, id),
        format!("h{}", host),
        format!("h{}-n{}", host, id % 8),
        format!("h{}-n{}", host, (id + 1) % 8),
        metadata,
    )
}

/// Per-producer streams; every ID touched is re-added at the end
fn streams_strategy() -> impl Strategy<Value = Vec<Vec<StreamOp>>> {
    let op = prop_oneof![
        (0u8..8).prop_map(StreamOp::AddNode),
        (0u8..8, any::<u8>()).prop_map(|(id, v)| StreamOp::UpdateNode(id, v)),
        (0u8..8).prop_map(StreamOp::DeleteNode),
        (0u8..8).prop_map(StreamOp::AddEdge),
        (0u8..8, any::<u8>()).prop_map(|(id, v)| StreamOp::UpdateEdge(id, v)),
        (0u8..8).prop_map(StreamOp::DeleteEdge),
    ];
    prop::collection::vec(prop::collection::vec(op, 0..25), 1..4).prop_map(|streams| {
        streams
            .into_iter()
            .map(|mut ops| {
                let mut nodes = BTreeSet::new();
                let mut edges = BTreeSet::new();
                for op in &ops {
                    match op {
                        StreamOp::AddNode(id)
                        | StreamOp::UpdateNode(id, _)
                        | StreamOp::DeleteNode(id) => {
                            nodes.insert(*id);
                        }
                        StreamOp::AddEdge(id)
                        | StreamOp::UpdateEdge(id, _)
                        | StreamOp::DeleteEdge(id) => {
                            edges.insert(*id);
                        }
                    }
                }
                ops.extend(nodes.into_iter().map(StreamOp::AddNode));
                ops.extend(edges.into_iter().map(StreamOp::AddEdge));
                ops
            })
            .collect()
    })
}

fn next_random(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

/// Merge the streams in a seed-driven order, keeping each stream's order
fn interleave(streams: &[Vec<StreamOp>], seed: u64) -> Vec<(usize, StreamOp)> {
    let mut cursors = vec![0usize; streams.len()];
    let mut state = seed | 1;
    let mut merged = Vec::new();
    loop {
        let open: Vec<usize> = (0..streams.len())
            .filter(|&i| cursors[i] < streams[i].len())
            .collect();
        if open.is_empty() {
            return merged;
        }
        let host = open[(next_random(&mut state) % open.len() as u64) as usize];
        merged.push((host, streams[host][cursors[host]].clone()));
        cursors[host] += 1;
    }
}

fn apply_stream(graph: &Graph, ops: &[(usize, StreamOp)]) {
    let mut writer = graph.write(ChangeSource::Replication);
    for (host, op) in ops {
        let host = *host;
        match op {
            StreamOp::AddNode(id) => {
                writer.add_node(stream_node(host, *id, None)).unwrap();
            }
            StreamOp::UpdateNode(id, v) => {
                writer.update_node(stream_node(host, *id, Some(*v))).unwrap();
            }
            StreamOp::DeleteNode(id) => {
                writer.delete_node(&stream_node(host, *id, None).id).unwrap();
            }
            StreamOp::AddEdge(id) => {
                writer.add_edge(stream_edge(host, *id, None)).unwrap();
            }
            StreamOp::UpdateEdge(id, v) => {
                writer.update_edge(stream_edge(host, *id, Some(*v))).unwrap();
            }
            StreamOp::DeleteEdge(id) => {
                writer.delete_edge(&stream_edge(host, *id, None).id).unwrap();
            }
        }
    }
}

fn contents(graph: &Graph) -> Vec<(String, serde_json::Value)> {
    let state = graph.read();
    let mut contents: Vec<(String, serde_json::Value)> = state
        .nodes()
        .map(|n| (n.id.clone(), serde_json::json!(n.metadata)))
        .chain(
            state
                .edges()
                .map(|e| (e.id.clone(), serde_json::json!([e.parent, e.child, e.metadata]))),
        )
        .collect();
    contents.sort_by(|a, b| a.0.cmp(&b.0));
    contents
}

fn graph(host: &str) -> Graph {
    Graph::new(host, Box::new(MemoryBackend::new())).unwrap()
}

fn apply(graph: &Graph, ops: &[AddOp]) {
    let mut writer = graph.write(ChangeSource::Replication);
    for op in ops {
        match op {
            AddOp::Node { id, host } => {
                writer.add_node(node(*id, *host)).unwrap();
            }
            AddOp::Edge {
                id,
                host,
                parent,
                child,
            } => {
                writer.add_edge(edge(*id, *host, *parent, *child)).unwrap();
            }
        }
    }
}

fn element_ids(graph: &Graph) -> (BTreeSet<String>, BTreeSet<String>) {
    let state = graph.read();
    (
        state.nodes().map(|n| n.id.clone()).collect(),
        state.edges().map(|e| e.id.clone()).collect(),
    )
}

fn exchange(from: &Graph, to: &Graph) {
    let snapshot: Snapshot = from.snapshot();
    to.write(ChangeSource::Replication)
        .apply_sync(snapshot)
        .unwrap();
}

proptest! {
    #[test]
    fn prop_order_does_not_matter(ops in ops_strategy(), seed in any::<u64>()) {
        let mut shuffled = ops.clone();
        // Deterministic shuffle from the seed
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let j = (state % (i as u64 + 1)) as usize;
            shuffled.swap(i, j);
        }

        let a = graph("hub-a");
        let b = graph("hub-b");
        apply(&a, &ops);
        apply(&b, &shuffled);

        prop_assert_eq!(element_ids(&a), element_ids(&b));

        // Edge endpoints agree too
        let sa = a.read();
        let sb = b.read();
        for e in sa.edges() {
            let other = sb.edge(&e.id).unwrap();
            prop_assert_eq!(&e.parent, &other.parent);
            prop_assert_eq!(&e.child, &other.child);
        }
    }

    #[test]
    fn prop_snapshot_exchange_gives_union(left in ops_strategy(), right in ops_strategy()) {
        let a = graph("hub-a");
        let b = graph("hub-b");
        apply(&a, &left);
        apply(&b, &right);

        let (nodes_a, edges_a) = element_ids(&a);
        let (nodes_b, edges_b) = element_ids(&b);

        exchange(&a, &b);
        exchange(&b, &a);

        let (nodes, edges) = element_ids(&a);
        prop_assert_eq!(&nodes, &nodes_a.union(&nodes_b).cloned().collect::<BTreeSet<_>>());
        prop_assert_eq!(&edges, &edges_a.union(&edges_b).cloned().collect::<BTreeSet<_>>());
        prop_assert_eq!(element_ids(&a), element_ids(&b));
    }

    #[test]
    fn prop_host_deletion_removes_exactly_that_host(ops in ops_strategy(), host in 0u8..3) {
        let g = graph("hub-a");
        apply(&g, &ops);

        let victim = format!("h{}", host);
        let before_nodes: BTreeSet<String> = g
            .read()
            .nodes()
            .filter(|n| n.host != victim)
            .map(|n| n.id.clone())
            .collect();
        let before_edges: BTreeSet<String> = g
            .read()
            .edges()
            .filter(|e| e.host != victim)
            .map(|e| e.id.clone())
            .collect();

        g.write(ChangeSource::Local).delete_host_graph(&victim).unwrap();

        let (nodes, edges) = element_ids(&g);
        prop_assert_eq!(nodes, before_nodes);
        prop_assert_eq!(edges, before_edges);
    }

    #[test]
    fn prop_interleaved_streams_converge(
        streams in streams_strategy(),
        seed_a in any::<u64>(),
        seed_b in any::<u64>(),
    ) {
        let a = graph("hub-a");
        let b = graph("hub-b");
        apply_stream(&a, &interleave(&streams, seed_a));
        apply_stream(&b, &interleave(&streams, seed_b));

        prop_assert_eq!(contents(&a), contents(&b));

        // Every ID a producer touched was re-added last
        let expected: usize = streams
            .iter()
            .map(|ops| {
                ops.iter()
                    .filter(|op| matches!(op, StreamOp::AddNode(_) | StreamOp::AddEdge(_)))
                    .map(|op| format!("{:?}", op))
                    .collect::<BTreeSet<_>>()
                    .len()
            })
            .sum();
        prop_assert_eq!(contents(&a).len(), expected);
    }
}

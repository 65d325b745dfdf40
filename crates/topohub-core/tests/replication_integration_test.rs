//! Replication integration tests
//!
//! Two hubs on loopback, each dialing the other.

use std::sync::Arc;
use std::time::Duration;
use topohub_core::graph::{Edge, Graph, Metadata, Node};
use topohub_core::replication::{ReplicationConfig, ReplicationEndpoint};
use topohub_core::testing::{eventually, fast_transport, memory_graph};
use topohub_core::{ChangeSource, GraphEvent};

const WAIT: Duration = Duration::from_secs(10);

struct TestHub {
    graph: Arc<Graph>,
    replication: ReplicationEndpoint,
}

/// Reserve a loopback port by binding and releasing it
async fn free_addr() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn hub(
    host: &str,
    listen: std::net::SocketAddr,
    peers: Vec<std::net::SocketAddr>,
) -> TestHub {
    let graph = memory_graph(host);
    let config = ReplicationConfig::with_peers(peers.iter().map(|p| p.to_string()))
        .with_transport(fast_transport());
    let replication = ReplicationEndpoint::new(graph.clone(), config).unwrap();
    replication.listen(listen).await.unwrap();
    TestHub { graph, replication }
}

fn ids(graph: &Graph) -> Vec<String> {
    let mut ids: Vec<String> = graph.read().nodes().map(|n| n.id.clone()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_bootstrap_pulls_existing_graph() {
    let addr_a = free_addr().await;
    let addr_b = free_addr().await;

    let a = hub("hub-a", addr_a, vec![addr_b]).await;
    let b = hub("hub-b", addr_b, vec![addr_a]).await;

    a.graph
        .write(ChangeSource::Local)
        .add_node(Node::new("a1", "agent-a", Metadata::new()))
        .unwrap();
    b.graph
        .write(ChangeSource::Local)
        .add_node(Node::new("b1", "agent-b", Metadata::new()))
        .unwrap();
    b.graph
        .write(ChangeSource::Local)
        .add_edge(Edge::new("e1", "agent-b", "b1", "a1", Metadata::new()))
        .unwrap();

    a.replication.connect_peers();
    b.replication.connect_peers();

    assert!(eventually(WAIT, || ids(&a.graph) == ["a1", "b1"]).await);
    assert!(eventually(WAIT, || ids(&b.graph) == ["a1", "b1"]).await);
    assert!(eventually(WAIT, || a.graph.read().edge("e1").is_some()).await);
    assert_eq!(a.graph.read().traverse("b1"), Some(vec!["a1".to_string()]));

    a.replication.stop();
    b.replication.stop();
}

#[tokio::test]
async fn test_live_changes_replicate_once() {
    let addr_a = free_addr().await;
    let addr_b = free_addr().await;

    let a = hub("hub-a", addr_a, vec![addr_b]).await;
    let b = hub("hub-b", addr_b, vec![addr_a]).await;
    a.replication.connect_peers();
    b.replication.connect_peers();

    assert!(
        eventually(WAIT, || {
            let sa = a.replication.status();
            let sb = b.replication.status();
            sa.incomers.len() == 1
                && sb.incomers.len() == 1
                && sa.outgoers.len() == 1
                && sb.outgoers.len() == 1
                && sa.outgoers.values().all(|s| s.connected_since.is_some())
                && sb.outgoers.values().all(|s| s.connected_since.is_some())
        })
        .await
    );

    let mut events_b = b.graph.subscribe();

    a.graph
        .write(ChangeSource::Pod)
        .add_node(Node::new("n1", "agent-a", Metadata::new()))
        .unwrap();
    assert!(eventually(WAIT, || b.graph.read().node("n1").is_some()).await);

    let mut updated = Node::new("n1", "agent-a", Metadata::new());
    updated.metadata.insert("Name".into(), serde_json::json!("eth0"));
    updated.revision = 2;
    a.graph.write(ChangeSource::Pod).update_node(updated).unwrap();
    assert!(
        eventually(WAIT, || {
            b.graph
                .read()
                .node("n1")
                .is_some_and(|n| n.metadata.get("Name") == Some(&serde_json::json!("eth0")))
        })
        .await
    );

    a.graph.write(ChangeSource::Pod).delete_node("n1").unwrap();
    assert!(eventually(WAIT, || b.graph.read().node("n1").is_none()).await);

    // b saw each change once, all tagged as replicated
    let mut received: Vec<GraphEvent> = Vec::new();
    while let Ok(event) = events_b.try_recv() {
        received.push(event);
    }
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|e| e.source == ChangeSource::Replication));

    // Nothing bounced back to a
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(a.graph.read().node("n1").is_none());
    assert_eq!(a.graph.revision(), 3);

    a.replication.stop();
    b.replication.stop();
}

#[tokio::test]
async fn test_peer_disconnect_keeps_replicated_data() {
    let addr_a = free_addr().await;
    let addr_b = free_addr().await;

    let a = hub("hub-a", addr_a, vec![addr_b]).await;
    let b = hub("hub-b", addr_b, vec![addr_a]).await;
    a.replication.connect_peers();
    b.replication.connect_peers();

    a.graph
        .write(ChangeSource::Pod)
        .add_node(Node::new("n1", "agent-a", Metadata::new()))
        .unwrap();
    assert!(eventually(WAIT, || b.graph.read().node("n1").is_some()).await);

    a.replication.stop();
    assert!(eventually(WAIT, || b.replication.status().incomers.is_empty()).await);
    assert!(b.graph.read().node("n1").is_some());

    b.replication.stop();
}

/// A only dials B and B forwards nothing, so whatever B writes while the link
/// is down reaches A only through the sync run on reconnect
#[tokio::test]
async fn test_reconnect_reruns_bootstrap_sync() {
    let addr_a = free_addr().await;
    let addr_b = free_addr().await;

    let a = hub("hub-a", addr_a, vec![addr_b]).await;
    let b = hub("hub-b", addr_b, vec![]).await;

    b.graph
        .write(ChangeSource::Local)
        .add_node(Node::new("b1", "agent-b", Metadata::new()))
        .unwrap();
    a.replication.connect_peers();

    assert!(eventually(WAIT, || ids(&a.graph) == ["b1"]).await);
    assert!(eventually(WAIT, || b.replication.incoming().pool().len() == 1).await);

    let first = b.replication.incoming().pool().speakers()[0].clone();
    first.close();
    // No await in between: the link is down when b2 is written
    b.graph
        .write(ChangeSource::Local)
        .add_node(Node::new("b2", "agent-b", Metadata::new()))
        .unwrap();

    assert!(eventually(WAIT, || ids(&a.graph) == ["b1", "b2"]).await);
    let speakers = b.replication.incoming().pool().speakers();
    assert_eq!(speakers.len(), 1);
    assert_ne!(speakers[0].id(), first.id());

    a.replication.stop();
    b.replication.stop();
}

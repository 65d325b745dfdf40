//! Graph event fan-out to a speaker pool

use crate::endpoint::SpeakerPool;
use crate::graph::{ChangeSource, Graph, GraphEvent};
use crate::protocol::GraphMessage;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which events a forwarder sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardPolicy {
    /// Every event (subscribers)
    All,
    /// Events not received from a peer hub (outgoing replication)
    SkipReplicated,
}

impl ForwardPolicy {
    /// Whether `event` passes the policy
    pub fn accepts(&self, event: &GraphEvent) -> bool {
        match self {
            Self::All => true,
            Self::SkipReplicated => event.source != ChangeSource::Replication,
        }
    }
}

/// Forward graph events to `pool` until `token` is cancelled
///
/// The subscription is taken before this returns, so no event emitted after
/// the call is missed.
pub fn spawn_forwarder(
    graph: Arc<Graph>,
    pool: Arc<SpeakerPool>,
    policy: ForwardPolicy,
    token: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = graph.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                result = rx.recv() => {
                    match result {
                        Ok(event) => forward(&pool, policy, &event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(
                                "{} forwarder lagged by {} events, pushing full sync",
                                pool.role(),
                                n
                            );
                            resync(&graph, &pool);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Graph event channel closed");
                            break;
                        }
                    }
                }
            }
        }
        tracing::debug!("{} forwarder stopped", pool.role());
    })
}

fn forward(pool: &SpeakerPool, policy: ForwardPolicy, event: &GraphEvent) {
    if !policy.accepts(event) || pool.is_empty() {
        return;
    }
    match event.message.to_envelope() {
        Ok(envelope) => {
            pool.broadcast(&envelope);
        }
        Err(e) => tracing::error!("Unable to encode {}: {}", event.message.message_type(), e),
    }
}

fn resync(graph: &Graph, pool: &SpeakerPool) {
    let snapshot = graph.snapshot();
    match GraphMessage::SyncReply(snapshot).to_envelope() {
        Ok(envelope) => {
            let sent = pool.broadcast(&envelope);
            tracing::info!("Pushed full sync to {} {} speakers", sent, pool.role());
        }
        Err(e) => tracing::error!("Unable to encode snapshot: {}", e),
    }
}

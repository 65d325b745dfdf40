//! Hub orchestration
//!
//! One graph, four endpoints, the HTTP API and an optional metadata store.
//! Start order is metadata store, HTTP, pod, replication, publisher,
//! subscriber, then peer dials; stop runs the reverse.

use crate::api;
use crate::config::HubConfig;
use anyhow::Context;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use topohub_core::endpoint::{
    ConnStatus, Endpoint, pod_endpoint, publisher_endpoint, subscriber_endpoint,
};
use topohub_core::forwarder::{ForwardPolicy, spawn_forwarder};
use topohub_core::graph::Graph;
use topohub_core::replication::{PeersStatus, ReplicationEndpoint};
use topohub_core::schema::SchemaValidator;

/// Embedded store the hub registers itself in
///
/// Started before anything else and stopped last.
pub trait MetadataStore: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Start serving
    fn start(&self) -> anyhow::Result<()>;

    /// Stop serving
    fn stop(&self);
}

/// Addresses every listener ended up bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundAddrs {
    /// HTTP API
    pub http: SocketAddr,
    /// Pod endpoint
    pub pod: SocketAddr,
    /// Replication endpoint
    pub replication: SocketAddr,
    /// Publisher endpoint
    pub publisher: SocketAddr,
    /// Subscriber endpoint
    pub subscriber: SocketAddr,
}

/// Per-pool connection status
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStatus {
    /// Connected pods by host
    pub pods: BTreeMap<String, ConnStatus>,
    /// Peer hubs, both directions
    pub peers: PeersStatus,
    /// Connected publishers by host
    pub publishers: BTreeMap<String, ConnStatus>,
    /// Connected subscribers by host
    pub subscribers: BTreeMap<String, ConnStatus>,
}

/// A topology hub
pub struct Hub {
    config: HubConfig,
    graph: Arc<Graph>,
    pods: Endpoint,
    publishers: Endpoint,
    subscribers: Endpoint,
    replication: ReplicationEndpoint,
    metadata: Option<Arc<dyn MetadataStore>>,
    forwarder: CancellationToken,
    http_shutdown: CancellationToken,
    http_task: Mutex<Option<JoinHandle<()>>>,
    addrs: Mutex<Option<BoundAddrs>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Hub {
    /// Open storage, load schemas and build every endpoint
    ///
    /// Nothing listens until [`Hub::start`].
    pub fn new(config: HubConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let backend = config
            .storage
            .open()
            .context("Failed to open graph storage")?;
        let graph = Arc::new(
            Graph::with_event_capacity(&config.host_id, backend, config.event_capacity)
                .context("Failed to open graph")?,
        );

        let validator = Arc::new(
            SchemaValidator::load(config.schemas.node.as_deref(), config.schemas.edge.as_deref())
                .context("Failed to load schemas")?,
        );

        let pods = pod_endpoint(&graph, config.transport.clone());
        let publishers = publisher_endpoint(&graph, validator, config.transport.clone());
        let subscribers = subscriber_endpoint(&graph, config.transport.clone());
        let replication = ReplicationEndpoint::new(graph.clone(), config.replication())
            .context("Failed to configure replication")?;

        Ok(Self {
            config,
            graph,
            pods,
            publishers,
            subscribers,
            replication,
            metadata: None,
            forwarder: CancellationToken::new(),
            http_shutdown: CancellationToken::new(),
            http_task: Mutex::new(None),
            addrs: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Attach a metadata store
    pub fn with_metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(store);
        self
    }

    /// Configuration the hub was built from
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The hub's graph
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Replication endpoint
    pub fn replication(&self) -> &ReplicationEndpoint {
        &self.replication
    }

    /// Bound listener addresses, once started
    pub fn addrs(&self) -> Option<BoundAddrs> {
        *self.addrs.lock()
    }

    /// Bring every listener up and dial peers
    ///
    /// On failure everything already started is stopped again and the error
    /// is returned.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<BoundAddrs> {
        if self.started.swap(true, Ordering::SeqCst) {
            return self
                .addrs()
                .context("Hub start already in progress or failed");
        }

        match self.start_inner().await {
            Ok(addrs) => {
                *self.addrs.lock() = Some(addrs);
                tracing::info!(
                    "Hub {} started: http={} pod={} replication={} publisher={} subscriber={}",
                    self.config.host_id,
                    addrs.http,
                    addrs.pod,
                    addrs.replication,
                    addrs.publisher,
                    addrs.subscriber
                );
                Ok(addrs)
            }
            Err(e) => {
                tracing::error!("Hub {} failed to start: {:#}", self.config.host_id, e);
                self.stop().await;
                Err(e)
            }
        }
    }

    async fn start_inner(self: &Arc<Self>) -> anyhow::Result<BoundAddrs> {
        if let Some(store) = &self.metadata {
            store
                .start()
                .with_context(|| format!("Failed to start metadata store {}", store.name()))?;
            tracing::info!("Metadata store {} started", store.name());
        }

        let http = self.start_http().await?;
        let pod = self.pods.listen(self.config.pod_addr).await?;
        let replication = self.replication.listen(self.config.replication_addr).await?;
        let publisher = self.publishers.listen(self.config.publisher_addr).await?;
        let subscriber = self.subscribers.listen(self.config.subscriber_addr).await?;

        spawn_forwarder(
            self.graph.clone(),
            self.subscribers.pool().clone(),
            ForwardPolicy::All,
            self.forwarder.clone(),
        );
        self.replication.connect_peers();

        Ok(BoundAddrs {
            http,
            pod,
            replication,
            publisher,
            subscriber,
        })
    }

    async fn start_http(self: &Arc<Self>) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.http_addr)
            .await
            .with_context(|| format!("HTTP API cannot bind {}", self.config.http_addr))?;
        let addr = listener.local_addr()?;

        let app = api::router(self.clone());
        let shutdown = self.http_shutdown.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        });
        *self.http_task.lock() = Some(task);

        tracing::info!("HTTP API listening on {}", addr);
        Ok(addr)
    }

    /// Stop dialing and listening, close every connection
    ///
    /// Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Stopping hub {}", self.config.host_id);

        self.forwarder.cancel();
        self.subscribers.stop();
        self.publishers.stop();
        self.replication.stop();
        self.pods.stop();

        self.http_shutdown.cancel();
        let task = self.http_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("HTTP task failed: {}", e);
            }
        }

        if let Some(store) = &self.metadata {
            store.stop();
            tracing::info!("Metadata store {} stopped", store.name());
        }
    }

    /// Whether [`Hub::stop`] was called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Connection status of every pool
    pub fn status(&self) -> HubStatus {
        HubStatus {
            pods: self.pods.status(),
            peers: self.replication.status(),
            publishers: self.publishers.status(),
            subscribers: self.subscribers.status(),
        }
    }
}

//! Graph synchronization handler
//!
//! Every graph role (pod, publisher, subscriber, replication in/out) uses
//! [`GraphSyncHandler`]; the roles differ only in their [`Capabilities`].

use super::config::TransportConfig;
use super::speaker::Speaker;
use super::{Endpoint, EndpointHandler};
use crate::graph::{ChangeSource, Graph};
use crate::protocol::{Envelope, GRAPH_NAMESPACE, GraphMessage, MessageType};
use crate::schema::SchemaValidator;
use serde_json::Value;
use std::sync::Arc;

/// HTTP-style status carried by a successful SyncReply
pub const STATUS_OK: u16 = 200;

/// What a role is allowed to do with inbound traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Source recorded on mutations from this role
    pub source: ChangeSource,
    /// Check node/edge payloads against the schemas
    pub validate: bool,
    /// Apply inbound mutations and SyncReplies
    pub apply_mutations: bool,
    /// Delete the remote host's partition when it disconnects
    pub delete_host_on_disconnect: bool,
    /// Answer SyncRequest with a snapshot
    pub answer_sync: bool,
    /// Send SyncRequest right after connecting
    pub sync_on_connect: bool,
}

impl Capabilities {
    /// Local collection agents: trusted, own their host partition
    pub fn pod() -> Self {
        Self {
            source: ChangeSource::Pod,
            validate: false,
            apply_mutations: true,
            delete_host_on_disconnect: true,
            answer_sync: true,
            sync_on_connect: false,
        }
    }

    /// External publishers: like pods, but validated
    pub fn publisher() -> Self {
        Self {
            source: ChangeSource::Publisher,
            validate: true,
            ..Self::pod()
        }
    }

    /// Read-only consumers
    pub fn subscriber() -> Self {
        Self {
            source: ChangeSource::Local,
            validate: false,
            apply_mutations: false,
            delete_host_on_disconnect: false,
            answer_sync: true,
            sync_on_connect: false,
        }
    }

    /// Peers connecting to this hub
    pub fn replication_incoming() -> Self {
        Self {
            source: ChangeSource::Replication,
            validate: false,
            apply_mutations: true,
            delete_host_on_disconnect: false,
            answer_sync: true,
            sync_on_connect: false,
        }
    }

    /// Peers this hub dials; bootstrap with a full sync on every connect
    pub fn replication_outgoing() -> Self {
        Self {
            sync_on_connect: true,
            ..Self::replication_incoming()
        }
    }
}

/// Applies graph messages according to [`Capabilities`]
pub struct GraphSyncHandler {
    graph: Arc<Graph>,
    caps: Capabilities,
    validator: Option<Arc<SchemaValidator>>,
}

impl GraphSyncHandler {
    /// Create a handler
    pub fn new(graph: Arc<Graph>, caps: Capabilities) -> Self {
        Self {
            graph,
            caps,
            validator: None,
        }
    }

    /// Set the validator used when `caps.validate` is on
    pub fn with_validator(mut self, validator: Arc<SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Configured capabilities
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Decode, validate and apply one envelope
    ///
    /// Bad messages are logged and dropped; the sender never gets an error.
    pub fn handle(&self, speaker: &Speaker, envelope: Envelope) {
        let msg_type = match envelope.message_type() {
            Ok(msg_type) => msg_type,
            Err(e) => {
                tracing::error!(
                    "Dropping message from {}: {}",
                    speaker.remote_host(),
                    e
                );
                return;
            }
        };

        if self.caps.validate {
            match &self.validator {
                Some(validator) => {
                    if let Err(e) = validator.validate(msg_type, &envelope.obj) {
                        tracing::error!("Invalid message from {}: {}", speaker.remote_host(), e);
                        return;
                    }
                }
                None => {
                    tracing::error!(
                        "No schema validator configured, dropping {} from {}",
                        msg_type,
                        speaker.remote_host()
                    );
                    return;
                }
            }
        }

        let message = match GraphMessage::from_parts(msg_type, envelope.obj.clone()) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    "Unable to parse {} from {}: {}",
                    msg_type,
                    speaker.remote_host(),
                    e
                );
                return;
            }
        };

        match message {
            GraphMessage::SyncRequest => self.reply_sync(speaker, &envelope),
            message => {
                if !self.caps.apply_mutations {
                    tracing::debug!(
                        "{} from {} ignored, role is read-only",
                        msg_type,
                        speaker.remote_host()
                    );
                    return;
                }

                if let GraphMessage::HostGraphDeleted(host) = &message {
                    tracing::debug!("Got {} for host {}", msg_type, host);
                }

                let mut writer = self.graph.write(self.caps.source);
                if let Err(e) = writer.apply(message) {
                    tracing::error!(
                        "Failed to apply {} from {}: {}",
                        msg_type,
                        speaker.remote_host(),
                        e
                    );
                }
            }
        }
    }

    fn reply_sync(&self, speaker: &Speaker, request: &Envelope) {
        if !self.caps.answer_sync {
            tracing::debug!("SyncRequest from {} ignored", speaker.remote_host());
            return;
        }

        let snapshot = self.graph.snapshot();
        let obj = match serde_json::to_value(&snapshot) {
            Ok(obj) => obj,
            Err(e) => {
                tracing::error!("Unable to encode snapshot: {}", e);
                return;
            }
        };

        tracing::debug!(
            "Answering SyncRequest from {} ({} nodes, {} edges)",
            speaker.remote_host(),
            snapshot.nodes.len(),
            snapshot.edges.len()
        );

        let reply = request.reply(MessageType::SyncReply, obj, STATUS_OK);
        if let Err(e) = speaker.send(reply) {
            tracing::debug!("SyncReply to {} not sent: {}", speaker.remote_host(), e);
        }
    }
}

impl EndpointHandler for GraphSyncHandler {
    fn on_connected(&self, speaker: &Arc<Speaker>) {
        if !self.caps.sync_on_connect {
            return;
        }
        let request = Envelope::request(GRAPH_NAMESPACE, MessageType::SyncRequest, Value::Null);
        if let Err(e) = speaker.send(request) {
            tracing::warn!("SyncRequest to {} not sent: {}", speaker.remote_host(), e);
        }
    }

    fn on_disconnected(&self, speaker: &Arc<Speaker>) {
        if !self.caps.delete_host_on_disconnect {
            return;
        }
        tracing::debug!(
            "Producer {} left, deleting its host graph",
            speaker.remote_host()
        );
        if let Err(e) = self
            .graph
            .write(self.caps.source)
            .delete_host_graph(speaker.remote_host())
        {
            tracing::error!(
                "Failed to delete host graph {}: {}",
                speaker.remote_host(),
                e
            );
        }
    }

    fn on_message(&self, speaker: &Arc<Speaker>, envelope: Envelope) {
        self.handle(speaker, envelope);
    }
}

/// Endpoint for local collection agents
pub fn pod_endpoint(graph: &Arc<Graph>, transport: TransportConfig) -> Endpoint {
    let handler = GraphSyncHandler::new(graph.clone(), Capabilities::pod());
    Endpoint::new("pod", graph.host(), Arc::new(handler), transport)
}

/// Endpoint for external publishers, validating payloads against `validator`
pub fn publisher_endpoint(
    graph: &Arc<Graph>,
    validator: Arc<SchemaValidator>,
    transport: TransportConfig,
) -> Endpoint {
    let handler =
        GraphSyncHandler::new(graph.clone(), Capabilities::publisher()).with_validator(validator);
    Endpoint::new("publisher", graph.host(), Arc::new(handler), transport)
}

/// Endpoint for subscribers
pub fn subscriber_endpoint(graph: &Arc<Graph>, transport: TransportConfig) -> Endpoint {
    let handler = GraphSyncHandler::new(graph.clone(), Capabilities::subscriber());
    Endpoint::new("subscriber", graph.host(), Arc::new(handler), transport)
}

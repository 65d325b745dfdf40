//! Message envelope and graph message taxonomy

use crate::graph::{Edge, Node, Snapshot};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Namespace carrying graph messages
pub const GRAPH_NAMESPACE: &str = "Graph";

/// Graph message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Ask for a full snapshot
    SyncRequest,
    /// Full snapshot, applied add-if-absent
    SyncReply,
    /// Node created
    NodeAdded,
    /// Node metadata changed
    NodeUpdated,
    /// Node removed
    NodeDeleted,
    /// Edge created
    EdgeAdded,
    /// Edge metadata changed
    EdgeUpdated,
    /// Edge removed
    EdgeDeleted,
    /// Every element of one host removed
    HostGraphDeleted,
}

impl MessageType {
    /// Every message type
    pub const ALL: [MessageType; 9] = [
        Self::SyncRequest,
        Self::SyncReply,
        Self::NodeAdded,
        Self::NodeUpdated,
        Self::NodeDeleted,
        Self::EdgeAdded,
        Self::EdgeUpdated,
        Self::EdgeDeleted,
        Self::HostGraphDeleted,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncRequest => "SyncRequest",
            Self::SyncReply => "SyncReply",
            Self::NodeAdded => "NodeAdded",
            Self::NodeUpdated => "NodeUpdated",
            Self::NodeDeleted => "NodeDeleted",
            Self::EdgeAdded => "EdgeAdded",
            Self::EdgeUpdated => "EdgeUpdated",
            Self::EdgeDeleted => "EdgeDeleted",
            Self::HostGraphDeleted => "HostGraphDeleted",
        }
    }

    /// Node* mutation
    pub fn is_node_mutation(&self) -> bool {
        matches!(
            self,
            Self::NodeAdded | Self::NodeUpdated | Self::NodeDeleted
        )
    }

    /// Edge* mutation
    pub fn is_edge_mutation(&self) -> bool {
        matches!(
            self,
            Self::EdgeAdded | Self::EdgeUpdated | Self::EdgeDeleted
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownMessageType(s.to_string()))
    }
}

/// Transport-level message
///
/// `Type` is kept as a raw string so an envelope with an unknown type still
/// decodes and can be rejected (and logged) by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    /// Subscription namespace
    pub namespace: String,
    /// Message type name
    #[serde(rename = "Type")]
    pub msg_type: String,
    /// Request/reply correlation
    #[serde(rename = "UUID", default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Status code, set on replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Type-specific payload
    #[serde(default)]
    pub obj: Value,
}

impl Envelope {
    /// Create an envelope
    pub fn new(namespace: impl Into<String>, msg_type: MessageType, obj: Value) -> Self {
        Self {
            namespace: namespace.into(),
            msg_type: msg_type.as_str().to_string(),
            uuid: None,
            status: None,
            obj,
        }
    }

    /// Create an envelope carrying a fresh correlation ID
    pub fn request(namespace: impl Into<String>, msg_type: MessageType, obj: Value) -> Self {
        let mut envelope = Self::new(namespace, msg_type, obj);
        envelope.uuid = Some(uuid::Uuid::new_v4().to_string());
        envelope
    }

    /// Build the reply to this envelope, keeping its namespace and correlation
    pub fn reply(&self, msg_type: MessageType, obj: Value, status: u16) -> Self {
        Self {
            namespace: self.namespace.clone(),
            msg_type: msg_type.as_str().to_string(),
            uuid: self.uuid.clone(),
            status: Some(status),
            obj,
        }
    }

    /// Parsed message type
    pub fn message_type(&self) -> Result<MessageType> {
        self.msg_type.parse()
    }
}

/// Decoded graph message
#[derive(Debug, Clone, PartialEq)]
pub enum GraphMessage {
    /// Ask for a full snapshot
    SyncRequest,
    /// Full snapshot
    SyncReply(Snapshot),
    /// Node created
    NodeAdded(Node),
    /// Node changed
    NodeUpdated(Node),
    /// Node removed
    NodeDeleted(Node),
    /// Edge created
    EdgeAdded(Edge),
    /// Edge changed
    EdgeUpdated(Edge),
    /// Edge removed
    EdgeDeleted(Edge),
    /// Host partition removed
    HostGraphDeleted(String),
}

impl GraphMessage {
    /// Message type of this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::SyncRequest => MessageType::SyncRequest,
            Self::SyncReply(_) => MessageType::SyncReply,
            Self::NodeAdded(_) => MessageType::NodeAdded,
            Self::NodeUpdated(_) => MessageType::NodeUpdated,
            Self::NodeDeleted(_) => MessageType::NodeDeleted,
            Self::EdgeAdded(_) => MessageType::EdgeAdded,
            Self::EdgeUpdated(_) => MessageType::EdgeUpdated,
            Self::EdgeDeleted(_) => MessageType::EdgeDeleted,
            Self::HostGraphDeleted(_) => MessageType::HostGraphDeleted,
        }
    }

    /// Decode the payload of a graph envelope
    pub fn decode(envelope: &Envelope) -> Result<Self> {
        let msg_type = envelope.message_type()?;
        Self::from_parts(msg_type, envelope.obj.clone())
    }

    /// Decode a payload already known to be of `msg_type`
    pub fn from_parts(msg_type: MessageType, obj: Value) -> Result<Self> {
        let msg = match msg_type {
            MessageType::SyncRequest => Self::SyncRequest,
            MessageType::SyncReply => Self::SyncReply(serde_json::from_value(obj)?),
            MessageType::NodeAdded => Self::NodeAdded(serde_json::from_value(obj)?),
            MessageType::NodeUpdated => Self::NodeUpdated(serde_json::from_value(obj)?),
            MessageType::NodeDeleted => Self::NodeDeleted(serde_json::from_value(obj)?),
            MessageType::EdgeAdded => Self::EdgeAdded(serde_json::from_value(obj)?),
            MessageType::EdgeUpdated => Self::EdgeUpdated(serde_json::from_value(obj)?),
            MessageType::EdgeDeleted => Self::EdgeDeleted(serde_json::from_value(obj)?),
            MessageType::HostGraphDeleted => match obj {
                Value::String(host) => Self::HostGraphDeleted(host),
                other => {
                    return Err(Error::validation(format!(
                        "HostGraphDeleted expects a host string, got {}",
                        other
                    )));
                }
            },
        };
        Ok(msg)
    }

    /// Payload as JSON
    pub fn payload(&self) -> Result<Value> {
        let value = match self {
            Self::SyncRequest => Value::Null,
            Self::SyncReply(snapshot) => serde_json::to_value(snapshot)?,
            Self::NodeAdded(n) | Self::NodeUpdated(n) | Self::NodeDeleted(n) => {
                serde_json::to_value(n)?
            }
            Self::EdgeAdded(e) | Self::EdgeUpdated(e) | Self::EdgeDeleted(e) => {
                serde_json::to_value(e)?
            }
            Self::HostGraphDeleted(host) => Value::String(host.clone()),
        };
        Ok(value)
    }

    /// Wrap into a graph-namespace envelope
    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::new(
            GRAPH_NAMESPACE,
            self.message_type(),
            self.payload()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Metadata;
    use serde_json::json;

    #[test]
    fn test_message_type_names() {
        for t in MessageType::ALL {
            assert_eq!(t.as_str().parse::<MessageType>().unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let envelope = Envelope {
            namespace: GRAPH_NAMESPACE.into(),
            msg_type: "NodeExploded".into(),
            uuid: None,
            status: None,
            obj: json!({}),
        };
        let err = GraphMessage::decode(&envelope).unwrap_err();
        assert!(matches!(err, Error::UnknownMessageType(ref t) if t == "NodeExploded"));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_envelope_wire_format() {
        let node = Node::new("n1", "h1", Metadata::new());
        let envelope = GraphMessage::NodeAdded(node).to_envelope().unwrap();
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["Namespace"], "Graph");
        assert_eq!(value["Type"], "NodeAdded");
        assert_eq!(value["Obj"]["ID"], "n1");
        assert!(value.get("UUID").is_none());
    }

    #[test]
    fn test_reply_keeps_correlation() {
        let request = Envelope::request(GRAPH_NAMESPACE, MessageType::SyncRequest, Value::Null);
        let reply = request.reply(MessageType::SyncReply, json!({}), 200);
        assert!(request.uuid.is_some());
        assert_eq!(reply.uuid, request.uuid);
        assert_eq!(reply.status, Some(200));
        assert_eq!(reply.msg_type, "SyncReply");
    }

    #[test]
    fn test_host_graph_deleted_requires_string() {
        let err = GraphMessage::from_parts(MessageType::HostGraphDeleted, json!(42)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let msg = GraphMessage::from_parts(MessageType::HostGraphDeleted, json!("h1")).unwrap();
        assert_eq!(msg, GraphMessage::HostGraphDeleted("h1".into()));
    }

    #[test]
    fn test_sync_reply_decodes_partial_payload() {
        let msg = GraphMessage::from_parts(
            MessageType::SyncReply,
            json!({ "Nodes": [{ "ID": "n1", "Host": "h1" }] }),
        )
        .unwrap();
        match msg {
            GraphMessage::SyncReply(snapshot) => {
                assert_eq!(snapshot.nodes.len(), 1);
                assert!(snapshot.edges.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

//! JSON-schema validation of inbound node and edge payloads

use crate::protocol::MessageType;
use crate::{Error, Result};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::path::Path;

/// Bundled node schema
pub const NODE_SCHEMA: &str = include_str!("../schemas/node.schema.json");

/// Bundled edge schema
pub const EDGE_SCHEMA: &str = include_str!("../schemas/edge.schema.json");

/// Compiled node and edge schemas
pub struct SchemaValidator {
    node: JSONSchema,
    edge: JSONSchema,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

impl SchemaValidator {
    /// Validator over the bundled schemas
    pub fn bundled() -> Result<Self> {
        Ok(Self {
            node: compile("node", NODE_SCHEMA)?,
            edge: compile("edge", EDGE_SCHEMA)?,
        })
    }

    /// Validator with optional file overrides for either schema
    pub fn load(node_path: Option<&Path>, edge_path: Option<&Path>) -> Result<Self> {
        let node = match node_path {
            Some(path) => compile("node", &read_schema(path)?)?,
            None => compile("node", NODE_SCHEMA)?,
        };
        let edge = match edge_path {
            Some(path) => compile("edge", &read_schema(path)?)?,
            None => compile("edge", EDGE_SCHEMA)?,
        };
        Ok(Self { node, edge })
    }

    /// Check `obj` against the schema matching `msg_type`
    ///
    /// Node* types use the node schema, Edge* types the edge schema. Other
    /// types carry no element payload and always pass.
    pub fn validate(&self, msg_type: MessageType, obj: &Value) -> Result<()> {
        let schema = if msg_type.is_node_mutation() {
            &self.node
        } else if msg_type.is_edge_mutation() {
            &self.edge
        } else {
            return Ok(());
        };

        schema.validate(obj).map_err(|errors| {
            let reasons: Vec<String> = errors.map(|e| e.to_string()).collect();
            Error::validation(format!("{} payload: {}", msg_type, reasons.join("; ")))
        })
    }
}

fn read_schema(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::schema(format!("cannot read {}: {}", path.display(), e)))
}

fn compile(kind: &str, raw: &str) -> Result<JSONSchema> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::schema(format!("{} schema is not JSON: {}", kind, e)))?;
    JSONSchema::compile(&value)
        .map_err(|e| Error::schema(format!("{} schema does not compile: {}", kind, e)))
}

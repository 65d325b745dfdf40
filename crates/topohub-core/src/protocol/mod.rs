//! Hub wire protocol
//!
//! Two layers:
//! - [`frame`]: CRC-checked frames carried on every TCP connection
//!   (handshake, heartbeat, envelopes);
//! - [`message`]: the graph envelope and its message taxonomy.
//!
//! ```text
//! producer ──Hello──────────────► hub
//!          ◄──────────Welcome────
//!          ──Message(NodeAdded)─►
//!          ──Message(SyncRequest)►
//!          ◄──Message(SyncReply)──
//! ```

pub mod frame;
pub mod message;

pub use frame::{Frame, FrameType, MAX_FRAME_SIZE, PROTOCOL_VERSION};
pub use message::{Envelope, GRAPH_NAMESPACE, GraphMessage, MessageType};

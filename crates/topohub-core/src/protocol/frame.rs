//! Connection wire framing
//!
//! Format: [frame_type:1][length:4][payload:N][crc32:4]
//!
//! The payload is the JSON encoding of the [`Frame`]; the CRC covers type,
//! length and payload. Length and CRC are little-endian.

use super::message::Envelope;
use crate::{Error, Result};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version exchanged in the handshake
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame payload (64MB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 5;
const CRC_LEN: usize = 4;

/// Frame type tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Handshake from the dialing side
    Hello = 0x01,
    /// Handshake response
    Welcome = 0x02,
    /// Heartbeat ping
    Ping = 0x10,
    /// Heartbeat pong
    Pong = 0x11,
    /// Envelope
    Message = 0x20,
    /// Error, connection is closed after sending
    Error = 0xFF,
}

impl TryFrom<u8> for FrameType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Hello),
            0x02 => Ok(Self::Welcome),
            0x10 => Ok(Self::Ping),
            0x11 => Ok(Self::Pong),
            0x20 => Ok(Self::Message),
            0xFF => Ok(Self::Error),
            _ => Err(Error::protocol(format!("Unknown frame type: {}", value))),
        }
    }
}

/// Frames exchanged on a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Sent by the dialing side right after connect
    Hello {
        /// Host identity of the dialing side
        host: String,
        /// Role the dialing side connects as
        role: String,
        /// Protocol version spoken
        protocol_version: u32,
    },

    /// Accepting side's answer to Hello
    Welcome {
        /// Host identity of the accepting side
        host: String,
    },

    /// Heartbeat ping
    Ping {
        /// Sender clock (Unix millis)
        timestamp: i64,
    },

    /// Heartbeat pong
    Pong {
        /// Timestamp echoed from the ping
        timestamp: i64,
    },

    /// Graph envelope
    Message(Envelope),

    /// Fatal error
    Error {
        /// Error code
        code: u32,
        /// Human-readable reason
        message: String,
    },
}

impl Frame {
    /// Frame type tag
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Hello { .. } => FrameType::Hello,
            Self::Welcome { .. } => FrameType::Welcome,
            Self::Ping { .. } => FrameType::Ping,
            Self::Pong { .. } => FrameType::Pong,
            Self::Message(_) => FrameType::Message,
            Self::Error { .. } => FrameType::Error,
        }
    }

    /// Encode to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(self)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(Error::protocol(format!(
                "Frame too large: {} bytes",
                payload.len()
            )));
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
        buf.push(self.frame_type() as u8);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);

        let mut hasher = Hasher::new();
        hasher.update(&buf);
        let crc = hasher.finalize();
        buf.extend_from_slice(&crc.to_le_bytes());

        Ok(buf)
    }

    /// Decode from bytes
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN + CRC_LEN {
            return Err(Error::protocol("Frame too short"));
        }

        let crc_offset = buf.len() - CRC_LEN;
        let stored_crc = read_u32(&buf[crc_offset..]);

        let mut hasher = Hasher::new();
        hasher.update(&buf[..crc_offset]);
        let computed_crc = hasher.finalize();

        if stored_crc != computed_crc {
            return Err(Error::protocol(format!(
                "CRC mismatch: expected {:x}, got {:x}",
                stored_crc, computed_crc
            )));
        }

        let frame_type = FrameType::try_from(buf[0])?;
        let length = read_u32(&buf[1..HEADER_LEN]) as usize;
        if buf.len() != HEADER_LEN + length + CRC_LEN {
            return Err(Error::protocol("Frame length mismatch"));
        }

        let frame: Frame = serde_json::from_slice(&buf[HEADER_LEN..HEADER_LEN + length])
            .map_err(|e| Error::protocol(format!("Undecodable frame payload: {}", e)))?;

        if frame.frame_type() != frame_type {
            return Err(Error::protocol(format!(
                "Frame tagged {:?} carries {:?}",
                frame_type,
                frame.frame_type()
            )));
        }

        Ok(frame)
    }

    /// Write to an async stream
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let buf = self.encode()?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame from an async stream
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;

        let length = read_u32(&header[1..HEADER_LEN]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(Error::protocol(format!(
                "Frame too large: {} bytes",
                length
            )));
        }

        let mut rest = vec![0u8; length + CRC_LEN];
        reader.read_exact(&mut rest).await?;

        let mut full_buf = Vec::with_capacity(HEADER_LEN + rest.len());
        full_buf.extend_from_slice(&header);
        full_buf.extend_from_slice(&rest);

        Self::decode(&full_buf)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

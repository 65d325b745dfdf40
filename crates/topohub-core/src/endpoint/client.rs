//! Outgoing connections
//!
//! A dialer keeps one connection to a peer open: connect, Hello/Welcome,
//! pump until the link drops, then reconnect with exponential backoff.

use super::speaker::{ConnState, ConnStatus, Direction};
use super::EndpointInner;
use crate::protocol::{Frame, PROTOCOL_VERSION};
use crate::{Error, Result};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Role recorded for the hub on the far side of a dialed link
const PEER_ROLE: &str = "hub";

/// `host:port` of a peer, validated but not resolved
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    /// Host part
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for PeerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::config(format!("peer address '{}' has no port", s)))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::config(format!("peer address '{}' has no host", s)));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| Error::config(format!("peer address '{}' has an invalid port", s)))?;
        if port == 0 {
            return Err(Error::config(format!("peer address '{}' has port 0", s)));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

enum DialOutcome {
    /// Connection ran and then closed
    Closed,
    /// The peer turned out to be this hub
    Loopback,
    /// The endpoint stopped before the handshake finished
    Stopped,
}

fn dialer_status(peer: &PeerAddress, state: ConnState) -> ConnStatus {
    ConnStatus {
        addr: peer.to_string(),
        host: peer.to_string(),
        role: PEER_ROLE.to_string(),
        direction: Direction::Outgoing,
        state,
        connected_since: None,
        messages_received: 0,
    }
}

pub(crate) async fn dial_loop(inner: Arc<EndpointInner>, peer: PeerAddress) {
    let min_delay = inner.transport().reconnect_min();
    let max_delay = inner.transport().reconnect_max();
    let mut reconnect_delay = min_delay;

    loop {
        inner.set_dialer(&peer, Some(dialer_status(&peer, ConnState::Connecting)));

        let delay = match connect_once(&inner, &peer).await {
            Ok(DialOutcome::Stopped) => break,
            Ok(DialOutcome::Loopback) => {
                tracing::warn!("Peer {} is this hub ({}), not dialing it", peer, inner.host());
                break;
            }
            Ok(DialOutcome::Closed) => {
                reconnect_delay = min_delay;
                min_delay
            }
            Err(e) => {
                tracing::warn!(
                    "{} link to {} failed: {}. Reconnecting in {:?}",
                    inner.role(),
                    peer,
                    e,
                    reconnect_delay
                );
                let delay = reconnect_delay;
                reconnect_delay = next_delay(reconnect_delay, max_delay);
                delay
            }
        };

        inner.set_dialer(&peer, Some(dialer_status(&peer, ConnState::Disconnected)));

        tokio::select! {
            _ = inner.shutdown().cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    inner.set_dialer(&peer, None);
}

fn next_delay(current: Duration, max: Duration) -> Duration {
    std::cmp::min(current * 2, max)
}

async fn connect_once(inner: &Arc<EndpointInner>, peer: &PeerAddress) -> Result<DialOutcome> {
    tracing::debug!("{} connecting to {}", inner.role(), peer);

    // Only the handshake races shutdown; a registered speaker stops via its own token
    let (stream, addr, remote_host) = tokio::select! {
        _ = inner.shutdown().cancelled() => return Ok(DialOutcome::Stopped),
        result = handshake(inner, peer) => result?,
    };

    if remote_host == inner.host() {
        return Ok(DialOutcome::Loopback);
    }

    inner.set_dialer(peer, None);
    inner
        .run_connection(
            stream,
            addr,
            remote_host,
            PEER_ROLE.to_string(),
            Direction::Outgoing,
        )
        .await;

    Ok(DialOutcome::Closed)
}

async fn handshake(
    inner: &Arc<EndpointInner>,
    peer: &PeerAddress,
) -> Result<(TcpStream, SocketAddr, String)> {
    let timeout = inner.transport().connect_timeout();

    let mut stream = tokio::time::timeout(
        timeout,
        TcpStream::connect((peer.host(), peer.port())),
    )
    .await
    .map_err(|_| Error::transport("Connection timeout"))??;
    let addr = stream.peer_addr()?;

    let hello = Frame::Hello {
        host: inner.host().to_string(),
        role: inner.role().to_string(),
        protocol_version: PROTOCOL_VERSION,
    };
    hello.write_to(&mut stream).await?;

    let welcome = tokio::time::timeout(timeout, Frame::read_from(&mut stream))
        .await
        .map_err(|_| Error::transport("Handshake timeout"))??;

    let remote_host = match welcome {
        Frame::Welcome { host } => host,
        Frame::Error { code, message } => {
            return Err(Error::transport(format!(
                "Peer rejected: {} (code {})",
                message, code
            )));
        }
        _ => return Err(Error::protocol("Expected Welcome")),
    };

    Ok((stream, addr, remote_host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer() {
        let peer: PeerAddress = "hub-b:8082".parse().unwrap();
        assert_eq!(peer.host(), "hub-b");
        assert_eq!(peer.port(), 8082);
        assert_eq!(peer.to_string(), "hub-b:8082");
    }

    #[test]
    fn test_parse_ipv6_peer() {
        let peer: PeerAddress = "[::1]:8082".parse().unwrap();
        assert_eq!(peer.host(), "::1");
        assert_eq!(peer.to_string(), "[::1]:8082");
    }

    #[test]
    fn test_malformed_peers_rejected() {
        for bad in ["hub-b", ":8082", "hub-b:http", "hub-b:0", "hub-b:70000"] {
            let err = bad.parse::<PeerAddress>().unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{}", bad);
        }
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let max = Duration::from_secs(60);
        let mut delay = Duration::from_secs(1);
        for _ in 0..10 {
            delay = next_delay(delay, max);
        }
        assert_eq!(delay, max);
        assert_eq!(next_delay(Duration::from_secs(1), max), Duration::from_secs(2));
    }
}

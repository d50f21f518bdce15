//! Replication events and the transport that announces them to peers.

use crate::protocol::encode_request;
use crate::{Basket, CommandArgs, PeerError, Result};
use async_trait::async_trait;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationAction {
    Replicate,
    Delete,
}

impl ReplicationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replicate => "replicate",
            Self::Delete => "delete",
        }
    }

    /// Command name announced to the replication daemon.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Replicate => "REPLICATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ReplicationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationEvent {
    pub action: ReplicationAction,
    pub basket: Basket,
}

impl ReplicationEvent {
    pub fn new(action: ReplicationAction, basket: Basket) -> Self {
        Self { action, basket }
    }

    /// File name of the pending-replication marker for this event.
    pub fn marker_name(&self) -> String {
        format!("{}.{}", self.basket, self.action)
    }
}

#[async_trait]
pub trait ReplicationTransport: Send + Sync {
    async fn notify(&self, event: &ReplicationEvent) -> Result<()>;
}

/// Sends one datagram per event to the local replication daemon.
pub struct UdpReplicationTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpReplicationTransport {
    /// Binds the sending socket on `interface` (the multicast interface
    /// address) and targets the replication daemon on loopback.
    pub async fn bind(interface: Option<IpAddr>, port: u16) -> Result<Self> {
        let local = SocketAddr::new(
            interface.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            0,
        );
        let socket = UdpSocket::bind(local).await?;
        Ok(Self {
            socket,
            target: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
        })
    }

    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }
}

#[async_trait]
impl ReplicationTransport for UdpReplicationTransport {
    async fn notify(&self, event: &ReplicationEvent) -> Result<()> {
        let mut args = CommandArgs::new();
        args.insert("basket".to_string(), event.basket.to_string());
        let packet = encode_request(event.action.command(), &args)?;

        self.socket
            .send_to(packet.as_bytes(), self.target)
            .await
            .map_err(|e| PeerError::Transport(format!("{} to {}: {}", event.action, self.target, e)))?;
        Ok(())
    }
}

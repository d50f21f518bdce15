use crate::protocol::{decode_request, encode_response};
use crate::{CommandArgs, Payload, PeerError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// The client side of a request: how its command is decoded and where its
/// answer goes.
#[async_trait]
pub trait Channel: Send + Sync {
    fn parse(&self, raw: &str) -> Result<(String, CommandArgs)> {
        decode_request(raw)
    }

    async fn send(&self, command: &str, result: &Result<Payload>) -> Result<()>;

    fn peer_addr(&self) -> Option<SocketAddr>;

    /// TCP-like transports answer every request; datagram transports may
    /// stay silent.
    fn is_connection_oriented(&self) -> bool;
}

/// Answers on the write half of an accepted TCP connection. Every ticket
/// read from the connection shares the same writer.
pub struct TcpChannel {
    writer: Mutex<OwnedWriteHalf>,
    peer: Option<SocketAddr>,
}

impl TcpChannel {
    pub fn new(writer: OwnedWriteHalf, peer: Option<SocketAddr>) -> Self {
        Self {
            writer: Mutex::new(writer),
            peer,
        }
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn send(&self, command: &str, result: &Result<Payload>) -> Result<()> {
        let line = encode_response(command, result)?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PeerError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| PeerError::Transport(e.to_string()))
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn is_connection_oriented(&self) -> bool {
        true
    }
}

/// Answers a single datagram by replying to its sender.
pub struct UdpChannel {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl UdpChannel {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }
}

#[async_trait]
impl Channel for UdpChannel {
    async fn send(&self, command: &str, result: &Result<Payload>) -> Result<()> {
        let line = encode_response(command, result)?;
        self.socket
            .send_to(line.as_bytes(), self.peer)
            .await
            .map_err(|e| PeerError::Transport(e.to_string()))?;
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn is_connection_oriented(&self) -> bool {
        false
    }
}

//! Network front ends: they turn packets into tickets.

use crate::{
    Channel, Pipeline, PooledTicket, ShutdownSignal, Stage, TcpChannel, TicketPool, UdpChannel,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

const MAX_DATAGRAM: usize = 64 * 1024;

/// Longest command line accepted on a TCP connection; a longer one closes
/// the connection.
pub const MAX_COMMAND_LINE: usize = 64 * 1024;

/// Accepts TCP command connections until shutdown and queues them for the
/// connection readers.
pub async fn run_tcp_acceptor(
    listener: TcpListener,
    connections: Arc<Pipeline<TcpStream>>,
    mut shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }
                    tracing::debug!("Accepted command connection from {}", peer);
                    connections.enqueue(stream);
                }
                Err(e) => tracing::warn!("Failed to accept command connection: {}", e),
            },
        }
    }
    tracing::debug!("TCP command acceptor stopped");
}

/// Reads newline-terminated packets from one connection at a time.
pub struct TcpCommandReceiver {
    pool: Arc<TicketPool>,
    commands: Arc<Pipeline<PooledTicket>>,
    shutdown: ShutdownSignal,
}

impl TcpCommandReceiver {
    pub fn new(
        pool: Arc<TicketPool>,
        commands: Arc<Pipeline<PooledTicket>>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            pool,
            commands,
            shutdown,
        }
    }
}

#[async_trait]
impl Stage for TcpCommandReceiver {
    type Item = TcpStream;

    async fn process(&self, stream: TcpStream) {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let channel: Arc<dyn Channel> = Arc::new(TcpChannel::new(writer, peer));
        let mut lines =
            FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_COMMAND_LINE));
        let mut shutdown = self.shutdown.clone();

        loop {
            let line = tokio::select! {
                _ = shutdown.triggered() => break,
                line = lines.next() => line,
            };
            match line {
                Some(Ok(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let mut ticket = self.pool.create_ticket();
                    ticket.attach(Arc::clone(&channel), line);
                    ticket.mark();
                    self.commands.enqueue(ticket);
                }
                None => break,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    tracing::warn!(
                        "Command line from {:?} exceeds {} bytes, closing",
                        peer,
                        MAX_COMMAND_LINE
                    );
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!("Failed to read from {:?}: {}", peer, e);
                    break;
                }
            }
        }
        tracing::debug!("Command connection from {:?} closed", peer);
    }
}

/// Turns each datagram on the UDP command port into a ticket on the
/// express pipeline.
pub async fn run_udp_receiver(
    socket: Arc<UdpSocket>,
    pool: Arc<TicketPool>,
    commands: Arc<Pipeline<PooledTicket>>,
    mut shutdown: ShutdownSignal,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = tokio::select! {
            _ = shutdown.triggered() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        match received {
            Ok((len, peer)) => {
                let packet = String::from_utf8_lossy(&buf[..len]);
                let packet = packet.trim();
                if packet.is_empty() {
                    continue;
                }
                let mut ticket = pool.create_ticket();
                ticket.attach(Arc::new(UdpChannel::new(Arc::clone(&socket), peer)), packet);
                ticket.mark();
                commands.enqueue(ticket);
            }
            Err(e) => tracing::warn!("Failed to receive command datagram: {}", e),
        }
    }
    tracing::debug!("UDP command receiver stopped");
}

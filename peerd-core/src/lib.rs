//! peerd core - request pipeline of a basket storage peer
//!
//! Commands arrive over TCP or UDP and flow through fixed worker pools:
//! - command processors decode and admit them
//! - the basket status resolver decides the filesystem mutation
//! - the storage controller applies it and queues replication events
//! - response senders answer the client and return the ticket to its pool

pub mod basket;
pub mod channel;
pub mod command;
pub mod config;
pub mod console;
pub mod error;
pub mod peer;
pub mod pipeline;
pub mod protocol;
pub mod replication;
pub mod stages;
pub mod status;
pub mod storage;
pub mod ticket;
pub mod worker;

#[cfg(test)]
mod testing;

pub use basket::{Basket, BasketState};
pub use channel::{Channel, TcpChannel, UdpChannel};
pub use command::Command;
pub use config::{PeerConfig, WorkerConfig};
pub use console::{Console, TracingConsole};
pub use error::{PeerError, Result};
pub use peer::{Collaborators, Peer, Pipelines};
pub use pipeline::{Observable, Pipeline};
pub use protocol::{PROTOCOL_VERSION, decode_request, decode_response, encode_request, encode_response};
pub use replication::{ReplicationAction, ReplicationEvent, ReplicationTransport, UdpReplicationTransport};
pub use status::{ServerStatus, StatusRegister, StatusSource, admits};
pub use storage::{FsStorageExecutor, StorageExecutor, StorageRequest};
pub use ticket::{CommandArgs, Payload, PooledTicket, Ticket, TicketPool};
pub use worker::{ShutdownSignal, Stage, WorkerGroup};

//! In-memory collaborators for unit tests.

use crate::{
    Basket, Channel, Console, Payload, PeerError, ReplicationEvent, ReplicationTransport, Result,
};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Records every response instead of writing it to a socket.
pub struct TestChannel {
    connection_oriented: bool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<(String, std::result::Result<Payload, String>)>>,
}

impl TestChannel {
    pub fn tcp() -> Arc<Self> {
        Self::build(true)
    }

    pub fn udp() -> Arc<Self> {
        Self::build(false)
    }

    fn build(connection_oriented: bool) -> Arc<Self> {
        Arc::new(Self {
            connection_oriented,
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// `(command, payload or error code)` for every response sent.
    pub fn sent(&self) -> Vec<(String, std::result::Result<Payload, String>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for TestChannel {
    async fn send(&self, command: &str, result: &Result<Payload>) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PeerError::Transport("connection reset".to_string()));
        }
        let recorded = match result {
            Ok(payload) => Ok(payload.clone()),
            Err(error) => Err(error.code().to_string()),
        };
        self.sent.lock().unwrap().push((command.to_string(), recorded));
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        "127.0.0.1:40000".parse().ok()
    }

    fn is_connection_oriented(&self) -> bool {
        self.connection_oriented
    }
}

#[derive(Default)]
pub struct RecordingConsole {
    inserts: Mutex<Vec<Basket>>,
    drops: Mutex<Vec<Basket>>,
}

impl RecordingConsole {
    pub fn inserts(&self) -> Vec<Basket> {
        self.inserts.lock().unwrap().clone()
    }

    pub fn drops(&self) -> Vec<Basket> {
        self.drops.lock().unwrap().clone()
    }
}

impl Console for RecordingConsole {
    fn publish_insert(&self, basket: &Basket) {
        self.inserts.lock().unwrap().push(*basket);
    }

    fn publish_drop(&self, basket: &Basket) {
        self.drops.lock().unwrap().push(*basket);
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    fail: AtomicBool,
    events: Mutex<Vec<ReplicationEvent>>,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<ReplicationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplicationTransport for RecordingTransport {
    async fn notify(&self, event: &ReplicationEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PeerError::Transport("replication daemon unreachable".to_string()));
        }
        self.events.lock().unwrap().push(*event);
        Ok(())
    }
}

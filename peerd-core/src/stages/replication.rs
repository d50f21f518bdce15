use crate::{PeerError, ReplicationEvent, ReplicationTransport, Result, Stage};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Leaves a marker for each replication event, then tells the replication
/// daemon about it. The marker survives a lost notification.
pub struct ReplicationNotifier {
    waiting_dir: PathBuf,
    transport: Arc<dyn ReplicationTransport>,
}

impl ReplicationNotifier {
    pub fn new(waiting_dir: PathBuf, transport: Arc<dyn ReplicationTransport>) -> Result<Self> {
        if !waiting_dir.is_dir() {
            return Err(PeerError::Config(format!(
                "replication waiting directory does not exist: {}",
                waiting_dir.display()
            )));
        }
        Ok(Self {
            waiting_dir,
            transport,
        })
    }

    async fn write_marker(&self, event: &ReplicationEvent) -> Result<()> {
        let marker = self.waiting_dir.join(event.marker_name());
        tokio::fs::write(&marker, b"").await?;
        Ok(())
    }
}

#[async_trait]
impl Stage for ReplicationNotifier {
    type Item = ReplicationEvent;

    async fn process(&self, event: ReplicationEvent) {
        if let Err(e) = self.write_marker(&event).await {
            tracing::warn!(
                "Failed to write replication marker for {} {}: {}",
                event.action,
                event.basket,
                e
            );
        }
        if let Err(e) = self.transport.notify(&event).await {
            tracing::warn!(
                "Failed to notify replication of {} {}: {}",
                event.action,
                event.basket,
                e
            );
        }
    }
}

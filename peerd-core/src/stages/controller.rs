use crate::{
    Command, Console, Payload, PeerError, Pipeline, PooledTicket, ReplicationAction,
    ReplicationEvent, Result, Stage, StorageExecutor, StorageRequest, Ticket,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Applies the storage request decided upstream and announces the outcome.
pub struct StorageController {
    executor: Arc<dyn StorageExecutor>,
    console: Arc<dyn Console>,
    replication: Arc<Pipeline<ReplicationEvent>>,
    responses: Arc<Pipeline<PooledTicket>>,
}

impl StorageController {
    pub fn new(
        executor: Arc<dyn StorageExecutor>,
        console: Arc<dyn Console>,
        replication: Arc<Pipeline<ReplicationEvent>>,
        responses: Arc<Pipeline<PooledTicket>>,
    ) -> Self {
        Self {
            executor,
            console,
            replication,
            responses,
        }
    }

    async fn apply(&self, ticket: &mut Ticket) -> Result<Payload> {
        let (Some(basket), Some(command), Some(request)) =
            (ticket.basket, ticket.command_kind, ticket.request.take())
        else {
            return Err(PeerError::Internal(
                "ticket reached the storage controller without a storage request".to_string(),
            ));
        };

        self.executor.execute(&request).await?;

        let target = request.target().display().to_string();
        ticket.message = Some(format!("{}: {} {}", command, basket, target));

        let mut payload = Payload::new();
        payload.insert("basket".to_string(), json!(basket.to_string()));
        match &request {
            StorageRequest::Create { .. }
            | StorageRequest::Clone { .. }
            | StorageRequest::Finalize { .. } => {
                payload.insert("host".to_string(), json!(ticket.host));
                payload.insert("path".to_string(), json!(target));
            }
            StorageRequest::Delete { .. } | StorageRequest::Cancel { .. } => {}
        }

        match command {
            Command::Delete => {
                self.console.publish_drop(&basket);
                self.replication
                    .enqueue(ReplicationEvent::new(ReplicationAction::Delete, basket));
            }
            Command::Finalize => {
                self.console.publish_insert(&basket);
                self.replication
                    .enqueue(ReplicationEvent::new(ReplicationAction::Replicate, basket));
            }
            _ => {}
        }

        Ok(payload)
    }
}

#[async_trait]
impl Stage for StorageController {
    type Item = PooledTicket;

    async fn process(&self, mut ticket: PooledTicket) {
        ticket.mark();
        let result = self.apply(&mut ticket).await;
        if let Err(error) = &result {
            let basket = ticket.basket.map(|b| b.to_string()).unwrap_or_default();
            if error.is_client_error() {
                tracing::warn!("{} failed: {} {}", ticket.command, error, basket);
            } else {
                tracing::error!("{} failed: {} {}", ticket.command, error, basket);
            }
        }
        ticket.set_result(result);
        self.responses.enqueue(ticket);
    }
}

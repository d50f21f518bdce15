use crate::status::admits;
use crate::{
    Basket, Channel, Command, Console, Payload, PeerError, Pipeline, PooledTicket, Result, Stage,
    StatusSource,
};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Decodes a received command and decides where its ticket goes next.
pub struct CommandProcessor {
    host: String,
    storage_root: PathBuf,
    status: Arc<dyn StatusSource>,
    console: Arc<dyn Console>,
    basket_status: Arc<Pipeline<PooledTicket>>,
    responses: Arc<Pipeline<PooledTicket>>,
}

enum Route {
    Respond,
    Resolve,
    Retire,
}

impl CommandProcessor {
    pub fn new(
        host: impl Into<String>,
        storage_root: PathBuf,
        status: Arc<dyn StatusSource>,
        console: Arc<dyn Console>,
        basket_status: Arc<Pipeline<PooledTicket>>,
        responses: Arc<Pipeline<PooledTicket>>,
    ) -> Self {
        Self {
            host: host.into(),
            storage_root,
            status,
            console,
            basket_status,
            responses,
        }
    }

    async fn route(&self, ticket: &mut PooledTicket) -> Result<Route> {
        let channel = ticket
            .channel()
            .cloned()
            .ok_or_else(|| PeerError::Internal("ticket has no channel".to_string()))?;

        let (command, args) = channel.parse(ticket.raw())?;
        ticket.command = command;
        ticket.args = args;
        ticket.host = self.host.clone();
        let parsed = match ticket.args.get("basket") {
            Some(text) => Some(text.parse::<Basket>()?),
            None => None,
        };
        ticket.basket = parsed;

        let command: Command = ticket.command.parse()?;
        ticket.command_kind = Some(command);

        let basket = match ticket.basket {
            Some(basket) => Some(basket),
            None if command.requires_basket() => {
                return Err(PeerError::BadRequest(format!(
                    "{} requires a basket",
                    command
                )));
            }
            None => None,
        };

        match (command, basket) {
            (Command::Get, Some(basket)) => self.get(ticket, channel.as_ref(), basket).await,
            (Command::Nop, _) => {
                ticket.set_result(Ok(Payload::new()));
                Ok(Route::Respond)
            }
            // Owned by the replication daemon's write path.
            (Command::Insert | Command::Drop | Command::Alive, _) => Ok(Route::Retire),
            (command, _) if command.is_mutating() => self.admit(command, basket),
            (command, _) => Err(PeerError::Internal(format!(
                "no route for command {}",
                command
            ))),
        }
    }

    async fn get(
        &self,
        ticket: &mut PooledTicket,
        channel: &dyn Channel,
        basket: Basket,
    ) -> Result<Route> {
        let archived = basket.archived_path(&self.storage_root);

        if tokio::fs::try_exists(&archived).await? {
            let mut paths = serde_json::Map::new();
            paths.insert(ticket.host.clone(), json!(archived.display().to_string()));

            let mut payload = Payload::new();
            payload.insert("basket".to_string(), json!(basket.to_string()));
            payload.insert("paths".to_string(), serde_json::Value::Object(paths));
            ticket.set_result(Ok(payload));

            self.console.publish_insert(&basket);
            return Ok(Route::Respond);
        }

        if channel.is_connection_oriented() {
            return Err(PeerError::NotFound(archived.display().to_string()));
        }

        // Datagrams may be duplicated or reordered; a miss is not worth an answer.
        ticket.mark();
        tracing::debug!(
            "GET {} {} is not found",
            ticket.timing_summary(),
            basket
        );
        Ok(Route::Retire)
    }

    fn admit(&self, command: Command, basket: Option<Basket>) -> Result<Route> {
        let status = self.status.status();
        if admits(status, command) {
            return Ok(Route::Resolve);
        }

        let basket = basket.map(|b| b.to_string()).unwrap_or_default();
        tracing::warn!(
            "{}: ServerStatusError server status: {}: {}",
            command,
            status,
            basket
        );
        Err(PeerError::ServerStatus(format!("server status: {}", status)))
    }
}

#[async_trait]
impl Stage for CommandProcessor {
    type Item = PooledTicket;

    async fn process(&self, mut ticket: PooledTicket) {
        ticket.mark();
        match self.route(&mut ticket).await {
            Ok(Route::Respond) => self.responses.enqueue(ticket),
            Ok(Route::Resolve) => self.basket_status.enqueue(ticket),
            Ok(Route::Retire) => {}
            Err(error) => {
                ticket.set_result(Err(error));
                self.responses.enqueue(ticket);
            }
        }
    }
}

//! Wires pools, pipelines and stages into a running peer.

use crate::stages::{
    BasketStatusResolver, CommandProcessor, ReplicationNotifier, ResponseSender,
    StorageController, TcpCommandReceiver, run_statistics_logger, run_tcp_acceptor,
    run_udp_receiver,
};
use crate::{
    Channel, Console, Observable, PeerConfig, PeerError, Pipeline, PooledTicket,
    ReplicationEvent, ReplicationTransport, Result, StatusSource, StorageExecutor, TicketPool,
    WorkerGroup,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Every queue between stages, created once per peer.
pub struct Pipelines {
    pub connections: Arc<Pipeline<TcpStream>>,
    pub regular_commands: Arc<Pipeline<PooledTicket>>,
    pub express_commands: Arc<Pipeline<PooledTicket>>,
    pub basket_status: Arc<Pipeline<PooledTicket>>,
    pub storage_controller: Arc<Pipeline<PooledTicket>>,
    pub responses: Arc<Pipeline<PooledTicket>>,
    pub replication: Arc<Pipeline<ReplicationEvent>>,
}

impl Pipelines {
    fn new() -> Self {
        Self {
            connections: Pipeline::new("TCP command connections", "ta"),
            regular_commands: Pipeline::new("Regular commands", "rc"),
            express_commands: Pipeline::new("Express commands", "ec"),
            basket_status: Pipeline::new("Basket status queries", "bs"),
            storage_controller: Pipeline::new("Storage controller", "sm"),
            responses: Pipeline::new("Responses", "tr"),
            replication: Pipeline::new("Replication events", "re"),
        }
    }
}

/// The outside world a peer talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub status: Arc<dyn StatusSource>,
    pub executor: Arc<dyn StorageExecutor>,
    pub console: Arc<dyn Console>,
    pub transport: Arc<dyn ReplicationTransport>,
}

pub struct Peer {
    config: PeerConfig,
    collaborators: Collaborators,
    pool: Arc<TicketPool>,
    pipelines: Pipelines,
    group: Option<WorkerGroup>,
    tcp_addr: Option<SocketAddr>,
    udp_addr: Option<SocketAddr>,
}

impl Peer {
    pub fn new(config: PeerConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let pool = TicketPool::new(
            "Command ticket pool",
            "ctp",
            config.ticket_pool_capacity,
        );
        Ok(Self {
            config,
            collaborators,
            pool,
            pipelines: Pipelines::new(),
            group: None,
            tcp_addr: None,
            udp_addr: None,
        })
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn status(&self) -> Arc<dyn StatusSource> {
        Arc::clone(&self.collaborators.status)
    }

    pub fn pool(&self) -> &Arc<TicketPool> {
        &self.pool
    }

    pub fn pipelines(&self) -> &Pipelines {
        &self.pipelines
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    pub fn is_running(&self) -> bool {
        self.group.is_some()
    }

    /// The ticket pool followed by every pipeline, in flow order.
    pub fn statistics_targets(&self) -> Vec<Arc<dyn Observable>> {
        let p = &self.pipelines;
        vec![
            self.pool.clone() as Arc<dyn Observable>,
            p.connections.clone() as Arc<dyn Observable>,
            p.regular_commands.clone() as Arc<dyn Observable>,
            p.express_commands.clone() as Arc<dyn Observable>,
            p.basket_status.clone() as Arc<dyn Observable>,
            p.storage_controller.clone() as Arc<dyn Observable>,
            p.responses.clone() as Arc<dyn Observable>,
            p.replication.clone() as Arc<dyn Observable>,
        ]
    }

    /// Binds the command ports and starts every worker.
    pub async fn start(&mut self) -> Result<()> {
        let any = Ipv4Addr::UNSPECIFIED;
        let listener = TcpListener::bind((any, self.config.tcp_command_port)).await?;
        let socket = UdpSocket::bind((any, self.config.udp_command_port)).await?;
        self.tcp_addr = Some(listener.local_addr()?);
        self.udp_addr = Some(socket.local_addr()?);

        self.spawn(Some(listener), Some(Arc::new(socket)))?;
        tracing::info!(
            "Peer {} listening on tcp {} and udp {}",
            self.config.hostname_for_client,
            listener_display(self.tcp_addr),
            listener_display(self.udp_addr)
        );
        Ok(())
    }

    /// Starts the processing stages only; requests arrive through
    /// [`Peer::submit`].
    pub fn start_pipeline(&mut self) -> Result<()> {
        self.spawn(None, None)
    }

    /// Queues one raw packet as if a receiver had read it from `channel`.
    pub fn submit(&self, channel: Arc<dyn Channel>, raw: &str) {
        let commands = if channel.is_connection_oriented() {
            &self.pipelines.regular_commands
        } else {
            &self.pipelines.express_commands
        };
        let mut ticket = self.pool.create_ticket();
        ticket.attach(channel, raw);
        ticket.mark();
        commands.enqueue(ticket);
    }

    fn spawn(&mut self, listener: Option<TcpListener>, socket: Option<Arc<UdpSocket>>) -> Result<()> {
        if self.group.is_some() {
            return Err(PeerError::Internal("peer is already running".to_string()));
        }

        let config = &self.config;
        let workers = &config.workers;
        let p = &self.pipelines;
        let c = &self.collaborators;

        // Fails before anything is spawned when the waiting directory is missing.
        let notifier = ReplicationNotifier::new(config.waiting_dir.clone(), c.transport.clone())?;

        let mut group = WorkerGroup::new();

        if let Some(listener) = listener {
            let connections = p.connections.clone();
            group.spawn_service("tcp_command_acceptor", move |shutdown| {
                run_tcp_acceptor(listener, connections, shutdown)
            });
            let receiver = TcpCommandReceiver::new(
                self.pool.clone(),
                p.regular_commands.clone(),
                group.shutdown_signal(),
            );
            group.spawn_stage(
                "tcp_command_receiver",
                Arc::new(receiver),
                p.connections.clone(),
                workers.tcp_command_receiver,
            );
        }
        if let Some(socket) = socket {
            let (pool, commands) = (self.pool.clone(), p.express_commands.clone());
            group.spawn_service("udp_command_receiver", move |shutdown| {
                run_udp_receiver(socket, pool, commands, shutdown)
            });
        }

        let processor = Arc::new(CommandProcessor::new(
            config.hostname_for_client.clone(),
            config.storage_root.clone(),
            c.status.clone(),
            c.console.clone(),
            p.basket_status.clone(),
            p.responses.clone(),
        ));
        group.spawn_stage(
            "regular_command_processor",
            processor.clone(),
            p.regular_commands.clone(),
            workers.regular_command_processor,
        );
        group.spawn_stage(
            "express_command_processor",
            processor,
            p.express_commands.clone(),
            workers.express_command_processor,
        );

        let resolver = BasketStatusResolver::new(
            config.storage_root.clone(),
            c.console.clone(),
            p.storage_controller.clone(),
            p.responses.clone(),
        );
        group.spawn_stage(
            "basket_status_query",
            Arc::new(resolver),
            p.basket_status.clone(),
            workers.basket_status_query,
        );

        let controller = StorageController::new(
            c.executor.clone(),
            c.console.clone(),
            p.replication.clone(),
            p.responses.clone(),
        );
        group.spawn_stage(
            "storage_controller",
            Arc::new(controller),
            p.storage_controller.clone(),
            workers.storage_controller,
        );

        group.spawn_stage(
            "response_sender",
            Arc::new(ResponseSender::new()),
            p.responses.clone(),
            workers.response_sender,
        );
        group.spawn_stage(
            "replication_client",
            Arc::new(notifier),
            p.replication.clone(),
            workers.replication_client,
        );

        let targets = self.statistics_targets();
        let period = config.statistics_period();
        group.spawn_service("statistics_logger", move |shutdown| {
            run_statistics_logger(targets, period, shutdown)
        });

        tracing::info!(
            "Peer {} started {} workers (status: {})",
            config.hostname_for_client,
            group.workers(),
            c.status.status()
        );
        self.group = Some(group);
        Ok(())
    }

    /// Stops every worker, upstream first, letting queued work drain.
    pub async fn stop(&mut self) {
        if let Some(group) = self.group.take() {
            group.stop().await;
            tracing::info!("Peer {} stopped", self.config.hostname_for_client);
        }
    }
}

fn listener_display(addr: Option<SocketAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingConsole, RecordingTransport};
    use crate::{FsStorageExecutor, ServerStatus};

    fn collaborators() -> Collaborators {
        Collaborators {
            status: Arc::new(ServerStatus::Active),
            executor: Arc::new(FsStorageExecutor::new()),
            console: Arc::new(RecordingConsole::default()),
            transport: Arc::new(RecordingTransport::default()),
        }
    }

    #[test]
    fn test_statistics_targets_in_flow_order() {
        let peer = Peer::new(PeerConfig::new("peer01"), collaborators()).unwrap();
        let nicknames: Vec<String> = peer
            .statistics_targets()
            .iter()
            .map(|t| t.nickname().to_string())
            .collect();
        assert_eq!(nicknames, ["ctp", "ta", "rc", "ec", "bs", "sm", "tr", "re"]);
    }

    #[tokio::test]
    async fn test_missing_waiting_dir_prevents_start() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = PeerConfig::new("peer01");
        config.waiting_dir = temp_dir.path().join("missing");

        let mut peer = Peer::new(config, collaborators()).unwrap();
        assert!(matches!(peer.start_pipeline(), Err(PeerError::Config(_))));
        assert!(!peer.is_running());
    }

    #[tokio::test]
    async fn test_start_binds_and_stops() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = PeerConfig::new("peer01");
        config.storage_root = temp_dir.path().to_path_buf();
        config.waiting_dir = temp_dir.path().to_path_buf();
        config.tcp_command_port = 0;
        config.udp_command_port = 0;

        let mut peer = Peer::new(config, collaborators()).unwrap();
        peer.start().await.unwrap();
        assert!(peer.is_running());
        assert_ne!(peer.tcp_addr().unwrap().port(), 0);
        assert!(matches!(peer.start_pipeline(), Err(PeerError::Internal(_))));

        peer.stop().await;
        assert!(!peer.is_running());
    }

    #[tokio::test]
    async fn test_nop_round_trip_over_tcp() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = PeerConfig::new("peer01");
        config.storage_root = temp_dir.path().to_path_buf();
        config.waiting_dir = temp_dir.path().to_path_buf();
        config.tcp_command_port = 0;
        config.udp_command_port = 0;

        let mut peer = Peer::new(config, collaborators()).unwrap();
        peer.start().await.unwrap();
        let port = peer.tcp_addr().unwrap().port();

        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))
            .await
            .unwrap();
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(br#"["1.1","C","NOP",{}]"#)
            .await
            .unwrap();
        writer.write_all(b"\r\n").await.unwrap();

        let mut line = String::new();
        let read = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            BufReader::new(reader).read_line(&mut line),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(read > 0);
        let (command, payload) = crate::protocol::decode_response(line.trim()).unwrap();
        assert_eq!(command, "NOP");
        assert!(payload.is_empty());

        drop(writer);
        peer.stop().await;
        assert_eq!(peer.pool().in_use(), 0);
    }
}

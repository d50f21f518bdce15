use crate::{PeerError, Result, ServerStatus};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Host label reported to clients in GET and mutation payloads.
    pub hostname_for_client: String,
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    #[serde(default = "default_command_port")]
    pub tcp_command_port: u16,
    #[serde(default = "default_command_port")]
    pub udp_command_port: u16,
    #[serde(default = "default_replication_port")]
    pub replication_udp_command_port: u16,
    /// Local interface address replication datagrams are sent from.
    #[serde(default)]
    pub multicast_if: Option<IpAddr>,
    #[serde(default = "default_waiting_dir")]
    pub waiting_dir: PathBuf,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    #[serde(default = "default_statistics_period_secs")]
    pub statistics_period_secs: u64,
    #[serde(default = "default_ticket_pool_capacity")]
    pub ticket_pool_capacity: usize,
    #[serde(default = "default_initial_status")]
    pub initial_status: ServerStatus,
    #[serde(default)]
    pub workers: WorkerConfig,
}

/// Number of workers started per stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_tcp_command_receiver")]
    pub tcp_command_receiver: usize,
    #[serde(default = "default_command_processor")]
    pub regular_command_processor: usize,
    #[serde(default = "default_command_processor")]
    pub express_command_processor: usize,
    #[serde(default = "default_storage_stage")]
    pub basket_status_query: usize,
    #[serde(default = "default_storage_stage")]
    pub storage_controller: usize,
    #[serde(default = "default_storage_stage")]
    pub response_sender: usize,
    #[serde(default = "default_replication_client")]
    pub replication_client: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tcp_command_receiver: default_tcp_command_receiver(),
            regular_command_processor: default_command_processor(),
            express_command_processor: default_command_processor(),
            basket_status_query: default_storage_stage(),
            storage_controller: default_storage_stage(),
            response_sender: default_storage_stage(),
            replication_client: default_replication_client(),
        }
    }
}

impl WorkerConfig {
    fn counts(&self) -> [(&'static str, usize); 7] {
        [
            ("tcp_command_receiver", self.tcp_command_receiver),
            ("regular_command_processor", self.regular_command_processor),
            ("express_command_processor", self.express_command_processor),
            ("basket_status_query", self.basket_status_query),
            ("storage_controller", self.storage_controller),
            ("response_sender", self.response_sender),
            ("replication_client", self.replication_client),
        ]
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("/expdsk")
}

fn default_command_port() -> u16 {
    30111
}

fn default_replication_port() -> u16 {
    30149
}

fn default_waiting_dir() -> PathBuf {
    PathBuf::from("/var/peerd/replication/waiting")
}

fn default_health_port() -> u16 {
    30113
}

fn default_statistics_period_secs() -> u64 {
    60
}

fn default_ticket_pool_capacity() -> usize {
    256
}

fn default_initial_status() -> ServerStatus {
    ServerStatus::Active
}

fn default_tcp_command_receiver() -> usize {
    5
}

fn default_command_processor() -> usize {
    10
}

fn default_storage_stage() -> usize {
    3
}

fn default_replication_client() -> usize {
    1
}

impl PeerConfig {
    /// A configuration with every default and the given host label.
    pub fn new(hostname_for_client: impl Into<String>) -> Self {
        Self {
            hostname_for_client: hostname_for_client.into(),
            storage_root: default_storage_root(),
            tcp_command_port: default_command_port(),
            udp_command_port: default_command_port(),
            replication_udp_command_port: default_replication_port(),
            multicast_if: None,
            waiting_dir: default_waiting_dir(),
            health_port: default_health_port(),
            statistics_period_secs: default_statistics_period_secs(),
            ticket_pool_capacity: default_ticket_pool_capacity(),
            initial_status: default_initial_status(),
            workers: WorkerConfig::default(),
        }
    }

    /// Loads the file at `path`, then applies `PEERD_*` environment
    /// overrides (`PEERD_WORKERS__RESPONSE_SENDER=4` for nested keys).
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("PEERD")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| PeerError::Config(e.to_string()))?;

        let config: PeerConfig = settings
            .try_deserialize()
            .map_err(|e| PeerError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hostname_for_client.trim().is_empty() {
            return Err(PeerError::Config(
                "hostname_for_client must not be empty".to_string(),
            ));
        }
        if let Some((name, _)) = self.workers.counts().iter().find(|(_, count)| *count == 0) {
            return Err(PeerError::Config(format!(
                "workers.{} must be at least 1",
                name
            )));
        }
        if self.statistics_period_secs == 0 {
            return Err(PeerError::Config(
                "statistics_period_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn statistics_period(&self) -> Duration {
        Duration::from_secs(self.statistics_period_secs)
    }
}

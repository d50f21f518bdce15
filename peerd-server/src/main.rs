mod admin;

use admin::AdminState;
use anyhow::Context;
use clap::{Parser, Subcommand};
use peerd_core::{
    Collaborators, FsStorageExecutor, Peer, PeerConfig, StatusRegister, TracingConsole,
    UdpReplicationTransport,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "peerd")]
#[command(about = "Basket storage peer daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the peer
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "peerd.yaml")]
        config: String,
    },
    /// Validate a configuration file and print the effective settings
    CheckConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = "peerd.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peerd=info,peerd_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            tracing::info!("Starting peerd with config: {}", config);

            let cfg = match PeerConfig::from_file(&config) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to load config: {}", e);
                    std::process::exit(1);
                }
            };

            if let Err(e) = run_server(cfg).await {
                tracing::error!("Server error: {:#}", e);
                std::process::exit(1);
            }
        }
        Commands::CheckConfig { config } => match PeerConfig::from_file(&config) {
            Ok(cfg) => match serde_json::to_string_pretty(&cfg) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    tracing::error!("Failed to render config: {}", e);
                    std::process::exit(1);
                }
            },
            Err(e) => {
                tracing::error!("Invalid config: {}", e);
                std::process::exit(1);
            }
        },
    }
}

async fn run_server(config: PeerConfig) -> anyhow::Result<()> {
    let status = Arc::new(StatusRegister::new(config.initial_status));
    let transport =
        UdpReplicationTransport::bind(config.multicast_if, config.replication_udp_command_port)
            .await
            .context("binding replication socket")?;
    let collaborators = Collaborators {
        status: status.clone(),
        executor: Arc::new(FsStorageExecutor::new()),
        console: Arc::new(TracingConsole),
        transport: Arc::new(transport),
    };

    let health_port = config.health_port;
    let mut peer = Peer::new(config, collaborators)?;
    peer.start().await.context("starting peer")?;

    let admin_state = Arc::new(AdminState {
        host: peer.config().hostname_for_client.clone(),
        status: status.clone(),
        targets: peer.statistics_targets(),
    });
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, health_port))
        .await
        .with_context(|| format!("binding health port {}", health_port))?;
    tracing::info!("Health endpoint listening on {}", listener.local_addr()?);

    let (stop_admin, admin_stopped) = oneshot::channel::<()>();
    let admin = tokio::spawn(admin::serve(listener, admin_state, async move {
        let _ = admin_stopped.await;
    }));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown requested");

    peer.stop().await;
    let _ = stop_admin.send(());
    match admin.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Health endpoint failed: {}", e),
        Err(e) => tracing::warn!("Health endpoint task failed: {}", e),
    }
    Ok(())
}

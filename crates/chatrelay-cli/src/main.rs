//! `chatrelay` binary: loads the config, wires the relay and serves the
//! HTTP surface until Ctrl-C.

use chatrelay_agent::{gateway_for, ChatService, ModelConfig, ServiceConfig};
use chatrelay_channels::{TelegramClient, TelegramNotifier, DEFAULT_API_BASE};
use chatrelay_gateway::{GatewayServer, WebhookAuth};
use chatrelay_session::{Dispatcher, SqliteSessionStore, DEFAULT_LANES, DEFAULT_QUEUE_CAPACITY};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatrelay", about = "Chatrelay: LLM chat sessions over messaging channels")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "chatrelay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Deserialize)]
struct RelayConfig {
    model: ModelConfig,
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    session: ServiceConfig,
    #[serde(default)]
    dispatcher: DispatcherConfig,
    #[serde(default)]
    telegram: Option<TelegramConfig>,
}

#[derive(Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Deserialize)]
struct StorageConfig {
    #[serde(default = "default_database_path")]
    database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

#[derive(Deserialize)]
struct DispatcherConfig {
    #[serde(default = "default_lanes")]
    lanes: usize,
    /// Batches a lane queues before it starts dropping.
    #[serde(default = "default_queue_capacity")]
    queue_capacity: usize,
    /// Seconds queued notifications get to drain on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    shutdown_grace_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lanes: default_lanes(),
            queue_capacity: default_queue_capacity(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Deserialize)]
struct TelegramConfig {
    bot_token: String,
    #[serde(default)]
    webhook_secret: Option<String>,
    #[serde(default)]
    api_base_url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_database_path() -> PathBuf {
    PathBuf::from("./data/chatrelay.db")
}
fn default_lanes() -> usize {
    DEFAULT_LANES
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_shutdown_grace_secs() -> u64 {
    10
}

impl RelayConfig {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        if config.dispatcher.lanes == 0 {
            anyhow::bail!("dispatcher.lanes must be at least 1");
        }
        if config.dispatcher.queue_capacity == 0 {
            anyhow::bail!("dispatcher.queue_capacity must be at least 1");
        }
        config.session.validate()?;
        Ok(config)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let config_str = tokio::fs::read_to_string(&cli.config).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config file '{}': {}",
            cli.config.display(),
            e
        )
    })?;
    let config = RelayConfig::parse(&config_str)?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);

            info!("Starting chatrelay on {}:{}", host, port);

            let store = Arc::new(SqliteSessionStore::open(&config.storage.database_path)?);

            let telegram = config.telegram.as_ref().map(|t| {
                Arc::new(TelegramClient::with_api_base(
                    t.bot_token.clone(),
                    t.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE),
                ))
            });

            let mut builder = Dispatcher::builder()
                .lanes(config.dispatcher.lanes)
                .queue_capacity(config.dispatcher.queue_capacity);
            if let Some(client) = &telegram {
                builder = builder.subscribe(Arc::new(TelegramNotifier::new(client.clone())));
            } else {
                warn!("No [telegram] section, replies will not be delivered");
            }
            let dispatcher = Arc::new(builder.start());

            let gateway = gateway_for(config.model.with_env_key());
            info!(backend = gateway.name(), "Completion gateway ready");

            let service = ChatService::new(store, dispatcher.clone(), gateway, config.session);

            let auth = WebhookAuth::new(
                config
                    .telegram
                    .as_ref()
                    .and_then(|t| t.webhook_secret.clone()),
            );
            if auth.is_enabled() {
                info!("Telegram webhook secret enabled");
            }
            let app = GatewayServer::build_with_auth(service.clone(), telegram, auth);

            let addr = format!("{}:{}", host, port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("chatrelay listening on {}", addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            service.shutdown().await;
            let grace = Duration::from_secs(config.dispatcher.shutdown_grace_secs);
            if !dispatcher.shutdown_with_grace(grace).await {
                warn!(
                    grace_secs = config.dispatcher.shutdown_grace_secs,
                    "Pending notifications cancelled at shutdown"
                );
            }
            info!("chatrelay stopped");
        }
    }

    Ok(())
}

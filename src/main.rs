//! CLI for ntables
//!
//! Subcommands:
//! - `server`: run the NT4 and NT3 listeners
//! - `client`: connect to a server and log every value under a prefix

use clap::Parser;
use ntables::broker::engine::Coordinator;
use ntables::client::{EventKind, ListenerOptions, NtClient, TopicEvent};
use ntables::codec::nt4::SubscribeOptions;
use ntables::config::{Settings, load_config};
use ntables::transport::run_servers;
use ntables::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ntables")]
enum Command {
    /// Start the NT4 and NT3 servers
    Server,
    /// Subscribe to a prefix and log what arrives
    Client {
        /// Server URL; overrides the configured one
        #[arg(long)]
        url: Option<String>,
        /// Topic prefix to follow (empty follows everything)
        #[arg(long, default_value = "")]
        prefix: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return;
        }
    };
    logging::init(&settings.log.level);

    match cmd {
        Command::Server => run_server(settings).await,
        Command::Client { url, prefix } => run_client(settings, url, prefix).await,
    }
}

async fn run_server(settings: Settings) {
    let coordinator = Coordinator::shared(&settings.server.identity);
    tokio::select! {
        result = run_servers(coordinator, settings) => {
            if let Err(e) = result {
                error!("Server failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }
}

async fn run_client(settings: Settings, url: Option<String>, prefix: String) {
    let mut client_settings = settings.client;
    if let Some(url) = url {
        client_settings.url = url;
    }
    info!("following '{}' on {}", prefix, client_settings.url);

    let client = NtClient::start(client_settings);
    client.add_listener(
        |event: &TopicEvent| match event {
            TopicEvent::Value {
                name,
                value,
                timestamp,
                ..
            } => info!("{} = {:?} @ {}", name, value, timestamp),
            TopicEvent::Published { name, value_type, .. } => {
                info!("announced {} ({})", name, value_type)
            }
            TopicEvent::Unpublished { name } => info!("unannounced {}", name),
            other => info!("{:?}", other),
        },
        ListenerOptions::kinds(&[
            EventKind::Publish,
            EventKind::Unpublish,
            EventKind::ValueRemote,
            EventKind::Connected,
            EventKind::Disconnected,
        ]),
        Some(&prefix),
    );
    client.subscribe(
        vec![prefix.clone()],
        SubscribeOptions {
            prefix: true,
            ..SubscribeOptions::default()
        },
    );

    if tokio::signal::ctrl_c().await.is_err() {
        error!("Failed to wait for shutdown signal");
    }
    info!("Shutdown signal received. Exiting gracefully.");
}

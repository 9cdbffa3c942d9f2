//! CLI for mqttkit
//!
//! Connects to the configured broker, subscribes to the configured topics and
//! logs every message until interrupted.

use mqttkit::config::load_config;
use mqttkit::transport::TcpTransport;
use mqttkit::utils::logging;
use mqttkit::{Client, ClientEvent};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return;
        }
    };
    logging::init(&config.logging.level);

    if let Err(e) = run(config).await {
        error!("Client failed: {}", e);
    }
}

async fn run(config: mqttkit::config::Settings) -> mqttkit::Result<()> {
    let options = config.client_options()?;
    let qos = config.subscribe_qos()?;
    let client = Client::new(TcpTransport::new(), options);
    let mut events = client.events();

    let connack = client.connect().await?;
    info!(
        "Connected to {} as {} (session present: {})",
        config.client.url,
        client.client_id(),
        connack.session_present
    );

    for sub in client.subscribe_all(config.client.topics.clone(), qos).await? {
        info!("Subscribed to {} ({:?})", sub.topic, sub.granted);
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::Message(publish)) => {
                    info!(
                        "{} [{}]: {}",
                        publish.topic,
                        publish.qos,
                        String::from_utf8_lossy(&publish.payload)
                    );
                }
                Some(ClientEvent::StateChanged { from, to }) => {
                    info!("Connection {} -> {}", from, to);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Disconnecting.");
                break;
            }
        }
    }

    client.disconnect().await
}

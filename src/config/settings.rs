use std::time::Duration;

use serde::Deserialize;

use crate::client::ClientOptions;
use crate::packet::QoS;
use crate::utils::error::Result;

/// Top-level configuration settings for the application.
///
/// Includes settings for the MQTT client and for logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub client: ClientSettings,
    pub logging: LogSettings,
}

/// Configuration settings for the client.
///
/// Defines the broker to connect to, the session parameters and the topics
/// the binary subscribes to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    pub url: String,
    pub client_id: Option<String>,
    pub client_id_prefix: String,
    pub keepalive_secs: u16,
    pub clean: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_ms: u64,
    pub topics: Vec<String>,
    pub qos: u8,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub client: Option<PartialClientSettings>,
    pub logging: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub url: Option<String>,
    pub client_id: Option<String>,
    pub client_id_prefix: Option<String>,
    pub keepalive_secs: Option<u16>,
    pub clean: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub topics: Option<Vec<String>>,
    pub qos: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client: ClientSettings {
                url: "mqtt://127.0.0.1:1883".to_string(),
                client_id: None,
                client_id_prefix: "mqttkit".to_string(),
                keepalive_secs: 60,
                clean: true,
                username: None,
                password: None,
                connect_timeout_ms: 10_000,
                topics: vec!["#".to_string()],
                qos: 0,
            },
            logging: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fill the defaults in for everything `partial` leaves out.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Self::default();
        let client = partial.client;
        let logging = partial.logging;

        Self {
            client: ClientSettings {
                url: client
                    .as_ref()
                    .and_then(|c| c.url.clone())
                    .unwrap_or(default.client.url),
                client_id: client
                    .as_ref()
                    .and_then(|c| c.client_id.clone())
                    .or(default.client.client_id),
                client_id_prefix: client
                    .as_ref()
                    .and_then(|c| c.client_id_prefix.clone())
                    .unwrap_or(default.client.client_id_prefix),
                keepalive_secs: client
                    .as_ref()
                    .and_then(|c| c.keepalive_secs)
                    .unwrap_or(default.client.keepalive_secs),
                clean: client
                    .as_ref()
                    .and_then(|c| c.clean)
                    .unwrap_or(default.client.clean),
                username: client
                    .as_ref()
                    .and_then(|c| c.username.clone())
                    .or(default.client.username),
                password: client
                    .as_ref()
                    .and_then(|c| c.password.clone())
                    .or(default.client.password),
                connect_timeout_ms: client
                    .as_ref()
                    .and_then(|c| c.connect_timeout_ms)
                    .unwrap_or(default.client.connect_timeout_ms),
                topics: client
                    .as_ref()
                    .and_then(|c| c.topics.clone())
                    .unwrap_or(default.client.topics),
                qos: client
                    .as_ref()
                    .and_then(|c| c.qos)
                    .unwrap_or(default.client.qos),
            },
            logging: LogSettings {
                level: logging
                    .as_ref()
                    .and_then(|l| l.level.clone())
                    .unwrap_or(default.logging.level),
            },
        }
    }

    /// Build the client options described by these settings.
    pub fn client_options(&self) -> Result<ClientOptions> {
        let client = &self.client;
        let mut options = ClientOptions::parse(&client.url)?;
        options.client_id = client.client_id.clone();
        options.client_id_prefix = client.client_id_prefix.clone();
        options.keepalive = client.keepalive_secs;
        options.clean = client.clean;
        options.username = client.username.clone();
        options.password = client.password.as_ref().map(|p| p.as_bytes().to_vec());
        options.connect_timeout = Duration::from_millis(client.connect_timeout_ms);
        Ok(options)
    }

    pub fn subscribe_qos(&self) -> Result<QoS> {
        QoS::try_from(self.client.qos)
    }
}

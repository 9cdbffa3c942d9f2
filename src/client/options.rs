use std::sync::Arc;
use std::time::Duration;

use url::Url;
use uuid::Uuid;

use super::backoff::RetryOptions;
use crate::packet::{ProtocolVersion, StrictUtf8, Utf8Codec, Will};
use crate::utils::error::{Error, Result};

pub const DEFAULT_CLIENT_ID_PREFIX: &str = "mqttkit";
pub const DEFAULT_KEEPALIVE_SECS: u16 = 60;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Well-known port for a broker URL scheme.
pub fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "mqtt" => Some(1883),
        "mqtts" => Some(8883),
        "ws" => Some(80),
        "wss" => Some(443),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: Url,
    pub protocol_version: ProtocolVersion,
    /// Fixed client id. When unset one is generated from `client_id_prefix`.
    pub client_id: Option<String>,
    pub client_id_prefix: String,
    pub clean: bool,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<Will>,
    /// Seconds; 0 disables keepalive.
    pub keepalive: u16,
    pub connect_timeout: Duration,
    /// Retry policy before the first successful connect. `None` disables it.
    pub connect: Option<RetryOptions>,
    /// Retry policy after a connection is lost. `None` disables it.
    pub reconnect: Option<RetryOptions>,
    pub utf8: Arc<dyn Utf8Codec>,
}

impl ClientOptions {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            protocol_version: ProtocolVersion::default(),
            client_id: None,
            client_id_prefix: DEFAULT_CLIENT_ID_PREFIX.to_string(),
            clean: true,
            username: None,
            password: None,
            will: None,
            keepalive: DEFAULT_KEEPALIVE_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connect: Some(RetryOptions::connect_defaults()),
            reconnect: Some(RetryOptions::reconnect_defaults()),
            utf8: Arc::new(StrictUtf8),
        }
    }

    pub fn parse(url: &str) -> Result<Self> {
        Ok(Self::new(Url::parse(url)?))
    }

    /// The broker URL with the scheme's default port filled in.
    pub fn resolved_url(&self) -> Result<Url> {
        let mut url = self.url.clone();
        if url.port().is_none() {
            if let Some(port) = default_port(url.scheme()) {
                url.set_port(Some(port))
                    .map_err(|_| Error::InvalidUrl(self.url.to_string()))?;
            }
        }
        Ok(url)
    }

    pub fn generate_client_id(&self) -> String {
        match &self.client_id {
            Some(id) => id.clone(),
            None => format!("{}-{}", self.client_id_prefix, Uuid::new_v4().simple()),
        }
    }
}

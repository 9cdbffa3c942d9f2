use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use super::{Transport, TransportEvent, TransportEvents};
use crate::utils::error::{Error, Result};

const DEFAULT_PORT: u16 = 1883;
const READ_BUFFER_SIZE: usize = 4096;

/// Plain MQTT over TCP (`mqtt://host:port`).
#[derive(Debug, Default)]
pub struct TcpTransport {
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn validate_url(&self, url: &Url) -> Result<()> {
        if url.scheme() != "mqtt" {
            return Err(Error::InvalidUrl(format!(
                "tcp transport does not support scheme {:?}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::InvalidUrl(format!("{url} has no host")));
        }
        Ok(())
    }

    async fn open(&mut self, url: &Url, events: TransportEvents) -> Result<()> {
        self.validate_url(url)?;
        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (mut read_half, write_half) = stream.into_split();
        debug!("tcp connection open to {host}:{port}");

        let reader = tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
            loop {
                buf.reserve(READ_BUFFER_SIZE);
                match read_half.read_buf(&mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if events.send(TransportEvent::Data(buf.split().freeze())).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!("tcp read failed: {e}");
                        break;
                    }
                }
            }
            let _ = events.send(TransportEvent::Closed);
        });

        self.writer = Some(write_half);
        self.reader = Some(reader);
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::NotOpen)?;
        writer.write_all(bytes).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            // the peer may already be gone
            let _ = writer.shutdown().await;
        }
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

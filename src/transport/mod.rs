//! The `transport` module defines how the client reaches a broker.
//!
//! The client state machine never touches sockets. It drives a [`Transport`]
//! (open, write, close) and receives incoming bytes and unsolicited closure
//! as [`TransportEvent`]s over the channel handed to `open`. Closing the
//! transport from the client side does not emit `Closed`.

pub mod tcp;

#[cfg(test)]
pub mod mock;

pub use tcp::TcpTransport;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use crate::utils::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes read from the connection, in arrival order.
    Data(Bytes),
    /// The peer closed the connection or reading failed.
    Closed,
}

pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

#[async_trait]
pub trait Transport: Send + 'static {
    /// Reject URLs this transport cannot open.
    fn validate_url(&self, url: &Url) -> Result<()>;

    async fn open(&mut self, url: &Url, events: TransportEvents) -> Result<()>;

    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

//! The `persistence` module holds the delivery stores that back QoS 1 and 2.
//!
//! The incoming store remembers QoS 2 message ids that have been received but
//! not yet released, so a redelivered PUBLISH is acknowledged without being
//! handed to the application twice. The outgoing store keeps the last packet
//! sent for every unacknowledged message id, so it can be replayed after a
//! reconnect.
//!
//! Both come in an in-memory flavour and a `sled`-backed flavour. The client
//! only sees the traits.

pub mod memory;
pub mod sled_store;

pub use memory::{IncomingMemoryStore, OutgoingMemoryStore};
pub use sled_store::{SledIncomingStore, SledOutgoingStore};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::packet::{Packet, PublishPacket, PubrelPacket};
use crate::utils::error::Result;

/// A packet awaiting acknowledgement from the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutgoingPacket {
    Publish(PublishPacket),
    Pubrel(PubrelPacket),
}

impl OutgoingPacket {
    pub fn message_id(&self) -> Option<u16> {
        match self {
            OutgoingPacket::Publish(publish) => publish.message_id,
            OutgoingPacket::Pubrel(pubrel) => Some(pubrel.message_id),
        }
    }
}

impl From<OutgoingPacket> for Packet {
    fn from(packet: OutgoingPacket) -> Self {
        match packet {
            OutgoingPacket::Publish(publish) => Packet::Publish(publish),
            OutgoingPacket::Pubrel(pubrel) => Packet::Pubrel(pubrel),
        }
    }
}

/// In-flight QoS 2 message ids received from the peer.
#[async_trait]
pub trait IncomingStore: Send + Sync {
    async fn store(&mut self, message_id: u16) -> Result<()>;
    async fn has(&self, message_id: u16) -> Result<bool>;
    async fn discard(&mut self, message_id: u16) -> Result<()>;
}

/// Unacknowledged packets sent to the peer, keyed by message id.
///
/// Storing a packet under an id that is already present replaces it in
/// place, so a PUBREL keeps the position of the PUBLISH it follows.
#[async_trait]
pub trait OutgoingStore: Send + Sync {
    async fn store(&mut self, packet: OutgoingPacket) -> Result<()>;
    async fn discard(&mut self, message_id: u16) -> Result<()>;

    /// A fresh, finite stream over the stored packets in insertion order.
    fn iterate(&self) -> BoxStream<'static, Result<OutgoingPacket>>;
}

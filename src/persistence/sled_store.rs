//! `sled`-backed delivery stores.
//!
//! Packets are stored as JSON under a big-endian sequence number taken from
//! `Db::generate_id`, so tree order is insertion order. A second tree maps
//! message ids to their sequence number.

use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use sled::{Db, Tree};

use super::{IncomingStore, OutgoingPacket, OutgoingStore};
use crate::utils::error::Result;

pub fn open_db(path: impl AsRef<Path>) -> Result<Db> {
    Ok(sled::open(path)?)
}

#[derive(Debug, Clone)]
pub struct SledIncomingStore {
    ids: Tree,
}

impl SledIncomingStore {
    /// Open the incoming store named `name` inside `db`.
    pub fn open(db: &Db, name: &str) -> Result<Self> {
        Ok(Self {
            ids: db.open_tree(format!("{name}/incoming"))?,
        })
    }
}

#[async_trait]
impl IncomingStore for SledIncomingStore {
    async fn store(&mut self, message_id: u16) -> Result<()> {
        self.ids.insert(message_id.to_be_bytes(), Vec::new())?;
        Ok(())
    }

    async fn has(&self, message_id: u16) -> Result<bool> {
        Ok(self.ids.contains_key(message_id.to_be_bytes())?)
    }

    async fn discard(&mut self, message_id: u16) -> Result<()> {
        self.ids.remove(message_id.to_be_bytes())?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SledOutgoingStore {
    db: Db,
    packets: Tree,
    positions: Tree,
}

impl SledOutgoingStore {
    /// Open the outgoing store named `name` inside `db`.
    pub fn open(db: &Db, name: &str) -> Result<Self> {
        Ok(Self {
            db: db.clone(),
            packets: db.open_tree(format!("{name}/outgoing"))?,
            positions: db.open_tree(format!("{name}/outgoing-ids"))?,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl OutgoingStore for SledOutgoingStore {
    async fn store(&mut self, packet: OutgoingPacket) -> Result<()> {
        let Some(message_id) = packet.message_id() else {
            return Ok(());
        };
        let id_key = message_id.to_be_bytes();
        let seq_key = match self.positions.get(id_key)? {
            Some(seq) => seq,
            None => {
                let seq = sled::IVec::from(self.db.generate_id()?.to_be_bytes().to_vec());
                self.positions.insert(id_key, seq.clone())?;
                seq
            }
        };
        let serialized = serde_json::to_vec(&packet)?;
        self.packets.insert(seq_key, serialized)?;
        Ok(())
    }

    async fn discard(&mut self, message_id: u16) -> Result<()> {
        if let Some(seq) = self.positions.remove(message_id.to_be_bytes())? {
            self.packets.remove(seq)?;
        }
        Ok(())
    }

    /// Walks the tree as the stream is polled. Entries are decoded one at a
    /// time, so a caller that stops early never reads the rest.
    fn iterate(&self) -> BoxStream<'static, Result<OutgoingPacket>> {
        stream::iter(self.packets.iter().values().map(|value| {
            let value = value?;
            Ok(serde_json::from_slice(&value)?)
        }))
        .boxed()
    }
}

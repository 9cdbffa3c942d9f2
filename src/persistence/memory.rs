use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use super::{IncomingStore, OutgoingPacket, OutgoingStore};
use crate::utils::error::Result;

#[derive(Debug, Default)]
pub struct IncomingMemoryStore {
    ids: HashSet<u16>,
}

impl IncomingMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncomingStore for IncomingMemoryStore {
    async fn store(&mut self, message_id: u16) -> Result<()> {
        self.ids.insert(message_id);
        Ok(())
    }

    async fn has(&self, message_id: u16) -> Result<bool> {
        Ok(self.ids.contains(&message_id))
    }

    async fn discard(&mut self, message_id: u16) -> Result<()> {
        self.ids.remove(&message_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct OutgoingMemoryStore {
    packets: BTreeMap<u64, OutgoingPacket>,
    positions: HashMap<u16, u64>,
    next_seq: u64,
}

impl OutgoingMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

#[async_trait]
impl OutgoingStore for OutgoingMemoryStore {
    async fn store(&mut self, packet: OutgoingPacket) -> Result<()> {
        let Some(message_id) = packet.message_id() else {
            return Ok(());
        };
        let seq = match self.positions.get(&message_id) {
            Some(seq) => *seq,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.positions.insert(message_id, seq);
                seq
            }
        };
        self.packets.insert(seq, packet);
        Ok(())
    }

    async fn discard(&mut self, message_id: u16) -> Result<()> {
        if let Some(seq) = self.positions.remove(&message_id) {
            self.packets.remove(&seq);
        }
        Ok(())
    }

    fn iterate(&self) -> BoxStream<'static, Result<OutgoingPacket>> {
        let snapshot: Vec<OutgoingPacket> = self.packets.values().cloned().collect();
        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }
}

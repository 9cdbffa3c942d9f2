//! In-process transport for driving the client from tests.
//!
//! `MockTransport` is a cheap handle: the copy given to the client and the
//! copy kept by the test share state, so the test can play the broker by
//! injecting packets and inspecting what the client wrote.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use url::Url;

use super::{Transport, TransportEvent, TransportEvents};
use crate::packet::{self, Packet, PacketOptions, StrictUtf8};
use crate::utils::error::{Error, Result};

#[derive(Debug, Default)]
struct MockState {
    events: Option<TransportEvents>,
    written: BytesMut,
    fail_opens: usize,
    fail_writes: bool,
    opens: usize,
    closes: usize,
    urls: Vec<Url>,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.state().fail_opens = count;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    pub fn is_open(&self) -> bool {
        self.state().events.is_some()
    }

    pub fn opens(&self) -> usize {
        self.state().opens
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    pub fn urls(&self) -> Vec<Url> {
        self.state().urls.clone()
    }

    pub fn inject_bytes(&self, bytes: impl Into<Bytes>) {
        if let Some(events) = &self.state().events {
            let _ = events.send(TransportEvent::Data(bytes.into()));
        }
    }

    pub fn inject(&self, packet: &Packet) {
        let bytes = packet::encode(packet, &StrictUtf8, &PacketOptions::default())
            .unwrap_or_else(|e| panic!("cannot encode {packet:?}: {e}"));
        self.inject_bytes(bytes);
    }

    /// Simulate the broker dropping the connection.
    pub fn drop_connection(&self) {
        if let Some(events) = self.state().events.take() {
            let _ = events.send(TransportEvent::Closed);
        }
    }

    /// Decode and drain everything the client has written so far.
    pub fn take_sent(&self) -> Vec<Packet> {
        let mut state = self.state();
        let mut packets = Vec::new();
        while let Some(packet) = packet::decode(&mut state.written, &StrictUtf8, &PacketOptions::default())
            .unwrap_or_else(|e| panic!("client wrote an undecodable packet: {e}"))
        {
            packets.push(packet);
        }
        packets
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn validate_url(&self, _url: &Url) -> Result<()> {
        Ok(())
    }

    async fn open(&mut self, url: &Url, events: TransportEvents) -> Result<()> {
        let mut state = self.state();
        state.opens += 1;
        state.urls.push(url.clone());
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(Error::ConnectionFailed);
        }
        state.events = Some(events);
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        if state.events.is_none() {
            return Err(Error::NotOpen);
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state();
        state.closes += 1;
        state.events = None;
        Ok(())
    }
}

//! The `client` module is the MQTT client state machine.
//!
//! A [`Client`] is a cheap, cloneable handle. Every handle talks to a single
//! event loop task which owns the transport, the delivery stores and all
//! connection state. Operations return a [`Completion`] that resolves when
//! the broker acknowledges them (or immediately, where nothing needs
//! acknowledging).
//!
//! Connection states move `Offline -> Connecting -> Connected ->
//! Disconnecting -> Disconnected`. A failed or lost connection goes back to
//! `Offline` and, if the retry policy allows, a reconnect is scheduled.
//! `Disconnected` is only reached through [`Client::disconnect`].

pub mod backoff;
pub mod completion;
mod event_loop;
pub mod options;

pub use backoff::RetryOptions;
pub use completion::Completion;
pub use options::{ClientOptions, default_port};

use std::fmt;

use bytes::Bytes;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::packet::{ConnackPacket, PublishPacket, QoS, SubackReturnCode};
use crate::persistence::{IncomingMemoryStore, IncomingStore, OutgoingMemoryStore, OutgoingStore};
use crate::transport::Transport;
use crate::utils::error::Result;
use completion::{Resolver, completion};
use event_loop::ClientLoop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Offline,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Offline => "offline",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a single topic subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionState {
    Unknown,
    /// Waiting to be sent in a SUBSCRIBE.
    Pending,
    /// Sent, SUBACK outstanding.
    Unacknowledged,
    Acknowledged,
    /// Waiting to be sent in an UNSUBSCRIBE.
    UnsubscribePending,
    UnsubscribeUnacknowledged,
    UnsubscribeAcknowledged,
    /// Dropped locally without talking to the broker.
    Removed,
    /// Superseded by a later subscribe to the same topic.
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
    pub state: SubscriptionState,
    /// The broker's SUBACK return code, once acknowledged.
    pub granted: Option<SubackReturnCode>,
}

/// A topic to subscribe to, optionally with its own QoS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub topic: String,
    pub qos: Option<QoS>,
}

impl From<&str> for SubscribeRequest {
    fn from(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            qos: None,
        }
    }
}

impl From<String> for SubscribeRequest {
    fn from(topic: String) -> Self {
        Self { topic, qos: None }
    }
}

impl From<(&str, QoS)> for SubscribeRequest {
    fn from((topic, qos): (&str, QoS)) -> Self {
        Self {
            topic: topic.to_string(),
            qos: Some(qos),
        }
    }
}

impl From<(String, QoS)> for SubscribeRequest {
    fn from((topic, qos): (String, QoS)) -> Self {
        Self {
            topic,
            qos: Some(qos),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub qos: QoS,
    pub dup: bool,
    pub retain: bool,
}

impl PublishOptions {
    pub fn qos(qos: QoS) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// An application message from the broker.
    Message(PublishPacket),
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// Point-in-time view of the event loop's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub state: ConnectionState,
    pub client_id: String,
    pub subscriptions: Vec<Subscription>,
    pub reconnect_attempt: u32,
    pub ever_connected: bool,
    pub queued_publishes: usize,
    pub unresolved_publishes: usize,
}

#[derive(Debug)]
pub(crate) enum Command {
    Connect(Resolver<ConnackPacket>),
    Publish {
        topic: String,
        payload: Bytes,
        options: PublishOptions,
        done: Resolver<()>,
    },
    Subscribe {
        requests: Vec<SubscribeRequest>,
        qos: QoS,
        done: Vec<Resolver<Subscription>>,
    },
    Unsubscribe {
        topics: Vec<String>,
        done: Vec<Resolver<Subscription>>,
    },
    Disconnect(Resolver<()>),
    Listen(mpsc::UnboundedSender<ClientEvent>),
    Snapshot(Resolver<ClientSnapshot>),
}

#[derive(Debug, Clone)]
pub struct Client {
    client_id: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl Client {
    /// Create a client with in-memory delivery stores and spawn its event
    /// loop. Must be called from within a tokio runtime.
    pub fn new<T: Transport>(transport: T, options: ClientOptions) -> Self {
        Self::with_stores(
            transport,
            options,
            IncomingMemoryStore::new(),
            OutgoingMemoryStore::new(),
        )
    }

    pub fn with_stores<T, I, O>(transport: T, options: ClientOptions, incoming: I, outgoing: O) -> Self
    where
        T: Transport,
        I: IncomingStore + 'static,
        O: OutgoingStore + 'static,
    {
        let client_id = options.generate_client_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let event_loop = ClientLoop::new(
            client_id.clone(),
            options,
            Box::new(transport),
            Box::new(incoming),
            Box::new(outgoing),
            rx,
        );
        tokio::spawn(event_loop.run());

        Self {
            client_id,
            commands: tx,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Open the transport and send CONNECT. Resolves with the broker's
    /// CONNACK, possibly after retries.
    pub fn connect(&self) -> Completion<ConnackPacket> {
        self.request(Command::Connect)
    }

    /// Publish a message. While not connected the message is queued and
    /// sent after the next CONNACK.
    ///
    /// QoS 0 resolves once written, QoS 1 on PUBACK, QoS 2 on PUBCOMP.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Completion<()> {
        let topic = topic.into();
        let payload = payload.into();
        self.request(|done| Command::Publish {
            topic,
            payload,
            options,
            done,
        })
    }

    /// Subscribe to `topics`, one completion per topic. `qos` applies to
    /// requests that do not carry their own.
    pub fn subscribe<I, S>(&self, topics: I, qos: QoS) -> Vec<Completion<Subscription>>
    where
        I: IntoIterator<Item = S>,
        S: Into<SubscribeRequest>,
    {
        let requests: Vec<SubscribeRequest> = topics.into_iter().map(Into::into).collect();
        let (done, completions) = requests.iter().map(|_| completion()).unzip();
        self.send(Command::Subscribe { requests, qos, done });
        completions
    }

    pub async fn subscribe_all<I, S>(&self, topics: I, qos: QoS) -> Result<Vec<Subscription>>
    where
        I: IntoIterator<Item = S>,
        S: Into<SubscribeRequest>,
    {
        try_join_all(self.subscribe(topics, qos)).await
    }

    pub fn unsubscribe<I, S>(&self, topics: I) -> Vec<Completion<Subscription>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        let (done, completions) = topics.iter().map(|_| completion()).unzip();
        self.send(Command::Unsubscribe { topics, done });
        completions
    }

    pub async fn unsubscribe_all<I, S>(&self, topics: I) -> Result<Vec<Subscription>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        try_join_all(self.unsubscribe(topics)).await
    }

    /// Disconnect gracefully. While connecting, the disconnect happens once
    /// the attempt succeeds or fails.
    pub fn disconnect(&self) -> Completion<()> {
        self.request(Command::Disconnect)
    }

    /// Register for client events. Events are delivered to listeners in
    /// registration order, starting with the first event after this call.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Command::Listen(tx));
        rx
    }

    pub async fn snapshot(&self) -> Result<ClientSnapshot> {
        self.request(Command::Snapshot).await
    }

    fn request<T>(&self, build: impl FnOnce(Resolver<T>) -> Command) -> Completion<T> {
        let (done, completion) = completion();
        self.send(build(done));
        completion
    }

    fn send(&self, command: Command) {
        // a closed loop drops the command, which resolves its completions
        // with `ClientClosed`
        let _ = self.commands.send(command);
    }
}

#[cfg(test)]
mod tests;

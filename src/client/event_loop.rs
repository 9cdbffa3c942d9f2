use std::collections::{HashMap, HashSet, VecDeque};
use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep, sleep};
use tracing::{debug, error, warn};

use super::completion::Resolver;
use super::{
    ClientEvent, ClientOptions, ClientSnapshot, Command, ConnectionState, PublishOptions,
    SubscribeRequest, Subscription, SubscriptionState,
};
use crate::packet::{
    self, ConnackPacket, ConnectPacket, DisconnectPacket, Packet, PacketOptions, PacketType,
    PingreqPacket, PubcompPacket, PublishPacket, PubrelPacket, QoS, SubackPacket,
    SubscribePacket, SubscribeTopic, UnsubackPacket, UnsubscribePacket,
};
use crate::persistence::{IncomingStore, OutgoingPacket, OutgoingStore};
use crate::transport::{Transport, TransportEvent};
use crate::utils::error::{Error, Result};

type Timer = Option<Pin<Box<Sleep>>>;

/// A tracked subscription plus the callers waiting on it.
///
/// `key` identifies the entry across replacements of the same topic, so an
/// acknowledgement for an old batch never touches a newer entry.
struct Entry {
    key: u64,
    sub: Subscription,
    subscribe_waiter: Option<Resolver<Subscription>>,
    unsubscribe_waiters: Vec<Resolver<Subscription>>,
}

impl Entry {
    fn resolve_all(self) {
        if let Some(done) = self.subscribe_waiter {
            done.resolve(self.sub.clone());
        }
        for done in self.unsubscribe_waiters {
            done.resolve(self.sub.clone());
        }
    }
}

pub(crate) struct ClientLoop {
    client_id: String,
    options: ClientOptions,
    packet_options: PacketOptions,
    transport: Box<dyn Transport>,
    incoming: Box<dyn IncomingStore>,
    outgoing: Box<dyn OutgoingStore>,
    commands: mpsc::UnboundedReceiver<Command>,
    transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    listeners: Vec<mpsc::UnboundedSender<ClientEvent>>,

    state: ConnectionState,
    ever_connected: bool,
    disconnect_requested: bool,
    reconnect_attempt: u32,
    ping_outstanding: bool,
    last_message_id: u16,
    next_key: u64,
    buffer: BytesMut,

    entries: Vec<Entry>,
    queued_publishes: VecDeque<(PublishPacket, Resolver<()>)>,
    unresolved_publishes: HashMap<u16, Resolver<()>>,
    unacknowledged_subscribes: HashMap<u16, Vec<u64>>,
    unacknowledged_unsubscribes: HashMap<u16, Vec<u64>>,
    connect_waiters: Vec<Resolver<ConnackPacket>>,
    disconnect_waiters: Vec<Resolver<()>>,

    connect_timer: Timer,
    reconnect_timer: Timer,
    keepalive_timer: Timer,
}

async fn fire(timer: &mut Timer) {
    match timer.as_mut() {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events.as_mut() {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

impl ClientLoop {
    pub(crate) fn new(
        client_id: String,
        options: ClientOptions,
        transport: Box<dyn Transport>,
        incoming: Box<dyn IncomingStore>,
        outgoing: Box<dyn OutgoingStore>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let packet_options = PacketOptions {
            protocol_version: options.protocol_version,
        };
        Self {
            client_id,
            options,
            packet_options,
            transport,
            incoming,
            outgoing,
            commands,
            transport_events: None,
            listeners: Vec::new(),
            state: ConnectionState::Offline,
            ever_connected: false,
            disconnect_requested: false,
            reconnect_attempt: 0,
            ping_outstanding: false,
            last_message_id: 0,
            next_key: 0,
            buffer: BytesMut::new(),
            entries: Vec::new(),
            queued_publishes: VecDeque::new(),
            unresolved_publishes: HashMap::new(),
            unacknowledged_subscribes: HashMap::new(),
            unacknowledged_unsubscribes: HashMap::new(),
            connect_waiters: Vec::new(),
            disconnect_waiters: Vec::new(),
            connect_timer: None,
            reconnect_timer: None,
            keepalive_timer: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                event = next_event(&mut self.transport_events) => {
                    self.handle_transport_event(event).await;
                }
                _ = fire(&mut self.connect_timer) => {
                    self.connect_timer = None;
                    self.connect_timed_out().await;
                }
                _ = fire(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.reconnect_attempt += 1;
                    self.open_connection().await;
                }
                _ = fire(&mut self.keepalive_timer) => {
                    self.keepalive_expired().await;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }

        debug!("all client handles dropped, shutting down {}", self.client_id);
        self.stop_timers();
        if self.transport_events.is_some() {
            self.close_transport().await;
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(done) => self.connect(done).await,
            Command::Publish {
                topic,
                payload,
                options,
                done,
            } => self.publish(topic, payload, options, done).await,
            Command::Subscribe {
                requests,
                qos,
                done,
            } => self.subscribe(requests, qos, done).await,
            Command::Unsubscribe { topics, done } => self.unsubscribe(topics, done).await,
            Command::Disconnect(done) => self.disconnect(done).await,
            Command::Listen(listener) => self.listeners.push(listener),
            Command::Snapshot(done) => done.resolve(self.snapshot()),
        }
    }

    fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            state: self.state,
            client_id: self.client_id.clone(),
            subscriptions: self.entries.iter().map(|e| e.sub.clone()).collect(),
            reconnect_attempt: self.reconnect_attempt,
            ever_connected: self.ever_connected,
            queued_publishes: self.queued_publishes.len(),
            unresolved_publishes: self.unresolved_publishes.len(),
        }
    }

    // ---- connection lifecycle ----

    async fn connect(&mut self, done: Resolver<ConnackPacket>) {
        match self.state {
            ConnectionState::Offline | ConnectionState::Disconnected => {}
            state => {
                done.reject(Error::InvalidState {
                    operation: "connect",
                    state,
                });
                return;
            }
        }

        self.disconnect_requested = false;
        self.reconnect_timer = None;
        self.reconnect_attempt = 0;
        self.connect_waiters.push(done);
        self.open_connection().await;
    }

    async fn open_connection(&mut self) {
        self.set_state(ConnectionState::Connecting);
        self.buffer.clear();

        match self.try_open().await {
            Ok(()) => {
                debug!("starting connect timer for {:?}", self.options.connect_timeout);
                self.connect_timer = Some(Box::pin(sleep(self.options.connect_timeout)));
            }
            Err(e) => {
                warn!("failed to open connection: {e}");
                if self.transport_events.is_some() {
                    self.close_transport().await;
                }
                self.set_state(ConnectionState::Offline);
                self.retry_or_give_up(|| Error::ConnectionFailed);
            }
        }
    }

    async fn try_open(&mut self) -> Result<()> {
        let url = self.options.resolved_url()?;
        self.transport.validate_url(&url)?;
        debug!("opening connection to {url}");

        let (tx, rx) = mpsc::unbounded_channel();
        self.transport.open(&url, tx).await?;
        self.transport_events = Some(rx);

        let connect = self.connect_packet();
        self.send(Packet::Connect(connect)).await
    }

    fn connect_packet(&self) -> ConnectPacket {
        ConnectPacket {
            protocol_id: self.options.protocol_version.protocol_id(),
            protocol_version: self.options.protocol_version,
            client_id: self.client_id.clone(),
            clean_session: self.options.clean,
            keepalive: self.options.keepalive,
            username: self.options.username.clone(),
            password: self.options.password.clone(),
            will: self.options.will.clone(),
        }
    }

    async fn connect_timed_out(&mut self) {
        if self.state != ConnectionState::Connecting {
            warn!("connect timer fired in {} state", self.state);
            return;
        }

        warn!("no CONNACK within {:?}", self.options.connect_timeout);
        self.close_transport().await;
        self.set_state(ConnectionState::Offline);
        self.reject_connect(|| Error::ConnectTimeout);
        self.reconnect_attempt = 0;
        self.retry_or_give_up(|| Error::ConnectionFailed);
    }

    /// After a failed attempt in `Offline`: honour a deferred disconnect,
    /// otherwise schedule a reconnect or fail the pending connect.
    fn retry_or_give_up(&mut self, reason: impl Fn() -> Error) {
        if self.disconnect_requested {
            self.reject_connect(|| Error::Disconnected);
            self.finish_disconnect();
            return;
        }
        if !self.start_reconnect_timer() {
            self.reject_connect(reason);
        }
    }

    fn start_reconnect_timer(&mut self) -> bool {
        let policy = if self.ever_connected {
            self.options.reconnect
        } else {
            self.options.connect
        };
        let Some(delay) = policy.and_then(|p| p.delay(self.reconnect_attempt)) else {
            debug!("not reconnecting after attempt {}", self.reconnect_attempt);
            return false;
        };

        debug!(
            "reconnect attempt {} in {}ms",
            self.reconnect_attempt + 1,
            delay.as_millis()
        );
        self.reconnect_timer = Some(Box::pin(sleep(delay)));
        true
    }

    fn reject_connect(&mut self, reason: impl Fn() -> Error) {
        for done in self.connect_waiters.drain(..) {
            done.reject(reason());
        }
    }

    /// The transport went away without us closing it.
    async fn connection_lost(&mut self) {
        self.transport_events = None;
        self.keepalive_timer = None;
        self.connect_timer = None;
        self.ping_outstanding = false;

        if self.state == ConnectionState::Disconnecting {
            self.finish_disconnect();
            return;
        }

        self.set_state(ConnectionState::Offline);
        self.reconnect_attempt = 0;
        self.retry_or_give_up(|| Error::ConnectionFailed);
    }

    async fn fail_connection(&mut self, err: Error) {
        error!("closing connection: {err}");
        self.close_transport().await;
        self.connection_lost().await;
    }

    async fn close_transport(&mut self) {
        self.transport_events = None;
        self.ping_outstanding = false;
        if let Err(e) = self.transport.close().await {
            debug!("error closing transport: {e}");
        }
    }

    async fn disconnect(&mut self, done: Resolver<()>) {
        match self.state {
            ConnectionState::Connected => {
                self.disconnect_waiters.push(done);
                self.graceful_disconnect().await;
            }
            ConnectionState::Connecting => {
                debug!("disconnect requested while connecting");
                self.disconnect_requested = true;
                self.disconnect_waiters.push(done);
            }
            ConnectionState::Offline => {
                self.disconnect_waiters.push(done);
                self.reject_connect(|| Error::Disconnected);
                self.finish_disconnect();
            }
            state => done.reject(Error::InvalidState {
                operation: "disconnect",
                state,
            }),
        }
    }

    async fn graceful_disconnect(&mut self) {
        self.set_state(ConnectionState::Disconnecting);
        self.stop_timers();
        if let Err(e) = self.send(Packet::Disconnect(DisconnectPacket)).await {
            debug!("failed to send disconnect: {e}");
        }
        self.close_transport().await;
        self.finish_disconnect();
    }

    fn finish_disconnect(&mut self) {
        self.disconnect_requested = false;
        self.stop_timers();
        self.set_state(ConnectionState::Disconnected);
        for done in self.disconnect_waiters.drain(..) {
            done.resolve(());
        }
    }

    fn stop_timers(&mut self) {
        self.connect_timer = None;
        self.reconnect_timer = None;
        self.keepalive_timer = None;
    }

    fn set_state(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!("state change: {from} -> {to}");
        self.emit(ClientEvent::StateChanged { from, to });
    }

    fn emit(&mut self, event: ClientEvent) {
        self.listeners
            .retain(|listener| listener.send(event.clone()).is_ok());
    }

    // ---- keepalive ----

    fn keepalive_interval(&self) -> Option<Duration> {
        (self.options.keepalive > 0).then(|| Duration::from_secs(u64::from(self.options.keepalive)))
    }

    fn start_keepalive(&mut self) {
        if let Some(interval) = self.keepalive_interval() {
            self.keepalive_timer = Some(Box::pin(sleep(interval)));
        }
    }

    async fn keepalive_expired(&mut self) {
        if self.state != ConnectionState::Connected {
            self.keepalive_timer = None;
            return;
        }

        if self.ping_outstanding {
            warn!("no PINGRESP within the keepalive interval");
            self.keepalive_timer = None;
            self.close_transport().await;
            self.connection_lost().await;
            return;
        }

        match self.send(Packet::Pingreq(PingreqPacket)).await {
            Ok(()) => self.ping_outstanding = true,
            Err(e) => self.fail_connection(e).await,
        }
    }

    // ---- sending ----

    async fn send(&mut self, packet: Packet) -> Result<()> {
        let bytes = packet::encode(&packet, self.options.utf8.as_ref(), &self.packet_options)?;
        debug!("sending {}", packet.packet_type());
        self.transport.write(&bytes).await?;

        let interval = self.keepalive_interval();
        if let (false, Some(timer), Some(interval)) =
            (self.ping_outstanding, self.keepalive_timer.as_mut(), interval)
        {
            timer.as_mut().reset(Instant::now() + interval);
        }
        Ok(())
    }

    fn next_message_id(&mut self) -> u16 {
        let in_use = |id: &u16| {
            self.unresolved_publishes.contains_key(id)
                || self.unacknowledged_subscribes.contains_key(id)
                || self.unacknowledged_unsubscribes.contains_key(id)
        };

        let mut id = self.last_message_id;
        for _ in 0..u16::MAX {
            id = id.wrapping_add(1);
            if id == 0 {
                id = 1;
            }
            if !in_use(&id) {
                break;
            }
        }
        self.last_message_id = id;
        id
    }

    async fn publish(&mut self, topic: String, payload: Bytes, options: PublishOptions, done: Resolver<()>) {
        let message_id = (options.qos != QoS::AtMostOnce).then(|| self.next_message_id());
        let packet = PublishPacket {
            topic,
            payload,
            qos: options.qos,
            dup: options.dup,
            retain: options.retain,
            message_id,
        };

        if self.state == ConnectionState::Connected {
            self.send_publish(packet, done).await;
        } else {
            debug!("queueing publish to {}", packet.topic);
            self.queued_publishes.push_back((packet, done));
        }
    }

    /// Returns whether the packet reached the transport.
    async fn send_publish(&mut self, packet: PublishPacket, done: Resolver<()>) -> bool {
        let message_id = packet.message_id;
        if message_id.is_some() {
            if let Err(e) = self.outgoing.store(OutgoingPacket::Publish(packet.clone())).await {
                error!("cannot store outgoing publish: {e}");
                done.reject(e);
                return false;
            }
        }

        match self.send(Packet::Publish(packet)).await {
            Ok(()) => {
                match message_id {
                    Some(id) => {
                        self.unresolved_publishes.insert(id, done);
                    }
                    None => done.resolve(()),
                }
                true
            }
            Err(e) => {
                warn!("publish failed: {e}");
                done.reject(e);
                false
            }
        }
    }

    async fn flush_unacknowledged_publishes(&mut self) -> Result<()> {
        let mut stored = self.outgoing.iterate();
        while let Some(packet) = stored.next().await {
            let mut packet = packet?;
            if let OutgoingPacket::Publish(publish) = &mut packet {
                publish.dup = true;
            }
            self.send(Packet::from(packet)).await?;
        }
        Ok(())
    }

    async fn flush_queued_publishes(&mut self) {
        while let Some((packet, done)) = self.queued_publishes.pop_front() {
            if !self.send_publish(packet, done).await {
                break;
            }
        }
    }

    // ---- subscriptions ----

    fn position(&self, topic: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.sub.topic == topic)
    }

    fn entry_mut(&mut self, key: u64) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.key == key)
    }

    fn push_entry(&mut self, sub: Subscription) -> &mut Entry {
        let key = self.next_key;
        self.next_key += 1;
        self.entries.push(Entry {
            key,
            sub,
            subscribe_waiter: None,
            unsubscribe_waiters: Vec::new(),
        });
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    async fn subscribe(&mut self, requests: Vec<SubscribeRequest>, qos: QoS, done: Vec<Resolver<Subscription>>) {
        if matches!(
            self.state,
            ConnectionState::Disconnecting | ConnectionState::Disconnected
        ) {
            for d in done {
                d.reject(Error::InvalidState {
                    operation: "subscribe",
                    state: self.state,
                });
            }
            return;
        }

        for (request, waiter) in requests.into_iter().zip(done) {
            // a broker replaces a matching subscription, so do the same here
            if let Some(pos) = self.position(&request.topic) {
                let mut old = self.entries.remove(pos);
                old.sub.state = SubscriptionState::Replaced;
                old.resolve_all();
            }

            let entry = self.push_entry(Subscription {
                topic: request.topic,
                qos: request.qos.unwrap_or(qos),
                state: SubscriptionState::Pending,
                granted: None,
            });
            entry.subscribe_waiter = Some(waiter);
        }

        if let Err(e) = self.flush_subscriptions().await {
            self.fail_connection(e).await;
        }
    }

    async fn flush_subscriptions(&mut self) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Ok(());
        }

        let (keys, subscriptions): (Vec<u64>, Vec<SubscribeTopic>) = self
            .entries
            .iter()
            .filter(|e| e.sub.state == SubscriptionState::Pending)
            .map(|e| {
                let topic = SubscribeTopic {
                    topic: e.sub.topic.clone(),
                    qos: e.sub.qos,
                };
                (e.key, topic)
            })
            .unzip();
        if keys.is_empty() {
            return Ok(());
        }

        let message_id = self.next_message_id();
        self.send(Packet::Subscribe(SubscribePacket {
            message_id,
            subscriptions,
        }))
        .await?;

        for entry in self.entries.iter_mut().filter(|e| keys.contains(&e.key)) {
            entry.sub.state = SubscriptionState::Unacknowledged;
        }
        self.unacknowledged_subscribes.insert(message_id, keys);
        Ok(())
    }

    async fn unsubscribe(&mut self, topics: Vec<String>, done: Vec<Resolver<Subscription>>) {
        if matches!(
            self.state,
            ConnectionState::Disconnecting | ConnectionState::Disconnected
        ) {
            for d in done {
                d.reject(Error::InvalidState {
                    operation: "unsubscribe",
                    state: self.state,
                });
            }
            return;
        }

        let connected = self.state == ConnectionState::Connected;
        let persistent = !self.options.clean;

        for (topic, waiter) in topics.into_iter().zip(done) {
            let Some(pos) = self.position(&topic) else {
                let mut sub = Subscription {
                    topic,
                    qos: QoS::AtMostOnce,
                    state: SubscriptionState::Unknown,
                    granted: None,
                };
                if connected || persistent {
                    // the broker may still hold it, ask it to forget
                    sub.state = SubscriptionState::UnsubscribePending;
                    self.push_entry(sub).unsubscribe_waiters.push(waiter);
                } else {
                    sub.state = SubscriptionState::Removed;
                    waiter.resolve(sub);
                }
                continue;
            };

            let entry = &mut self.entries[pos];
            if !connected && !persistent {
                entry.sub.state = SubscriptionState::Removed;
            } else {
                entry.sub.state = match entry.sub.state {
                    SubscriptionState::Pending => SubscriptionState::Removed,
                    SubscriptionState::Unknown
                    | SubscriptionState::Unacknowledged
                    | SubscriptionState::Acknowledged => SubscriptionState::UnsubscribePending,
                    other => other,
                };
            }
            entry.unsubscribe_waiters.push(waiter);
        }

        if let Err(e) = self.flush_unsubscriptions().await {
            self.fail_connection(e).await;
        }
    }

    async fn flush_unsubscriptions(&mut self) -> Result<()> {
        let (removed, kept): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.sub.state == SubscriptionState::Removed);
        self.entries = kept;
        for entry in removed {
            entry.resolve_all();
        }

        if self.state != ConnectionState::Connected {
            return Ok(());
        }

        let (keys, topics): (Vec<u64>, Vec<String>) = self
            .entries
            .iter()
            .filter(|e| e.sub.state == SubscriptionState::UnsubscribePending)
            .map(|e| (e.key, e.sub.topic.clone()))
            .unzip();
        if keys.is_empty() {
            return Ok(());
        }

        let message_id = self.next_message_id();
        self.send(Packet::Unsubscribe(UnsubscribePacket { message_id, topics }))
            .await?;

        for entry in self.entries.iter_mut().filter(|e| keys.contains(&e.key)) {
            entry.sub.state = SubscriptionState::UnsubscribeUnacknowledged;
        }
        self.unacknowledged_unsubscribes.insert(message_id, keys);
        Ok(())
    }

    /// Bring subscription states in line with the session the broker kept.
    fn restore_subscriptions(&mut self, session_present: bool) {
        let resumed = !self.options.clean && session_present;
        for entry in &mut self.entries {
            entry.sub.state = match (resumed, entry.sub.state) {
                (true, SubscriptionState::Unacknowledged) => SubscriptionState::Pending,
                (true, SubscriptionState::UnsubscribeUnacknowledged) => {
                    SubscriptionState::UnsubscribePending
                }
                (true, other) => other,
                (
                    false,
                    SubscriptionState::UnsubscribePending | SubscriptionState::UnsubscribeUnacknowledged,
                ) => SubscriptionState::Removed,
                (false, _) => SubscriptionState::Pending,
            };
        }
    }

    // ---- receiving ----

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Data(bytes)) => self.bytes_received(&bytes).await,
            Some(TransportEvent::Closed) | None => {
                debug!("transport closed in {} state", self.state);
                self.close_transport().await;
                self.connection_lost().await;
            }
        }
    }

    async fn bytes_received(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        loop {
            let decoded = packet::decode(&mut self.buffer, self.options.utf8.as_ref(), &self.packet_options);
            let packet = match decoded {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(e) => {
                    self.fail_connection(e).await;
                    return;
                }
            };
            debug!("received {}", packet.packet_type());

            if let Err(e) = self.handle_packet(packet).await {
                self.fail_connection(e).await;
                return;
            }
            if self.transport_events.is_none() {
                // the packet closed the connection
                return;
            }
        }
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Connack(connack) => self.handle_connack(connack).await,
            Packet::Publish(publish) => self.handle_publish(publish).await,
            Packet::Puback(puback) => {
                self.publish_acknowledged(PacketType::Puback, puback.message_id)
                    .await
            }
            Packet::Pubrec(pubrec) => {
                let pubrel = PubrelPacket {
                    message_id: pubrec.message_id,
                };
                self.outgoing.store(OutgoingPacket::Pubrel(pubrel)).await?;
                self.send(Packet::Pubrel(pubrel)).await
            }
            Packet::Pubrel(pubrel) => {
                self.incoming.discard(pubrel.message_id).await?;
                self.send(Packet::Pubcomp(PubcompPacket {
                    message_id: pubrel.message_id,
                }))
                .await
            }
            Packet::Pubcomp(pubcomp) => {
                self.publish_acknowledged(PacketType::Pubcomp, pubcomp.message_id)
                    .await
            }
            Packet::Suback(suback) => self.handle_suback(suback),
            Packet::Unsuback(unsuback) => self.handle_unsuback(unsuback),
            Packet::Pingresp(_) => {
                self.ping_outstanding = false;
                Ok(())
            }
            other => Err(Error::UnexpectedPacket {
                packet_type: other.packet_type(),
                state: self.state,
            }),
        }
    }

    async fn handle_connack(&mut self, connack: ConnackPacket) -> Result<()> {
        if self.state != ConnectionState::Connecting {
            return Err(Error::UnexpectedPacket {
                packet_type: PacketType::Connack,
                state: self.state,
            });
        }
        self.connect_timer = None;

        if !connack.is_accepted() {
            warn!(
                "connection refused ({}): {}",
                connack.return_code,
                connack.reason()
            );
            self.close_transport().await;
            self.set_state(ConnectionState::Offline);
            let code = connack.return_code;
            if self.connect_waiters.is_empty() {
                // nobody asked for this attempt, so keep backing off
                self.retry_or_give_up(|| Error::ConnectionRefused(code));
                return Ok(());
            }
            self.reject_connect(|| Error::ConnectionRefused(code));
            if self.disconnect_requested {
                self.finish_disconnect();
            }
            return Ok(());
        }

        self.ever_connected = true;
        self.unacknowledged_subscribes.clear();
        self.unacknowledged_unsubscribes.clear();
        self.restore_subscriptions(connack.session_present);
        for done in self.connect_waiters.drain(..) {
            done.resolve(connack);
        }
        self.set_state(ConnectionState::Connected);

        if self.disconnect_requested {
            self.graceful_disconnect().await;
            return Ok(());
        }

        self.flush_subscriptions().await?;
        self.flush_unsubscriptions().await?;
        self.flush_unacknowledged_publishes().await?;
        self.flush_queued_publishes().await;
        self.start_keepalive();
        Ok(())
    }

    async fn handle_publish(&mut self, publish: PublishPacket) -> Result<()> {
        match publish.qos {
            QoS::AtMostOnce => {
                self.emit(ClientEvent::Message(publish));
            }
            QoS::AtLeastOnce => {
                let Some(message_id) = publish.message_id else {
                    warn!("protocol violation: qos 1 publish on {} has no message id", publish.topic);
                    return Ok(());
                };
                self.emit(ClientEvent::Message(publish));
                self.send(Packet::Puback(packet::PubackPacket { message_id }))
                    .await?;
            }
            QoS::ExactlyOnce => {
                let Some(message_id) = publish.message_id else {
                    warn!("protocol violation: qos 2 publish on {} has no message id", publish.topic);
                    return Ok(());
                };
                let deliver = !publish.dup || !self.incoming.has(message_id).await?;
                if deliver {
                    self.incoming.store(message_id).await?;
                    self.emit(ClientEvent::Message(publish));
                } else {
                    debug!("suppressing redelivered qos 2 message {message_id}");
                }
                self.send(Packet::Pubrec(packet::PubrecPacket { message_id }))
                    .await?;
            }
        }
        Ok(())
    }

    async fn publish_acknowledged(&mut self, packet_type: PacketType, message_id: u16) -> Result<()> {
        self.outgoing.discard(message_id).await?;
        match self.unresolved_publishes.remove(&message_id) {
            Some(done) => done.resolve(()),
            None => warn!("received {packet_type} with unrecognized id {message_id}"),
        }
        Ok(())
    }

    fn handle_suback(&mut self, suback: SubackPacket) -> Result<()> {
        let Some(keys) = self.unacknowledged_subscribes.remove(&suback.message_id) else {
            return Err(Error::UnrecognizedAck {
                packet_type: PacketType::Suback,
                message_id: suback.message_id,
            });
        };
        if suback.granted.len() != keys.len() {
            warn!(
                "suback {} carries {} return codes for {} topics",
                suback.message_id,
                suback.granted.len(),
                keys.len()
            );
        }

        for (i, key) in keys.iter().enumerate() {
            let Some(entry) = self.entry_mut(*key) else {
                continue;
            };
            entry.sub.granted = suback.granted.get(i).copied();
            if entry.sub.state == SubscriptionState::Unacknowledged {
                entry.sub.state = SubscriptionState::Acknowledged;
            }
            if let Some(done) = entry.subscribe_waiter.take() {
                done.resolve(entry.sub.clone());
            }
        }
        Ok(())
    }

    fn handle_unsuback(&mut self, unsuback: UnsubackPacket) -> Result<()> {
        let Some(keys) = self
            .unacknowledged_unsubscribes
            .remove(&unsuback.message_id)
        else {
            return Err(Error::UnrecognizedAck {
                packet_type: PacketType::Unsuback,
                message_id: unsuback.message_id,
            });
        };

        let keys: HashSet<u64> = keys.into_iter().collect();
        let (acknowledged, kept): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| keys.contains(&e.key));
        self.entries = kept;
        for mut entry in acknowledged {
            entry.sub.state = SubscriptionState::UnsubscribeAcknowledged;
            entry.resolve_all();
        }
        Ok(())
    }
}

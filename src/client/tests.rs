use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;

use super::*;
use crate::packet::{
    self, Packet, PacketOptions, PingrespPacket, ProtocolVersion, PubackPacket, PubcompPacket,
    PubrecPacket, PubrelPacket, StrictUtf8, SubackPacket, SubscribePacket, SubscribeTopic,
    UnsubackPacket, UnsubscribePacket,
};
use crate::transport::mock::MockTransport;
use crate::utils::error::Error;

fn options() -> ClientOptions {
    let mut options = ClientOptions::parse("mqtt://broker.test").unwrap();
    options.client_id = Some("test-client".to_string());
    options
}

fn connack(return_code: u8) -> Packet {
    Packet::Connack(ConnackPacket {
        session_present: false,
        return_code,
    })
}

/// A client that has completed CONNECT/CONNACK, with the CONNECT drained.
async fn connected_with(options: ClientOptions) -> (Client, MockTransport) {
    let transport = MockTransport::new();
    let client = Client::new(transport.clone(), options);
    let connect = client.connect();
    client.snapshot().await.unwrap();
    transport.inject(&connack(0));
    connect.await.unwrap();
    transport.take_sent();
    (client, transport)
}

async fn connected() -> (Client, MockTransport) {
    connected_with(options()).await
}

async fn listen(client: &Client) -> UnboundedReceiver<ClientEvent> {
    let events = client.events();
    client.snapshot().await.unwrap();
    events
}

fn messages(events: &mut UnboundedReceiver<ClientEvent>) -> Vec<PublishPacket> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::Message(publish) = event {
            out.push(publish);
        }
    }
    out
}

fn sent_publish(transport: &MockTransport) -> PublishPacket {
    match transport.take_sent().as_slice() {
        [Packet::Publish(publish)] => publish.clone(),
        other => panic!("expected a single publish, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_sends_connect_and_resolves_on_connack() {
    let transport = MockTransport::new();
    let client = Client::new(transport.clone(), options());
    let connect = client.connect();
    client.snapshot().await.unwrap();

    let sent = transport.take_sent();
    let [Packet::Connect(packet)] = sent.as_slice() else {
        panic!("expected CONNECT, got {sent:?}");
    };
    assert_eq!(packet.client_id, "test-client");
    assert!(packet.clean_session);
    assert_eq!(packet.keepalive, 60);
    assert_eq!(packet.protocol_version, ProtocolVersion::Mqtt311);
    assert_eq!(transport.urls()[0].port(), Some(1883));
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Connecting);

    transport.inject(&connack(0));
    let ack = connect.await.unwrap();
    assert!(ack.is_accepted());

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert!(snapshot.ever_connected);
    assert_eq!(snapshot.client_id, "test-client");
}

#[tokio::test(start_paused = true)]
async fn test_generated_client_id() {
    let mut options = options();
    options.client_id = None;
    let client = Client::new(MockTransport::new(), options);
    let id = client.client_id();
    assert!(id.starts_with("mqttkit-"));
    assert_eq!(id.len(), "mqttkit-".len() + 32);
}

#[tokio::test(start_paused = true)]
async fn test_state_changes_are_emitted() {
    let transport = MockTransport::new();
    let client = Client::new(transport.clone(), options());
    let mut events = listen(&client).await;

    let connect = client.connect();
    client.snapshot().await.unwrap();
    transport.inject(&connack(0));
    connect.await.unwrap();

    let changes: Vec<ClientEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert_eq!(
        changes,
        vec![
            ClientEvent::StateChanged {
                from: ConnectionState::Offline,
                to: ConnectionState::Connecting,
            },
            ClientEvent::StateChanged {
                from: ConnectionState::Connecting,
                to: ConnectionState::Connected,
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_when_connected_is_invalid() {
    let (client, _transport) = connected().await;
    let err = client.connect().await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            operation: "connect",
            state: ConnectionState::Connected
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_connect_refused_does_not_reconnect() {
    let transport = MockTransport::new();
    let client = Client::new(transport.clone(), options());
    let connect = client.connect();
    client.snapshot().await.unwrap();

    transport.inject(&connack(5));
    let err = connect.await.unwrap_err();
    assert!(matches!(err, Error::ConnectionRefused(5)));
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Offline);
    assert_eq!(transport.closes(), 1);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refused_reconnect_keeps_retrying() {
    let (client, transport) = connected().await;
    transport.drop_connection();
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Offline);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.opens(), 2);
    transport.inject(&connack(3));
    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Offline);
    assert_eq!(transport.closes(), 2);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(transport.opens(), 3);
    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connecting);
    assert_eq!(snapshot.reconnect_attempt, 2);

    transport.inject(&connack(0));
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_retries_until_exhausted() {
    let mut options = options();
    options.connect = Some(RetryOptions {
        retries: Some(2),
        ..RetryOptions::connect_defaults()
    });
    let transport = MockTransport::new();
    transport.fail_next_opens(10);
    let client = Client::new(transport.clone(), options);

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionFailed));
    assert_eq!(transport.opens(), 3);
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_then_success() {
    let transport = MockTransport::new();
    transport.fail_next_opens(1);
    let client = Client::new(transport.clone(), options());
    let connect = client.connect();

    sleep(Duration::from_millis(1500)).await;
    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(transport.opens(), 2);
    assert_eq!(snapshot.state, ConnectionState::Connecting);
    assert_eq!(snapshot.reconnect_attempt, 1);

    transport.inject(&connack(0));
    connect.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let mut options = options();
    options.connect = None;
    let transport = MockTransport::new();
    let client = Client::new(transport.clone(), options);

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, Error::ConnectTimeout));
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Offline);
    assert_eq!(transport.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_publish_qos0_resolves_once_written() {
    let (client, transport) = connected().await;
    client
        .publish("a/b", "hello", PublishOptions::default())
        .await
        .unwrap();

    let publish = sent_publish(&transport);
    assert_eq!(publish.topic, "a/b");
    assert_eq!(&publish.payload[..], b"hello");
    assert_eq!(publish.message_id, None);
}

#[tokio::test(start_paused = true)]
async fn test_publish_qos1_resolves_on_puback() {
    let (client, transport) = connected().await;
    let done = client.publish("t", "x", PublishOptions::qos(QoS::AtLeastOnce));
    assert_eq!(client.snapshot().await.unwrap().unresolved_publishes, 1);

    let publish = sent_publish(&transport);
    let message_id = publish.message_id.unwrap();
    assert_ne!(message_id, 0);

    transport.inject(&Packet::Puback(PubackPacket { message_id }));
    done.await.unwrap();
    assert_eq!(client.snapshot().await.unwrap().unresolved_publishes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_publish_qos2_flow() {
    let (client, transport) = connected().await;
    let done = client.publish("t", "x", PublishOptions::qos(QoS::ExactlyOnce));
    client.snapshot().await.unwrap();
    let message_id = sent_publish(&transport).message_id.unwrap();

    transport.inject(&Packet::Pubrec(PubrecPacket { message_id }));
    client.snapshot().await.unwrap();
    assert_eq!(
        transport.take_sent(),
        vec![Packet::Pubrel(PubrelPacket { message_id })]
    );

    transport.inject(&Packet::Pubcomp(PubcompPacket { message_id }));
    done.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_message_ids_are_distinct() {
    let (client, transport) = connected().await;
    let _first = client.publish("t", "1", PublishOptions::qos(QoS::AtLeastOnce));
    let _second = client.publish("t", "2", PublishOptions::qos(QoS::AtLeastOnce));
    client.snapshot().await.unwrap();

    let ids: Vec<u16> = transport
        .take_sent()
        .iter()
        .filter_map(Packet::message_id)
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert!(ids.iter().all(|id| *id != 0));
}

#[tokio::test(start_paused = true)]
async fn test_queued_publish_sent_after_connack() {
    let transport = MockTransport::new();
    let client = Client::new(transport.clone(), options());
    let queued = client.publish("queued", "1", PublishOptions::qos(QoS::AtLeastOnce));
    assert_eq!(client.snapshot().await.unwrap().queued_publishes, 1);

    let connect = client.connect();
    client.snapshot().await.unwrap();
    transport.inject(&connack(0));
    connect.await.unwrap();
    let _newer = client.publish("newer", "2", PublishOptions::qos(QoS::AtLeastOnce));
    client.snapshot().await.unwrap();

    let sent = transport.take_sent();
    let topics: Vec<&str> = sent
        .iter()
        .filter_map(|p| match p {
            Packet::Publish(publish) => Some(publish.topic.as_str()),
            _ => None,
        })
        .collect();
    assert!(matches!(sent[0], Packet::Connect(_)));
    assert_eq!(topics, vec!["queued", "newer"]);

    let queued_id = sent[1].message_id().unwrap();
    assert_ne!(queued_id, 0);
    transport.inject(&Packet::Puback(PubackPacket {
        message_id: queued_id,
    }));
    queued.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_rejects_publish() {
    let (client, transport) = connected().await;
    transport.fail_writes(true);
    let err = client
        .publish("t", "x", PublishOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[tokio::test(start_paused = true)]
async fn test_incoming_qos0_and_qos1() {
    let (client, transport) = connected().await;
    let mut events = listen(&client).await;

    transport.inject(&Packet::Publish(PublishPacket::new("a", "zero", QoS::AtMostOnce)));
    let mut qos1 = PublishPacket::new("b", "one", QoS::AtLeastOnce);
    qos1.message_id = Some(3);
    transport.inject(&Packet::Publish(qos1));
    client.snapshot().await.unwrap();

    let received = messages(&mut events);
    assert_eq!(received.len(), 2);
    assert_eq!(&received[0].payload[..], b"zero");
    assert_eq!(received[1].topic, "b");
    assert_eq!(
        transport.take_sent(),
        vec![Packet::Puback(PubackPacket { message_id: 3 })]
    );
}

#[tokio::test(start_paused = true)]
async fn test_chunked_packets_are_reassembled_in_order() {
    let (client, transport) = connected().await;
    let mut events = listen(&client).await;

    let mut stream = Vec::new();
    for (topic, message_id) in [("a", 5), ("b", 6)] {
        let mut publish = PublishPacket::new(topic, "x", QoS::AtLeastOnce);
        publish.message_id = Some(message_id);
        let bytes = packet::encode(&Packet::Publish(publish), &StrictUtf8, &PacketOptions::default()).unwrap();
        stream.extend_from_slice(&bytes);
    }
    // 8 bytes per packet, so one of the 3-byte chunks straddles both
    let (head, tail) = stream.split_at(4);
    for byte in head {
        transport.inject_bytes(vec![*byte]);
    }
    for chunk in tail.chunks(3) {
        transport.inject_bytes(chunk.to_vec());
    }
    client.snapshot().await.unwrap();

    let topics: Vec<String> = messages(&mut events).into_iter().map(|m| m.topic).collect();
    assert_eq!(topics, ["a", "b"]);
    assert_eq!(
        transport.take_sent(),
        vec![
            Packet::Puback(PubackPacket { message_id: 5 }),
            Packet::Puback(PubackPacket { message_id: 6 }),
        ]
    );
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_qos2_duplicate_delivered_once() {
    let (client, transport) = connected().await;
    let mut events = listen(&client).await;

    let mut publish = PublishPacket::new("t", "once", QoS::ExactlyOnce);
    publish.message_id = Some(7);
    publish.dup = true;
    transport.inject(&Packet::Publish(publish.clone()));
    transport.inject(&Packet::Publish(publish));
    client.snapshot().await.unwrap();

    assert_eq!(messages(&mut events).len(), 1);
    assert_eq!(
        transport.take_sent(),
        vec![
            Packet::Pubrec(PubrecPacket { message_id: 7 }),
            Packet::Pubrec(PubrecPacket { message_id: 7 }),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_pubrel_releases_incoming_id() {
    let (client, transport) = connected().await;
    let mut events = listen(&client).await;

    let mut publish = PublishPacket::new("t", "x", QoS::ExactlyOnce);
    publish.message_id = Some(9);
    transport.inject(&Packet::Publish(publish.clone()));
    transport.inject(&Packet::Pubrel(PubrelPacket { message_id: 9 }));
    client.snapshot().await.unwrap();
    assert_eq!(
        transport.take_sent(),
        vec![
            Packet::Pubrec(PubrecPacket { message_id: 9 }),
            Packet::Pubcomp(PubcompPacket { message_id: 9 }),
        ]
    );

    // once released, the same id is a new message even when flagged dup
    publish.dup = true;
    transport.inject(&Packet::Publish(publish));
    client.snapshot().await.unwrap();
    assert_eq!(messages(&mut events).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_suback_correlation() {
    let (client, transport) = connected().await;
    let pending = client.subscribe(["a", "b"], QoS::AtLeastOnce);
    let snapshot = client.snapshot().await.unwrap();
    assert!(
        snapshot
            .subscriptions
            .iter()
            .all(|s| s.state == SubscriptionState::Unacknowledged)
    );

    let sent = transport.take_sent();
    let [Packet::Subscribe(SubscribePacket {
        message_id,
        subscriptions,
    })] = sent.as_slice()
    else {
        panic!("expected SUBSCRIBE, got {sent:?}");
    };
    assert_eq!(
        subscriptions,
        &vec![
            SubscribeTopic {
                topic: "a".to_string(),
                qos: QoS::AtLeastOnce,
            },
            SubscribeTopic {
                topic: "b".to_string(),
                qos: QoS::AtLeastOnce,
            },
        ]
    );

    transport.inject(&Packet::Suback(SubackPacket {
        message_id: *message_id,
        granted: vec![
            SubackReturnCode::Success(QoS::AtMostOnce),
            SubackReturnCode::Success(QoS::AtLeastOnce),
        ],
    }));
    let subs = futures::future::try_join_all(pending).await.unwrap();
    assert_eq!(subs[0].topic, "a");
    assert_eq!(subs[0].state, SubscriptionState::Acknowledged);
    assert_eq!(subs[0].granted, Some(SubackReturnCode::Success(QoS::AtMostOnce)));
    assert_eq!(subs[1].topic, "b");
    assert_eq!(subs[1].state, SubscriptionState::Acknowledged);
    assert_eq!(subs[1].granted, Some(SubackReturnCode::Success(QoS::AtLeastOnce)));
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_per_topic_qos() {
    let (client, transport) = connected().await;
    let _pending = client.subscribe(
        vec![SubscribeRequest::from(("a", QoS::ExactlyOnce)), "b".into()],
        QoS::AtMostOnce,
    );
    client.snapshot().await.unwrap();

    let sent = transport.take_sent();
    let [Packet::Subscribe(subscribe)] = sent.as_slice() else {
        panic!("expected SUBSCRIBE, got {sent:?}");
    };
    let qos: Vec<QoS> = subscribe.subscriptions.iter().map(|s| s.qos).collect();
    assert_eq!(qos, vec![QoS::ExactlyOnce, QoS::AtMostOnce]);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_while_offline_sent_on_connect() {
    let transport = MockTransport::new();
    let client = Client::new(transport.clone(), options());
    let pending = client.subscribe(["a"], QoS::AtMostOnce);
    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.subscriptions[0].state, SubscriptionState::Pending);

    let connect = client.connect();
    client.snapshot().await.unwrap();
    transport.inject(&connack(0));
    connect.await.unwrap();

    let sent = transport.take_sent();
    assert_eq!(sent.len(), 2);
    let Packet::Subscribe(subscribe) = &sent[1] else {
        panic!("expected SUBSCRIBE, got {:?}", sent[1]);
    };
    transport.inject(&Packet::Suback(SubackPacket {
        message_id: subscribe.message_id,
        granted: vec![SubackReturnCode::Success(QoS::AtMostOnce)],
    }));
    let subs = futures::future::try_join_all(pending).await.unwrap();
    assert_eq!(subs[0].state, SubscriptionState::Acknowledged);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_replaces_existing_topic() {
    let (client, transport) = connected().await;
    let mut first = client.subscribe(["a"], QoS::AtMostOnce);
    let mut second = client.subscribe(["a"], QoS::AtLeastOnce);

    let replaced = first.remove(0).await.unwrap();
    assert_eq!(replaced.state, SubscriptionState::Replaced);
    assert_eq!(replaced.qos, QoS::AtMostOnce);
    client.snapshot().await.unwrap();

    let ids: Vec<u16> = transport
        .take_sent()
        .iter()
        .filter_map(Packet::message_id)
        .collect();
    assert_eq!(ids.len(), 2);

    // the first batch's ack no longer touches the replacement
    transport.inject(&Packet::Suback(SubackPacket {
        message_id: ids[0],
        granted: vec![SubackReturnCode::Success(QoS::AtMostOnce)],
    }));
    transport.inject(&Packet::Suback(SubackPacket {
        message_id: ids[1],
        granted: vec![SubackReturnCode::Success(QoS::AtLeastOnce)],
    }));
    let current = second.remove(0).await.unwrap();
    assert_eq!(current.state, SubscriptionState::Acknowledged);
    assert_eq!(current.qos, QoS::AtLeastOnce);
    assert_eq!(client.snapshot().await.unwrap().subscriptions.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_suback_closes_connection() {
    let (client, transport) = connected().await;
    transport.inject(&Packet::Suback(SubackPacket {
        message_id: 99,
        granted: vec![SubackReturnCode::Failure],
    }));

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Offline);
    assert_eq!(transport.closes(), 1);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.opens(), 2);
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_bytes_close_connection() {
    let (client, transport) = connected().await;
    // reserved packet type 0
    transport.inject_bytes(vec![0x00, 0x00]);
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Offline);
    assert_eq!(transport.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stray_acks_and_idless_publish_are_dropped() {
    let (client, transport) = connected().await;
    let mut events = listen(&client).await;

    transport.inject(&Packet::Puback(PubackPacket { message_id: 999 }));
    transport.inject(&Packet::Pubcomp(PubcompPacket { message_id: 998 }));
    // QoS 1 PUBLISH on topic "t" carrying message id 0
    transport.inject_bytes(vec![0x32, 5, 0, 1, b't', 0, 0]);

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert!(messages(&mut events).is_empty());
    assert!(transport.take_sent().is_empty());
    assert_eq!(transport.closes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_flow() {
    let (client, transport) = connected().await;
    let mut pending = client.subscribe(["a"], QoS::AtMostOnce);
    client.snapshot().await.unwrap();
    let subscribe_id = transport.take_sent()[0].message_id().unwrap();
    transport.inject(&Packet::Suback(SubackPacket {
        message_id: subscribe_id,
        granted: vec![SubackReturnCode::Success(QoS::AtMostOnce)],
    }));
    pending.remove(0).await.unwrap();

    let mut removing = client.unsubscribe(["a"]);
    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(
        snapshot.subscriptions[0].state,
        SubscriptionState::UnsubscribeUnacknowledged
    );
    let sent = transport.take_sent();
    let [Packet::Unsubscribe(UnsubscribePacket { message_id, topics })] = sent.as_slice() else {
        panic!("expected UNSUBSCRIBE, got {sent:?}");
    };
    assert_eq!(topics, &vec!["a".to_string()]);

    transport.inject(&Packet::Unsuback(UnsubackPacket {
        message_id: *message_id,
    }));
    let removed = removing.remove(0).await.unwrap();
    assert_eq!(removed.state, SubscriptionState::UnsubscribeAcknowledged);
    assert!(client.snapshot().await.unwrap().subscriptions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_unknown_topic_offline() {
    let transport = MockTransport::new();
    let client = Client::new(transport.clone(), options());
    let removed = client.unsubscribe_all(["nope"]).await.unwrap();
    assert_eq!(removed[0].topic, "nope");
    assert_eq!(removed[0].state, SubscriptionState::Removed);
    assert!(transport.take_sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_unknown_topic_connected_asks_broker() {
    let (client, transport) = connected().await;
    let mut removing = client.unsubscribe(["ghost"]);
    client.snapshot().await.unwrap();
    let message_id = transport.take_sent()[0].message_id().unwrap();

    transport.inject(&Packet::Unsuback(UnsubackPacket { message_id }));
    let removed = removing.remove(0).await.unwrap();
    assert_eq!(removed.state, SubscriptionState::UnsubscribeAcknowledged);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_pending_subscription_offline() {
    let client = Client::new(MockTransport::new(), options());
    let mut subscribing = client.subscribe(["a"], QoS::AtMostOnce);
    let mut removing = client.unsubscribe(["a"]);

    assert_eq!(
        removing.remove(0).await.unwrap().state,
        SubscriptionState::Removed
    );
    assert_eq!(
        subscribing.remove(0).await.unwrap().state,
        SubscriptionState::Removed
    );
    assert!(client.snapshot().await.unwrap().subscriptions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_when_connected() {
    let (client, transport) = connected().await;
    client.disconnect().await.unwrap();

    assert_eq!(
        transport.take_sent(),
        vec![Packet::Disconnect(crate::packet::DisconnectPacket)]
    );
    assert_eq!(transport.closes(), 1);
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Disconnected);

    let err = client.subscribe_all(["a"], QoS::AtMostOnce).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    let err = client.disconnect().await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            operation: "disconnect",
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting() {
    let transport = MockTransport::new();
    let client = Client::new(transport.clone(), options());
    let connect = client.connect();
    let disconnect = client.disconnect();
    client.snapshot().await.unwrap();
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Connecting);

    transport.inject(&connack(0));
    connect.await.unwrap();
    disconnect.await.unwrap();

    let sent = transport.take_sent();
    assert!(matches!(sent.as_slice(), [Packet::Connect(_), Packet::Disconnect(_)]));
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting_and_attempt_fails() {
    let mut options = options();
    options.connect = None;
    let transport = MockTransport::new();
    let client = Client::new(transport.clone(), options);
    let connect = client.connect();
    let disconnect = client.disconnect();
    client.snapshot().await.unwrap();

    transport.drop_connection();
    disconnect.await.unwrap();
    assert!(connect.await.is_err());
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_when_offline_stops_reconnecting() {
    let transport = MockTransport::new();
    transport.fail_next_opens(1);
    let client = Client::new(transport.clone(), options());
    let connect = client.connect();
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Offline);

    client.disconnect().await.unwrap();
    assert!(matches!(connect.await.unwrap_err(), Error::Disconnected));
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Disconnected);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_connection_lost() {
    let (client, transport) = connected().await;
    let mut pending = client.subscribe(["a"], QoS::AtMostOnce);
    let publish = client.publish("t", "x", PublishOptions::qos(QoS::AtLeastOnce));
    client.snapshot().await.unwrap();
    let sent = transport.take_sent();
    let subscribe_id = sent[0].message_id().unwrap();
    let publish_id = sent[1].message_id().unwrap();
    transport.inject(&Packet::Suback(SubackPacket {
        message_id: subscribe_id,
        granted: vec![SubackReturnCode::Success(QoS::AtMostOnce)],
    }));
    pending.remove(0).await.unwrap();

    transport.drop_connection();
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Offline);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.opens(), 2);
    transport.inject(&connack(0));
    client.snapshot().await.unwrap();

    let sent = transport.take_sent();
    assert!(matches!(sent[0], Packet::Connect(_)));
    // a clean session forgets subscriptions, so they are sent again
    assert!(matches!(sent[1], Packet::Subscribe(_)));
    let Packet::Publish(replayed) = &sent[2] else {
        panic!("expected replayed PUBLISH, got {:?}", sent[2]);
    };
    assert!(replayed.dup);
    assert_eq!(replayed.message_id, Some(publish_id));

    transport.inject(&Packet::Puback(PubackPacket {
        message_id: publish_id,
    }));
    publish.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_sends_pingreq() {
    let mut options = options();
    options.keepalive = 5;
    let (client, transport) = connected_with(options).await;

    sleep(Duration::from_millis(5010)).await;
    assert_eq!(transport.take_sent(), vec![Packet::Pingreq(crate::packet::PingreqPacket)]);

    transport.inject(&Packet::Pingresp(PingrespPacket));
    client.snapshot().await.unwrap();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.take_sent(), vec![Packet::Pingreq(crate::packet::PingreqPacket)]);
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_ping_reconnects() {
    let mut options = options();
    options.keepalive = 5;
    let (client, transport) = connected_with(options).await;

    sleep(Duration::from_millis(5010)).await;
    assert_eq!(transport.take_sent().len(), 1);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Offline);
    assert_eq!(transport.closes(), 1);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_client_closes_transport() {
    let (client, transport) = connected().await;
    drop(client);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.closes(), 1);
    assert!(!transport.is_open());
}

#[test]
fn test_backoff_schedule_is_monotonic() {
    let policy = RetryOptions::connect_defaults();
    let delays: Vec<Duration> = (0..12).map(|k| policy.delay(k).unwrap()).collect();
    assert_eq!(delays[0], Duration::from_millis(1000));
    assert_eq!(delays[1], Duration::from_millis(1100));
    assert_eq!(delays[2], Duration::from_millis(1210));
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(delays[11], Duration::from_millis(2000));
}

#[test]
fn test_backoff_jitter_stays_below_next_step() {
    let policy = RetryOptions {
        max_delay: Duration::from_secs(3600),
        ..RetryOptions::reconnect_defaults()
    };
    for k in 0..10 {
        let high = policy.delay_with(k, 0.999).unwrap();
        let next_low = policy.delay_with(k + 1, 0.0).unwrap();
        assert!(high <= next_low, "attempt {k}: {high:?} > {next_low:?}");
        assert!(policy.delay_with(k, 0.0).unwrap() <= policy.delay(k).unwrap());
    }
}

#[test]
fn test_backoff_respects_retry_limit() {
    let policy = RetryOptions {
        retries: Some(3),
        ..RetryOptions::connect_defaults()
    };
    assert!(policy.delay(2).is_some());
    assert_eq!(policy.delay(3), None);
}

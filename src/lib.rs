//! # mqttkit
//!
//! `mqttkit` is an MQTT 3.1 / 3.1.1 client toolkit built with Rust and tokio.
//! It pairs a complete binary packet codec with a transport-agnostic client
//! that tracks subscriptions, delivers QoS 1 and 2 messages, reconnects with
//! backoff and keeps the connection alive.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `packet`: Encodes and decodes every MQTT control packet.
//! - `client`: The client handle and the event loop that runs the protocol.
//! - `persistence`: Stores for in-flight QoS 1/2 state, in memory or backed by sled.
//! - `transport`: The byte transport the client drives, with a TCP implementation.
//! - `config`: Handles loading and managing client configuration.
//! - `utils`: Contains shared utilities, such as error handling and logging.

pub mod client;
pub mod config;
pub mod packet;
pub mod persistence;
pub mod transport;
pub mod utils;

pub use client::{
    Client, ClientEvent, ClientOptions, ClientSnapshot, Completion, ConnectionState,
    PublishOptions, RetryOptions, SubscribeRequest, Subscription, SubscriptionState,
};
pub use packet::{Packet, QoS};
pub use utils::error::{Error, Result};

//! The `error` module defines the error type shared by every layer of
//! `mqttkit`: packet decoding, the delivery stores, transports and the client.
//!
//! Running out of buffered bytes while framing a packet is not an error; the
//! codec reports it as `Ok(None)` and the caller waits for more input.

use thiserror::Error;

use crate::client::ConnectionState;
use crate::packet::PacketType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed length")]
    MalformedLength,

    #[error("packet too short")]
    PacketTooShort,

    #[error("packet too large: remaining length {0} exceeds 268435455")]
    PacketTooLarge(usize),

    #[error("field of {0} bytes does not fit a 16-bit length prefix")]
    FieldTooLong(usize),

    #[error("invalid header flag bits 0x{actual:x}, must be 0x{expected:x} for {packet_type} packet")]
    InvalidHeaderFlags {
        packet_type: PacketType,
        expected: u8,
        actual: u8,
    },

    #[error("unsupported packet type {0}")]
    UnsupportedPacketType(u8),

    #[error("invalid protocol id {0:?}")]
    InvalidProtocolId(String),

    #[error("unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("invalid qos {0}")]
    InvalidQoS(u8),

    #[error("invalid suback return code 0x{0:02x}")]
    InvalidSubackQoS(u8),

    #[error("invalid connect flags: {0}")]
    InvalidConnectFlags(&'static str),

    #[error("invalid connack flags 0x{0:02x}")]
    InvalidConnackFlags(u8),

    #[error("publish with qos {0} must carry a non-zero message id")]
    MissingMessageId(u8),

    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    #[error("invalid utf-8 string")]
    InvalidUtf8,

    #[error("should not {operation} in {state} state")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("received {packet_type} with unrecognized id {message_id}")]
    UnrecognizedAck {
        packet_type: PacketType,
        message_id: u16,
    },

    #[error("unexpected {packet_type} packet in {state} state")]
    UnexpectedPacket {
        packet_type: PacketType,
        state: ConnectionState,
    },

    #[error("connection failed")]
    ConnectionFailed,

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("connection refused with return code {0}")]
    ConnectionRefused(u8),

    #[error("client disconnected")]
    Disconnected,

    #[error("client event loop has shut down")]
    ClientClosed,

    #[error("no open connection")]
    NotOpen,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

//! The `packet` module implements the MQTT 3.1 / 3.1.1 wire format.
//!
//! Each control packet type has its own codec module exposing `encode` (into
//! any `BufMut`) and `decode` (from any `Buf`) on the packet struct. This
//! module frames a `BytesMut` into packets (`decode_header`, `decode`) and
//! dispatches encoding (`encode`, `encode_to`).
//!
//! A buffer that does not yet hold a whole packet decodes to `Ok(None)`.
//! Anything structurally wrong is an error.

pub mod basic;
pub mod connack;
pub mod connect;
pub mod disconnect;
pub mod length;
pub mod pingreq;
pub mod pingresp;
pub mod puback;
pub mod pubcomp;
pub mod publish;
pub mod pubrec;
pub mod pubrel;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;
pub mod utf8;

pub use basic::{PacketOptions, PacketType, ProtocolId, ProtocolVersion, QoS};
pub use connack::ConnackPacket;
pub use connect::{ConnectPacket, Will};
pub use disconnect::DisconnectPacket;
pub use pingreq::PingreqPacket;
pub use pingresp::PingrespPacket;
pub use puback::PubackPacket;
pub use pubcomp::PubcompPacket;
pub use publish::PublishPacket;
pub use pubrec::PubrecPacket;
pub use pubrel::PubrelPacket;
pub use suback::{SubackPacket, SubackReturnCode};
pub use subscribe::{SubscribePacket, SubscribeTopic};
pub use unsuback::UnsubackPacket;
pub use unsubscribe::UnsubscribePacket;
pub use utf8::{LossyUtf8, StrictUtf8, Utf8Codec};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};
use length::decode_length;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Connect(ConnectPacket),
    Connack(ConnackPacket),
    Publish(PublishPacket),
    Puback(PubackPacket),
    Pubrec(PubrecPacket),
    Pubrel(PubrelPacket),
    Pubcomp(PubcompPacket),
    Subscribe(SubscribePacket),
    Suback(SubackPacket),
    Unsubscribe(UnsubscribePacket),
    Unsuback(UnsubackPacket),
    Pingreq(PingreqPacket),
    Pingresp(PingrespPacket),
    Disconnect(DisconnectPacket),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Connack(_) => PacketType::Connack,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Puback(_) => PacketType::Puback,
            Packet::Pubrec(_) => PacketType::Pubrec,
            Packet::Pubrel(_) => PacketType::Pubrel,
            Packet::Pubcomp(_) => PacketType::Pubcomp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Suback(_) => PacketType::Suback,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::Unsuback(_) => PacketType::Unsuback,
            Packet::Pingreq(_) => PacketType::Pingreq,
            Packet::Pingresp(_) => PacketType::Pingresp,
            Packet::Disconnect(_) => PacketType::Disconnect,
        }
    }

    /// The packet identifier, for types that carry one.
    pub fn message_id(&self) -> Option<u16> {
        match self {
            Packet::Publish(p) => p.message_id,
            Packet::Puback(p) => Some(p.message_id),
            Packet::Pubrec(p) => Some(p.message_id),
            Packet::Pubrel(p) => Some(p.message_id),
            Packet::Pubcomp(p) => Some(p.message_id),
            Packet::Subscribe(p) => Some(p.message_id),
            Packet::Suback(p) => Some(p.message_id),
            Packet::Unsubscribe(p) => Some(p.message_id),
            Packet::Unsuback(p) => Some(p.message_id),
            _ => None,
        }
    }
}

/// A fully buffered packet whose fixed header has been validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: usize,
    pub header_length: usize,
    /// `header_length + remaining_length`; how far to advance the buffer.
    pub packet_length: usize,
}

/// Frame the packet at the start of `buf` without consuming anything.
///
/// Returns `Ok(None)` until the buffer holds the whole packet.
pub fn decode_header(buf: &[u8], _opts: &PacketOptions) -> Result<Option<FrameHeader>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let packet_type = PacketType::from_nibble(buf[0] >> 4)?;
    let flags = buf[0] & 0x0F;
    if let Some(expected) = packet_type.required_flags() {
        if flags != expected {
            return Err(Error::InvalidHeaderFlags {
                packet_type,
                expected,
                actual: flags,
            });
        }
    }

    let Some((remaining_length, used)) = decode_length(buf, 1)? else {
        return Ok(None);
    };
    let header_length = 1 + used;
    let packet_length = header_length + remaining_length;
    if buf.len() < packet_length {
        return Ok(None);
    }

    Ok(Some(FrameHeader {
        packet_type,
        flags,
        remaining_length,
        header_length,
        packet_length,
    }))
}

/// Decode the body of an already framed packet. `body` holds exactly
/// `remaining_length` bytes.
pub fn decode_body<B: Buf>(
    header: &FrameHeader,
    body: &mut B,
    utf8: &dyn Utf8Codec,
    opts: &PacketOptions,
) -> Result<Packet> {
    let flags = header.flags;
    let packet = match header.packet_type {
        PacketType::Connect => Packet::Connect(ConnectPacket::decode(body, flags, utf8, opts)?),
        PacketType::Connack => Packet::Connack(ConnackPacket::decode(body, flags, utf8, opts)?),
        PacketType::Publish => Packet::Publish(PublishPacket::decode(body, flags, utf8, opts)?),
        PacketType::Puback => Packet::Puback(PubackPacket::decode(body, flags, utf8, opts)?),
        PacketType::Pubrec => Packet::Pubrec(PubrecPacket::decode(body, flags, utf8, opts)?),
        PacketType::Pubrel => Packet::Pubrel(PubrelPacket::decode(body, flags, utf8, opts)?),
        PacketType::Pubcomp => Packet::Pubcomp(PubcompPacket::decode(body, flags, utf8, opts)?),
        PacketType::Subscribe => Packet::Subscribe(SubscribePacket::decode(body, flags, utf8, opts)?),
        PacketType::Suback => Packet::Suback(SubackPacket::decode(body, flags, utf8, opts)?),
        PacketType::Unsubscribe => {
            Packet::Unsubscribe(UnsubscribePacket::decode(body, flags, utf8, opts)?)
        }
        PacketType::Unsuback => Packet::Unsuback(UnsubackPacket::decode(body, flags, utf8, opts)?),
        PacketType::Pingreq => Packet::Pingreq(PingreqPacket::decode(body, flags, utf8, opts)?),
        PacketType::Pingresp => Packet::Pingresp(PingrespPacket::decode(body, flags, utf8, opts)?),
        PacketType::Disconnect => {
            Packet::Disconnect(DisconnectPacket::decode(body, flags, utf8, opts)?)
        }
    };
    Ok(packet)
}

/// Split the first complete packet off the front of `buf` and decode it.
///
/// A partial packet stays in `buf` and yields `Ok(None)`. A packet whose
/// body fails to decode has already been removed when the error returns.
pub fn decode(buf: &mut BytesMut, utf8: &dyn Utf8Codec, opts: &PacketOptions) -> Result<Option<Packet>> {
    let Some(header) = decode_header(&buf[..], opts)? else {
        return Ok(None);
    };
    let mut body = buf.split_to(header.packet_length).freeze();
    body.advance(header.header_length);
    decode_body(&header, &mut body, utf8, opts).map(Some)
}

/// Append the wire form of `packet` to `out`.
pub fn encode_to<B: BufMut>(packet: &Packet, out: &mut B, utf8: &dyn Utf8Codec, opts: &PacketOptions) -> Result<()> {
    match packet {
        Packet::Connect(p) => p.encode(out, utf8, opts),
        Packet::Connack(p) => p.encode(out, utf8, opts),
        Packet::Publish(p) => p.encode(out, utf8, opts),
        Packet::Puback(p) => p.encode(out, utf8, opts),
        Packet::Pubrec(p) => p.encode(out, utf8, opts),
        Packet::Pubrel(p) => p.encode(out, utf8, opts),
        Packet::Pubcomp(p) => p.encode(out, utf8, opts),
        Packet::Subscribe(p) => p.encode(out, utf8, opts),
        Packet::Suback(p) => p.encode(out, utf8, opts),
        Packet::Unsubscribe(p) => p.encode(out, utf8, opts),
        Packet::Unsuback(p) => p.encode(out, utf8, opts),
        Packet::Pingreq(p) => p.encode(out, utf8, opts),
        Packet::Pingresp(p) => p.encode(out, utf8, opts),
        Packet::Disconnect(p) => p.encode(out, utf8, opts),
    }
}

pub fn encode(packet: &Packet, utf8: &dyn Utf8Codec, opts: &PacketOptions) -> Result<Bytes> {
    let mut out = BytesMut::new();
    encode_to(packet, &mut out, utf8, opts)?;
    Ok(out.freeze())
}

//! Field types and byte helpers shared by the per-packet codecs.

use std::fmt;

use bytes::{Buf, BufMut, Bytes};
use serde::{Deserialize, Serialize};

use super::length::encode_length;
use crate::utils::error::{Error, Result};

/// Control packet type, the high nibble of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
}

impl PacketType {
    pub fn from_nibble(nibble: u8) -> Result<Self> {
        let packet_type = match nibble {
            1 => PacketType::Connect,
            2 => PacketType::Connack,
            3 => PacketType::Publish,
            4 => PacketType::Puback,
            5 => PacketType::Pubrec,
            6 => PacketType::Pubrel,
            7 => PacketType::Pubcomp,
            8 => PacketType::Subscribe,
            9 => PacketType::Suback,
            10 => PacketType::Unsubscribe,
            11 => PacketType::Unsuback,
            12 => PacketType::Pingreq,
            13 => PacketType::Pingresp,
            14 => PacketType::Disconnect,
            other => return Err(Error::UnsupportedPacketType(other)),
        };
        Ok(packet_type)
    }

    /// Fixed header flags a 3.1.x packet of this type must carry. PUBLISH
    /// uses its flags for dup/qos/retain and has no fixed value.
    pub fn required_flags(self) -> Option<u8> {
        match self {
            PacketType::Publish => None,
            PacketType::Pubrel | PacketType::Subscribe | PacketType::Unsubscribe => Some(0x02),
            _ => Some(0x00),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::Connect => "connect",
            PacketType::Connack => "connack",
            PacketType::Publish => "publish",
            PacketType::Puback => "puback",
            PacketType::Pubrec => "pubrec",
            PacketType::Pubrel => "pubrel",
            PacketType::Pubcomp => "pubcomp",
            PacketType::Subscribe => "subscribe",
            PacketType::Suback => "suback",
            PacketType::Unsubscribe => "unsubscribe",
            PacketType::Unsuback => "unsuback",
            PacketType::Pingreq => "pingreq",
            PacketType::Pingresp => "pingresp",
            PacketType::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(Error::InvalidQoS(other)),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Protocol level carried in CONNECT. Only 3.1 and 3.1.1 are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    Mqtt31 = 3,
    #[default]
    Mqtt311 = 4,
}

impl ProtocolVersion {
    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            3 => Ok(ProtocolVersion::Mqtt31),
            4 => Ok(ProtocolVersion::Mqtt311),
            other => Err(Error::UnsupportedProtocolVersion(other)),
        }
    }

    /// The protocol name conventionally paired with this level.
    pub fn protocol_id(self) -> ProtocolId {
        match self {
            ProtocolVersion::Mqtt31 => ProtocolId::MqIsdp,
            ProtocolVersion::Mqtt311 => ProtocolId::Mqtt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolId {
    #[default]
    Mqtt,
    MqIsdp,
}

impl ProtocolId {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolId::Mqtt => "MQTT",
            ProtocolId::MqIsdp => "MQIsdp",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "MQTT" => Ok(ProtocolId::Mqtt),
            "MQIsdp" => Ok(ProtocolId::MqIsdp),
            other => Err(Error::InvalidProtocolId(other.to_string())),
        }
    }
}

/// Options threaded through every encode and decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketOptions {
    pub protocol_version: ProtocolVersion,
}

/// Append `bytes` with its big-endian u16 length prefix.
pub fn encode_bytes<B: BufMut>(bytes: &[u8], out: &mut B) -> Result<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| Error::FieldTooLong(bytes.len()))?;
    out.put_u16(len);
    out.put_slice(bytes);
    Ok(())
}

/// Read a length-prefixed byte field.
pub fn decode_bytes<B: Buf>(buf: &mut B) -> Result<Bytes> {
    let len = usize::from(read_u16(buf)?);
    if buf.remaining() < len {
        return Err(Error::PacketTooShort);
    }
    Ok(buf.copy_to_bytes(len))
}

/// Read a big-endian message id.
pub fn parse_message_id<B: Buf>(buf: &mut B) -> Result<u16> {
    read_u16(buf)
}

pub(crate) fn read_u8<B: Buf>(buf: &mut B) -> Result<u8> {
    if !buf.has_remaining() {
        return Err(Error::PacketTooShort);
    }
    Ok(buf.get_u8())
}

pub(crate) fn read_u16<B: Buf>(buf: &mut B) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(Error::PacketTooShort);
    }
    Ok(buf.get_u16())
}

/// Write the fixed header for `packet_type` followed by `body`.
pub(crate) fn frame<B: BufMut>(packet_type: PacketType, flags: u8, body: &[u8], out: &mut B) -> Result<()> {
    out.put_u8((packet_type as u8) << 4 | (flags & 0x0F));
    encode_length(body.len(), out)?;
    out.put_slice(body);
    Ok(())
}

/// Encode a packet whose body is only a message id.
pub(crate) fn encode_id_only<B: BufMut>(
    packet_type: PacketType,
    flags: u8,
    message_id: u16,
    out: &mut B,
) -> Result<()> {
    frame(packet_type, flags, &message_id.to_be_bytes(), out)
}

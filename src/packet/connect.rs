use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::PacketType;
use super::basic::{
    PacketOptions, ProtocolId, ProtocolVersion, QoS, decode_bytes, encode_bytes, frame, read_u8, read_u16,
};
use super::utf8::{Utf8Codec, decode_string, encode_string};
use crate::utils::error::{Error, Result};

const USERNAME: u8 = 0x80;
const PASSWORD: u8 = 0x40;
const WILL_RETAIN: u8 = 0x20;
const WILL_QOS_MASK: u8 = 0x18;
const WILL_QOS_SHIFT: u8 = 3;
const WILL: u8 = 0x04;
const CLEAN_SESSION: u8 = 0x02;
const RESERVED: u8 = 0x01;

/// Last-will message the broker publishes if the client vanishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPacket {
    pub protocol_id: ProtocolId,
    pub protocol_version: ProtocolVersion,
    pub client_id: String,
    pub clean_session: bool,
    pub keepalive: u16,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<Will>,
}

impl ConnectPacket {
    /// A 3.1.1 CONNECT with a clean session and keepalive disabled.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            protocol_id: ProtocolId::Mqtt,
            protocol_version: ProtocolVersion::Mqtt311,
            client_id: client_id.into(),
            clean_session: true,
            keepalive: 0,
            username: None,
            password: None,
            will: None,
        }
    }

    pub fn encode<B: BufMut>(&self, out: &mut B, utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<()> {
        let mut flags = 0u8;
        if self.username.is_some() {
            flags |= USERNAME;
        }
        if self.password.is_some() {
            flags |= PASSWORD;
        }
        if let Some(will) = &self.will {
            flags |= WILL | (will.qos.as_u8() << WILL_QOS_SHIFT);
            if will.retain {
                flags |= WILL_RETAIN;
            }
        }
        if self.clean_session {
            flags |= CLEAN_SESSION;
        }

        let mut body = BytesMut::new();
        encode_string(self.protocol_id.as_str(), utf8, &mut body)?;
        body.put_u8(self.protocol_version.level());
        body.put_u8(flags);
        body.put_u16(self.keepalive);
        encode_string(&self.client_id, utf8, &mut body)?;

        if let Some(will) = &self.will {
            encode_string(&will.topic, utf8, &mut body)?;
            encode_bytes(&will.payload, &mut body)?;
        }
        if let Some(username) = &self.username {
            encode_string(username, utf8, &mut body)?;
        }
        if let Some(password) = &self.password {
            encode_bytes(password, &mut body)?;
        }

        frame(PacketType::Connect, 0, &body, out)
    }

    pub fn decode<B: Buf>(body: &mut B, _flags: u8, utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<Self> {
        let protocol_id = ProtocolId::parse(&decode_string(body, utf8)?)?;
        let protocol_version = ProtocolVersion::from_level(read_u8(body)?)?;

        let flags = read_u8(body)?;
        if flags & RESERVED != 0 {
            return Err(Error::InvalidConnectFlags("reserved bit must be 0"));
        }
        let has_will = flags & WILL != 0;
        let will_qos = QoS::try_from((flags & WILL_QOS_MASK) >> WILL_QOS_SHIFT)
            .map_err(|_| Error::InvalidConnectFlags("will qos must be 0, 1 or 2"))?;
        let will_retain = flags & WILL_RETAIN != 0;
        if !has_will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(Error::InvalidConnectFlags("will qos and retain require the will flag"));
        }

        let keepalive = read_u16(body)?;
        let client_id = decode_string(body, utf8)?;

        let will = if has_will {
            let topic = decode_string(body, utf8)?;
            let payload = decode_bytes(body)?.to_vec();
            Some(Will {
                topic,
                payload,
                qos: will_qos,
                retain: will_retain,
            })
        } else {
            None
        };

        let username = if flags & USERNAME != 0 {
            Some(decode_string(body, utf8)?)
        } else {
            None
        };
        let password = if flags & PASSWORD != 0 {
            Some(decode_bytes(body)?.to_vec())
        } else {
            None
        };

        Ok(Self {
            protocol_id,
            protocol_version,
            client_id,
            clean_session: flags & CLEAN_SESSION != 0,
            keepalive,
            username,
            password,
            will,
        })
    }
}

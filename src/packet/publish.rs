use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::PacketType;
use super::basic::{PacketOptions, QoS, frame, read_u16};
use super::utf8::{Utf8Codec, decode_string, encode_string};
use crate::utils::error::{Error, Result};

const DUP: u8 = 0x08;
const QOS_MASK: u8 = 0x06;
const RETAIN: u8 = 0x01;

/// An application message.
///
/// `message_id` is required for QoS 1 and 2 and absent for QoS 0. A decoded
/// id of zero is reported as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishPacket {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub dup: bool,
    pub retain: bool,
    pub message_id: Option<u16>,
}

impl PublishPacket {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            dup: false,
            retain: false,
            message_id: None,
        }
    }

    pub fn encode<B: BufMut>(&self, out: &mut B, utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<()> {
        let mut flags = self.qos.as_u8() << 1;
        if self.dup {
            flags |= DUP;
        }
        if self.retain {
            flags |= RETAIN;
        }

        let mut body = BytesMut::with_capacity(self.topic.len() + self.payload.len() + 4);
        encode_string(&self.topic, utf8, &mut body)?;
        if self.qos != QoS::AtMostOnce {
            let id = self
                .message_id
                .filter(|id| *id != 0)
                .ok_or(Error::MissingMessageId(self.qos.as_u8()))?;
            body.put_u16(id);
        }
        body.put_slice(&self.payload);

        frame(PacketType::Publish, flags, &body, out)
    }

    pub fn decode<B: Buf>(body: &mut B, flags: u8, utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<Self> {
        let qos = QoS::try_from((flags & QOS_MASK) >> 1)?;

        let topic = decode_string(body, utf8)?;
        let message_id = if qos != QoS::AtMostOnce {
            Some(read_u16(body)?).filter(|id| *id != 0)
        } else {
            None
        };

        Ok(Self {
            topic,
            payload: body.copy_to_bytes(body.remaining()),
            qos,
            dup: flags & DUP != 0,
            retain: flags & RETAIN != 0,
            message_id,
        })
    }
}

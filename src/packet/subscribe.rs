use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::PacketType;
use super::basic::{PacketOptions, QoS, frame, read_u8, read_u16};
use super::utf8::{Utf8Codec, decode_string, encode_string};
use crate::utils::error::{Error, Result};

const SUBSCRIBE_FLAGS: u8 = 0x02;
const OPTIONS_RESERVED: u8 = 0xFC;

/// One topic filter and its requested maximum QoS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeTopic {
    pub topic: String,
    pub qos: QoS,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribePacket {
    pub message_id: u16,
    pub subscriptions: Vec<SubscribeTopic>,
}

impl SubscribePacket {
    pub fn encode<B: BufMut>(&self, out: &mut B, utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<()> {
        let mut body = BytesMut::new();
        body.put_u16(self.message_id);
        for sub in &self.subscriptions {
            encode_string(&sub.topic, utf8, &mut body)?;
            body.put_u8(sub.qos.as_u8());
        }
        frame(PacketType::Subscribe, SUBSCRIBE_FLAGS, &body, out)
    }

    pub fn decode<B: Buf>(body: &mut B, _flags: u8, utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<Self> {
        let message_id = read_u16(body)?;
        if !body.has_remaining() {
            return Err(Error::MalformedPacket("subscribe carries no topic filters"));
        }

        let mut subscriptions = Vec::new();
        while body.has_remaining() {
            let topic = decode_string(body, utf8)?;
            let options = read_u8(body)
                .map_err(|_| Error::MalformedPacket("subscribe topic filter has no options byte"))?;
            if options & OPTIONS_RESERVED != 0 {
                return Err(Error::MalformedPacket("subscribe options bits 7-2 must be 0"));
            }
            subscriptions.push(SubscribeTopic {
                topic,
                qos: QoS::try_from(options)?,
            });
        }

        Ok(Self {
            message_id,
            subscriptions,
        })
    }
}

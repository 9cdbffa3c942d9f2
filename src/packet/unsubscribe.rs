use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::PacketType;
use super::basic::{PacketOptions, frame, read_u16};
use super::utf8::{Utf8Codec, decode_string, encode_string};
use crate::utils::error::{Error, Result};

const UNSUBSCRIBE_FLAGS: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribePacket {
    pub message_id: u16,
    pub topics: Vec<String>,
}

impl UnsubscribePacket {
    pub fn encode<B: BufMut>(&self, out: &mut B, utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<()> {
        let mut body = BytesMut::new();
        body.put_u16(self.message_id);
        for topic in &self.topics {
            encode_string(topic, utf8, &mut body)?;
        }
        frame(PacketType::Unsubscribe, UNSUBSCRIBE_FLAGS, &body, out)
    }

    pub fn decode<B: Buf>(body: &mut B, _flags: u8, utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<Self> {
        let message_id = read_u16(body)?;
        if !body.has_remaining() {
            return Err(Error::MalformedPacket("unsubscribe carries no topic filters"));
        }

        let mut topics = Vec::new();
        while body.has_remaining() {
            topics.push(decode_string(body, utf8)?);
        }
        Ok(Self { message_id, topics })
    }
}

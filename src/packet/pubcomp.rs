use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use super::PacketType;
use super::basic::{PacketOptions, encode_id_only, parse_message_id};
use super::utf8::Utf8Codec;
use crate::utils::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubcompPacket {
    pub message_id: u16,
}

impl PubcompPacket {
    pub fn encode<B: BufMut>(&self, out: &mut B, _utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<()> {
        encode_id_only(PacketType::Pubcomp, 0, self.message_id, out)
    }

    pub fn decode<B: Buf>(body: &mut B, _flags: u8, _utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<Self> {
        Ok(Self {
            message_id: parse_message_id(body)?,
        })
    }
}

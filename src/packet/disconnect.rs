use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use super::PacketType;
use super::basic::{PacketOptions, frame};
use super::utf8::Utf8Codec;
use crate::utils::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisconnectPacket;

impl DisconnectPacket {
    pub fn encode<B: BufMut>(&self, out: &mut B, _utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<()> {
        frame(PacketType::Disconnect, 0, &[], out)
    }

    pub fn decode<B: Buf>(body: &mut B, _flags: u8, _utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<Self> {
        if body.has_remaining() {
            return Err(Error::MalformedPacket("disconnect must have an empty body"));
        }
        Ok(Self)
    }
}

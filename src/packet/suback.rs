use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::PacketType;
use super::basic::{PacketOptions, QoS, frame, read_u16};
use super::utf8::Utf8Codec;
use crate::utils::error::{Error, Result};

const FAILURE: u8 = 0x80;

/// Per-filter outcome of a SUBSCRIBE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubackReturnCode {
    Success(QoS),
    Failure,
}

impl SubackReturnCode {
    pub fn to_byte(self) -> u8 {
        match self {
            SubackReturnCode::Success(qos) => qos.as_u8(),
            SubackReturnCode::Failure => FAILURE,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            FAILURE => Ok(SubackReturnCode::Failure),
            0..=2 => Ok(SubackReturnCode::Success(QoS::try_from(byte)?)),
            other => Err(Error::InvalidSubackQoS(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubackPacket {
    pub message_id: u16,
    pub granted: Vec<SubackReturnCode>,
}

impl SubackPacket {
    pub fn encode<B: BufMut>(&self, out: &mut B, _utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<()> {
        let mut body = BytesMut::with_capacity(self.granted.len() + 2);
        body.put_u16(self.message_id);
        for code in &self.granted {
            body.put_u8(code.to_byte());
        }
        frame(PacketType::Suback, 0, &body, out)
    }

    pub fn decode<B: Buf>(body: &mut B, _flags: u8, _utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<Self> {
        let message_id = read_u16(body)?;
        let mut granted = Vec::with_capacity(body.remaining());
        while body.has_remaining() {
            granted.push(SubackReturnCode::from_byte(body.get_u8())?);
        }
        Ok(Self { message_id, granted })
    }
}

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use super::PacketType;
use super::basic::{PacketOptions, frame};
use super::utf8::Utf8Codec;
use crate::utils::error::{Error, Result};

const SESSION_PRESENT: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnackPacket {
    pub session_present: bool,
    pub return_code: u8,
}

impl ConnackPacket {
    pub fn is_accepted(&self) -> bool {
        self.return_code == 0
    }

    /// Human-readable reason for a 3.1.1 return code.
    pub fn reason(&self) -> &'static str {
        match self.return_code {
            0 => "connection accepted",
            1 => "unacceptable protocol version",
            2 => "identifier rejected",
            3 => "server unavailable",
            4 => "bad user name or password",
            5 => "not authorized",
            _ => "unknown return code",
        }
    }

    pub fn encode<B: BufMut>(&self, out: &mut B, _utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<()> {
        let ack_flags = if self.session_present { SESSION_PRESENT } else { 0 };
        frame(PacketType::Connack, 0, &[ack_flags, self.return_code], out)
    }

    pub fn decode<B: Buf>(body: &mut B, _flags: u8, _utf8: &dyn Utf8Codec, _opts: &PacketOptions) -> Result<Self> {
        if body.remaining() < 2 {
            return Err(Error::PacketTooShort);
        }
        let ack_flags = body.get_u8();
        let return_code = body.get_u8();
        if ack_flags & !SESSION_PRESENT != 0 {
            return Err(Error::InvalidConnackFlags(ack_flags));
        }
        Ok(Self {
            session_present: ack_flags & SESSION_PRESENT != 0,
            return_code,
        })
    }
}

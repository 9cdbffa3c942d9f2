//! MQTT variable-length integer ("remaining length") encoding.
//!
//! Each byte carries 7 data bits; the high bit marks a continuation. At most
//! four bytes are used, which caps the value at 268,435,455.

use bytes::BufMut;

use crate::utils::error::{Error, Result};

pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

const MAX_LENGTH_BYTES: usize = 4;

pub fn encode_length<B: BufMut>(len: usize, out: &mut B) -> Result<()> {
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::PacketTooLarge(len));
    }

    let mut x = len;
    loop {
        let mut byte = (x % 128) as u8;
        x /= 128;
        if x > 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        if x == 0 {
            break;
        }
    }
    Ok(())
}

/// Decode a remaining-length field starting at `start` without consuming it.
///
/// Returns the value and the number of bytes it occupied, or `None` when the
/// buffer ends before the field does.
pub fn decode_length(buf: &[u8], start: usize) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    let mut pos = start;

    loop {
        let Some(&byte) = buf.get(pos) else {
            return Ok(None);
        };
        pos += 1;
        value += usize::from(byte & 0x7F) * multiplier;

        if byte & 0x80 == 0 {
            return Ok(Some((value, pos - start)));
        }
        if pos - start == MAX_LENGTH_BYTES {
            return Err(Error::MalformedLength);
        }
        multiplier *= 128;
    }
}

//! Pluggable UTF-8 handling for topic names, client ids and credentials.
//!
//! Strings on the wire are length-prefixed byte sequences. How those bytes
//! become a `String` is left to a [`Utf8Codec`] so callers can choose between
//! strict validation and lossy replacement.

use std::fmt;

use bytes::{Buf, BufMut};

use super::basic::{decode_bytes, encode_bytes};
use crate::utils::error::{Error, Result};

pub trait Utf8Codec: fmt::Debug + Send + Sync {
    fn encode(&self, value: &str) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<String>;
}

/// Rejects invalid sequences with [`Error::InvalidUtf8`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictUtf8;

impl Utf8Codec for StrictUtf8 {
    fn encode(&self, value: &str) -> Vec<u8> {
        value.as_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| Error::InvalidUtf8)
    }
}

/// Replaces invalid sequences with U+FFFD.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossyUtf8;

impl Utf8Codec for LossyUtf8 {
    fn encode(&self, value: &str) -> Vec<u8> {
        value.as_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

pub fn encode_string<B: BufMut>(value: &str, utf8: &dyn Utf8Codec, out: &mut B) -> Result<()> {
    encode_bytes(&utf8.encode(value), out)
}

/// Read a length-prefixed string.
pub fn decode_string<B: Buf>(buf: &mut B, utf8: &dyn Utf8Codec) -> Result<String> {
    utf8.decode(&decode_bytes(buf)?)
}

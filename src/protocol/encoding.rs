//! Value Encoding
//!
//! Client arguments are byte strings; the store keeps integers, strings and
//! blobs. Short canonical integers are stored natively so they can later be
//! incremented atomically.
//!
//! Older deployments wrote values through a string-only channel that could not
//! carry zero bytes. With legacy compatibility on, values are written the same
//! way: plain strings, or `__64__` followed by base64 when a zero byte is
//! present or the value itself starts with `__64__`. Reads accept all three
//! shapes regardless of the current mode.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use thiserror::Error;

use crate::protocol::Reply;
use crate::store::Value;

/// Prefix marking a base64-tunneled legacy value.
pub const LEGACY_MARKER: &str = "__64__";

/// Arguments at least this long are never stored as integers.
const MAX_NUMERIC_LEN: usize = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("invalid legacy payload: {0}")]
    InvalidLegacyPayload(#[from] base64::DecodeError),

    #[error("value holds a {0}, not a scalar")]
    NotScalar(&'static str),
}

/// Converts a client argument into a storage value.
pub fn encode(raw: &[u8], legacy_compat: bool) -> Value {
    if let Some(n) = parse_canonical_int(raw) {
        return Value::Int(n);
    }
    if !legacy_compat {
        return Value::Blob(Bytes::copy_from_slice(raw));
    }
    match std::str::from_utf8(raw) {
        // Marker-prefixed input is tunneled too, or reads would unwrap it
        Ok(s) if !raw.contains(&0) && !s.starts_with(LEGACY_MARKER) => Value::Str(s.to_string()),
        _ => Value::Str(format!("{}{}", LEGACY_MARKER, BASE64.encode(raw))),
    }
}

/// Parses `raw` as an integer only if formatting it back yields the same bytes,
/// so values such as `007` or `+1` keep their exact spelling.
fn parse_canonical_int(raw: &[u8]) -> Option<i64> {
    if raw.is_empty() || raw.len() >= MAX_NUMERIC_LEN {
        return None;
    }
    let n: i64 = std::str::from_utf8(raw).ok()?.parse().ok()?;
    (n.to_string().as_bytes() == raw).then_some(n)
}

/// A stored value classified by how it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Integer(i64),
    /// A `__64__` string, already base64-decoded
    LegacyTunneled(Bytes),
    RawBytes(Bytes),
}

impl Decoded {
    pub fn into_bytes(self) -> Bytes {
        match self {
            Decoded::Integer(n) => Bytes::from(n.to_string()),
            Decoded::LegacyTunneled(b) | Decoded::RawBytes(b) => b,
        }
    }

    /// Every stored value goes back to the client as a bulk reply.
    pub fn into_reply(self) -> Reply {
        Reply::bulk(self.into_bytes())
    }
}

pub fn decode(value: &Value) -> Result<Decoded, EncodingError> {
    match value {
        Value::Int(n) => Ok(Decoded::Integer(*n)),
        Value::Str(s) => match s.strip_prefix(LEGACY_MARKER) {
            Some(payload) => Ok(Decoded::LegacyTunneled(Bytes::from(BASE64.decode(payload)?))),
            None => Ok(Decoded::RawBytes(Bytes::copy_from_slice(s.as_bytes()))),
        },
        Value::Blob(b) => Ok(Decoded::RawBytes(b.clone())),
        Value::List(_) => Err(EncodingError::NotScalar("list")),
    }
}

/// Bulk reply for an optional stored value; absent values are nil.
pub fn value_reply(value: Option<&Value>) -> Result<Reply, EncodingError> {
    match value {
        Some(v) => Ok(decode(v)?.into_reply()),
        None => Ok(Reply::nil()),
    }
}

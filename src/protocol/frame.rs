//! Command Frame Decoder
//!
//! Splits raw client input into a command name and its byte-string arguments.
//! Clients send either an array of bulk strings (`*2\r\n$3\r\nGET\r\n$1\r\nk\r\n`)
//! or an inline command line (`GET k\r\n`).
//!
//! [`parse_frame`] returns:
//! - `Ok(Some((frame, consumed)))` when a whole command is buffered
//! - `Ok(None)` when more bytes are needed
//! - `Err(FrameError)` when the input is not a command frame

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::reply::{prefix, CRLF};

/// Largest single argument accepted (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Largest argument count accepted
pub const MAX_ARGS: usize = 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid length: {0}")]
    InvalidLength(String),

    #[error("expected bulk string, got {0:#04x}")]
    ExpectedBulk(u8),

    #[error("empty command")]
    EmptyCommand,

    #[error("command name is not valid UTF-8")]
    InvalidName,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("frame too large: {size} (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// One decoded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Upper-cased command name
    pub name: String,
    pub args: Vec<Bytes>,
}

impl Frame {
    fn from_parts(mut parts: Vec<Bytes>) -> Result<Self, FrameError> {
        if parts.is_empty() {
            return Err(FrameError::EmptyCommand);
        }
        let name = parts.remove(0);
        let name = std::str::from_utf8(&name)
            .map_err(|_| FrameError::InvalidName)?
            .to_ascii_uppercase();
        Ok(Frame { name, args: parts })
    }
}

pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] == prefix::ARRAY {
        parse_array(buf)
    } else {
        parse_inline(buf)
    }
}

fn parse_array(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    let Some((count, mut pos)) = read_length(buf, 0)? else {
        return Ok(None);
    };
    if count <= 0 {
        return Err(FrameError::EmptyCommand);
    }
    let count = count as usize;
    if count > MAX_ARGS {
        return Err(FrameError::TooLarge {
            size: count,
            max: MAX_ARGS,
        });
    }

    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(&first) = buf.get(pos) else {
            return Ok(None);
        };
        if first != prefix::BULK {
            return Err(FrameError::ExpectedBulk(first));
        }
        let Some((len, data_start)) = read_length(buf, pos)? else {
            return Ok(None);
        };
        if len < 0 {
            return Err(FrameError::InvalidLength(len.to_string()));
        }
        let len = len as usize;
        if len > MAX_BULK_SIZE {
            return Err(FrameError::TooLarge {
                size: len,
                max: MAX_BULK_SIZE,
            });
        }

        let end = data_start + len;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != CRLF {
            return Err(FrameError::Protocol(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }
        parts.push(Bytes::copy_from_slice(&buf[data_start..end]));
        pos = end + 2;
    }

    Ok(Some((Frame::from_parts(parts)?, pos)))
}

/// Reads `<prefix><int>\r\n` starting at `pos`, returning the integer and the
/// offset just past the CRLF.
fn read_length(buf: &[u8], pos: usize) -> Result<Option<(i64, usize)>, FrameError> {
    let Some(end) = find_crlf(&buf[pos + 1..]) else {
        return Ok(None);
    };
    let digits = &buf[pos + 1..pos + 1 + end];
    let n = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| FrameError::InvalidLength(String::from_utf8_lossy(digits).into_owned()))?;
    Ok(Some((n, pos + 1 + end + 2)))
}

fn parse_inline(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    let Some(end) = find_crlf(buf) else {
        return Ok(None);
    };
    let parts = buf[..end]
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty())
        .map(Bytes::copy_from_slice)
        .collect();
    Ok(Some((Frame::from_parts(parts)?, end + 2)))
}

#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

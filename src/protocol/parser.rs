//! Incremental RESP Parser
//!
//! TCP delivers a byte stream, not frames: a read may carry half a
//! command or several commands back to back. The parser therefore works
//! against whatever the connection has buffered and reports one of
//! three outcomes:
//!
//! - `Ok(Some((value, consumed)))`: a complete value; the caller
//!   advances its buffer by `consumed` bytes
//! - `Ok(None)`: the buffered data is a valid prefix; read more
//! - `Err(_)`: the stream violates the protocol
//!
//! Lines without a known type prefix are parsed as inline commands
//! (whitespace-separated words), which keeps the server usable from a
//! bare `telnet`/`nc` session.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Largest accepted bulk string (512 MiB, the conventional RESP cap).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Array nesting ceiling; deeper input is rejected rather than recursed.
pub const MAX_DEPTH: usize = 32;

/// Protocol violations detected while parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("invalid integer in {0}")]
    InvalidInteger(&'static str),

    #[error("invalid bulk string length {0}")]
    InvalidBulkLength(i64),

    #[error("invalid array length {0}")]
    InvalidArrayLength(i64),

    #[error("bulk string of {0} bytes exceeds the size limit")]
    BulkTooLarge(usize),

    #[error("array nesting too deep")]
    TooDeep,

    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Parses one RESP value from the front of `buf`.
///
/// Returns the value and the number of bytes it occupied, or `None`
/// when `buf` holds an incomplete frame.
pub fn parse(buf: &[u8]) -> Result<Option<(RespValue, usize)>, ParseError> {
    parse_at_depth(buf, 0)
}

fn parse_at_depth(buf: &[u8], depth: usize) -> Result<Option<(RespValue, usize)>, ParseError> {
    if depth > MAX_DEPTH {
        return Err(ParseError::TooDeep);
    }
    let Some(&first) = buf.first() else {
        return Ok(None);
    };

    match first {
        prefix::SIMPLE_STRING => parse_line(buf, "simple string", RespValue::SimpleString),
        prefix::ERROR => parse_line(buf, "error", RespValue::Error),
        prefix::INTEGER => parse_integer(buf),
        prefix::BULK_STRING => parse_bulk_string(buf),
        prefix::ARRAY => parse_array(buf, depth),
        _ => parse_inline(buf),
    }
}

/// `+…\r\n` and `-…\r\n`: a prefix byte, a text line, CRLF.
fn parse_line(
    buf: &[u8],
    what: &'static str,
    make: impl FnOnce(String) -> RespValue,
) -> Result<Option<(RespValue, usize)>, ParseError> {
    let Some(end) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let text = std::str::from_utf8(&buf[1..1 + end])
        .map_err(|_| ParseError::InvalidUtf8(what))?;
    Ok(Some((make(text.to_string()), 1 + end + 2)))
}

fn parse_integer(buf: &[u8]) -> Result<Option<(RespValue, usize)>, ParseError> {
    let Some(end) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let text = std::str::from_utf8(&buf[1..1 + end])
        .map_err(|_| ParseError::InvalidUtf8("integer"))?;
    let n: i64 = text
        .parse()
        .map_err(|_| ParseError::InvalidInteger("integer frame"))?;
    Ok(Some((RespValue::Integer(n), 1 + end + 2)))
}

fn parse_bulk_string(buf: &[u8]) -> Result<Option<(RespValue, usize)>, ParseError> {
    let Some(len_end) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let len: i64 = std::str::from_utf8(&buf[1..1 + len_end])
        .map_err(|_| ParseError::InvalidUtf8("bulk length"))?
        .parse()
        .map_err(|_| ParseError::InvalidInteger("bulk length"))?;

    let header = 1 + len_end + 2;
    if len == -1 {
        return Ok(Some((RespValue::Null, header)));
    }
    if len < 0 {
        return Err(ParseError::InvalidBulkLength(len));
    }
    let len = len as usize;
    if len > MAX_BULK_SIZE {
        return Err(ParseError::BulkTooLarge(len));
    }

    let total = header + len + 2;
    if buf.len() < total {
        return Ok(None);
    }
    if &buf[header + len..total] != CRLF {
        return Err(ParseError::Malformed("bulk string missing trailing CRLF"));
    }

    let data = Bytes::copy_from_slice(&buf[header..header + len]);
    Ok(Some((RespValue::BulkString(data), total)))
}

fn parse_array(buf: &[u8], depth: usize) -> Result<Option<(RespValue, usize)>, ParseError> {
    let Some(count_end) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let count: i64 = std::str::from_utf8(&buf[1..1 + count_end])
        .map_err(|_| ParseError::InvalidUtf8("array length"))?
        .parse()
        .map_err(|_| ParseError::InvalidInteger("array length"))?;

    let mut consumed = 1 + count_end + 2;
    if count == -1 {
        return Ok(Some((RespValue::Null, consumed)));
    }
    if count < 0 {
        return Err(ParseError::InvalidArrayLength(count));
    }

    let mut elements = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match parse_at_depth(&buf[consumed..], depth + 1)? {
            Some((value, used)) => {
                elements.push(value);
                consumed += used;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((RespValue::Array(elements), consumed)))
}

/// A bare text line becomes an array of its whitespace-separated words.
fn parse_inline(buf: &[u8]) -> Result<Option<(RespValue, usize)>, ParseError> {
    let Some(end) = find_crlf(buf) else {
        return Ok(None);
    };
    let line = std::str::from_utf8(&buf[..end])
        .map_err(|_| ParseError::InvalidUtf8("inline command"))?;

    let words: Vec<RespValue> = line
        .split_whitespace()
        .map(|w| RespValue::BulkString(Bytes::copy_from_slice(w.as_bytes())))
        .collect();
    if words.is_empty() {
        return Err(ParseError::Malformed("empty inline command"));
    }
    Ok(Some((RespValue::Array(words), end + 2)))
}

#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == CRLF)
}

//! RESP Value Model
//!
//! The wire protocol is RESP: every frame starts with a one-byte type
//! prefix and ends with CRLF.
//!
//! | prefix | type          | example                  |
//! |--------|---------------|--------------------------|
//! | `+`    | simple string | `+OK\r\n`                |
//! | `-`    | error         | `-ERR bad arity\r\n`     |
//! | `:`    | integer       | `:1\r\n`                 |
//! | `$`    | bulk string   | `$3\r\nfoo\r\n`          |
//! | `*`    | array         | `*1\r\n$4\r\nPING\r\n`   |
//!
//! Clients send commands as arrays of bulk strings; the server answers
//! with simple strings, integers, and errors. `$-1\r\n` is the null
//! bulk string.

use bytes::Bytes;

/// CRLF frame terminator.
pub const CRLF: &[u8] = b"\r\n";

/// RESP type prefix bytes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single RESP value, either parsed off the wire or about to be
/// serialized onto it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+<text>\r\n`; must not contain CR or LF
    SimpleString(String),
    /// `+<bytes>\r\n` with no UTF-8 requirement. Stored values are
    /// opaque byte strings and GET replies them in this frame, so the
    /// payload must pass through byte-for-byte.
    SimpleBytes(Bytes),
    /// `-<message>\r\n`
    Error(String),
    /// `:<n>\r\n`
    Integer(i64),
    /// `$<len>\r\n<bytes>\r\n`; binary-safe
    BulkString(Bytes),
    /// `$-1\r\n` (or `*-1\r\n` when parsed)
    Null,
    /// `*<count>\r\n<element>...`
    Array(Vec<RespValue>),
}

impl RespValue {
    /// A simple-string reply.
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// A simple-string reply carrying raw bytes.
    pub fn simple_bytes(data: impl Into<Bytes>) -> Self {
        RespValue::SimpleBytes(data.into())
    }

    /// An error reply.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// An integer reply.
    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// A bulk-string value.
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// The `+OK` reply.
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// The `+PONG` reply.
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// The textual content of a simple or bulk string, if valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::SimpleBytes(b) => std::str::from_utf8(b).ok(),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Serializes this value into its wire representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes this value, appending to an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(prefix::SIMPLE_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::SimpleBytes(data) => {
                buf.push(prefix::SIMPLE_STRING);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                buf.extend_from_slice(b"$-1");
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_simple_string() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
        assert_eq!(RespValue::pong().serialize(), b"+PONG\r\n");
        assert_eq!(
            RespValue::simple_string("(nil)").serialize(),
            b"+(nil)\r\n"
        );
    }

    #[test]
    fn serialize_simple_bytes_passes_non_utf8_through() {
        let value = RespValue::simple_bytes(Bytes::from(&b"\xff\xfe\x80ok"[..]));
        assert_eq!(value.serialize(), b"+\xff\xfe\x80ok\r\n");
    }

    #[test]
    fn serialize_error() {
        assert_eq!(
            RespValue::error("ERR unknown command 'FOO'").serialize(),
            b"-ERR unknown command 'FOO'\r\n"
        );
    }

    #[test]
    fn serialize_integer() {
        assert_eq!(RespValue::integer(1).serialize(), b":1\r\n");
        assert_eq!(RespValue::integer(-2).serialize(), b":-2\r\n");
    }

    #[test]
    fn serialize_bulk_and_null() {
        assert_eq!(
            RespValue::bulk_string(Bytes::from("bar")).serialize(),
            b"$3\r\nbar\r\n"
        );
        assert_eq!(RespValue::Null.serialize(), b"$-1\r\n");
    }

    #[test]
    fn serialize_command_array() {
        let cmd = RespValue::Array(vec![
            RespValue::bulk_string(Bytes::from("SET")),
            RespValue::bulk_string(Bytes::from("foo")),
            RespValue::bulk_string(Bytes::from("bar")),
        ]);
        assert_eq!(
            cmd.serialize(),
            b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"
        );
    }
}

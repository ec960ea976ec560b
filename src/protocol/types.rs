//! RESP frame types and the reply encoder.
//!
//! Every value that crosses the socket, and every record in a snapshot file,
//! is one of these frames. Lines end with CRLF; bulk payloads are
//! length-prefixed so they may contain CRLF themselves.
//!
//! ```text
//! +OK\r\n                       status
//! -WRONGTYPE Operation ...\r\n  error (category + message)
//! :1000\r\n                     integer
//! $5\r\nhello\r\n               bulk string
//! $-1\r\n                       nil
//! *2\r\n$1\r\na\r\n$1\r\nb\r\n  array
//! ```

use bytes::Bytes;

/// The two-byte line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Frame type markers.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status line, `+<text>\r\n`. Must not contain CR or LF.
    SimpleString(String),

    /// Error line, `-<CATEGORY> <message>\r\n`.
    Error(String),

    /// `:<n>\r\n`
    Integer(i64),

    /// Binary-safe payload, `$<len>\r\n<bytes>\r\n`.
    BulkString(Bytes),

    /// The nil bulk string, `$-1\r\n`. Also produced when decoding `*-1\r\n`.
    Null,

    /// `*<count>\r\n` followed by `count` frames.
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Builds an error line from a full message such as `"ERR syntax error"`.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Builds an error line from a category (`ERR`, `WRONGTYPE`) and a message.
    pub fn error_with(category: &str, message: impl AsRef<str>) -> Self {
        RespValue::Error(format!("{} {}", category, message.as_ref()))
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Array of bulk strings, the shape of KEYS, MGET hits and BLPOP results.
    pub fn bulk_array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        RespValue::Array(items.into_iter().map(RespValue::BulkString).collect())
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Encodes the frame into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Encodes the frame onto the end of `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Payload of a bulk string, if this is one.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

fn write_line(buf: &mut Vec<u8>, marker: u8, body: &[u8]) {
    buf.push(marker);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

//! Incremental RESP decoder.
//!
//! The parser works over whatever bytes have arrived so far and reports one
//! of three outcomes:
//!
//! - `Ok(Some((frame, consumed)))`: a whole frame was decoded from the front
//!   of the buffer; the caller drops `consumed` bytes.
//! - `Ok(None)`: the frame is not complete yet; read more and retry. This is
//!   how short socket reads are tolerated.
//! - `Err(ProtocolError)`: the bytes can never become a valid frame.
//!
//! Bulk payloads are sliced by their declared length, never by searching
//! for CRLF, so payloads that contain the terminator decode correctly.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// A malformed frame. Aborts the current request only.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("unexpected type marker {0:#04x}")]
    UnknownPrefix(u8),

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid UTF-8 in line: {0}")]
    InvalidUtf8(String),

    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    #[error("{0}")]
    Malformed(String),

    #[error("frame too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The frame decoded, but a request must be an array of bulk strings.
    #[error("expected an array of bulk strings, got {0}")]
    UnexpectedFrame(&'static str),
}

pub type ParseResult<T> = Result<T, ProtocolError>;

/// Largest accepted bulk payload (512 MB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Guards recursion on nested arrays.
pub const MAX_NESTING_DEPTH: usize = 32;

#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Decodes one frame from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    /// Decodes one request frame: an array whose elements are all bulk
    /// strings. Returns the command name followed by its arguments.
    pub fn parse_request(&mut self, buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
        if let Some(&marker) = buf.first() {
            if marker != prefix::ARRAY {
                return Err(ProtocolError::UnknownPrefix(marker));
            }
        }

        let (frame, consumed) = match self.parse(buf)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };

        let elements = match frame {
            RespValue::Array(elements) => elements,
            _ => return Err(ProtocolError::UnexpectedFrame("nil array")),
        };

        let mut parts = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                RespValue::BulkString(data) => parts.push(data),
                RespValue::Null => return Err(ProtocolError::UnexpectedFrame("nil bulk string")),
                RespValue::Array(_) => return Err(ProtocolError::UnexpectedFrame("nested array")),
                RespValue::Integer(_) => return Err(ProtocolError::UnexpectedFrame("integer")),
                RespValue::SimpleString(_) | RespValue::Error(_) => {
                    return Err(ProtocolError::UnexpectedFrame("line"))
                }
            }
        }

        Ok(Some((parts, consumed)))
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ProtocolError::Malformed(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => Ok(read_line(buf)?
                .map(|(line, used)| (RespValue::SimpleString(line.to_string()), used))),
            prefix::ERROR => {
                Ok(read_line(buf)?.map(|(line, used)| (RespValue::Error(line.to_string()), used)))
            }
            prefix::INTEGER => match read_line(buf)? {
                Some((line, used)) => Ok(Some((RespValue::Integer(parse_int(line)?), used))),
                None => Ok(None),
            },
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ProtocolError::UnknownPrefix(other)),
        }
    }

    /// `$<length>\r\n<data>\r\n`
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (length, header) = match read_line(buf)? {
            Some((line, used)) => (parse_int(line)?, used),
            None => return Ok(None),
        };

        if length == -1 {
            return Ok(Some((RespValue::Null, header)));
        }
        if length < 0 {
            return Err(ProtocolError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let total = header + length + CRLF.len();
        if buf.len() < total {
            return Ok(None);
        }

        if &buf[header + length..total] != CRLF {
            return Err(ProtocolError::Malformed(
                "bulk string not terminated by CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[header..header + length]);
        Ok(Some((RespValue::BulkString(data), total)))
    }

    /// `*<count>\r\n<elements...>`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (count, mut consumed) = match read_line(buf)? {
            Some((line, used)) => (parse_int(line)?, used),
            None => return Ok(None),
        };

        if count == -1 {
            return Ok(Some((RespValue::Null, consumed)));
        }
        if count < 0 {
            return Err(ProtocolError::InvalidArrayLength(count));
        }

        let count = count as usize;
        // Each element needs at least four bytes; reject absurd counts before allocating.
        let mut elements = Vec::with_capacity(count.min(buf.len() / 4 + 1));

        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => {
                    self.depth -= 1;
                    return Ok(None);
                }
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Reads the line that follows the type marker. Returns the line text
/// (without marker or CRLF) and the number of bytes it occupied.
fn read_line(buf: &[u8]) -> ParseResult<Option<(&str, usize)>> {
    match find_crlf(&buf[1..]) {
        Some(pos) => {
            let line = std::str::from_utf8(&buf[1..1 + pos])
                .map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?;
            Ok(Some((line, 1 + pos + CRLF.len())))
        }
        None => {
            // A bare LF inside the header can never become a valid line.
            if buf[1..].contains(&b'\n') {
                return Err(ProtocolError::Malformed("line not terminated by CRLF".to_string()));
            }
            Ok(None)
        }
    }
}

fn parse_int(line: &str) -> ParseResult<i64> {
    line.parse()
        .map_err(|_| ProtocolError::InvalidInteger(line.to_string()))
}

/// Position of the first `\r\n`, if any.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single frame with a fresh parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integer() {
        let (value, used) = parse_message(b":-42\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Integer(-42));
        assert_eq!(used, 6);
    }

    #[test]
    fn test_parse_bulk_string() {
        let (value, used) = parse_message(b"$5\r\nhello\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::from("hello")));
        assert_eq!(used, 11);
    }

    #[test]
    fn test_bulk_string_containing_crlf() {
        let (value, used) = parse_message(b"$7\r\nab\r\ncd\n\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::from_static(b"ab\r\ncd\n")));
        assert_eq!(used, 13);
    }

    #[test]
    fn test_parse_nil() {
        assert_eq!(parse_message(b"$-1\r\n").unwrap().unwrap().0, RespValue::Null);
        assert_eq!(parse_message(b"*-1\r\n").unwrap().unwrap().0, RespValue::Null);
    }

    #[test]
    fn test_incomplete_frames_wait_for_more() {
        assert!(parse_message(b"$5\r\nhel").unwrap().is_none());
        assert!(parse_message(b"*2\r\n$3\r\nGET\r\n").unwrap().is_none());
        assert!(parse_message(b"*2\r").unwrap().is_none());
    }

    #[test]
    fn test_parse_request() {
        let mut parser = RespParser::new();
        let (parts, used) = parser
            .parse_request(b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$5\r\nalice\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(used, 38);
        assert_eq!(
            parts,
            vec![Bytes::from("SET"), Bytes::from("user:101"), Bytes::from("alice")]
        );
    }

    #[test]
    fn test_request_must_start_with_array_marker() {
        let mut parser = RespParser::new();
        assert_eq!(
            parser.parse_request(b"PING\r\n"),
            Err(ProtocolError::UnknownPrefix(b'P'))
        );
    }

    #[test]
    fn test_request_elements_must_be_bulk() {
        let mut parser = RespParser::new();
        assert!(matches!(
            parser.parse_request(b"*2\r\n$3\r\nGET\r\n:1\r\n"),
            Err(ProtocolError::UnexpectedFrame(_))
        ));
    }

    #[test]
    fn test_bad_bulk_terminator() {
        assert!(matches!(
            parse_message(b"$3\r\nabcXY"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_bad_length_line() {
        assert!(matches!(
            parse_message(b"$abc\r\n"),
            Err(ProtocolError::InvalidInteger(_))
        ));
        assert!(matches!(
            parse_message(b"*-5\r\n"),
            Err(ProtocolError::InvalidArrayLength(-5))
        ));
    }

    #[test]
    fn test_bare_newline_in_header() {
        assert!(matches!(
            parse_message(b"*1\n"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_message(b"*1\n$4\r\nPING\r\n"),
            Err(ProtocolError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_nested_array() {
        let (value, _) = parse_message(b"*2\r\n$1\r\nk\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::bulk_string("k"),
                RespValue::bulk_array([Bytes::from("a"), Bytes::from("b")]),
            ])
        );
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        let (value, _) = parse_message(b"$5\r\nhel\x00o\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::from(&b"hel\x00o"[..])));
    }
}

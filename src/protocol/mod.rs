//! RESP wire codec.
//!
//! - `types`: the `RespValue` frame enum and its encoder
//! - `parser`: the incremental decoder and `ProtocolError`
//!
//! The same codec encodes replies on the socket and records in snapshot
//! files.
//!
//! ```
//! use standin_kv::protocol::{RespParser, RespValue};
//!
//! let mut parser = RespParser::new();
//! let (parts, consumed) = parser
//!     .parse_request(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(parts.len(), 2);
//! assert_eq!(consumed, 23);
//!
//! assert_eq!(RespValue::integer(-2).serialize(), b":-2\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseResult, ProtocolError, RespParser};
pub use types::RespValue;

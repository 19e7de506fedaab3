//! Reply Types and Wire Encoding
//!
//! Every command produces exactly one [`Reply`]. Each reply shape starts
//! with a type prefix byte and ends with CRLF (`\r\n`):
//!
//! - `+` Simple String: `+OK\r\n`
//! - `-` Error: `-ERR unknown command 'FOO'\r\n`
//! - `:` Integer: `:1000\r\n`
//! - `$` Bulk String: `$5\r\nhello\r\n`, or `$-1\r\n` for null
//! - `*` Array of bulk strings: `*2\r\n$1\r\na\r\n$1\r\nb\r\n`

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator closing every reply line
pub const CRLF: &[u8] = b"\r\n";

/// Prefix added to error text that doesn't carry one already
pub const ERROR_PREFIX: &str = "ERR";

/// Reply type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A typed command result, ready to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status text without line breaks: `+<text>\r\n`
    Simple(String),

    /// Error text, sent as `-ERR <text>\r\n` unless it already starts with `ERR`
    Error(String),

    /// Signed integer: `:<n>\r\n`
    Integer(i64),

    /// Length-prefixed string: `$<len>\r\n<data>\r\n`
    Bulk(Bytes),

    /// Null bulk string: `$-1\r\n`
    Null,

    /// Sequence of bulk strings: `*<count>\r\n` then one bulk block per element
    Array(Vec<Bytes>),
}

impl Reply {
    /// Creates a simple string reply.
    ///
    /// # Example
    /// ```
    /// use driftkv::protocol::Reply;
    /// assert_eq!(Reply::simple("PONG").encode(), b"+PONG\r\n");
    /// ```
    pub fn simple(s: impl Into<String>) -> Self {
        Reply::Simple(s.into())
    }

    /// Creates an error reply.
    ///
    /// # Example
    /// ```
    /// use driftkv::protocol::Reply;
    /// assert_eq!(Reply::error("no such key").encode(), b"-ERR no such key\r\n");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// Bulk string when present, null otherwise.
    pub fn bulk_or_null(data: Option<Bytes>) -> Self {
        data.map_or(Reply::Null, Reply::Bulk)
    }

    pub fn array(items: Vec<Bytes>) -> Self {
        Reply::Array(items)
    }

    /// Common reply for successful writes
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    /// Encodes the reply into its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.to_vec()
    }

    /// Appends the wire form to an existing buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Reply::Simple(s) => {
                buf.put_u8(prefix::SIMPLE_STRING);
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Error(s) => {
                buf.put_u8(prefix::ERROR);
                if !has_error_prefix(s) {
                    buf.put_slice(ERROR_PREFIX.as_bytes());
                    buf.put_u8(b' ');
                }
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.put_u8(prefix::INTEGER);
                buf.put_slice(n.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Bulk(data) => encode_bulk(data, buf),
            Reply::Null => {
                buf.put_u8(prefix::BULK_STRING);
                buf.put_slice(b"-1");
                buf.put_slice(CRLF);
            }
            Reply::Array(items) => {
                buf.put_u8(prefix::ARRAY);
                buf.put_slice(items.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for item in items {
                    encode_bulk(item, buf);
                }
            }
        }
    }

    /// Returns true if this reply is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

fn encode_bulk(data: &[u8], buf: &mut BytesMut) {
    buf.put_u8(prefix::BULK_STRING);
    buf.put_slice(data.len().to_string().as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(data);
    buf.put_slice(CRLF);
}

fn has_error_prefix(text: &str) -> bool {
    text.strip_prefix(ERROR_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Simple(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            Reply::Null => write!(f, "(nil)"),
            Reply::Array(items) if items.is_empty() => write!(f, "(empty array)"),
            Reply::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    writeln!(f, "{}) \"{}\"", i + 1, String::from_utf8_lossy(item))?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_string_encode() {
        assert_eq!(Reply::ok().encode(), b"+OK\r\n");
        assert_eq!(Reply::simple("").encode(), b"+\r\n");
    }

    #[test]
    fn test_error_encode_adds_prefix_once() {
        assert_eq!(
            Reply::error("unknown command 'FOO'").encode(),
            b"-ERR unknown command 'FOO'\r\n"
        );
        assert_eq!(Reply::error("ERR already").encode(), b"-ERR already\r\n");
        // Only a whole word counts as a prefix
        assert_eq!(Reply::error("ERRATIC").encode(), b"-ERR ERRATIC\r\n");
    }

    #[test]
    fn test_integer_encode() {
        assert_eq!(Reply::integer(1000).encode(), b":1000\r\n");
        assert_eq!(Reply::integer(-2).encode(), b":-2\r\n");
    }

    #[test]
    fn test_bulk_and_null_encode() {
        assert_eq!(Reply::bulk(Bytes::from("bar")).encode(), b"$3\r\nbar\r\n");
        assert_eq!(Reply::bulk(Bytes::new()).encode(), b"$0\r\n\r\n");
        assert_eq!(Reply::Null.encode(), b"$-1\r\n");
        assert_eq!(Reply::bulk_or_null(None), Reply::Null);
    }

    #[test]
    fn test_bulk_length_counts_bytes() {
        assert_eq!(Reply::bulk(Bytes::from("héllo")).encode(), "$6\r\nhéllo\r\n".as_bytes());
    }

    #[test]
    fn test_array_encode_keeps_order() {
        let reply = Reply::array(vec![Bytes::from("b"), Bytes::from("a")]);
        assert_eq!(reply.encode(), b"*2\r\n$1\r\nb\r\n$1\r\na\r\n");
        assert_eq!(Reply::array(vec![]).encode(), b"*0\r\n");
    }

    #[test]
    fn test_display() {
        assert_eq!(Reply::Null.to_string(), "(nil)");
        assert_eq!(Reply::integer(3).to_string(), "(integer) 3");
    }
}

//! Text Protocol Implementation
//!
//! Requests arrive as newline-terminated text lines; replies go out in a
//! RESP-style typed encoding.
//!
//! ## Modules
//!
//! - `codec`: Buffers the byte stream and splits it into tokenized [`Request`]s
//! - `types`: Defines the [`Reply`] enum and its wire encoding
//!
//! ## Example
//!
//! ```
//! use driftkv::protocol::{LineCodec, Reply};
//!
//! let mut codec = LineCodec::new();
//! codec.feed(b"SET a 1\nGET a\n");
//!
//! let first = codec.next_request().unwrap().unwrap();
//! assert_eq!(first.name, "SET");
//!
//! assert_eq!(Reply::ok().encode(), b"+OK\r\n");
//! ```

pub mod codec;
pub mod types;

pub use codec::{LineCodec, ParseError, Request, MAX_LINE_LENGTH};
pub use types::Reply;

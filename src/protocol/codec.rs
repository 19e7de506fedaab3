//! Line Codec
//!
//! Requests are plain text: one command per line, whitespace separated,
//! no quoting. The codec accumulates whatever the transport delivers and
//! hands out complete lines, so a single read may carry several pipelined
//! commands and a single command may span several reads.
//!
//! ## How the Codec Works
//!
//! 1. The session reads bytes straight into [`LineCodec::buffer_mut`]
//! 2. [`LineCodec::next_request`] is called until it returns `Ok(None)`
//! 3. `Ok(None)` means no complete, non-empty line is buffered yet
//!
//! Lines are split on `\n`. Carriage returns and surrounding whitespace
//! are trimmed, and blank lines are skipped without producing a request.

use bytes::BytesMut;
use thiserror::Error;

/// Default limit for a buffered line that has not seen its newline yet (64 KB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Errors that can occur while framing request lines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line was consumed but is not valid UTF-8
    #[error("invalid UTF-8 in command line")]
    InvalidUtf8,

    /// No newline within the allowed number of bytes
    #[error("line too long: {size} bytes buffered (max: {max})")]
    LineTooLong { size: usize, max: usize },
}

impl ParseError {
    /// Whether the session can keep reading after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ParseError::InvalidUtf8)
    }
}

/// One tokenized command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Command name, upper-cased
    pub name: String,
    /// Remaining tokens, in order
    pub args: Vec<String>,
}

impl Request {
    /// Tokenizes a line on runs of whitespace.
    ///
    /// Returns `None` for a blank line.
    ///
    /// # Example
    /// ```
    /// use driftkv::protocol::Request;
    ///
    /// let req = Request::parse("  set  greeting hello world\r").unwrap();
    /// assert_eq!(req.name, "SET");
    /// assert_eq!(req.args, vec!["greeting", "hello", "world"]);
    /// assert!(Request::parse(" \r").is_none());
    /// ```
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next()?.to_uppercase();
        let args = tokens.map(str::to_string).collect();
        Some(Self { name, args })
    }
}

/// Buffers incoming bytes and splits them into [`Request`]s.
#[derive(Debug)]
pub struct LineCodec {
    buffer: BytesMut,
    max_line_length: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Initial buffer capacity
    const INITIAL_CAPACITY: usize = 4096;

    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(Self::INITIAL_CAPACITY),
            max_line_length,
        }
    }

    /// Appends raw bytes received from the transport.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Direct access to the buffer, for reading from the transport without a copy.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Bytes buffered but not yet returned as a request.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Extracts the next non-empty request line.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(request))` - A complete line was consumed
    /// - `Ok(None)` - No complete non-empty line yet, read more bytes
    /// - `Err(InvalidUtf8)` - A line was consumed but could not be decoded
    /// - `Err(LineTooLong)` - The buffer holds too many bytes without a newline
    pub fn next_request(&mut self) -> Result<Option<Request>, ParseError> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > self.max_line_length {
                    return Err(ParseError::LineTooLong {
                        size: self.buffer.len(),
                        max: self.max_line_length,
                    });
                }
                return Ok(None);
            };

            let line = self.buffer.split_to(pos + 1);
            let text =
                std::str::from_utf8(&line[..pos]).map_err(|_| ParseError::InvalidUtf8)?;

            if let Some(request) = Request::parse(text) {
                return Ok(Some(request));
            }
        }
    }
}

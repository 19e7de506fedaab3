//! Command Handler Module
//!
//! Turns tokenized requests into store operations and typed replies.
//!
//! ```text
//! Client line
//!       │
//!       ▼
//! ┌─────────────────┐
//! │   LineCodec     │  (protocol module)
//! └────────┬────────┘
//!          │ Request { name, args }
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │  - lookup       │
//! │  - arity check  │
//! │  - execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `SET key value...`, `GET key`, `DEL key [key ...]`, `EXISTS key [key ...]`
//! - `EXPIRE key seconds`, `TTL key`, `PTTL key`
//! - `KEYS pattern`, `TYPE key`, `FLUSHALL`
//! - `PING`, `ECHO [message ...]`, `INFO`

pub mod handler;
pub mod table;

pub use handler::{CommandError, CommandHandler, CommandResult};
pub use table::{Arity, CommandKind, CommandSpec, COMMANDS};

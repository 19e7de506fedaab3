//! # DriftKV - An In-Memory Key-Value Server with Expiry
//!
//! DriftKV keeps binary-safe values in memory, lets clients attach a
//! time-to-live to any key and speaks a plain line protocol over TCP.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              DriftKV                                │
//! │                                                                     │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐              │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │              │
//! │  │ (Listener)  │    │  Session    │    │  Handler    │              │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘              │
//! │                            │                  │                     │
//! │                            ▼                  ▼                     │
//! │                     ┌─────────────┐    ┌─────────────────────────┐  │
//! │                     │  LineCodec  │    │     StorageEngine       │  │
//! │                     │  + Reply    │    │  RwLock<HashMap<..>>    │  │
//! │                     └─────────────┘    └────────────▲────────────┘  │
//! │                                                     │               │
//! │                                        ┌────────────┴────────────┐  │
//! │                                        │     ExpirySweeper       │  │
//! │                                        │  (Background Tokio Task)│  │
//! │                                        └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use driftkv::server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::bind(&ServerConfig::default()).await?;
//!     server.run(tokio::signal::ctrl_c()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Expiry
//!
//! Keys with a TTL are expired in two ways:
//! 1. **Lazy**: a read that finds an expired key removes it
//! 2. **Active**: a background task periodically sweeps the whole map
//!
//! An expired key is never visible to a client, whichever path gets to it first.
//!
//! ## Module Overview
//!
//! - [`storage`]: Thread-safe storage engine and the expiry sweeper
//! - [`protocol`]: Line framing and reply encoding
//! - [`commands`]: Command table and dispatcher
//! - [`connection`]: Per-client sessions
//! - [`server`]: Listener, accept loop and shutdown
//! - [`stats`]: Server-wide counters

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod storage;

pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionHandler};
pub use protocol::{LineCodec, ParseError, Reply, Request};
pub use server::{Server, ServerConfig};
pub use stats::ServerStats;
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port DriftKV listens on
pub const DEFAULT_PORT: u16 = 6379;

/// The default host DriftKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of DriftKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Storage Engine Module
//!
//! The keyspace and everything that expires entries out of it.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        StorageEngine         │
//! │  RwLock<HashMap<key, Entry>> │
//! └──────────────┬───────────────┘
//!                ▲
//!  ┌─────────────┴─────────────┐
//!  │      ExpirySweeper        │
//!  │  (Background Tokio Task)  │
//!  └───────────────────────────┘
//! ```
//!
//! - **Lazy Expiry**: every read path hides and purges entries past their deadline
//! - **Active Expiry**: the sweeper removes expired entries once per interval
//!
//! ## Example
//!
//! ```
//! use driftkv::storage::StorageEngine;
//! use bytes::Bytes;
//!
//! let engine = StorageEngine::new();
//!
//! engine.set(Bytes::from("session"), Bytes::from("token123"));
//! assert!(engine.expire(&Bytes::from("session"), 3600));
//! assert!(engine.ttl(&Bytes::from("session")) > 3590);
//! ```

pub mod engine;
pub mod expiry;

pub use engine::{Entry, StorageEngine, StorageStats, TTL_MISSING, TTL_PERSISTENT};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};

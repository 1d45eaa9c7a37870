//! Storage Engine Module
//!
//! A thread-safe, sharded key-value store with per-key expiration, plus the
//! background machinery that removes expired keys.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                  ▲                          ▲
//!                  │                          │
//!    ┌─────────────┴─────────────┐  ┌────────┴────────────────┐
//!    │     ExpirySweeper         │  │  Scheduled deletions    │
//!    │  (every second)           │  │  (one timer per TTL key)│
//!    └───────────────────────────┘  └─────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use emberkv::storage::StorageEngine;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//!
//! engine.set(Bytes::from("name"), Bytes::from("Ariz"));
//! assert_eq!(engine.get(&Bytes::from("name")), Some(Bytes::from("Ariz")));
//!
//! engine.set_with_ttl(
//!     Bytes::from("session"),
//!     Bytes::from("token123"),
//!     Duration::from_secs(3600)
//! );
//! ```

pub mod engine;
pub mod expiry;

// Re-export commonly used types
pub use engine::{Entry, SetCondition, StorageEngine};
pub use expiry::{start_expiry_sweeper, DeletionScheduler, ExpiryConfig, ExpirySweeper};

//! Command Handler Module
//!
//! Turns decoded commands into replies by executing them against the
//! storage engine.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ CommandReader   │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Execute      │
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
//! - `GET key`
//! - `SET key value [NX|XX] [EX seconds|PX milliseconds]`
//! - `DEL key [key ...]`
//! - `GETSET key value`
//! - `TYPE key`
//! - `EXISTS key`
//! - `QUIT`
//!
//! Command names are case-insensitive.

pub mod handler;

pub use handler::{CommandError, CommandHandler, Response};

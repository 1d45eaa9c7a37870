//! Wire Protocol
//!
//! Request decoding and reply encoding for the Redis-style text protocol.
//!
//! ## Modules
//!
//! - `command`: The decoded `Command` (name plus arguments)
//! - `decoder`: Streaming decoder for inline and multi-bulk requests
//! - `types`: `RespValue` replies and their serialization
//! - `quote`: Unquoting of stored values for GET-family replies
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{CommandReader, RespValue};
//! use bytes::Bytes;
//!
//! # tokio_test::block_on(async {
//! let mut reader = CommandReader::new(&b"SET \"a b\" 1\r\n"[..]);
//! let command = reader.read_command().await.unwrap().unwrap();
//! assert_eq!(command.len(), 3);
//!
//! let reply = RespValue::bulk_string(Bytes::from("1"));
//! assert_eq!(reply.serialize(), b"$1\r\n1\r\n");
//! # });
//! ```

pub mod command;
pub mod decoder;
pub mod quote;
pub mod types;

// Re-export commonly used types for convenience
pub use command::Command;
pub use decoder::{CommandReader, DecodeError, DecodeResult};
pub use types::RespValue;

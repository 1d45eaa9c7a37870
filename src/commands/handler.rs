//! Command Handler Module
//!
//! Dispatches decoded commands to their handlers and turns the outcome into a
//! reply.
//!
//! ## Supported Commands
//!
//! - `GET key` - Get a key's value
//! - `SET key value [NX|XX] [EX seconds | PX milliseconds]` - Set a key
//! - `DEL key [key ...]` - Delete keys
//! - `GETSET key value` - Set and return old value
//! - `TYPE key` - Get key type ("string" or "none")
//! - `EXISTS key` - Check if a key exists
//! - `QUIT` - Close the connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  execute()  │───>│  dispatch() │───>│  cmd_*()    │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      StorageEngine          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Handlers return `Result<RespValue, CommandError>`; errors become `-ERR`
//! replies and never end the session.

use crate::protocol::{quote, Command, RespValue};
use crate::storage::{DeletionScheduler, SetCondition, StorageEngine};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Command-level failures. Each one is reported as a single error reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// SET got something other than EX or PX where an expiration was expected
    #[error("expiration option is not valid")]
    InvalidExpireOption,

    #[error("invalid expire time in '{0}' command")]
    InvalidExpireTime(String),

    #[error("syntax error")]
    Syntax,
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::error(format!("ERR {}", err))
    }
}

type CommandResult = Result<RespValue, CommandError>;

/// The outcome of executing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Reply to send back to the client
    pub value: RespValue,
    /// False once the client asked to end the session
    pub keep_open: bool,
}

impl Response {
    fn reply(value: RespValue) -> Self {
        Self {
            value,
            keep_open: true,
        }
    }

    fn close(value: RespValue) -> Self {
        Self {
            value,
            keep_open: false,
        }
    }

    /// Reply bytes in wire format.
    pub fn serialize(&self) -> Vec<u8> {
        self.value.serialize()
    }
}

/// Parsed trailing options of a SET command.
#[derive(Debug, Default, PartialEq, Eq)]
struct SetOptions {
    condition: SetCondition,
    ttl: Option<Duration>,
}

/// Executes commands against a shared storage engine.
///
/// Cheap to clone. Create one per server and hand each session a clone, so
/// that all sessions share the per-key deletion timers.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    timers: Arc<DeletionScheduler>,
}

impl CommandHandler {
    /// Creates a new command handler with the given storage engine.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self {
            storage,
            timers: Arc::new(DeletionScheduler::new()),
        }
    }

    /// Number of pending per-key deletion timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    /// Executes a command and returns the reply plus whether the session
    /// should stay open.
    pub fn execute(&self, command: Command) -> Response {
        let name = command.name();
        let upper = name.to_uppercase();
        let args = command.into_args();

        debug!(command = %upper, args = args.len().saturating_sub(1), "Executing command");

        if upper == "QUIT" {
            return match args.len() {
                1 => Response::close(RespValue::ok()),
                _ => Response::reply(CommandError::WrongArity(name).into()),
            };
        }

        let response = match self.dispatch(&upper, &args) {
            Some(Ok(value)) => value,
            Some(Err(err)) => err.into(),
            None => CommandError::UnknownCommand(name).into(),
        };

        trace!(reply = %response, "Command finished");
        Response::reply(response)
    }

    /// Dispatches a command to its handler. `None` means the name is unknown.
    fn dispatch(&self, cmd: &str, args: &[Bytes]) -> Option<CommandResult> {
        let result = match cmd {
            "GET" => self.cmd_get(args),
            "SET" => self.cmd_set(args),
            "DEL" => self.cmd_del(args),
            "GETSET" => self.cmd_getset(args),
            "TYPE" => self.cmd_type(args),
            "EXISTS" => self.cmd_exists(args),
            _ => return None,
        };
        Some(result)
    }

    /// Fails with a wrong-arity error unless `args` (name included) has a
    /// length within `min..=max`.
    fn check_arity(args: &[Bytes], min: usize, max: usize) -> Result<(), CommandError> {
        if (min..=max).contains(&args.len()) {
            Ok(())
        } else {
            let name = args.first().map(|n| String::from_utf8_lossy(n).into_owned());
            Err(CommandError::WrongArity(name.unwrap_or_default()))
        }
    }

    /// Bulk reply for a stored value, with one level of quoting removed.
    fn value_reply(value: Option<Bytes>) -> RespValue {
        match value {
            Some(v) => RespValue::bulk_string(quote::reply_value(v)),
            None => RespValue::null(),
        }
    }

    /// Parses `[NX|XX] [EX seconds | PX milliseconds]` following the value.
    fn parse_set_options(options: &[Bytes]) -> Result<SetOptions, CommandError> {
        let mut parsed = SetOptions::default();
        let mut rest = options;

        if let Some(first) = rest.first() {
            match first.to_ascii_uppercase().as_slice() {
                b"NX" => parsed.condition = SetCondition::IfAbsent,
                b"XX" => parsed.condition = SetCondition::IfPresent,
                _ => {}
            }
            if parsed.condition != SetCondition::Always {
                rest = &rest[1..];
            }
        }

        match rest {
            [] => {}
            [option] => {
                // A keyword on its own: reject unknown ones first
                expiration_unit(option)?;
                return Err(CommandError::Syntax);
            }
            [option, amount] => {
                let unit = expiration_unit(option)?;
                let amount = parse_positive(amount)
                    .ok_or_else(|| CommandError::InvalidExpireTime("set".to_string()))?;
                parsed.ttl = Some(unit(amount));
            }
            _ => return Err(CommandError::Syntax),
        }

        Ok(parsed)
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> CommandResult {
        Self::check_arity(args, 2, 2)?;
        Ok(Self::value_reply(self.storage.get(&args[1])))
    }

    /// SET key value [NX|XX] [EX seconds | PX milliseconds]
    fn cmd_set(&self, args: &[Bytes]) -> CommandResult {
        Self::check_arity(args, 3, 6)?;

        let key = args[1].clone();
        let value = args[2].clone();
        let options = Self::parse_set_options(&args[3..])?;

        let Some(generation) =
            self.storage
                .set_if(key.clone(), value, options.ttl, options.condition)
        else {
            trace!(condition = ?options.condition, "SET condition not met");
            return Ok(RespValue::null());
        };

        match options.ttl {
            Some(ttl) => {
                trace!(ttl_ms = ttl.as_millis(), "Scheduling key deletion");
                self.timers
                    .schedule(Arc::clone(&self.storage), key, generation, ttl);
            }
            None => {
                self.timers.cancel(&key);
            }
        }

        Ok(RespValue::ok())
    }

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[Bytes]) -> CommandResult {
        Self::check_arity(args, 2, usize::MAX)?;
        let keys = &args[1..];
        for key in keys {
            self.timers.cancel(key);
        }
        let deleted = self.storage.delete_many(keys);
        Ok(RespValue::integer(deleted as i64))
    }

    /// GETSET key value
    fn cmd_getset(&self, args: &[Bytes]) -> CommandResult {
        Self::check_arity(args, 3, 3)?;
        let old = self.storage.get_set(args[1].clone(), args[2].clone());
        self.timers.cancel(&args[1]);
        Ok(Self::value_reply(old))
    }

    /// TYPE key
    fn cmd_type(&self, args: &[Bytes]) -> CommandResult {
        Self::check_arity(args, 2, 2)?;
        Ok(RespValue::simple_string(self.storage.key_type(&args[1])))
    }

    /// EXISTS key
    fn cmd_exists(&self, args: &[Bytes]) -> CommandResult {
        Self::check_arity(args, 2, 2)?;
        Ok(RespValue::integer(self.storage.exists(&args[1]) as i64))
    }
}

/// Maps an expiration keyword to a constructor for its duration unit.
fn expiration_unit(option: &[u8]) -> Result<fn(u64) -> Duration, CommandError> {
    match option.to_ascii_uppercase().as_slice() {
        b"EX" => Ok(Duration::from_secs),
        b"PX" => Ok(Duration::from_millis),
        _ => Err(CommandError::InvalidExpireOption),
    }
}

/// Parses a strictly positive decimal integer.
fn parse_positive(raw: &[u8]) -> Option<u64> {
    std::str::from_utf8(raw)
        .ok()?
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
}

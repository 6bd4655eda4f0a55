//! Command Dispatch and Handlers
//!
//! Each command is a pure function of the shared
//! [`Context`](crate::context::Context) and its byte-string
//! arguments, returning exactly one [`Reply`](crate::protocol::Reply) or a
//! [`CommandError`]. The dispatcher owns argument-count checks, counters,
//! logging, and turning errors into a single `-ERR` line.
//!
//! ## Handler Groups
//!
//! - `scalar`: scalar values and counters on a single bin (`GET`, `SET`,
//!   `INCRBY`, `EXPIRE`, `TTL`, `FLUSHDB`, ...)
//! - `hash`: bounded hashes held in one record via server-side procedures
//! - `list`: lists held in one record via server-side procedures
//! - `expanded`: unbounded hashes spread over one record per field
//!
//! ## Store Conditions That Are Not Errors
//!
//! | Condition | Command family | Reply |
//! |-----------|----------------|-------|
//! | key exists | `SETNX`, `SETNXEX` | `:0` |
//! | key not found | `EXPIRE` | `:0` |
//! | missing record | `TTL` | `:-2` |
//! | bin type mismatch | `INCR*`, `DECR*`, `HINCRBY*` | `$-1` |

mod expanded;
mod handler;
mod hash;
mod list;
mod scalar;

use thiserror::Error;

use crate::protocol::EncodingError;
use crate::store::{KeyError, StoreError};

pub use handler::{Arity, CommandHandler, CommandTable, HandlerFn};

/// Bin holding scalar values, counters and lists.
pub const BIN_NAME: &str = "r";

/// Errors a command handler can return.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("value is not an integer or out of range: '{0}'")]
    NotAnInteger(String),

    #[error("invalid expire time: {0}")]
    InvalidTtl(i64),

    #[error("field name is not valid UTF-8")]
    InvalidField,

    #[error("invalid key: {0}")]
    Key(#[from] KeyError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Another client created the composite key and it vanished before it could be read
    #[error("composite key race lost for '{0}'")]
    CompositeRaceLost(String),

    #[error("unexpected result from procedure {0}")]
    UnexpectedResult(&'static str),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

pub type CommandResult<T> = Result<T, CommandError>;

pub(crate) fn parse_int(arg: &[u8]) -> CommandResult<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CommandError::NotAnInteger(String::from_utf8_lossy(arg).into_owned()))
}

pub(crate) fn field_name(arg: &[u8]) -> CommandResult<String> {
    std::str::from_utf8(arg)
        .map(str::to_string)
        .map_err(|_| CommandError::InvalidField)
}

pub(crate) fn utf8_key(arg: &[u8]) -> CommandResult<&str> {
    std::str::from_utf8(arg).map_err(|_| CommandError::Key(KeyError::InvalidUtf8))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::{CommandHandler, CommandTable};
    use crate::context::Context;
    use crate::expanded::ResolutionCache;
    use crate::protocol::Reply;
    use crate::store::MemoryStore;

    pub fn handler_with(ctx: Context) -> CommandHandler {
        CommandHandler::new(Arc::new(ctx), Arc::new(CommandTable::standard()))
    }

    pub fn create_handler() -> CommandHandler {
        handler_with(test_context(false))
    }

    pub fn test_context(compat: bool) -> Context {
        Context::new(Arc::new(MemoryStore::new()), "test", "cache")
            .unwrap()
            .with_backward_write_compat(compat)
    }

    pub fn cached_context() -> Context {
        test_context(false).with_cache(ResolutionCache::new(None, 1024))
    }

    /// Runs `command[0]` with the remaining words as arguments.
    pub fn run(handler: &CommandHandler, command: &[&str]) -> Reply {
        let args: Vec<Bytes> = command[1..]
            .iter()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect();
        handler.dispatch(command[0], &args)
    }

    pub fn run_bytes(handler: &CommandHandler, name: &str, args: &[&[u8]]) -> Reply {
        let args: Vec<Bytes> = args.iter().map(|a| Bytes::copy_from_slice(a)).collect();
        handler.dispatch(name, &args)
    }
}

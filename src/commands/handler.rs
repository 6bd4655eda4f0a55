//! Command table and dispatcher.
//!
//! ```text
//! ┌────────────┐    ┌──────────────────┐    ┌──────────────────────────┐
//! │   Frame    │───>│ CommandHandler   │───>│ CommandTable             │
//! │ name, args │    │ lookup, arity,   │    │ name -> (Arity, handler) │
//! └────────────┘    │ counters, -ERR   │    └────────────┬─────────────┘
//!                   └──────────────────┘                 │
//!                                                        ▼
//!                                             handler(&Context, &[Bytes])
//! ```
//!
//! The table is assembled once at startup. Decorators such as write-back wrap
//! entries before the table is frozen behind an `Arc`; nothing mutates it while
//! serving.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use super::{expanded, hash, list, scalar, CommandError, CommandResult};
use crate::context::Context;
use crate::protocol::{Frame, Reply};

/// A command implementation.
pub type HandlerFn = Arc<dyn Fn(&Context, &[Bytes]) -> CommandResult<Reply> + Send + Sync>;

/// Accepted argument counts, not counting the command name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds
    Range(usize, usize),
    /// `leading` fixed arguments followed by at least `min_pairs` pairs
    Pairs { leading: usize, min_pairs: usize },
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
            Arity::Range(min, max) => (min..=max).contains(&n),
            Arity::Pairs { leading, min_pairs } => {
                n >= leading + 2 * min_pairs && (n - leading) % 2 == 0
            }
        }
    }
}

#[derive(Clone)]
struct Entry {
    arity: Arity,
    handler: HandlerFn,
}

/// Immutable mapping from command name to its arity and handler.
#[derive(Clone, Default)]
pub struct CommandTable {
    entries: HashMap<&'static str, Entry>,
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("CommandTable").field("commands", &names).finish()
    }
}

impl CommandTable {
    /// Every command the gateway serves.
    pub fn standard() -> Self {
        let mut table = Self::default();
        scalar::register(&mut table);
        hash::register(&mut table);
        list::register(&mut table);
        expanded::register(&mut table);
        table
    }

    pub fn register<F>(&mut self, name: &'static str, arity: Arity, handler: F)
    where
        F: Fn(&Context, &[Bytes]) -> CommandResult<Reply> + Send + Sync + 'static,
    {
        self.entries.insert(
            name,
            Entry {
                arity,
                handler: Arc::new(handler),
            },
        );
    }

    /// Replaces the handler for `name` with `wrap(current)`, keeping its arity.
    /// Returns `false` if the command is not registered.
    pub fn decorate(&mut self, name: &str, wrap: impl FnOnce(HandlerFn) -> HandlerFn) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.handler = wrap(Arc::clone(&entry.handler));
                true
            }
            None => false,
        }
    }

    pub fn arity(&self, name: &str) -> Option<Arity> {
        self.entries.get(name).map(|e| e.arity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runs commands against the shared context.
///
/// Cheap to clone; every connection holds one.
#[derive(Clone)]
pub struct CommandHandler {
    ctx: Arc<Context>,
    table: Arc<CommandTable>,
}

impl CommandHandler {
    pub fn new(ctx: Arc<Context>, table: Arc<CommandTable>) -> Self {
        Self { ctx, table }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn execute(&self, frame: &Frame) -> Reply {
        self.dispatch(&frame.name, &frame.args)
    }

    /// Looks up `name`, checks the argument count and runs the handler.
    ///
    /// Always produces exactly one reply; failures become `-ERR <message>`.
    pub fn dispatch(&self, name: &str, args: &[Bytes]) -> Reply {
        let name = name.to_ascii_uppercase();
        debug!(command = %name, args = args.len(), "Dispatching command");

        let result = match self.table.entries.get(name.as_str()) {
            None => Err(CommandError::UnknownCommand(name.clone())),
            Some(entry) if !entry.arity.accepts(args.len()) => {
                Err(CommandError::WrongArity(name.clone()))
            }
            Some(entry) => (entry.handler)(&self.ctx, args),
        };

        match result {
            Ok(reply) => {
                self.ctx.metrics.record_ok();
                reply
            }
            Err(e) => {
                self.ctx.metrics.record_err();
                warn!(
                    command = %name,
                    arg0 = %arg_preview(args, 0),
                    arg1 = %arg_preview(args, 1),
                    error = %e,
                    "Command failed"
                );
                Reply::error(format!("ERR {}", e))
            }
        }
    }
}

fn arg_preview(args: &[Bytes], i: usize) -> String {
    args.get(i)
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .unwrap_or_default()
}

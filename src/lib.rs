//! # recgate - A Redis-Protocol Gateway over a Record Store
//!
//! recgate speaks the Redis wire protocol and translates each command into
//! operations on a record store: flat records of named bins, with the TTL on
//! the record. Values keep exact wire-compatible replies, including a legacy
//! encoding for values with zero bytes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               recgate                                │
//! │                                                                      │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────────┐                │
//! │  │ TCP server │──>│ Connection │──>│ CommandHandler │                │
//! │  │ (main.rs)  │   │  (frames)  │   │ (table lookup) │                │
//! │  └────────────┘   └────────────┘   └───────┬────────┘                │
//! │                                            │                         │
//! │               ┌────────────────────────────┼──────────────┐          │
//! │               ▼                            ▼              ▼          │
//! │   ┌──────────────────────┐   ┌──────────────────┐  ┌────────────┐    │
//! │   │ scalar / hash / list │   │ expanded maps    │  │ write-back │    │
//! │   │ one record per key   │   │ root + per-field │  │ UDP mirror │    │
//! │   └──────────┬───────────┘   │ records, cache   │  └────────────┘    │
//! │              │               └────────┬─────────┘                    │
//! │              ▼                        ▼                              │
//! │   ┌──────────────────────────────────────────────────────────┐       │
//! │   │                 dyn RecordStore (MemoryStore)            │       │
//! │   └──────────────────────────────────────────────────────────┘       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use recgate::commands::{CommandHandler, CommandTable};
//! use recgate::config::Config;
//! use recgate::context::Context;
//! use recgate::store::MemoryStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let ctx = Context::from_config(Arc::new(MemoryStore::new()), &config)?;
//! let table = recgate::write_back::install(CommandTable::standard(), &config)?;
//! let handler = CommandHandler::new(Arc::new(ctx), Arc::new(table));
//!
//! let reply = handler.dispatch("SET", &["k".into(), "v".into()]);
//! assert_eq!(reply.serialize(), b"+OK\r\n");
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: frame decoder, reply writer and value encoding
//! - [`store`]: the record-store seam and the in-process test backend
//! - [`commands`]: dispatch table and command handlers
//! - [`expanded`]: composite-key resolution for expanded maps
//! - [`write_back`]: UDP mirroring of selected mutations
//! - [`connection`]: per-client read/dispatch/reply loop
//! - [`config`], [`context`]: settings and the shared per-process state

pub mod commands;
pub mod config;
pub mod connection;
pub mod context;
pub mod expanded;
pub mod protocol;
pub mod store;
pub mod write_back;

pub use commands::{CommandHandler, CommandTable};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use context::Context;
pub use protocol::{Frame, Reply};
pub use store::{MemoryStore, RecordStore};

/// Default listening port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// Default bind address
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Crate version, as reported by `--version` and the startup banner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Client Connections
//!
//! One tokio task per client. The task owns the socket and a read buffer;
//! command execution is handed to tokio's blocking pool because every record
//! store call blocks until the store answers.
//!
//! ```text
//!  socket ──read──> BytesMut ──parse_frame──> Frame ──spawn_blocking──> CommandHandler
//!    ▲                                                                       │
//!    └──────────────────────── write_all(replies) <───────── Reply ──────────┘
//! ```
//!
//! Every frame already in the buffer is executed, in order, before the replies
//! are flushed together, so pipelined clients get one write per batch. A
//! malformed frame gets `-ERR Protocol error: ...` and the connection is closed.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};

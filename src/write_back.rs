//! Write-Back Replication
//!
//! Mirrors selected mutations to a second caching tier. After the local
//! command succeeds, a descriptor is sent as one UDP datagram:
//!
//! ```text
//! CACHE_<SET>_<key>|{"args":[...],"cache_name":"CACHE_<SET>","method":"<method>"}
//! ```
//!
//! Sends never block and are never retried. A failed send is logged and the
//! client still gets the local reply.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::commands::{parse_int, utf8_key, CommandResult, CommandTable, HandlerFn};
use crate::config::Config;
use crate::context::Context;
use crate::protocol::Reply;

/// A connected, non-blocking datagram sender for one target cache.
#[derive(Debug)]
pub struct WriteBack {
    socket: UdpSocket,
    target: SocketAddr,
    cache_name: String,
}

impl WriteBack {
    /// Resolves `target` and connects a socket to it. The cache name is
    /// derived from `set`.
    pub fn connect(target: &str, set: &str) -> io::Result<Self> {
        let target = target.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write-back target '{}' did not resolve", target),
            )
        })?;

        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(target)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            target,
            cache_name: format!("CACHE_{}", set.to_uppercase()),
        })
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// The datagram payload for `method` applied to `key`.
    pub fn descriptor(&self, key: &str, method: &str, args: Vec<serde_json::Value>) -> String {
        let body = json!({
            "args": args,
            "cache_name": self.cache_name,
            "method": method,
        });
        format!("{}_{}|{}", self.cache_name, key, body)
    }

    /// Fire-and-forget send.
    pub fn send(&self, key: &str, method: &str, args: Vec<serde_json::Value>) {
        let payload = self.descriptor(key, method, args);
        match self.socket.send(payload.as_bytes()) {
            Ok(_) => debug!(addr = %self.target, method, key, "Write-back sent"),
            Err(e) => warn!(addr = %self.target, method, key, error = %e, "Write-back send failed"),
        }
    }
}

/// Wraps `inner` so that a successful call is followed by a datagram built
/// from the command's arguments.
fn mirrored<F>(inner: HandlerFn, sender: Arc<WriteBack>, method: &'static str, args_of: F) -> HandlerFn
where
    F: Fn(&[Bytes]) -> CommandResult<Vec<serde_json::Value>> + Send + Sync + 'static,
{
    Arc::new(move |ctx: &Context, args: &[Bytes]| -> CommandResult<Reply> {
        let reply = inner(ctx, args)?;
        let key = utf8_key(&args[0])?;
        sender.send(key, method, args_of(args)?);
        Ok(reply)
    })
}

/// Installs the configured write-back wrappers on `EXPIRE` and `HINCRBY`.
///
/// Without a target the table is returned unchanged. A target that cannot be
/// resolved or bound is an error.
pub fn install(mut table: CommandTable, config: &Config) -> io::Result<CommandTable> {
    let Some(target) = config.write_back_target.as_deref() else {
        return Ok(table);
    };
    if !config.write_back_set_timeout && !config.write_back_hincrby {
        return Ok(table);
    }

    let sender = Arc::new(WriteBack::connect(target, &config.set)?);

    if config.write_back_set_timeout {
        info!(set = %config.set, addr = %target, "Using write back for setTimeout");
        let sender = Arc::clone(&sender);
        table.decorate("EXPIRE", move |inner| {
            mirrored(inner, sender, "setTimeout", |args| {
                let key = utf8_key(&args[0])?;
                Ok(vec![json!(key), json!(parse_int(&args[1])?)])
            })
        });
    }

    if config.write_back_hincrby {
        info!(set = %config.set, addr = %target, "Using write back for hIncrBy");
        let sender = Arc::clone(&sender);
        table.decorate("HINCRBY", move |inner| {
            mirrored(inner, sender, "hIncrBy", |args| {
                let key = utf8_key(&args[0])?;
                let field = String::from_utf8_lossy(&args[1]);
                Ok(vec![json!(key), json!(field), json!(parse_int(&args[2])?)])
            })
        });
    }

    Ok(table)
}

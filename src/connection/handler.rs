//! Per-connection read, dispatch and reply loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

use crate::commands::CommandHandler;
use crate::protocol::{parse_frame, Frame, FrameError, Reply};

/// Largest amount of unparsed input held for one client.
const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Transport counters shared by all connections.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub frames_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn frame_processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Frame(#[from] FrameError),

    #[error("command task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// State for one connected client.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        commands: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        commands.context().metrics.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            commands,
            stats,
        }
    }

    /// Serves the client until it disconnects or the stream breaks.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.serve().await;
        if let Err(ConnectionError::Frame(e)) = &result {
            warn!(client = %self.addr, error = %e, "Malformed frame, closing connection");
            let reply = Reply::error(format!("ERR Protocol error: {}", e));
            // The connection is closing either way
            let _ = self.write_replies(&reply.serialize()).await;
        }

        match &result {
            Ok(()) | Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(ConnectionError::Frame(_)) => {}
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.commands.context().metrics.connection_closed();
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            let mut out = Vec::new();
            loop {
                match self.next_frame() {
                    Ok(Some(frame)) => self.execute(frame).await?.serialize_into(&mut out),
                    Ok(None) => break,
                    Err(e) => {
                        // Commands ahead of the bad frame already ran
                        if !out.is_empty() {
                            self.write_replies(&out).await?;
                        }
                        return Err(e);
                    }
                }
            }
            if !out.is_empty() {
                self.write_replies(&out).await?;
            }
            self.fill_buffer().await?;
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        match parse_frame(&self.buffer)? {
            Some((frame, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    command = %frame.name,
                    remaining = self.buffer.len(),
                    "Parsed frame"
                );
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// Runs one command on the blocking pool.
    async fn execute(&self, frame: Frame) -> Result<Reply, ConnectionError> {
        let commands = self.commands.clone();
        let reply = tokio::task::spawn_blocking(move || commands.execute(&frame)).await?;
        self.stats.frame_processed();
        Ok(reply)
    }

    async fn fill_buffer(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(client = %self.addr, size = self.buffer.len(), "Buffer size limit exceeded");
            return Err(ConnectionError::BufferFull);
        }
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(if self.buffer.is_empty() {
                ConnectionError::ClientDisconnected
            } else {
                ConnectionError::UnexpectedEof
            });
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }

    async fn write_replies(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        Ok(())
    }
}

/// Serves one client to completion, swallowing ordinary disconnects.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, commands, stats);
    if let Err(e) = handler.run().await {
        trace!(client = %addr, error = %e, "Connection ended");
    }
}

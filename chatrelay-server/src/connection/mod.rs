//! Per-client connection handler.
//!
//! Each TCP connection gets a [`Connection`] driven through three phases:
//!
//! ```text
//! AWAIT_NAME ──claimed──▶ REGISTERED ──quit / EOF / error──▶ TERMINATED
//!      └──────────────── EOF / error ────────────────────────────▲
//! ```
//!
//! The handler is split into submodules for readability:
//! - [`registration`]: name handshake, join and leave announcements
//! - [`messaging`]: dispatch of chat, private, and file commands

mod messaging;
mod registration;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chatrelay_sdk::protocol::ClientCommand;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::registry::Peer;
use crate::server::SharedState;

/// Most lines the writer task writes before flushing.
const MAX_WRITE_BATCH: usize = 64;

/// How long a closing connection's writer may spend flushing queued lines.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// State of a single client connection.
pub struct Connection {
    pub id: String,
    /// Display name, set once the handshake succeeds.
    pub name: Option<String>,
    /// Our own queue; the registry holds a clone once the name is claimed.
    peer: Peer,
}

impl Connection {
    fn new(id: String, peer: Peer) -> Self {
        Self { id, name: None, peer }
    }

    /// Queue a line for this client only.
    pub(crate) fn send(&self, line: impl Into<String>) {
        self.peer.deliver(&self.id, &line.into());
    }

    /// Next inbound line, or `Stuck` as soon as any delivery to this
    /// client has failed, whether or not the client is sending.
    async fn next_inbound<R>(&self, reader: &mut R, buf: &mut Vec<u8>, max_len: usize) -> Inbound
    where
        R: AsyncBufRead + Unpin,
    {
        tokio::select! {
            biased;
            () = self.peer.stuck() => Inbound::Stuck,
            inbound = read_inbound(reader, buf, max_len, &self.id) => inbound,
        }
    }
}

/// Why a connection ended.
#[derive(Debug)]
pub(crate) enum Disconnect {
    Quit,
    Closed,
    ReadFailed(std::io::Error),
    Stuck,
}

impl std::fmt::Display for Disconnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quit => f.write_str("quit"),
            Self::Closed => f.write_str("connection closed by peer"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::Stuck => f.write_str("send buffer full"),
        }
    }
}

/// One read from the client.
enum Inbound {
    Line(String),
    Closed,
    Failed(std::io::Error),
    Stuck,
}

impl Inbound {
    fn into_line(self) -> Result<String, Disconnect> {
        match self {
            Self::Line(line) => Ok(line),
            Self::Closed => Err(Disconnect::Closed),
            Self::Failed(e) => Err(Disconnect::ReadFailed(e)),
            Self::Stuck => Err(Disconnect::Stuck),
        }
    }
}

/// Handle a plain TCP connection.
pub async fn handle(stream: TcpStream, state: Arc<SharedState>) -> Result<()> {
    let peer = stream.peer_addr()?;
    let session_id = format!("{peer}");
    tracing::info!(%session_id, "New connection");
    let (reader, writer) = stream.into_split();
    handle_io(BufReader::new(reader), writer, session_id, state).await
}

/// Handle a generic async stream (in-memory pipes, wrapped transports).
pub async fn handle_generic<S>(stream: S, state: Arc<SharedState>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let session_id = format!("stream-{id}");
    tracing::info!(%session_id, "New connection (generic stream)");
    let (reader, writer) = tokio::io::split(stream);
    handle_io(BufReader::new(reader), writer, session_id, state).await
}

async fn handle_io<R, W>(
    mut reader: BufReader<R>,
    writer: W,
    session_id: String,
    state: Arc<SharedState>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    // Channel for sending lines TO this client
    let (tx, rx) = mpsc::channel::<String>(state.config.queue_depth);
    let write_handle = tokio::spawn(write_loop(writer, rx, session_id.clone()));
    let mut conn = Connection::new(session_id.clone(), Peer::new(tx));

    let reason = match registration::await_name(&mut conn, &mut reader, &state).await {
        Ok(()) => {
            registration::announce_join(&conn, &state);
            read_loop(&mut conn, &mut reader, &state).await
        }
        Err(reason) => reason,
    };

    registration::release(&conn, &state);
    tracing::info!(
        %session_id,
        name = conn.name.as_deref().unwrap_or("-"),
        %reason,
        "Connection closed"
    );

    // Dropping the last sender lets the writer drain and exit.
    drop(conn);
    let abort = write_handle.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, write_handle).await.is_err() {
        tracing::debug!(%session_id, "Writer did not drain in time");
        abort.abort();
    }
    Ok(())
}

/// REGISTERED: classify and dispatch lines until the client leaves.
async fn read_loop<R>(conn: &mut Connection, reader: &mut R, state: &SharedState) -> Disconnect
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let line = match conn.next_inbound(reader, &mut buf, state.config.max_line_len).await.into_line() {
            Ok(line) => line,
            Err(reason) => return reason,
        };

        match ClientCommand::parse(&line) {
            Ok(ClientCommand::Quit) => return Disconnect::Quit,
            Ok(cmd) => messaging::dispatch(conn, cmd, state),
            Err(e) => {
                tracing::debug!(session_id = %conn.id, "Dropping malformed command: {e}");
            }
        }
    }
}

/// Read the next acceptable line, skipping over-long ones.
///
/// At most `max_len` bytes of a line are ever buffered; the rest of an
/// over-long line is consumed and discarded up to its newline. A line that
/// is not valid UTF-8 fails the read.
async fn read_inbound<R>(reader: &mut R, buf: &mut Vec<u8>, max_len: usize, session_id: &str) -> Inbound
where
    R: AsyncBufRead + Unpin,
{
    loop {
        buf.clear();
        let mut dropped = 0usize;
        let mut eof = false;
        loop {
            let available = match reader.fill_buf().await {
                Ok(available) => available,
                Err(e) => return Inbound::Failed(e),
            };
            if available.is_empty() {
                eof = true;
                break;
            }
            let (used, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            if dropped == 0 && buf.len() + used <= max_len {
                buf.extend_from_slice(&available[..used]);
            } else {
                dropped += buf.len() + used;
                buf.clear();
            }
            reader.consume(used);
            if complete {
                break;
            }
        }

        if dropped > 0 {
            tracing::warn!(session_id, len = dropped, "Line too long, dropping");
            if eof {
                return Inbound::Closed;
            }
            continue;
        }
        if buf.is_empty() {
            // EOF with nothing pending
            return Inbound::Closed;
        }

        let line = match std::str::from_utf8(buf) {
            Ok(line) => line.trim_end_matches(['\r', '\n']),
            Err(e) => return Inbound::Failed(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        };
        tracing::trace!(session_id, "<- {line}");
        return Inbound::Line(line.to_string());
    }
}

/// Drain the outbound queue onto the socket, batching queued lines per flush.
async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>, session_id: String)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        if let Err(e) = write_line(&mut writer, &line).await {
            tracing::warn!(%session_id, "Write error: {e}");
            return;
        }
        // Drain any queued lines and batch-write them (reduces syscalls)
        let mut batch_count = 0;
        while let Ok(queued) = rx.try_recv() {
            if let Err(e) = write_line(&mut writer, &queued).await {
                tracing::warn!(%session_id, "Write error: {e}");
                return;
            }
            batch_count += 1;
            if batch_count >= MAX_WRITE_BATCH {
                break;
            }
        }
        if let Err(e) = writer.flush().await {
            tracing::warn!(%session_id, "Flush error: {e}");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

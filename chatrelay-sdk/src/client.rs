//! Async chat relay client.
//!
//! Manages the TCP connection, answers the name handshake, reveals
//! obfuscated envelopes, and emits [`Event`]s.
//!
//! The SDK does not reconnect. Consumers that want to stay online should
//! watch for [`Event::Disconnected`] and call [`connect`] again.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::event::Event;
use crate::obfuscate::{Obfuscator, XorObfuscator};
use crate::protocol::{ClientCommand, ServerLine};

/// How many alternate names to try after the first is rejected.
const MAX_NAME_RETRIES: u32 = 5;

/// Configuration for connecting to a relay server.
#[derive(Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Desired display name.
    pub name: String,
    /// Transform used to reveal obfuscated content. Must match the server's.
    pub obfuscator: Arc<dyn Obfuscator>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:12345".to_string(),
            name: "user".to_string(),
            obfuscator: Arc::new(XorObfuscator::default()),
        }
    }
}

impl std::fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("server_addr", &self.server_addr)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A handle to a running client connection.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<ClientCommand>,
}

impl ClientHandle {
    /// Public chat. The server treats any unrecognised line as chat, so
    /// text that itself looks like a command is sent as that command.
    pub async fn say(&self, text: &str) -> Result<()> {
        self.send(ClientCommand::PlainText {
            body: text.to_string(),
        })
        .await
    }

    pub async fn private(&self, target: &str, body: &str) -> Result<()> {
        self.send(ClientCommand::PrivateMessage {
            target: target.to_string(),
            body: body.to_string(),
        })
        .await
    }

    pub async fn announce_file(&self, filename: &str) -> Result<()> {
        self.send(ClientCommand::FileAnnounce {
            filename: filename.to_string(),
        })
        .await
    }

    pub async fn quit(&self) -> Result<()> {
        self.send(ClientCommand::Quit).await
    }

    pub async fn send(&self, cmd: ClientCommand) -> Result<()> {
        self.cmd_tx.send(cmd).await?;
        Ok(())
    }
}

/// Connect to a relay server and run the client.
///
/// Returns a handle for sending commands and a receiver for events.
/// The connection runs in a spawned task.
pub fn connect(config: ConnectConfig) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    let handle = ClientHandle { cmd_tx };

    tokio::spawn(async move {
        if let Err(e) = run_client(config, event_tx.clone(), cmd_rx).await {
            let _ = event_tx
                .send(Event::Disconnected {
                    reason: e.to_string(),
                })
                .await;
        }
    });

    (handle, event_rx)
}

async fn run_client(
    config: ConnectConfig,
    event_tx: mpsc::Sender<Event>,
    cmd_rx: mpsc::Receiver<ClientCommand>,
) -> Result<()> {
    tracing::debug!("Connecting to {}...", config.server_addr);
    let tcp = TcpStream::connect(&config.server_addr)
        .await
        .map_err(|e| anyhow::anyhow!("TCP connect to {} failed: {e}", config.server_addr))?;
    let _ = event_tx.send(Event::Connected).await;
    let (reader, writer) = tokio::io::split(tcp);
    run_session(BufReader::new(reader), writer, &config, event_tx, cmd_rx).await
}

async fn run_session<R, W>(
    reader: R,
    mut writer: W,
    config: &ConnectConfig,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut candidate = config.name.clone();
    let mut name_tries: u32 = 0;
    let mut registered = false;
    let mut pending_commands: Vec<ClientCommand> = Vec::new();
    let mut lines = reader.lines();

    loop {
        tokio::select! {
            result = lines.next_line() => {
                let Some(raw) = result? else {
                    let _ = event_tx.send(Event::Disconnected { reason: "EOF".to_string() }).await;
                    break;
                };
                let raw = raw.trim_end_matches('\r').to_string();
                let _ = event_tx.send(Event::RawLine(raw.clone())).await;

                let line = match ServerLine::parse(&raw) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::debug!("Unrecognised server line {raw:?}: {e}");
                        continue;
                    }
                };
                match line {
                    ServerLine::SubmitName => {
                        write_line(&mut writer, &candidate).await?;
                    }
                    ServerLine::NameInUse | ServerLine::NameInvalid => {
                        name_tries = name_tries.saturating_add(1);
                        let next = (name_tries <= MAX_NAME_RETRIES)
                            .then(|| format!("{}{}", config.name, name_tries));
                        let _ = event_tx.send(Event::NameRejected {
                            tried: candidate.clone(),
                            next: next.clone(),
                        }).await;
                        match next {
                            // The server does not re-prompt; answer right away.
                            Some(alt) => {
                                write_line(&mut writer, &alt).await?;
                                candidate = alt;
                            }
                            None => {
                                let _ = event_tx.send(Event::Disconnected { reason: "Name in use".to_string() }).await;
                                break;
                            }
                        }
                    }
                    ServerLine::NameAccepted(name) => {
                        registered = true;
                        let _ = event_tx.send(Event::Registered { name }).await;
                        // Flush any commands that were queued before registration
                        for cmd in pending_commands.drain(..) {
                            write_line(&mut writer, &cmd.to_string()).await?;
                        }
                    }
                    ServerLine::UserList(names) => {
                        let _ = event_tx.send(Event::Presence { names }).await;
                    }
                    ServerLine::Envelope(envelope) => {
                        let text = if envelope.is_encrypted() {
                            config.obfuscator.reveal(envelope.content()).unwrap_or_else(|e| {
                                tracing::warn!("Could not reveal message content: {e}");
                                envelope.content().to_string()
                            })
                        } else {
                            envelope.content().to_string()
                        };
                        let _ = event_tx.send(Event::Message { envelope, text }).await;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let quitting = cmd == ClientCommand::Quit;
                if registered {
                    write_line(&mut writer, &cmd.to_string()).await?;
                } else if !quitting {
                    pending_commands.push(cmd);
                }
                // Before registration the server would read `/quit` as a
                // name candidate, so just close.
                if quitting {
                    let _ = event_tx.send(Event::Disconnected { reason: "Quit".to_string() }).await;
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(format!("{line}\n").as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

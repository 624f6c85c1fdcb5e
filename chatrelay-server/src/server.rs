//! Server state and TCP listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chatrelay_sdk::obfuscate::Obfuscator;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::connection;
use crate::registry::ClientRegistry;

/// Pause after a failed accept (e.g. out of file descriptors) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Shared state accessible by all connection handlers.
pub struct SharedState {
    /// display name -> outbound queue for that client
    pub registry: ClientRegistry,
    /// Transform applied to public and private bodies.
    pub obfuscator: Arc<dyn Obfuscator>,
    /// Server configuration (line limits, queue depth).
    pub config: ServerConfig,
}

impl SharedState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            registry: ClientRegistry::new(),
            obfuscator: config.obfuscator(),
            config,
        }
    }
}

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    fn build_state(&self) -> Arc<SharedState> {
        let state = SharedState::new(self.config.clone());
        if !state.obfuscator.is_active() {
            tracing::warn!("Obfuscation disabled, chat bodies travel in the clear");
        }
        Arc::new(state)
    }

    /// Run the server, blocking forever.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.listen_addr))?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        let state = self.build_state();
        accept_loop(listener, state).await
    }

    /// Start the server and return the bound address + task handle (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.listen_addr))?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");

        let state = self.build_state();
        let handle = tokio::spawn(accept_loop(listener, state));

        Ok((addr, handle))
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<SharedState>) -> Result<()> {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!("Accept error: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = connection::handle(stream, state).await {
                tracing::error!(%addr, "Connection error: {e}");
            }
        });
    }
}

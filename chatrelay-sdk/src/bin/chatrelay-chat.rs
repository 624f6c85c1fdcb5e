//! Line-mode console client for chatrelay.
//!
//! Usage:
//!   cargo run --bin chatrelay-chat -- --server 127.0.0.1:12345 --name alice
//!
//! Type to chat. `/pm <name> <text>` sends privately, `/file <name>`
//! announces a file, `/quit` leaves.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use chatrelay_sdk::client::{self, ConnectConfig};
use chatrelay_sdk::event::Event;
use chatrelay_sdk::obfuscate::{DEFAULT_KEY, Obfuscator, Passthrough, XorObfuscator};
use chatrelay_sdk::protocol::ClientCommand;

#[derive(Parser)]
#[command(name = "chatrelay-chat", about = "Console client for chatrelay")]
struct Args {
    /// Server address (host:port)
    #[arg(long, default_value = "127.0.0.1:12345", env = "CHATRELAY_SERVER")]
    server: String,

    /// Display name to request
    #[arg(long)]
    name: String,

    /// Obfuscation key (must match the server)
    #[arg(long, default_value = DEFAULT_KEY, env = "CHATRELAY_KEY")]
    obfuscation_key: String,

    /// The server runs with obfuscation disabled
    #[arg(long)]
    no_obfuscation: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let obfuscator: Arc<dyn Obfuscator> = if args.no_obfuscation {
        Arc::new(Passthrough)
    } else {
        Arc::new(XorObfuscator::new(&args.obfuscation_key))
    };

    let (handle, mut events) = client::connect(ConnectConfig {
        server_addr: args.server,
        name: args.name,
        obfuscator: Arc::clone(&obfuscator),
    });

    let input = handle.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            // Malformed commands are dropped by the server anyway.
            let cmd = match ClientCommand::parse(&line) {
                Ok(cmd) => cmd,
                Err(e) => {
                    eprintln!("! {e}");
                    continue;
                }
            };
            let quitting = cmd == ClientCommand::Quit;
            if input.send(cmd).await.is_err() || quitting {
                return;
            }
        }
        // stdin closed
        let _ = input.quit().await;
    });

    while let Some(event) = events.recv().await {
        match event {
            Event::Registered { name } => println!("* connected as {name}"),
            Event::NameRejected { tried, next: Some(next) } => {
                println!("* name {tried} is taken, trying {next}");
            }
            Event::NameRejected { tried, next: None } => {
                println!("* name {tried} is taken, giving up");
            }
            Event::Presence { names } => println!("* online: {}", names.join(", ")),
            Event::Message { envelope, .. } => {
                println!("{}", envelope.revealed(obfuscator.as_ref()).unwrap_or(envelope));
            }
            Event::Disconnected { reason } => {
                println!("* disconnected: {reason}");
                break;
            }
            Event::Connected | Event::RawLine(_) => {}
        }
    }

    Ok(())
}

//! Server configuration (command line and environment).

use std::sync::Arc;

use chatrelay_sdk::obfuscate::{DEFAULT_KEY, Obfuscator, Passthrough, XorObfuscator};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "chatrelay-server", about = "Line-based chat relay server")]
pub struct ServerConfig {
    /// Address to listen on for client connections.
    #[arg(long, default_value = "0.0.0.0:12345", env = "CHATRELAY_LISTEN")]
    pub listen_addr: String,

    /// Key for the content obfuscation transform.
    #[arg(long, default_value = DEFAULT_KEY, env = "CHATRELAY_KEY")]
    pub obfuscation_key: String,

    /// Send chat bodies in the clear.
    #[arg(long)]
    pub no_obfuscation: bool,

    /// Inbound lines longer than this many bytes are dropped.
    #[arg(long, default_value_t = 8192)]
    pub max_line_len: usize,

    /// Outbound lines buffered per client before it is considered stuck.
    #[arg(long, default_value_t = 4096)]
    pub queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:12345".to_string(),
            obfuscation_key: DEFAULT_KEY.to_string(),
            no_obfuscation: false,
            max_line_len: 8192,
            queue_depth: 4096,
        }
    }
}

impl ServerConfig {
    /// Build the transform shared by every connection.
    pub fn obfuscator(&self) -> Arc<dyn Obfuscator> {
        if self.no_obfuscation {
            Arc::new(Passthrough)
        } else {
            Arc::new(XorObfuscator::new(&self.obfuscation_key))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_defaults_match_default() {
        let parsed = ServerConfig::parse_from(["chatrelay-server"]);
        let default = ServerConfig::default();
        assert_eq!(parsed.listen_addr, default.listen_addr);
        assert_eq!(parsed.obfuscation_key, default.obfuscation_key);
        assert_eq!(parsed.no_obfuscation, default.no_obfuscation);
        assert_eq!(parsed.max_line_len, default.max_line_len);
        assert_eq!(parsed.queue_depth, default.queue_depth);
    }

    #[test]
    fn no_obfuscation_selects_passthrough() {
        let config = ServerConfig::parse_from(["chatrelay-server", "--no-obfuscation"]);
        assert!(!config.obfuscator().is_active());
        assert!(ServerConfig::default().obfuscator().is_active());
    }
}

//! chatrelay-sdk: protocol types and async client for the chat relay.
//!
//! - [`obfuscate`]: reversible content transform (not encryption)
//! - [`envelope`]: the one-line message format
//! - [`protocol`]: control tokens, client commands, server line parsing
//! - [`client`] / [`event`]: connect, send commands, consume events

pub mod client;
pub mod envelope;
pub mod event;
pub mod obfuscate;
pub mod protocol;

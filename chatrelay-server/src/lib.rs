//! chatrelay-server: line-based chat relay.
//!
//! - [`server`]: listener and shared state
//! - [`registry`]: connected clients by display name
//! - [`connection`]: per-client handshake and message routing
//! - [`config`]: command line / environment configuration

pub mod config;
pub mod connection;
pub mod registry;
pub mod server;

//! Events emitted by the client for the UI layer to consume.

use crate::envelope::Envelope;

/// Events that the SDK emits to the consumer (console client, bot, tests).
#[derive(Debug, Clone)]
pub enum Event {
    /// TCP connection established.
    Connected,

    /// The server rejected a candidate name; the client is retrying with
    /// `next` or giving up when `next` is `None`.
    NameRejected {
        tried: String,
        next: Option<String>,
    },

    /// Registration complete. `name` is our confirmed display name.
    Registered {
        name: String,
    },

    /// The server's presence list changed.
    Presence {
        names: Vec<String>,
    },

    /// A chat, private, system, or file envelope.
    /// `text` is the displayable content, revealed if the envelope was
    /// obfuscated.
    Message {
        envelope: Envelope,
        text: String,
    },

    /// Connection was closed.
    Disconnected {
        reason: String,
    },

    /// Raw server line (for debugging).
    RawLine(String),
}

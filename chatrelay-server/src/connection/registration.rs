//! Name handshake (AWAIT_NAME) and the join/leave announcements that
//! bracket the REGISTERED phase.

use chatrelay_sdk::envelope::Envelope;
use chatrelay_sdk::protocol::{NAME_ACCEPTED, NAME_IN_USE, NAME_INVALID, SUBMIT_NAME, is_valid_name};
use tokio::io::AsyncBufRead;

use super::{Connection, Disconnect};
use crate::server::SharedState;

/// Prompt for a name and keep reading candidates until one is claimed.
///
/// On success `conn.name` is set, the client is in the registry, and
/// `NAMEACCEPTED` is already queued as its first line after the prompts.
/// A client that disconnects here never touches the registry.
pub(super) async fn await_name<R>(
    conn: &mut Connection,
    reader: &mut R,
    state: &SharedState,
) -> Result<(), Disconnect>
where
    R: AsyncBufRead + Unpin,
{
    conn.send(SUBMIT_NAME);
    let mut buf = Vec::new();
    loop {
        let candidate = conn
            .next_inbound(reader, &mut buf, state.config.max_line_len)
            .await
            .into_line()?;
        let candidate = candidate.trim();

        if !is_valid_name(candidate) {
            tracing::debug!(session_id = %conn.id, candidate, "Rejected invalid name");
            conn.send(NAME_INVALID);
            continue;
        }

        let greeting = format!("{NAME_ACCEPTED} {candidate}");
        if state
            .registry
            .try_register_with_greeting(candidate, conn.peer.clone(), &greeting)
        {
            conn.name = Some(candidate.to_string());
            return Ok(());
        }

        tracing::debug!(session_id = %conn.id, candidate, "Name in use");
        conn.send(NAME_IN_USE);
    }
}

/// Tell everyone about a new arrival and refresh presence.
pub(super) fn announce_join(conn: &Connection, state: &SharedState) {
    let Some(ref name) = conn.name else { return };
    tracing::info!(session_id = %conn.id, name = %name, online = state.registry.len(), "Joined");
    state
        .registry
        .broadcast(&Envelope::system(format!("{name} joined")).to_string());
    state.registry.broadcast_presence();
}

/// TERMINATED: release the name and announce the departure.
///
/// Only a connection that claimed a name causes any broadcast, and since the
/// registry removes a name at most once, the announcement happens at most
/// once per connection.
pub(super) fn release(conn: &Connection, state: &SharedState) {
    let Some(ref name) = conn.name else { return };
    if !state.registry.unregister(name) {
        return;
    }
    tracing::info!(session_id = %conn.id, name = %name, online = state.registry.len(), "Left");
    state
        .registry
        .broadcast(&Envelope::system(format!("{name} left")).to_string());
    state.registry.broadcast_presence();
}

//! Dispatch of registered-client commands: public chat, private messages,
//! and file announcements.

use chatrelay_sdk::envelope::Envelope;
use chatrelay_sdk::protocol::ClientCommand;

use super::Connection;
use crate::server::SharedState;

/// Route one classified line. `Quit` is handled by the read loop before
/// this is called.
pub(super) fn dispatch(conn: &mut Connection, cmd: ClientCommand, state: &SharedState) {
    let Some(sender) = conn.name.clone() else {
        return;
    };
    match cmd {
        ClientCommand::PrivateMessage { target, body } => {
            handle_private(conn, &sender, &target, &body, state);
        }
        ClientCommand::FileAnnounce { filename } => {
            tracing::debug!(session_id = %conn.id, name = %sender, "File announced");
            let envelope = Envelope::file(&sender, filename);
            state.registry.broadcast(&envelope.to_string());
        }
        ClientCommand::PlainText { body } => {
            if body.trim().is_empty() {
                return;
            }
            let envelope = Envelope::public(
                &sender,
                state.obfuscator.obfuscate(&body),
                state.obfuscator.is_active(),
            );
            state.registry.broadcast(&envelope.to_string());
        }
        ClientCommand::Quit => {}
    }
}

fn handle_private(conn: &mut Connection, sender: &str, target: &str, body: &str, state: &SharedState) {
    let envelope = Envelope::private(
        sender,
        state.obfuscator.obfuscate(body),
        state.obfuscator.is_active(),
    );
    let line = envelope.to_string();

    if !state.registry.send_to(target, &line) {
        tracing::debug!(session_id = %conn.id, from = %sender, to = %target, "Private message target not found");
        conn.send(Envelope::system(format!("User not found: {target}")).to_string());
        return;
    }

    tracing::debug!(session_id = %conn.id, from = %sender, to = %target, "Private message delivered");
    // Echo so the sender sees what was sent; a message to oneself already arrived.
    if target != sender {
        conn.send(line);
    }
}

//! Control frame construction and inspection
//!
//! Control frames carry `COMMAND_ENABLED=true` plus the command fields;
//! command values are matched case-insensitively on the wire. Replies
//! carry a machine-checkable command/argument pair (`COMMAND`/`ARGUMENT`,
//! with `ARGUMENT_DATA` naming the subject) and a free-text reason under
//! `COMMAND_ARGUMENT`.

use tracing::debug;

use tether_wire::{keys, write_frame_bytes, Payload};

use crate::identity::Identity;
use crate::transport::SharedWriter;

/// Start a control frame from the local engine's identity
pub(crate) fn control(sender: &Identity, command: &str) -> Payload {
    let mut payload = Payload::new();
    payload.write_text(keys::MAC, sender.as_str());
    payload.write_boolean(keys::COMMAND_ENABLED, true);
    payload.write_text(keys::COMMAND, command);
    payload
}

/// A `success`/`failed`/`decline` reply
pub(crate) struct Reply<'a> {
    pub command: &'a str,
    pub argument: &'a str,
    /// Machine-checkable subject (e.g. the rejected name or command)
    pub data: Option<&'a str>,
    /// Human-readable reason
    pub reason: Option<&'a str>,
}

impl<'a> Reply<'a> {
    pub fn new(command: &'a str, argument: &'a str) -> Self {
        Reply {
            command,
            argument,
            data: None,
            reason: None,
        }
    }

    pub fn data(mut self, data: &'a str) -> Self {
        self.data = Some(data);
        self
    }

    pub fn reason(mut self, reason: &'a str) -> Self {
        self.reason = Some(reason);
        self
    }
}

/// Build and send a reply on the given connection; failures are logged and
/// swallowed, a reply is never worth tearing a connection down for.
pub(crate) async fn send_reply(writer: &SharedWriter, sender: &Identity, reply: Reply<'_>) -> bool {
    let mut payload = control(sender, reply.command);
    payload.write_text(keys::ARGUMENT, reply.argument);
    if let Some(data) = reply.data {
        payload.write_text(keys::ARGUMENT_DATA, data);
    }
    if let Some(reason) = reply.reason {
        payload.write_text(keys::COMMAND_ARGUMENT, reason);
    }
    send_control(writer, &payload).await
}

/// Write a control frame; returns whether the write succeeded
pub(crate) async fn send_control(writer: &SharedWriter, payload: &Payload) -> bool {
    let bytes = match payload.compile() {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "Failed to compile control frame");
            return false;
        }
    };

    let mut guard = writer.lock().await;
    match write_frame_bytes(&mut *guard, &bytes).await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "Failed to write control frame");
            false
        }
    }
}

/// Whether the frame is a control frame
pub(crate) fn is_control(payload: &Payload) -> bool {
    payload.boolean(keys::COMMAND_ENABLED).unwrap_or(false)
}

/// The frame's command, lowercased for matching
pub(crate) fn command_of(payload: &Payload) -> Option<String> {
    payload.text(keys::COMMAND).map(str::to_lowercase)
}

/// The frame's command argument, lowercased for matching
pub(crate) fn argument_of(payload: &Payload) -> Option<String> {
    payload.text(keys::ARGUMENT).map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_frame_shape() {
        let sender = Identity::new("server-id");
        let mut payload = control(&sender, keys::command::ACCEPT);
        payload.write_text(keys::ARGUMENT, "connect");

        assert!(is_control(&payload));
        assert_eq!(payload.text(keys::MAC), Some("server-id"));
        assert_eq!(command_of(&payload).as_deref(), Some("accept"));
        assert_eq!(argument_of(&payload).as_deref(), Some("connect"));
    }

    #[test]
    fn test_command_matching_is_case_insensitive() {
        let sender = Identity::new("id");
        let payload = control(&sender, "DISCONNECT");
        assert_eq!(command_of(&payload).as_deref(), Some("disconnect"));
    }

    #[test]
    fn test_data_frame_is_not_control() {
        let mut payload = Payload::new();
        payload.write_boolean(keys::COMMAND_ENABLED, false);
        assert!(!is_control(&payload));
        assert!(!is_control(&Payload::new()));
    }
}

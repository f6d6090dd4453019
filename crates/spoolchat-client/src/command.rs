//! Commands for external → control-loop communication.
//!
//! [`ClientCommand`] is the bounded-channel message type the public API
//! uses to drive the loop. Commands are processed one at a time, which
//! serializes all state mutation. Only `GetContacts` carries a reply
//! channel; conversation snapshots are served directly from the shared
//! conversation mutex and never enter this queue.

use std::collections::HashMap;

use spoolchat_types::MessageId;
use tokio::sync::oneshot;

use crate::contacts::ContactSummary;

/// Commands accepted by the control loop.
pub(crate) enum ClientCommand {
    /// Create a pending contact and start its key exchange.
    AddContact {
        /// Unique nickname for the new contact.
        nickname: String,
        /// Low-entropy secret shared with the peer out of band.
        shared_secret: Vec<u8>,
    },

    /// Delete a contact, cancelling its key exchange if pending.
    RemoveContact {
        /// Nickname of the contact to delete.
        nickname: String,
    },

    /// Snapshot of all contacts keyed by nickname.
    GetContacts {
        /// Reply channel for the snapshot.
        reply: oneshot::Sender<HashMap<String, ContactSummary>>,
    },

    /// Encrypt and submit a message to a contact's remote spool.
    SendMessage {
        /// Conversation message id already returned to the caller.
        message_id: MessageId,
        /// Recipient nickname.
        nickname: String,
        /// Plaintext payload.
        payload: Vec<u8>,
    },
}

// Manual Debug: skips payloads and the reply sender.
impl std::fmt::Debug for ClientCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddContact { nickname, .. } => f
                .debug_struct("AddContact")
                .field("nickname", nickname)
                .finish_non_exhaustive(),
            Self::RemoveContact { nickname } => f
                .debug_struct("RemoveContact")
                .field("nickname", nickname)
                .finish(),
            Self::GetContacts { .. } => f.write_str("GetContacts"),
            Self::SendMessage { message_id, nickname, .. } => f
                .debug_struct("SendMessage")
                .field("message_id", message_id)
                .field("nickname", nickname)
                .finish_non_exhaustive(),
        }
    }
}

//! Transport-id send tracker.
//!
//! Maps every in-flight transport submission to the conversation message
//! it carries. Read-inbox polls use the client's own nickname as the
//! descriptor nickname; that convention distinguishes read responses
//! from send acknowledgements. Entries are drained on reply and on
//! garbage collection.

use std::collections::HashMap;

use spoolchat_types::MessageId;

use crate::transport::TransportId;

/// What one transport submission was for.
#[derive(Clone, Debug)]
pub(crate) struct SentMessageDescriptor {
    /// Recipient nickname, or the client's own nickname for inbox reads.
    pub nickname: String,
    /// Conversation message id; for inbox reads the first four bytes
    /// carry the requested spool offset.
    pub message_id: MessageId,
}

/// In-flight submissions keyed by transport id.
#[derive(Default)]
pub(crate) struct SendTracker {
    entries: HashMap<TransportId, SentMessageDescriptor>,
}

impl SendTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: TransportId, descriptor: SentMessageDescriptor) {
        self.entries.insert(id, descriptor);
    }

    pub fn get(&self, id: &TransportId) -> Option<&SentMessageDescriptor> {
        self.entries.get(id)
    }

    pub fn remove(&mut self, id: &TransportId) -> Option<SentMessageDescriptor> {
        self.entries.remove(id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Mutex-guarded conversation store.
//!
//! Conversations map nickname → (message id → message). Snapshot
//! accessors serve callers outside the control loop, so the map sits
//! behind a coarse mutex; all mutation still originates in the loop and
//! every critical section is lock-scoped, never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use spoolchat_types::{Message, MessageId, Timestamp};

/// All conversations keyed by contact nickname.
pub type ConversationMap = HashMap<String, HashMap<MessageId, Message>>;

// ---------------------------------------------------------------------------
// ConversationStore
// ---------------------------------------------------------------------------

/// Shared handle to the conversation map.
#[derive(Clone, Default)]
pub(crate) struct ConversationStore {
    inner: Arc<Mutex<ConversationMap>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a map restored from persisted state.
    pub fn from_map(map: ConversationMap) -> Self {
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }

    /// Inserts a message, creating the conversation on first use.
    pub fn insert(&self, nickname: &str, message_id: MessageId, message: Message) {
        let mut map = self.lock();
        map.entry(nickname.to_string())
            .or_default()
            .insert(message_id, message);
    }

    /// Applies `f` to one message. Returns `false` if the conversation or
    /// message does not exist.
    pub fn with_message(
        &self,
        nickname: &str,
        message_id: &MessageId,
        f: impl FnOnce(&mut Message),
    ) -> bool {
        let mut map = self.lock();
        match map.get_mut(nickname).and_then(|c| c.get_mut(message_id)) {
            Some(message) => {
                f(message);
                true
            }
            None => false,
        }
    }

    /// Snapshot of one conversation.
    pub fn conversation(&self, nickname: &str) -> Option<HashMap<MessageId, Message>> {
        self.lock().get(nickname).cloned()
    }

    /// Snapshot of every conversation.
    pub fn all(&self) -> ConversationMap {
        self.lock().clone()
    }

    /// Outbound messages submitted but not yet delivered, sorted by
    /// timestamp with the message id as a stable tie-break.
    pub fn undelivered_outbound(&self, nickname: &str) -> Vec<(MessageId, Message)> {
        let map = self.lock();
        let mut undelivered: Vec<(MessageId, Message)> = match map.get(nickname) {
            Some(convo) => convo
                .iter()
                .filter(|(_, m)| m.outbound && m.sent && !m.delivered)
                .map(|(id, m)| (*id, m.clone()))
                .collect(),
            None => Vec::new(),
        };
        undelivered.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then(a.0.cmp(&b.0)));
        undelivered
    }

    /// Drops expired messages and the ciphertexts of delivered outbound
    /// messages. Returns the number of removed messages.
    pub fn garbage_collect(&self, now: &Timestamp, ttl: chrono::Duration) -> usize {
        let mut removed = 0;
        let mut map = self.lock();
        for messages in map.values_mut() {
            messages.retain(|_, message| {
                if message.outbound && message.delivered {
                    message.ciphertext = Vec::new();
                }
                if message.is_expired(now, ttl) {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConversationMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

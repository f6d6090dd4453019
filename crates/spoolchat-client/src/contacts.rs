//! Contacts and the in-memory contact registry.
//!
//! The registry is written only by the control loop. It keeps two
//! indexes, by stable id and by nickname, which always agree in size and
//! content; no two contacts share either key. Iteration is in ascending
//! id order, which makes trial decryption deterministic within one pass.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use rand::rngs::OsRng;
use rand::RngCore;
use spoolchat_types::{ContactId, Result, SpoolchatError};
use tokio_util::sync::CancellationToken;

use crate::ratchet::{Ratchet, RatchetFactory};
use crate::spool::SpoolWriteDescriptor;
use crate::state::ContactRecord;

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// One peer, pending or established.
///
/// The ratchet sits behind its own lock because encrypt and decrypt
/// mutate internal counters; the lock is never held across an await
/// point.
pub(crate) struct Contact {
    /// Stable id, unique within the registry.
    pub id: ContactId,
    /// Unique, non-empty nickname.
    pub nickname: String,
    /// `true` until the key exchange completes.
    pub is_pending: bool,
    /// The peer's inbox descriptor; `None` while pending.
    pub spool_write: Option<SpoolWriteDescriptor>,
    /// Resumable rendezvous state; `None` once established or failed.
    pub kx_state: Option<Vec<u8>>,
    /// Cancels the rendezvous task; `None` once not pending.
    pub kx_cancel: Option<CancellationToken>,
    /// Textual outcome of a failed exchange.
    pub kx_result: Option<String>,
    /// Ciphertexts sent but not yet acknowledged by the remote spool.
    pub unacked: u32,
    ratchet: Mutex<Box<dyn Ratchet>>,
}

/// Read-only view of a contact returned by `get_contacts`.
#[derive(Clone, Debug)]
pub struct ContactSummary {
    /// Stable contact id.
    pub id: ContactId,
    /// Contact nickname.
    pub nickname: String,
    /// `true` until the key exchange completes.
    pub is_pending: bool,
    /// Ciphertexts awaiting a remote spool acknowledgement.
    pub unacked: u32,
    /// Failure description of a dead key exchange, if any.
    pub kx_result: Option<String>,
}

impl Contact {
    /// Creates a fresh pending contact with a running key exchange.
    pub fn new(
        id: ContactId,
        nickname: String,
        ratchet: Box<dyn Ratchet>,
        kx_state: Vec<u8>,
        kx_cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            nickname,
            is_pending: true,
            spool_write: None,
            kx_state: Some(kx_state),
            kx_cancel: Some(kx_cancel),
            kx_result: None,
            unacked: 0,
            ratchet: Mutex::new(ratchet),
        }
    }

    /// Rebuilds a contact from its persisted record.
    pub fn from_record(record: ContactRecord, ratchets: &dyn RatchetFactory) -> Result<Self> {
        let ratchet = ratchets.restore(&record.ratchet)?;
        Ok(Self {
            id: record.id,
            nickname: record.nickname,
            is_pending: record.is_pending,
            spool_write: record.spool_write_descriptor,
            kx_state: record.kx_state,
            kx_cancel: None,
            kx_result: record.kx_result,
            unacked: record.unacked,
            ratchet: Mutex::new(ratchet),
        })
    }

    /// Serializes the contact for the persisted snapshot.
    pub fn to_record(&self) -> Result<ContactRecord> {
        let ratchet = self.lock_ratchet().save()?;
        Ok(ContactRecord {
            id: self.id,
            nickname: self.nickname.clone(),
            is_pending: self.is_pending,
            ratchet,
            spool_write_descriptor: self.spool_write.clone(),
            kx_state: self.kx_state.clone(),
            kx_result: self.kx_result.clone(),
            unacked: self.unacked,
        })
    }

    /// Produces this side's signed key-exchange offer.
    pub fn key_exchange_offer(&self) -> Result<Vec<u8>> {
        self.lock_ratchet().key_exchange_offer()
    }

    /// Completes the ratchet session with the peer's signed blob.
    pub fn process_key_exchange(&self, signed_kx: &[u8]) -> Result<()> {
        self.lock_ratchet().process_key_exchange(signed_kx)
    }

    /// Encrypts one framed payload buffer.
    pub fn encrypt(&self, framed: &[u8]) -> Vec<u8> {
        self.lock_ratchet().encrypt(framed)
    }

    /// Attempts to decrypt a ciphertext against this contact's session.
    pub fn try_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.lock_ratchet().decrypt(ciphertext)
    }

    /// Builds the read-only view.
    pub fn summary(&self) -> ContactSummary {
        ContactSummary {
            id: self.id,
            nickname: self.nickname.clone(),
            is_pending: self.is_pending,
            unacked: self.unacked,
            kx_result: self.kx_result.clone(),
        }
    }

    fn lock_ratchet(&self) -> std::sync::MutexGuard<'_, Box<dyn Ratchet>> {
        // A poisoned lock still holds a usable ratchet.
        self.ratchet.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// ContactRegistry
// ---------------------------------------------------------------------------

/// In-memory registry of all contacts, indexed by id and by nickname.
#[derive(Default)]
pub(crate) struct ContactRegistry {
    by_id: BTreeMap<ContactId, Contact>,
    by_nickname: HashMap<String, ContactId>,
}

impl ContactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn contains_nickname(&self, nickname: &str) -> bool {
        self.by_nickname.contains_key(nickname)
    }

    /// Draws a fresh non-zero id that is not in use.
    pub fn random_id(&self) -> ContactId {
        loop {
            let id = ContactId::new(OsRng.next_u64());
            if id.is_zero() || self.by_id.contains_key(&id) {
                continue;
            }
            return id;
        }
    }

    /// Inserts a contact, rejecting duplicate nicknames and ids.
    pub fn insert(&mut self, contact: Contact) -> Result<()> {
        if contact.nickname.is_empty() {
            return Err(SpoolchatError::Internal {
                reason: "contact nickname must be non-empty".into(),
            });
        }
        if self.by_nickname.contains_key(&contact.nickname) {
            return Err(SpoolchatError::ContactExists {
                nickname: contact.nickname,
            });
        }
        if self.by_id.contains_key(&contact.id) {
            return Err(SpoolchatError::Internal {
                reason: format!("contact id {} already in use", contact.id),
            });
        }
        self.by_nickname.insert(contact.nickname.clone(), contact.id);
        self.by_id.insert(contact.id, contact);
        Ok(())
    }

    /// Removes a contact by nickname, returning it if present.
    pub fn remove_by_nickname(&mut self, nickname: &str) -> Option<Contact> {
        let id = self.by_nickname.remove(nickname)?;
        self.by_id.remove(&id)
    }

    pub fn get(&self, id: ContactId) -> Option<&Contact> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: ContactId) -> Option<&mut Contact> {
        self.by_id.get_mut(&id)
    }

    pub fn get_by_nickname(&self, nickname: &str) -> Option<&Contact> {
        self.by_id.get(self.by_nickname.get(nickname)?)
    }

    pub fn get_by_nickname_mut(&mut self, nickname: &str) -> Option<&mut Contact> {
        let id = *self.by_nickname.get(nickname)?;
        self.by_id.get_mut(&id)
    }

    /// Iterates all contacts in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.by_id.values()
    }

    /// Read-only views keyed by nickname.
    pub fn summaries(&self) -> HashMap<String, ContactSummary> {
        self.by_id
            .values()
            .map(|c| (c.nickname.clone(), c.summary()))
            .collect()
    }

    /// Serializes all contacts for the persisted snapshot.
    pub fn records(&self) -> Result<Vec<ContactRecord>> {
        self.by_id.values().map(Contact::to_record).collect()
    }

    /// Cancels every pending key-exchange task.
    pub fn cancel_pending_exchanges(&mut self) {
        for contact in self.by_id.values_mut() {
            if contact.is_pending {
                if let Some(cancel) = contact.kx_cancel.take() {
                    tracing::debug!(nickname = %contact.nickname, "halting pending key exchange");
                    cancel.cancel();
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

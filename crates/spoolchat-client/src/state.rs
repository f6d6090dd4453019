//! Persisted client state: snapshot schema and the persister seam.
//!
//! The whole client is one crash-consistent snapshot: identity, contacts
//! (with their serialized ratchet and rendezvous blobs), the read-spool
//! descriptor, and all conversations. Snapshots are encoded as CBOR so
//! the blob is self-describing and round-trips losslessly; writes go
//! through a [`StateStore`], called synchronously from the control loop.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use ciborium::{from_reader, ser::into_writer};
use serde::{Deserialize, Serialize};
use spoolchat_types::{ContactId, Result, SpoolchatError};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::conversations::ConversationMap;
use crate::spool::{SpoolReadDescriptor, SpoolWriteDescriptor};

/// Current snapshot schema version.
pub const STATE_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// LinkKey
// ---------------------------------------------------------------------------

/// Private link key authenticating the mix-network session.
///
/// Held as opaque bytes; zeroized on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct LinkKey(Vec<u8>);

impl LinkKey {
    /// Wraps raw private key bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// Debug elides the key bytes.
impl std::fmt::Debug for LinkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LinkKey({} bytes)", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// ContactRecord
// ---------------------------------------------------------------------------

/// Serializable form of one contact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Stable contact id.
    pub id: ContactId,
    /// Unique nickname.
    pub nickname: String,
    /// `true` until the key exchange completes.
    pub is_pending: bool,
    /// Serialized ratchet state.
    pub ratchet: Vec<u8>,
    /// The peer's inbox descriptor; `None` while pending.
    pub spool_write_descriptor: Option<SpoolWriteDescriptor>,
    /// Resumable rendezvous state; `None` once established or failed.
    pub kx_state: Option<Vec<u8>>,
    /// Textual outcome of a failed exchange.
    pub kx_result: Option<String>,
    /// Ciphertexts sent but not yet acknowledged by the remote spool.
    pub unacked: u32,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// One full snapshot of the client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct State {
    /// Snapshot schema version.
    pub version: u32,
    /// This client's human nickname.
    pub user: String,
    /// Provider the session authenticates against.
    pub provider: String,
    /// Session link key.
    pub link_key: LinkKey,
    /// All contacts, pending and established.
    pub contacts: Vec<ContactRecord>,
    /// This client's inbox spool; `None` until provisioned.
    pub spool_read_descriptor: Option<SpoolReadDescriptor>,
    /// All conversations keyed by nickname.
    pub conversations: ConversationMap,
}

impl State {
    /// Builds the initial empty state for a brand-new client.
    pub fn new(user: String, provider: String, link_key: LinkKey) -> Self {
        Self {
            version: STATE_VERSION,
            user,
            provider,
            link_key,
            contacts: Vec::new(),
            spool_read_descriptor: None,
            conversations: ConversationMap::new(),
        }
    }

    /// Serializes the snapshot to CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        into_writer(self, &mut bytes).map_err(|e| SpoolchatError::State {
            reason: format!("failed to encode state snapshot: {e}"),
        })?;
        Ok(bytes)
    }

    /// Parses a snapshot, rejecting unknown schema versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let state: State = from_reader(bytes).map_err(|e| SpoolchatError::State {
            reason: format!("failed to parse state snapshot: {e}"),
        })?;
        if state.version != STATE_VERSION {
            return Err(SpoolchatError::State {
                reason: format!(
                    "unsupported state version {} (expected {})",
                    state.version, STATE_VERSION
                ),
            });
        }
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Sink for persisted snapshots.
///
/// `write` is called synchronously from the control loop after every
/// mutating operation; a failure is fatal to the client.
pub trait StateStore: Send + Sync {
    /// Durably replaces the previous snapshot with `bytes`.
    fn write(&self, bytes: &[u8]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// FileStateStore
// ---------------------------------------------------------------------------

/// File-backed [`StateStore`].
///
/// Writes are atomic: serialize → write tmp → fsync → rename. A failed
/// write leaves the previous snapshot untouched.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Creates a store persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the snapshot path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current snapshot bytes.
    pub fn read(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).map_err(|e| SpoolchatError::Persistence {
            reason: format!("failed to read state file {}: {e}", self.path.display()),
        })
    }
}

impl StateStore for FileStateStore {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| SpoolchatError::Persistence {
            reason: format!("failed to create {}: {e}", tmp.display()),
        })?;
        file.write_all(bytes).map_err(|e| SpoolchatError::Persistence {
            reason: format!("failed to write {}: {e}", tmp.display()),
        })?;
        file.sync_all().map_err(|e| SpoolchatError::Persistence {
            reason: format!("failed to sync {}: {e}", tmp.display()),
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| SpoolchatError::Persistence {
            reason: format!("failed to rename {} into place: {e}", tmp.display()),
        })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

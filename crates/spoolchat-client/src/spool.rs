//! Remote spool descriptors and the spool wire-codec seam.
//!
//! A spool is a server-hosted append-only queue addressed by an opaque
//! id. This client owns exactly one *read* spool (its inbox) and learns
//! one *write* descriptor per contact (the peer's inbox) during the key
//! exchange. The wire codec itself is an external collaborator consumed
//! through [`SpoolClient`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spoolchat_types::Result;

/// Directory name of the spool service.
pub const SPOOL_SERVICE_NAME: &str = "spool";

// ---------------------------------------------------------------------------
// SpoolId
// ---------------------------------------------------------------------------

/// Opaque identifier of a remote spool.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SpoolId([u8; 12]);

impl SpoolId {
    /// The fixed byte length of a spool id.
    pub const LEN: usize = 12;

    /// Creates a `SpoolId` from raw bytes.
    pub fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Display for SpoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SpoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpoolId({})", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Everything needed to append to a remote spool.
///
/// Learned from the peer during the key exchange; `None` on a contact
/// while its exchange is pending.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpoolWriteDescriptor {
    /// Remote spool id.
    pub id: SpoolId,
    /// Receiver identity of the spool service.
    pub receiver: String,
    /// Provider hosting the spool service.
    pub provider: String,
}

/// Everything needed to read this client's own inbox spool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpoolReadDescriptor {
    /// Remote spool id.
    pub id: SpoolId,
    /// Receiver identity of the spool service.
    pub receiver: String,
    /// Provider hosting the spool service.
    pub provider: String,
    /// Private key authorizing reads.
    pub read_key: Vec<u8>,
    /// Index of the next unread slot. Strictly monotonically increasing.
    pub read_offset: u32,
}

impl SpoolReadDescriptor {
    /// Projects the write half handed to peers during the key exchange.
    pub fn write_descriptor(&self) -> SpoolWriteDescriptor {
        SpoolWriteDescriptor {
            id: self.id,
            receiver: self.receiver.clone(),
            provider: self.provider.clone(),
        }
    }

    /// Advances the read offset past a consumed slot.
    pub fn increment_offset(&mut self) {
        self.read_offset += 1;
    }
}

// ---------------------------------------------------------------------------
// SpoolResponse
// ---------------------------------------------------------------------------

/// Outcome reported by the spool service.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SpoolStatus {
    /// The operation succeeded.
    Ok,
    /// The operation failed with the given reason.
    Error(String),
}

impl fmt::Display for SpoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Error(reason) => write!(f, "{reason}"),
        }
    }
}

/// Parsed spool service response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpoolResponse {
    /// For reads: the slot index this response answers.
    pub message_id: u32,
    /// Operation outcome.
    pub status: SpoolStatus,
    /// Spool the response refers to.
    pub spool_id: SpoolId,
    /// For reads: the stored ciphertext.
    pub message: Vec<u8>,
}

impl SpoolResponse {
    /// Returns `true` when the operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self.status, SpoolStatus::Ok)
    }
}

// ---------------------------------------------------------------------------
// SpoolClient
// ---------------------------------------------------------------------------

/// The spool wire codec consumed by the client core.
///
/// Command builders are pure; only provisioning a fresh read spool
/// performs a network round trip.
#[async_trait]
pub trait SpoolClient: Send + Sync {
    /// Provisions a fresh remote spool and returns its read descriptor.
    /// Blocks until the service replies or the round trip times out.
    async fn create_read_descriptor(
        &self,
        receiver: &str,
        provider: &str,
    ) -> Result<SpoolReadDescriptor>;

    /// Builds an append command blob for the given spool.
    fn append_command(&self, spool_id: &SpoolId, message: &[u8]) -> Result<Vec<u8>>;

    /// Builds a read command blob for one slot of the given spool.
    fn read_command(&self, spool_id: &SpoolId, offset: u32, read_key: &[u8]) -> Result<Vec<u8>>;

    /// Parses a raw reply blob into a [`SpoolResponse`].
    fn parse_response(&self, payload: &[u8]) -> Result<SpoolResponse>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

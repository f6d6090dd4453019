//! Key-agreement (rendezvous) seam.
//!
//! One rendezvous task runs per pending contact. The engine is an
//! external collaborator: the core hands it the shared secret (or a
//! resumable state blob), an introduction payload, an update channel,
//! and a cancellation token, then consumes [`KxUpdate`]s in the control
//! loop. Tasks never receive a contact reference, only the contact id.

use ciborium::{from_reader, ser::into_writer};
use serde::{Deserialize, Serialize};
use spoolchat_types::{ContactId, Result, SpoolchatError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::spool::SpoolWriteDescriptor;

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// Progress report from a rendezvous task.
#[derive(Clone, Debug)]
pub struct KxUpdate {
    /// Contact the report belongs to.
    pub contact_id: ContactId,
    /// What happened.
    pub detail: KxDetail,
}

/// The per-update payload.
#[derive(Clone, Debug)]
pub enum KxDetail {
    /// New resumable state to persist.
    Progress(Vec<u8>),
    /// A reply-block timeout; the exchange should be restarted from the
    /// last serialized state.
    Timeout,
    /// The exchange failed permanently.
    Failure(String),
    /// The exchange produced the peer's introduction blob.
    Success(Vec<u8>),
}

// ---------------------------------------------------------------------------
// Engine seam
// ---------------------------------------------------------------------------

/// Creates rendezvous runs for the supervisor.
pub trait KeyExchangeEngine: Send + Sync {
    /// Begins a fresh exchange from a shared secret and an introduction
    /// payload to hand the peer.
    fn begin(
        &self,
        shared_secret: &[u8],
        intro: &[u8],
        contact_id: ContactId,
        updates: mpsc::Sender<KxUpdate>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn KeyExchangeRun>>;

    /// Resumes an exchange from a serialized state blob.
    fn resume(
        &self,
        state: &[u8],
        contact_id: ContactId,
        updates: mpsc::Sender<KxUpdate>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn KeyExchangeRun>>;
}

/// A rendezvous task ready to run.
///
/// `start` spawns the task; it emits updates until success, permanent
/// failure, or cancellation, and must observe the cancellation token
/// within a bounded time.
pub trait KeyExchangeRun: Send {
    /// Serialized resumable state as of creation.
    fn serialized(&self) -> Vec<u8>;

    /// Spawns the task.
    fn start(self: Box<Self>);
}

// ---------------------------------------------------------------------------
// ContactExchange
// ---------------------------------------------------------------------------

/// The introduction blob exchanged through the rendezvous.
///
/// Each side contributes its ratchet key-exchange offer plus a write
/// descriptor for its own inbox spool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContactExchange {
    /// Signed double-ratchet key-exchange blob.
    pub signed_kx: Vec<u8>,
    /// Where the peer should append ciphertexts for us.
    pub spool_write_descriptor: SpoolWriteDescriptor,
}

impl ContactExchange {
    /// Serializes the exchange to its CBOR wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        into_writer(self, &mut bytes).map_err(|e| SpoolchatError::KeyExchange {
            reason: format!("failed to encode contact exchange: {e}"),
        })?;
        Ok(bytes)
    }

    /// Parses an exchange from its CBOR wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        from_reader(bytes).map_err(|e| SpoolchatError::KeyExchange {
            reason: format!("failed to parse contact exchange: {e}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::SpoolId;

    #[test]
    fn contact_exchange_roundtrip() {
        let exchange = ContactExchange {
            signed_kx: vec![1, 2, 3, 4],
            spool_write_descriptor: SpoolWriteDescriptor {
                id: SpoolId::new([9u8; SpoolId::LEN]),
                receiver: "spool".into(),
                provider: "provider-b".into(),
            },
        };
        let bytes = exchange.to_bytes().expect("encode");
        let parsed = ContactExchange::from_bytes(&bytes).expect("decode");
        assert_eq!(parsed.signed_kx, exchange.signed_kx);
        assert_eq!(parsed.spool_write_descriptor.id, exchange.spool_write_descriptor.id);
        assert_eq!(parsed.spool_write_descriptor.receiver, "spool");
    }

    #[test]
    fn garbage_exchange_rejected() {
        assert!(ContactExchange::from_bytes(&[0xFF, 0x00, 0x13]).is_err());
    }
}

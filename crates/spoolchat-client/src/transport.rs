//! Mix-network session seam.
//!
//! The client core never talks to the network directly. It consumes a
//! [`MixSession`]: an unreliable fire-and-forget submission API plus an
//! event stream reporting submission acknowledgements, replies, and
//! garbage collection of forgotten transport ids.

use std::fmt;

use async_trait::async_trait;
use spoolchat_types::Result;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// TransportId
// ---------------------------------------------------------------------------

/// Opaque transport-level message identifier.
///
/// Assigned by the session for every submission. Only ever compared and
/// used as a map key; the core never inspects its contents.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct TransportId([u8; 16]);

impl TransportId {
    /// The fixed byte length of a transport id.
    pub const LEN: usize = 16;

    /// Creates a `TransportId` from raw bytes.
    pub fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransportId({})", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// Service discovery
// ---------------------------------------------------------------------------

/// A directory entry advertised by the session's provider.
#[derive(Clone, Debug)]
pub struct ServiceDescriptor {
    /// Service endpoint name (receiver identity).
    pub name: String,
    /// Provider hosting the service.
    pub provider: String,
}

/// Parameters of the rendezvous (PANDA) service the session advertises.
#[derive(Clone, Debug)]
pub struct PandaConfig {
    /// Maximum rendezvous blob size in bytes.
    pub blob_size: usize,
    /// Receiver identity of the rendezvous service.
    pub receiver: String,
    /// Provider hosting the rendezvous service.
    pub provider: String,
}

// ---------------------------------------------------------------------------
// TransportEvent
// ---------------------------------------------------------------------------

/// Events the session delivers for past submissions.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// The submission left the client and was accepted by the network.
    MessageSent {
        /// Transport id of the submission.
        id: TransportId,
    },
    /// A reply arrived for the submission's reply block.
    MessageReply {
        /// Transport id of the original submission.
        id: TransportId,
        /// Raw reply payload (a spool response blob).
        payload: Vec<u8>,
    },
    /// The session gave up tracking the submission.
    MessageGarbageCollected {
        /// Transport id of the forgotten submission.
        id: TransportId,
    },
}

// ---------------------------------------------------------------------------
// MixSession
// ---------------------------------------------------------------------------

/// The mix-network session consumed by the client core.
///
/// Implementations are expected to be cheap to share (`Arc`) and to
/// deliver [`TransportEvent`]s in submission order per transport id.
/// `shutdown` must be idempotent.
#[async_trait]
pub trait MixSession: Send + Sync {
    /// Returns the provider this session is authenticated against.
    fn provider(&self) -> String;

    /// Looks up a service by name in the provider's directory.
    async fn get_service(&self, name: &str) -> Result<ServiceDescriptor>;

    /// Returns the rendezvous service parameters, if one is configured.
    fn panda_config(&self) -> Option<PandaConfig>;

    /// Submits a payload unreliably and returns its transport id.
    async fn send_unreliable(
        &self,
        receiver: &str,
        provider: &str,
        payload: &[u8],
    ) -> Result<TransportId>;

    /// Hands out the session event stream. Yields `None` after the first
    /// call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Tears the session down. Idempotent.
    fn shutdown(&self);
}

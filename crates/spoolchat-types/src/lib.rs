//! Core shared types for the spoolchat mix-network messaging client.
//!
//! This crate defines all fundamental types used across the workspace.
//! No other crate should define shared types — everything lives here.

pub mod config;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Locally assigned identifier for a message within a conversation.
///
/// 16 uniformly random bytes, generated when a message is enqueued for
/// sending or accepted from the receive pipeline. Never derived from the
/// message contents and independent of any transport-level id.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct MessageId([u8; 16]);

impl MessageId {
    /// The fixed byte length of a conversation message id.
    pub const LEN: usize = 16;

    /// Creates a new `MessageId` from raw bytes.
    pub fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh uniformly random `MessageId`.
    pub fn random() -> Self {
        let mut bytes = [0u8; Self::LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl From<[u8; MessageId::LEN]> for MessageId {
    fn from(bytes: [u8; MessageId::LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for MessageId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", hex::encode(self.0))
    }
}

impl FromStr for MessageId {
    type Err = SpoolchatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| SpoolchatError::State {
            reason: "invalid hex encoding for message id".into(),
        })?;
        if bytes.len() != Self::LEN {
            return Err(SpoolchatError::State {
                reason: format!("expected {} bytes for message id, got {}", Self::LEN, bytes.len()),
            });
        }
        let mut arr = [0u8; Self::LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// ---------------------------------------------------------------------------
// ContactId
// ---------------------------------------------------------------------------

/// Stable identifier for a contact.
///
/// Non-zero random 64-bit value, unique within one client's contact
/// registry. Used to address key-exchange progress updates so that
/// long-running rendezvous tasks never hold a contact reference.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ContactId(u64);

impl ContactId {
    /// Creates a `ContactId` from a raw value. Zero is reserved.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns `true` for the reserved zero value.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// UTC wall-clock timestamp.
///
/// Used for message enqueue/reception times, expiration garbage
/// collection, and the retransmission ordering sort.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a `Timestamp` representing the current UTC time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a `Timestamp` from a `DateTime<Utc>`.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Returns `true` if `self + ttl` lies strictly before `now`.
    pub fn expired_at(&self, now: &Timestamp, ttl: Duration) -> bool {
        now.0 > self.0 + ttl
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl FromStr for Timestamp {
    type Err = SpoolchatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| SpoolchatError::State {
                reason: format!("invalid RFC 3339 timestamp: {e}"),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single message within a conversation.
///
/// Inserted by the send pipeline (outbound) or the trial-decryption path
/// (inbound) and mutated only by the control loop. The ciphertext of an
/// outbound message is cleared once the remote spool acknowledges the
/// append.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Cleartext payload bytes.
    pub plaintext: Vec<u8>,
    /// Ratchet ciphertext; empty until encrypted, cleared once delivered.
    pub ciphertext: Vec<u8>,
    /// Wall-clock time at enqueue (outbound) or reception (inbound).
    pub timestamp: Timestamp,
    /// `true` for messages this client sends.
    pub outbound: bool,
    /// `true` once the transport acknowledged the submission.
    pub sent: bool,
    /// `true` once the remote spool acknowledged the append.
    pub delivered: bool,
}

impl Message {
    /// Builds a fresh outbound message awaiting encryption and submission.
    pub fn outbound(plaintext: Vec<u8>, timestamp: Timestamp) -> Self {
        Self {
            plaintext,
            ciphertext: Vec::new(),
            timestamp,
            outbound: true,
            sent: false,
            delivered: false,
        }
    }

    /// Builds an inbound message produced by the receive pipeline.
    pub fn inbound(plaintext: Vec<u8>, timestamp: Timestamp) -> Self {
        Self {
            plaintext,
            ciphertext: Vec::new(),
            timestamp,
            outbound: false,
            sent: false,
            delivered: false,
        }
    }

    /// Returns `true` once the message has outlived `ttl` relative to `now`.
    pub fn is_expired(&self, now: &Timestamp, ttl: Duration) -> bool {
        self.timestamp.expired_at(now, ttl)
    }
}

// ---------------------------------------------------------------------------
// ClientEvent
// ---------------------------------------------------------------------------

/// Events emitted by the client core to its subscriber.
///
/// A `MessageSent` for a given message id precedes its `MessageDelivered`
/// when both occur; either may be absent if the transport garbage-collects
/// the submission.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// A key exchange finished, successfully or not.
    KeyExchangeCompleted {
        /// Nickname of the contact the exchange belongs to.
        nickname: String,
        /// `None` on success, otherwise a description of the failure.
        error: Option<String>,
    },
    /// The transport acknowledged submission of an outbound message.
    MessageSent {
        /// Nickname of the recipient contact.
        nickname: String,
        /// Conversation message id returned by `send_message`.
        message_id: MessageId,
    },
    /// The remote spool acknowledged appending an outbound message.
    MessageDelivered {
        /// Nickname of the recipient contact.
        nickname: String,
        /// Conversation message id returned by `send_message`.
        message_id: MessageId,
    },
    /// An inbound ciphertext decrypted against an established contact.
    MessageReceived {
        /// Nickname of the sending contact.
        nickname: String,
        /// Decrypted payload bytes.
        plaintext: Vec<u8>,
        /// Wall-clock reception time.
        timestamp: Timestamp,
    },
}

// ---------------------------------------------------------------------------
// SpoolchatError
// ---------------------------------------------------------------------------

/// Central error type for the spoolchat workspace.
///
/// All crates convert their internal errors into variants of this enum.
/// `Internal` marks violated invariants; it is routed to the fatal channel
/// and triggers an orderly shutdown rather than a panic.
#[derive(Debug, Error)]
pub enum SpoolchatError {
    /// A contact with this nickname already exists.
    #[error("contact {nickname} already exists")]
    ContactExists {
        /// The duplicate nickname.
        nickname: String,
    },

    /// No contact with this nickname is known.
    #[error("contact {nickname} not found")]
    ContactNotFound {
        /// The unknown nickname.
        nickname: String,
    },

    /// The contact has not completed its key exchange yet.
    #[error("contact {nickname} is pending a key exchange")]
    ContactPending {
        /// The pending nickname.
        nickname: String,
    },

    /// The plaintext does not fit the fixed ratchet payload.
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Offered plaintext length.
        len: usize,
        /// Maximum framed plaintext length.
        max: usize,
    },

    /// The mix-network session rejected an operation.
    #[error("transport error: {reason}")]
    Transport {
        /// Human-readable description of the transport failure.
        reason: String,
    },

    /// Building or parsing a spool command or response failed.
    #[error("spool codec error: {reason}")]
    SpoolCodec {
        /// Human-readable description of the codec failure.
        reason: String,
    },

    /// The key-agreement engine reported a failure.
    #[error("key exchange error: {reason}")]
    KeyExchange {
        /// Human-readable description of the rendezvous failure.
        reason: String,
    },

    /// The double-ratchet primitive reported a failure.
    #[error("ratchet error: {reason}")]
    Ratchet {
        /// Human-readable description of the ratchet failure.
        reason: String,
    },

    /// Writing the persisted state snapshot failed.
    #[error("persistence error: {reason}")]
    Persistence {
        /// Human-readable description of the persistence failure.
        reason: String,
    },

    /// Serializing or parsing persisted state failed.
    #[error("state error: {reason}")]
    State {
        /// Human-readable description of the state failure.
        reason: String,
    },

    /// A configuration value is invalid or a required service is missing.
    #[error("config error: {reason}")]
    Config {
        /// Human-readable description of the configuration problem.
        reason: String,
    },

    /// An internal invariant was violated.
    #[error("internal error: {reason}")]
    Internal {
        /// Human-readable description of the violated invariant.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Result alias
// ---------------------------------------------------------------------------

/// Convenience result type using [`SpoolchatError`].
pub type Result<T> = std::result::Result<T, SpoolchatError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_roundtrip_hex() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mid = MessageId::new([0x42u8; MessageId::LEN]);
        let parsed: MessageId = mid.to_string().parse()?;
        assert_eq!(mid, parsed);
        Ok(())
    }

    #[test]
    fn message_id_invalid_hex_length() {
        let result: std::result::Result<MessageId, _> = "abcd".parse();
        assert!(result.is_err());
    }

    #[test]
    fn message_id_random_is_full_length() {
        let a = MessageId::random();
        let b = MessageId::random();
        assert_eq!(a.as_bytes().len(), 16);
        assert_ne!(a, b, "two random ids must not collide in practice");
    }

    #[test]
    fn contact_id_zero_is_reserved() {
        assert!(ContactId::new(0).is_zero());
        assert!(!ContactId::new(7).is_zero());
    }

    #[test]
    fn timestamp_roundtrip_rfc3339() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let ts = Timestamp::now();
        let parsed: Timestamp = ts.to_string().parse()?;
        assert_eq!(ts.as_datetime(), parsed.as_datetime());
        Ok(())
    }

    #[test]
    fn timestamp_expiry() {
        let now = Timestamp::now();
        let old = Timestamp::from_datetime(*now.as_datetime() - Duration::hours(2));
        assert!(old.expired_at(&now, Duration::hours(1)));
        assert!(!old.expired_at(&now, Duration::hours(3)));
    }

    #[test]
    fn outbound_message_flags() {
        let msg = Message::outbound(b"hi".to_vec(), Timestamp::now());
        assert!(msg.outbound);
        assert!(!msg.sent);
        assert!(!msg.delivered);
        assert!(msg.ciphertext.is_empty());
    }

    #[test]
    fn message_serde_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let msg = Message::inbound(b"payload".to_vec(), Timestamp::now());
        let json = serde_json::to_string(&msg)?;
        let parsed: Message = serde_json::from_str(&json)?;
        assert_eq!(parsed.plaintext, msg.plaintext);
        assert_eq!(parsed.timestamp, msg.timestamp);
        assert!(!parsed.outbound);
        Ok(())
    }

    #[test]
    fn error_display() {
        let err = SpoolchatError::PayloadTooLarge { len: 5000, max: 4092 };
        assert!(err.to_string().contains("5000"));
        let err = SpoolchatError::ContactNotFound { nickname: "ghost".into() };
        assert!(err.to_string().contains("ghost"));
    }
}

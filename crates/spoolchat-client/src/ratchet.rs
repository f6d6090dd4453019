//! Double-ratchet seam and fixed-buffer payload framing.
//!
//! The forward-secret ratchet is an external primitive consumed through
//! [`Ratchet`] / [`RatchetFactory`]. Every encrypted payload occupies a
//! fixed buffer of `payload_length` bytes: a big-endian 32-bit length
//! prefix followed by the plaintext, zero-padded to the full width.

use spoolchat_types::{Result, SpoolchatError};

/// Bytes consumed by the big-endian length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Ratchet seam
// ---------------------------------------------------------------------------

/// One contact's forward-secret session.
///
/// Encrypt and decrypt mutate internal chain counters; access is
/// serialized by the per-contact lock in the contact registry.
pub trait Ratchet: Send {
    /// Produces this side's signed key-exchange blob for the rendezvous.
    fn key_exchange_offer(&mut self) -> Result<Vec<u8>>;

    /// Feeds the peer's signed key-exchange blob into the ratchet,
    /// completing the session.
    fn process_key_exchange(&mut self, signed_kx: &[u8]) -> Result<()>;

    /// Encrypts one framed payload buffer.
    fn encrypt(&mut self, payload: &[u8]) -> Vec<u8>;

    /// Attempts to decrypt a ciphertext. Fails for ciphertexts that were
    /// not produced by this session's peer.
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Serializes the ratchet state for the persisted snapshot.
    fn save(&self) -> Result<Vec<u8>>;
}

/// Creates and restores [`Ratchet`] instances and exposes the
/// primitive's wire constants.
pub trait RatchetFactory: Send + Sync {
    /// Creates a fresh ratchet with no peer session yet.
    fn create(&self) -> Result<Box<dyn Ratchet>>;

    /// Restores a ratchet from a serialized blob.
    fn restore(&self, blob: &[u8]) -> Result<Box<dyn Ratchet>>;

    /// Fixed plaintext buffer width of one encrypted payload.
    fn payload_length(&self) -> usize;

    /// Maximum number of in-flight ciphertexts the primitive tolerates.
    fn max_missing_messages(&self) -> u32;
}

/// Largest number of unacknowledged ciphertexts the send pipeline allows
/// before prodding retransmission.
pub fn max_in_flight(factory: &dyn RatchetFactory) -> u32 {
    factory.max_missing_messages().saturating_sub(1)
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Frames a plaintext into a fixed-size ratchet payload buffer.
///
/// Layout: `[len: u32 BE][plaintext][zero padding]`, total
/// `payload_length` bytes.
///
/// # Errors
///
/// Returns [`SpoolchatError::PayloadTooLarge`] when the plaintext does
/// not fit alongside the length prefix.
pub fn frame_payload(plaintext: &[u8], payload_length: usize) -> Result<Vec<u8>> {
    let max = payload_length.saturating_sub(LENGTH_PREFIX_LEN);
    if plaintext.len() > max {
        return Err(SpoolchatError::PayloadTooLarge {
            len: plaintext.len(),
            max,
        });
    }
    let mut buf = vec![0u8; payload_length];
    buf[..LENGTH_PREFIX_LEN].copy_from_slice(&(plaintext.len() as u32).to_be_bytes());
    buf[LENGTH_PREFIX_LEN..LENGTH_PREFIX_LEN + plaintext.len()].copy_from_slice(plaintext);
    Ok(buf)
}

/// Recovers the plaintext from a framed payload buffer.
///
/// The length prefix arrives from the peer; it is validated against the
/// buffer before slicing so hostile values cannot panic the core.
pub fn unframe_payload(framed: &[u8]) -> Result<Vec<u8>> {
    if framed.len() < LENGTH_PREFIX_LEN {
        return Err(SpoolchatError::Ratchet {
            reason: format!("framed payload of {} bytes is shorter than the length prefix", framed.len()),
        });
    }
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    prefix.copy_from_slice(&framed[..LENGTH_PREFIX_LEN]);
    let len = u32::from_be_bytes(prefix) as usize;
    if len > framed.len() - LENGTH_PREFIX_LEN {
        return Err(SpoolchatError::Ratchet {
            reason: format!(
                "length prefix {} exceeds framed capacity {}",
                len,
                framed.len() - LENGTH_PREFIX_LEN
            ),
        });
    }
    Ok(framed[LENGTH_PREFIX_LEN..LENGTH_PREFIX_LEN + len].to_vec())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

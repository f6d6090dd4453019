//! Client configuration: channel capacities, tick intervals, expiry.
//!
//! All knobs have conservative defaults; `validate()` rejects values
//! that would stall or break the control loop.

use std::time::Duration;

use crate::{Result, SpoolchatError};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Bounded operations-inbox capacity.
///
/// Small buffer: callers await backpressure if the control loop is
/// overloaded.
pub const OP_CHANNEL_CAPACITY: usize = 8;

/// Bounded subscriber event channel capacity.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Default interval between remote read-spool polls.
pub const READ_INBOX_INTERVAL: Duration = Duration::from_secs(30);

/// Default interval between conversation garbage-collection passes.
pub const GC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default message retention: one week.
pub const MESSAGE_EXPIRATION_HOURS: i64 = 168;

/// Number of undelivered messages resubmitted per retransmission pass.
pub const RETRANSMIT_BATCH: usize = 4;

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Tunable parameters of the client core.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Capacity of the bounded operations inbox.
    pub op_channel_capacity: usize,
    /// Capacity of the bounded subscriber event channel.
    pub event_channel_capacity: usize,
    /// Interval between remote read-spool polls.
    pub read_inbox_interval: Duration,
    /// Interval between conversation garbage-collection passes.
    pub gc_interval: Duration,
    /// Message retention window.
    pub message_expiration: chrono::Duration,
    /// Maximum number of messages resubmitted per retransmission pass.
    pub retransmit_batch: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            op_channel_capacity: OP_CHANNEL_CAPACITY,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
            read_inbox_interval: READ_INBOX_INTERVAL,
            gc_interval: GC_INTERVAL,
            message_expiration: chrono::Duration::hours(MESSAGE_EXPIRATION_HOURS),
            retransmit_batch: RETRANSMIT_BATCH,
        }
    }
}

impl ClientConfig {
    /// Checks the configuration for values that would stall the loop.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolchatError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.op_channel_capacity == 0 {
            return Err(SpoolchatError::Config {
                reason: "op_channel_capacity must be at least 1".into(),
            });
        }
        if self.event_channel_capacity == 0 {
            return Err(SpoolchatError::Config {
                reason: "event_channel_capacity must be at least 1".into(),
            });
        }
        if self.read_inbox_interval.is_zero() {
            return Err(SpoolchatError::Config {
                reason: "read_inbox_interval must be non-zero".into(),
            });
        }
        if self.gc_interval.is_zero() {
            return Err(SpoolchatError::Config {
                reason: "gc_interval must be non-zero".into(),
            });
        }
        if self.message_expiration <= chrono::Duration::zero() {
            return Err(SpoolchatError::Config {
                reason: "message_expiration must be positive".into(),
            });
        }
        if self.retransmit_batch == 0 {
            return Err(SpoolchatError::Config {
                reason: "retransmit_batch must be at least 1".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

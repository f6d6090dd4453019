//! spoolchat client core.
//!
//! An asynchronous, anonymity-network messaging client that maintains
//! end-to-end-encrypted conversations between named contacts over a
//! high-latency, loss-tolerant mix network via remote message spools.
//!
//! The core coordinates three concurrent machines per contact — a
//! key-agreement rendezvous, a forward-secret ratchet, and a reliable
//! send/retrieve loop over an unreliable transport — behind one
//! single-writer control loop with a crash-consistent persisted state.
//!
//! External collaborators (the mix-network session, the spool wire
//! codec, the rendezvous engine, and the double-ratchet primitive) are
//! consumed through the trait seams in [`transport`], [`spool`],
//! [`kx`], and [`ratchet`].

pub mod client;
mod command;
pub mod contacts;
pub mod conversations;
mod event_loop;
mod events;
pub mod kx;
pub mod ratchet;
pub mod spool;
pub mod state;
mod tracker;
pub mod transport;

pub use client::{Client, ClientState};
pub use contacts::ContactSummary;
pub use conversations::ConversationMap;
pub use kx::{ContactExchange, KeyExchangeEngine, KeyExchangeRun, KxDetail, KxUpdate};
pub use ratchet::{frame_payload, max_in_flight, unframe_payload, Ratchet, RatchetFactory};
pub use spool::{
    SpoolClient, SpoolId, SpoolReadDescriptor, SpoolResponse, SpoolStatus, SpoolWriteDescriptor,
    SPOOL_SERVICE_NAME,
};
pub use state::{ContactRecord, FileStateStore, LinkKey, State, StateStore, STATE_VERSION};
pub use transport::{
    MixSession, PandaConfig, ServiceDescriptor, TransportEvent, TransportId,
};

pub use spoolchat_types::{
    config::ClientConfig, ClientEvent, ContactId, Message, MessageId, Result, SpoolchatError,
    Timestamp,
};

//! Client lifecycle and public API.
//!
//! The [`Client`] owns the control loop and exposes a channel-based API
//! for external consumers (UI, CLI, tests).
//!
//! # State machine
//!
//! ```text
//! Initializing ──start()──▶ Running ──shutdown()──▶ ShuttingDown
//! ```
//!
//! Conversation accessors read the shared conversation mutex directly;
//! every other operation travels through the bounded command inbox and
//! is serialized by the loop.

use std::collections::HashMap;
use std::sync::Arc;

use spoolchat_types::config::ClientConfig;
use spoolchat_types::{ClientEvent, Message, MessageId, Result, SpoolchatError, Timestamp};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::command::ClientCommand;
use crate::contacts::{Contact, ContactRegistry, ContactSummary};
use crate::conversations::{ConversationMap, ConversationStore};
use crate::event_loop::ClientRuntime;
use crate::events::EventBus;
use crate::kx::KeyExchangeEngine;
use crate::ratchet::RatchetFactory;
use crate::spool::{SpoolClient, SPOOL_SERVICE_NAME};
use crate::state::{LinkKey, State, StateStore};
use crate::tracker::SendTracker;
use crate::transport::MixSession;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Bounded key-exchange update channel capacity.
const KX_CHANNEL_CAPACITY: usize = 16;

/// Fatal-error channel capacity. One error is enough to shut down.
const FATAL_CHANNEL_CAPACITY: usize = 1;

// ---------------------------------------------------------------------------
// ClientState
// ---------------------------------------------------------------------------

/// Lifecycle state of the client.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClientState {
    /// Components created, control loop not started.
    Initializing,
    /// Control loop is active.
    Running,
    /// Graceful shutdown in progress or completed.
    ShuttingDown,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// The mix-network messaging client core.
///
/// Construct with [`Client::new_with_remote_spool`] (fresh identity) or
/// [`Client::load`] (persisted snapshot), then call [`Client::start`].
/// Subscribe to [`ClientEvent`]s via [`Client::take_events`].
pub struct Client {
    state: ClientState,
    config: ClientConfig,
    command_tx: mpsc::Sender<ClientCommand>,
    conversations: ConversationStore,
    session: Arc<dyn MixSession>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    runtime: Option<ClientRuntime>,
    event_bus: EventBus,
    fatal_rx: Option<mpsc::Receiver<SpoolchatError>>,
    loop_handle: Option<JoinHandle<()>>,
    drain_handle: Option<JoinHandle<()>>,
    watcher_handle: Option<JoinHandle<()>>,
}

impl Client {
    /// Creates a new client and provisions a fresh remote read spool for
    /// its inbox. Blocks until the spool service replies. The initial
    /// state is persisted before and after provisioning.
    #[allow(clippy::too_many_arguments)]
    pub async fn new_with_remote_spool(
        store: Arc<dyn StateStore>,
        session: Arc<dyn MixSession>,
        spool: Arc<dyn SpoolClient>,
        ratchets: Arc<dyn RatchetFactory>,
        kx_engine: Arc<dyn KeyExchangeEngine>,
        config: ClientConfig,
        user: impl Into<String>,
        link_key: LinkKey,
    ) -> Result<Self> {
        let state = State::new(user.into(), session.provider(), link_key);
        let mut client = Self::assemble(store, session, spool, ratchets, kx_engine, config, state)?;
        client.persist_now()?;
        client.provision_read_spool().await?;
        client.persist_now()?;
        Ok(client)
    }

    /// Rebuilds a client from a persisted state snapshot. Pending key
    /// exchanges resume when the control loop starts.
    pub fn load(
        store: Arc<dyn StateStore>,
        session: Arc<dyn MixSession>,
        spool: Arc<dyn SpoolClient>,
        ratchets: Arc<dyn RatchetFactory>,
        kx_engine: Arc<dyn KeyExchangeEngine>,
        config: ClientConfig,
        state_bytes: &[u8],
    ) -> Result<Self> {
        let state = State::from_bytes(state_bytes)?;
        Self::assemble(store, session, spool, ratchets, kx_engine, config, state)
    }

    fn assemble(
        store: Arc<dyn StateStore>,
        session: Arc<dyn MixSession>,
        spool: Arc<dyn SpoolClient>,
        ratchets: Arc<dyn RatchetFactory>,
        kx_engine: Arc<dyn KeyExchangeEngine>,
        config: ClientConfig,
        state: State,
    ) -> Result<Self> {
        config.validate()?;
        let transport_rx = session.take_events().ok_or_else(|| SpoolchatError::Transport {
            reason: "session event stream already taken".into(),
        })?;

        let conversations = ConversationStore::from_map(state.conversations);
        let mut registry = ContactRegistry::new();
        for record in state.contacts {
            registry.insert(Contact::from_record(record, ratchets.as_ref())?)?;
        }

        let (command_tx, command_rx) = mpsc::channel(config.op_channel_capacity);
        let (kx_tx, kx_rx) = mpsc::channel(KX_CHANNEL_CAPACITY);
        let (fatal_tx, fatal_rx) = mpsc::channel(FATAL_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut event_bus = EventBus::new(config.event_channel_capacity);
        let events = event_bus.take_sender().ok_or_else(|| SpoolchatError::Internal {
            reason: "event bus sender already taken".into(),
        })?;

        let runtime = ClientRuntime {
            user: state.user,
            provider: state.provider,
            link_key: state.link_key,
            registry,
            conversations: conversations.clone(),
            tracker: SendTracker::new(),
            spool_read: state.spool_read_descriptor,
            session: session.clone(),
            spool,
            ratchets,
            kx_engine,
            store,
            command_rx,
            kx_tx,
            kx_rx,
            transport_rx,
            events,
            fatal_tx,
            shutdown_rx,
            config: config.clone(),
        };

        Ok(Self {
            state: ClientState::Initializing,
            config,
            command_tx,
            conversations,
            session,
            shutdown_tx: Arc::new(shutdown_tx),
            runtime: Some(runtime),
            event_bus,
            fatal_rx: Some(fatal_rx),
            loop_handle: None,
            drain_handle: None,
            watcher_handle: None,
        })
    }

    fn persist_now(&self) -> Result<()> {
        let runtime = self.runtime.as_ref().ok_or_else(|| SpoolchatError::Internal {
            reason: "runtime already consumed".into(),
        })?;
        runtime.try_persist()
    }

    async fn provision_read_spool(&mut self) -> Result<()> {
        let runtime = self.runtime.as_mut().ok_or_else(|| SpoolchatError::Internal {
            reason: "runtime already consumed".into(),
        })?;
        let service = runtime.session.get_service(SPOOL_SERVICE_NAME).await?;
        let descriptor = runtime
            .spool
            .create_read_descriptor(&service.name, &service.provider)
            .await?;
        tracing::debug!(spool = %descriptor.id, "remote read spool provisioned");
        runtime.spool_read = Some(descriptor);
        Ok(())
    }

    /// Starts the control loop, the event drain, and the fatal watcher.
    ///
    /// Runs one conversation GC pass first and verifies a rendezvous
    /// service is configured.
    ///
    /// # Errors
    ///
    /// - [`SpoolchatError::State`] if the client is not `Initializing`.
    /// - [`SpoolchatError::Config`] if the session has no rendezvous
    ///   service.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ClientState::Initializing {
            return Err(SpoolchatError::State {
                reason: format!("cannot start client in state '{}'", self.state),
            });
        }
        if self.session.panda_config().is_none() {
            return Err(SpoolchatError::Config {
                reason: "a rendezvous service must be configured".into(),
            });
        }
        let runtime = self.runtime.take().ok_or_else(|| SpoolchatError::Internal {
            reason: "runtime already consumed".into(),
        })?;

        self.conversations
            .garbage_collect(&Timestamp::now(), self.config.message_expiration);

        self.drain_handle = self.event_bus.spawn_drain();
        self.loop_handle = Some(tokio::spawn(runtime.run()));

        if let Some(mut fatal_rx) = self.fatal_rx.take() {
            let shutdown_tx = self.shutdown_tx.clone();
            self.watcher_handle = Some(tokio::spawn(async move {
                if let Some(err) = fatal_rx.recv().await {
                    tracing::warn!(%err, "shutting down due to fatal error");
                    let _ = shutdown_tx.send(true);
                }
            }));
        }

        self.state = ClientState::Running;
        Ok(())
    }

    /// Graceful shutdown. The control loop's exit path halts, in order:
    /// key-exchange tasks, the loop itself, the session, then the state
    /// persister; the fatal channel closes once the loop's state drops.
    /// Idempotent.
    pub async fn shutdown(&mut self) {
        if self.state == ClientState::ShuttingDown {
            return;
        }
        self.state = ClientState::ShuttingDown;
        tracing::info!("shutting down now");

        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.await;
        } else {
            // The loop never ran; tear the session down directly.
            self.session.shutdown();
        }
        if let Some(handle) = self.drain_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.watcher_handle.take() {
            let _ = handle.await;
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Adds a contact and starts the key exchange for it. The outcome
    /// arrives as a [`ClientEvent::KeyExchangeCompleted`].
    pub async fn new_contact(&self, nickname: impl Into<String>, shared_secret: Vec<u8>) {
        self.enqueue(ClientCommand::AddContact {
            nickname: nickname.into(),
            shared_secret,
        })
        .await;
    }

    /// Removes a contact, cancelling its key exchange if pending.
    pub async fn remove_contact(&self, nickname: impl Into<String>) {
        self.enqueue(ClientCommand::RemoveContact {
            nickname: nickname.into(),
        })
        .await;
    }

    /// Enqueues a message for a contact and returns its conversation
    /// message id. The id is a handle: transmission progress arrives as
    /// `MessageSent` / `MessageDelivered` events, and sends to unknown
    /// or pending contacts are recorded in the conversation but never
    /// submitted.
    pub async fn send_message(&self, nickname: impl Into<String>, payload: Vec<u8>) -> MessageId {
        let message_id = MessageId::random();
        self.enqueue(ClientCommand::SendMessage {
            message_id,
            nickname: nickname.into(),
            payload,
        })
        .await;
        message_id
    }

    /// Snapshot of all contacts keyed by nickname.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolchatError::State`] if the control loop is gone.
    pub async fn get_contacts(&self) -> Result<HashMap<String, ContactSummary>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(ClientCommand::GetContacts { reply: reply_tx }).await;
        reply_rx.await.map_err(|_| SpoolchatError::State {
            reason: "client control loop is not running".into(),
        })
    }

    /// Snapshot of one conversation, if it exists.
    pub fn get_conversation(&self, nickname: &str) -> Option<HashMap<MessageId, Message>> {
        self.conversations.conversation(nickname)
    }

    /// Snapshot of every conversation.
    pub fn get_all_conversations(&self) -> ConversationMap {
        self.conversations.all()
    }

    /// Subscriber event stream. Yields `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_bus.take_subscriber()
    }

    async fn enqueue(&self, command: ClientCommand) {
        if self.command_tx.send(command).await.is_err() {
            tracing::warn!("client control loop is gone; dropping command");
        }
    }
}

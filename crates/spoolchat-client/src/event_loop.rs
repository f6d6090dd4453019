//! The control loop driving all client subsystems.
//!
//! [`ClientRuntime::run`] is spawned as a tokio task by `Client::start`.
//! It uses `tokio::select!` to multiplex:
//!
//! 1. **Commands** — add/remove contact, send message, contact snapshot.
//! 2. **Key-exchange updates** — progress reports from rendezvous tasks.
//! 3. **Transport events** — submission acks, spool replies, gc notices.
//! 4. **Read-inbox tick** — periodic poll of the remote read spool.
//! 5. **GC tick** — conversation expiry sweep.
//! 6. **Shutdown signal** — graceful exit via `watch` channel.
//!
//! The loop is the sole writer of the contact registry, the send
//! tracker, and the read offset; every mutating branch finishes with a
//! state persist. Persistence failures and violated invariants go to
//! the fatal channel, which triggers an orderly shutdown.

use std::cmp::Ordering;
use std::sync::Arc;

use spoolchat_types::config::ClientConfig;
use spoolchat_types::{
    ClientEvent, ContactId, Message, MessageId, Result, SpoolchatError, Timestamp,
};
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::command::ClientCommand;
use crate::contacts::{Contact, ContactRegistry};
use crate::conversations::ConversationStore;
use crate::kx::{ContactExchange, KeyExchangeEngine, KxDetail, KxUpdate};
use crate::ratchet::{frame_payload, max_in_flight, unframe_payload, RatchetFactory};
use crate::spool::{SpoolClient, SpoolReadDescriptor, SpoolWriteDescriptor};
use crate::state::{LinkKey, State, StateStore, STATE_VERSION};
use crate::tracker::{SendTracker, SentMessageDescriptor};
use crate::transport::{MixSession, TransportEvent, TransportId};

/// Error text emitted when a rendezvous echoes our own state bytes.
const STATE_ECHO_ERROR: &str = "strange, the rendezvous echoed our exchange state";

// ---------------------------------------------------------------------------
// ClientRuntime
// ---------------------------------------------------------------------------

/// Owned runtime state moved into the control-loop task.
pub(crate) struct ClientRuntime {
    pub user: String,
    pub provider: String,
    pub link_key: LinkKey,
    pub registry: ContactRegistry,
    pub conversations: ConversationStore,
    pub tracker: SendTracker,
    pub spool_read: Option<SpoolReadDescriptor>,
    pub session: Arc<dyn MixSession>,
    pub spool: Arc<dyn SpoolClient>,
    pub ratchets: Arc<dyn RatchetFactory>,
    pub kx_engine: Arc<dyn KeyExchangeEngine>,
    pub store: Arc<dyn StateStore>,
    pub command_rx: mpsc::Receiver<ClientCommand>,
    pub kx_tx: mpsc::Sender<KxUpdate>,
    pub kx_rx: mpsc::Receiver<KxUpdate>,
    pub transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    pub events: mpsc::UnboundedSender<ClientEvent>,
    pub fatal_tx: mpsc::Sender<SpoolchatError>,
    pub shutdown_rx: watch::Receiver<bool>,
    pub config: ClientConfig,
}

impl ClientRuntime {
    /// Runs the control loop until shutdown is signalled or an input
    /// channel closes.
    pub async fn run(mut self) {
        tracing::info!(user = %self.user, "client control loop starting");
        self.resume_pending_exchanges();

        let mut read_tick = interval(self.config.read_inbox_interval);
        let mut gc_tick = interval(self.config.gc_interval);

        loop {
            tokio::select! {
                maybe_command = self.command_rx.recv() => {
                    match maybe_command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            tracing::debug!("command channel closed; exiting control loop");
                            break;
                        }
                    }
                }

                Some(update) = self.kx_rx.recv() => {
                    self.handle_kx_update(update);
                }

                maybe_event = self.transport_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_transport_event(event),
                        None => {
                            tracing::warn!("session event stream closed; exiting control loop");
                            break;
                        }
                    }
                }

                _ = read_tick.tick() => {
                    self.send_read_inbox().await;
                }

                _ = gc_tick.tick() => {
                    self.collect_garbage();
                }

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        tracing::info!("shutdown signal received; exiting control loop");
                        break;
                    }
                }
            }
        }

        // Halt order: key-exchange tasks, this loop, the session, then a
        // final snapshot. Dropping the runtime closes the fatal channel.
        self.registry.cancel_pending_exchanges();
        self.session.shutdown();
        if let Err(err) = self.try_persist() {
            tracing::error!(%err, "failed to persist final state snapshot");
        }
        tracing::info!("client control loop exited");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, command: ClientCommand) {
        tracing::debug!(?command, "processing command");
        match command {
            ClientCommand::AddContact { nickname, shared_secret } => {
                if let Err(err) = self.create_contact(&nickname, &shared_secret) {
                    tracing::warn!(%nickname, %err, "failed to add contact");
                    self.emit(ClientEvent::KeyExchangeCompleted {
                        nickname,
                        error: Some(err.to_string()),
                    });
                }
            }
            ClientCommand::RemoveContact { nickname } => {
                self.remove_contact(&nickname);
            }
            ClientCommand::GetContacts { reply } => {
                let _ = reply.send(self.registry.summaries());
            }
            ClientCommand::SendMessage { message_id, nickname, payload } => {
                self.send_message(message_id, nickname, payload).await;
            }
        }
    }

    /// Creates a pending contact and starts its rendezvous task.
    ///
    /// The introduction payload carries this side's ratchet offer plus a
    /// write descriptor for our own inbox spool.
    fn create_contact(&mut self, nickname: &str, shared_secret: &[u8]) -> Result<()> {
        if self.registry.contains_nickname(nickname) {
            return Err(SpoolchatError::ContactExists {
                nickname: nickname.to_string(),
            });
        }
        let spool_read = self.spool_read.as_ref().ok_or_else(|| SpoolchatError::Internal {
            reason: "read spool not provisioned".into(),
        })?;
        let write_descriptor = spool_read.write_descriptor();

        let mut ratchet = self.ratchets.create()?;
        let offer = ratchet.key_exchange_offer()?;
        let intro = ContactExchange {
            signed_kx: offer,
            spool_write_descriptor: write_descriptor,
        }
        .to_bytes()?;

        let contact_id = self.registry.random_id();
        let cancel = CancellationToken::new();
        let run = self.kx_engine.begin(
            shared_secret,
            &intro,
            contact_id,
            self.kx_tx.clone(),
            cancel.clone(),
        )?;
        let contact = Contact::new(contact_id, nickname.to_string(), ratchet, run.serialized(), cancel);
        self.registry.insert(contact)?;
        run.start();
        self.persist();
        tracing::info!(%nickname, %contact_id, "new key exchange in progress");
        Ok(())
    }

    fn remove_contact(&mut self, nickname: &str) {
        match self.registry.remove_by_nickname(nickname) {
            Some(contact) => {
                if contact.is_pending {
                    if let Some(cancel) = contact.kx_cancel {
                        cancel.cancel();
                    }
                }
                self.persist();
                tracing::info!(%nickname, "contact removed");
            }
            None => {
                tracing::warn!(%nickname, "contact removal failed; nickname not found");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Send pipeline
    // -----------------------------------------------------------------------

    async fn send_message(&mut self, message_id: MessageId, nickname: String, payload: Vec<u8>) {
        self.conversations.insert(
            &nickname,
            message_id,
            Message::outbound(payload.clone(), Timestamp::now()),
        );

        let (write_descriptor, unacked) = match self.registry.get_by_nickname(&nickname) {
            None => {
                tracing::warn!(%nickname, "cannot send message; contact not found");
                return;
            }
            Some(contact) if contact.is_pending => {
                tracing::warn!(%nickname, "cannot send message; contact is pending a key exchange");
                return;
            }
            Some(contact) => match &contact.spool_write {
                Some(descriptor) => (descriptor.clone(), contact.unacked),
                None => {
                    self.fatal(SpoolchatError::Internal {
                        reason: format!("established contact {nickname} has no write descriptor"),
                    });
                    return;
                }
            },
        };

        // The prod fires once, exactly at the window crossing.
        if unacked == max_in_flight(self.ratchets.as_ref()) {
            tracing::error!(%nickname, "cannot send message; contact's spool has unacknowledged messages");
            self.retransmit(&nickname, &write_descriptor).await;
        }

        let framed = match frame_payload(&payload, self.ratchets.payload_length()) {
            Ok(framed) => framed,
            Err(err) => {
                tracing::warn!(%nickname, %err, "refusing to send oversized payload");
                return;
            }
        };

        let ciphertext = match self.registry.get_by_nickname(&nickname) {
            Some(contact) => contact.encrypt(&framed),
            None => return,
        };
        self.conversations
            .with_message(&nickname, &message_id, |m| m.ciphertext = ciphertext.clone());

        let command = match self.spool.append_command(&write_descriptor.id, &ciphertext) {
            Ok(command) => command,
            Err(err) => {
                tracing::error!(%err, "failed to build spool append command");
                return;
            }
        };
        let transport_id = match self
            .session
            .send_unreliable(&write_descriptor.receiver, &write_descriptor.provider, &command)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(%err, "failed to submit ciphertext to remote spool");
                return;
            }
        };

        if let Some(contact) = self.registry.get_by_nickname_mut(&nickname) {
            contact.unacked += 1;
        }
        self.persist();
        self.tracker.insert(
            transport_id,
            SentMessageDescriptor {
                nickname: nickname.clone(),
                message_id,
            },
        );
        tracing::debug!(%nickname, %message_id, %transport_id, "message enqueued for sending");
    }

    /// Resubmits up to `retransmit_batch` undelivered outbound messages,
    /// oldest first. Resubmissions get fresh transport ids pointing at
    /// the same conversation message; the unacked counter is untouched.
    async fn retransmit(&mut self, nickname: &str, write_descriptor: &SpoolWriteDescriptor) {
        let undelivered = self.conversations.undelivered_outbound(nickname);
        if undelivered.is_empty() {
            tracing::debug!(%nickname, "no undelivered messages to retransmit");
            return;
        }
        for (message_id, message) in undelivered.into_iter().take(self.config.retransmit_batch) {
            let command = match self.spool.append_command(&write_descriptor.id, &message.ciphertext) {
                Ok(command) => command,
                Err(err) => {
                    tracing::error!(%err, "failed to build spool append command");
                    return;
                }
            };
            match self
                .session
                .send_unreliable(&write_descriptor.receiver, &write_descriptor.provider, &command)
                .await
            {
                Ok(transport_id) => {
                    self.tracker.insert(
                        transport_id,
                        SentMessageDescriptor {
                            nickname: nickname.to_string(),
                            message_id,
                        },
                    );
                    tracing::debug!(%nickname, %message_id, %transport_id, "message enqueued for retransmission");
                }
                Err(err) => {
                    tracing::error!(%err, "failed to resubmit ciphertext to remote spool");
                    return;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Receive pipeline
    // -----------------------------------------------------------------------

    /// Polls the next unread slot of the read spool.
    ///
    /// The tracker entry uses this client's own nickname and encodes the
    /// requested offset in the message-id bytes; that convention marks
    /// the reply as a read response rather than a delivery ack.
    async fn send_read_inbox(&mut self) {
        let Some(spool_read) = &self.spool_read else {
            tracing::debug!("read spool not provisioned yet; skipping inbox poll");
            return;
        };
        let sequence = spool_read.read_offset;
        let command = match self.spool.read_command(&spool_read.id, sequence, &spool_read.read_key) {
            Ok(command) => command,
            Err(err) => {
                self.fatal(err);
                return;
            }
        };
        let transport_id = match self
            .session
            .send_unreliable(&spool_read.receiver, &spool_read.provider, &command)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(%err, "failed to submit inbox poll");
                return;
            }
        };
        tracing::debug!(spool = %spool_read.id, sequence, %transport_id, "inbox poll submitted");
        self.tracker.insert(
            transport_id,
            SentMessageDescriptor {
                nickname: self.user.clone(),
                message_id: offset_message_id(sequence),
            },
        );
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::MessageSent { id } => self.handle_sent(&id),
            TransportEvent::MessageReply { id, payload } => self.handle_reply(&id, &payload),
            TransportEvent::MessageGarbageCollected { id } => {
                tracing::debug!(%id, "transport id garbage collected");
                self.tracker.remove(&id);
            }
        }
    }

    fn handle_sent(&mut self, id: &TransportId) {
        let Some(descriptor) = self.tracker.get(id) else {
            return;
        };
        if descriptor.nickname == self.user {
            tracing::debug!(%id, "inbox poll submission confirmed");
            return;
        }
        let nickname = descriptor.nickname.clone();
        let message_id = descriptor.message_id;
        if self.conversations.with_message(&nickname, &message_id, |m| m.sent = true) {
            self.persist();
            tracing::debug!(%nickname, %message_id, "message submission acknowledged");
            self.emit(ClientEvent::MessageSent { nickname, message_id });
        }
    }

    fn handle_reply(&mut self, id: &TransportId, payload: &[u8]) {
        let Some(descriptor) = self.tracker.remove(id) else {
            tracing::debug!(%id, "reply for unknown transport id dropped");
            return;
        };
        let response = match self.spool.parse_response(payload) {
            Ok(response) => response,
            Err(err) => {
                self.fatal(SpoolchatError::Internal {
                    reason: format!("invalid spool response: {err}"),
                });
                return;
            }
        };
        if !response.is_ok() {
            tracing::error!(
                slot = response.message_id,
                status = %response.status,
                spool = %response.spool_id,
                "spool response status error"
            );
            return;
        }

        if descriptor.nickname != self.user {
            self.handle_delivery_ack(descriptor);
            return;
        }

        // Read response for our own spool tip.
        let requested = message_id_offset(&descriptor.message_id);
        let current = match &self.spool_read {
            Some(spool_read) => spool_read.read_offset,
            None => {
                self.fatal(SpoolchatError::Internal {
                    reason: "read response without a provisioned read spool".into(),
                });
                return;
            }
        };
        tracing::debug!(slot = response.message_id, requested, current, "spool read response");
        match response.message_id.cmp(&current) {
            Ordering::Less => {
                tracing::debug!(slot = response.message_id, "duplicate spool read response dropped");
            }
            Ordering::Equal => {
                if let Some(spool_read) = self.spool_read.as_mut() {
                    spool_read.increment_offset();
                }
                if !self.decrypt_message(&response.message) {
                    self.fatal(SpoolchatError::Internal {
                        reason: "failed to decrypt the tip of the read spool".into(),
                    });
                    return;
                }
                self.persist();
            }
            Ordering::Greater => {
                self.fatal(SpoolchatError::Internal {
                    reason: format!(
                        "spool response for slot {} beyond requested tip {}",
                        response.message_id, current
                    ),
                });
            }
        }
    }

    fn handle_delivery_ack(&mut self, descriptor: SentMessageDescriptor) {
        let SentMessageDescriptor { nickname, message_id } = descriptor;
        let updated = self.conversations.with_message(&nickname, &message_id, |m| {
            m.delivered = true;
            m.ciphertext = Vec::new();
        });
        if !updated {
            tracing::debug!(%nickname, %message_id, "delivery ack for unknown message");
            return;
        }
        match self.registry.get_by_nickname_mut(&nickname) {
            Some(contact) if contact.unacked > 0 => contact.unacked -= 1,
            _ => {
                self.fatal(SpoolchatError::Internal {
                    reason: format!("unacked counter underflow for {nickname}"),
                });
                return;
            }
        }
        self.persist();
        tracing::debug!(%nickname, %message_id, "message delivered");
        self.emit(ClientEvent::MessageDelivered { nickname, message_id });
    }

    /// Trial-decrypts a spool slot against every established contact in
    /// ascending id order; the first success wins.
    fn decrypt_message(&mut self, ciphertext: &[u8]) -> bool {
        let mut last_error: Option<SpoolchatError> = None;
        let mut decrypted: Option<(String, Vec<u8>)> = None;
        for contact in self.registry.iter() {
            if contact.is_pending {
                continue;
            }
            match contact.try_decrypt(ciphertext) {
                Ok(framed) => match unframe_payload(&framed) {
                    Ok(plaintext) => {
                        decrypted = Some((contact.nickname.clone(), plaintext));
                        break;
                    }
                    Err(err) => {
                        tracing::debug!(nickname = %contact.nickname, %err, "discarding undecodable framed payload");
                        last_error = Some(err);
                    }
                },
                Err(err) => {
                    tracing::debug!(nickname = %contact.nickname, %err, "trial decryption failed");
                    last_error = Some(err);
                }
            }
        }

        let Some((nickname, plaintext)) = decrypted else {
            if let Some(err) = last_error {
                tracing::debug!(%err, "trial decryption failed for all contacts");
            }
            return false;
        };
        let message_id = MessageId::random();
        let timestamp = Timestamp::now();
        self.conversations
            .insert(&nickname, message_id, Message::inbound(plaintext.clone(), timestamp));
        tracing::debug!(%nickname, %message_id, "message decrypted");
        self.emit(ClientEvent::MessageReceived {
            nickname,
            plaintext,
            timestamp,
        });
        true
    }

    // -----------------------------------------------------------------------
    // Key-exchange supervision
    // -----------------------------------------------------------------------

    /// Restarts rendezvous tasks for contacts that were pending when the
    /// state snapshot was taken.
    fn resume_pending_exchanges(&mut self) {
        let pending: Vec<(ContactId, String, Vec<u8>)> = self
            .registry
            .iter()
            .filter(|c| c.is_pending)
            .filter_map(|c| c.kx_state.as_ref().map(|s| (c.id, c.nickname.clone(), s.clone())))
            .collect();
        for (contact_id, nickname, state) in pending {
            let cancel = CancellationToken::new();
            if let Some(contact) = self.registry.get_mut(contact_id) {
                contact.kx_cancel = Some(cancel.clone());
            }
            tracing::info!(%nickname, "resuming pending key exchange");
            match self.kx_engine.resume(&state, contact_id, self.kx_tx.clone(), cancel) {
                Ok(run) => run.start(),
                Err(err) => self.fatal(SpoolchatError::KeyExchange {
                    reason: format!("failed to resume key exchange for {nickname}: {err}"),
                }),
            }
        }
    }

    fn handle_kx_update(&mut self, update: KxUpdate) {
        let KxUpdate { contact_id, detail } = update;
        let Some(nickname) = self.registry.get(contact_id).map(|c| c.nickname.clone()) else {
            tracing::error!(%contact_id, "key exchange update for unknown contact id");
            return;
        };
        match detail {
            KxDetail::Progress(state) => {
                let echoed = self
                    .registry
                    .get(contact_id)
                    .map(|c| c.kx_state.as_deref() == Some(state.as_slice()))
                    .unwrap_or(false);
                if echoed {
                    tracing::info!(%nickname, "rendezvous echoed our serialized exchange state");
                    self.emit(ClientEvent::KeyExchangeCompleted {
                        nickname,
                        error: Some(STATE_ECHO_ERROR.into()),
                    });
                } else if let Some(contact) = self.registry.get_mut(contact_id) {
                    contact.kx_state = Some(state);
                }
            }
            KxDetail::Timeout => self.restart_exchange(contact_id, &nickname),
            KxDetail::Failure(reason) => self.fail_exchange(contact_id, reason),
            KxDetail::Success(blob) => self.complete_exchange(contact_id, &nickname, &blob),
        }
        self.persist();
    }

    /// Restarts a timed-out exchange from its last serialized state.
    /// Transient: the contact stays pending and no event is emitted.
    fn restart_exchange(&mut self, contact_id: ContactId, nickname: &str) {
        let (state, cancel) = match self.registry.get(contact_id) {
            Some(contact) => match (&contact.kx_state, &contact.kx_cancel) {
                (Some(state), Some(cancel)) => (state.clone(), cancel.clone()),
                _ => {
                    tracing::error!(%nickname, "cannot restart key exchange without serialized state");
                    return;
                }
            },
            None => return,
        };
        tracing::warn!(%nickname, "key exchange timed out; restarting from last state");
        match self.kx_engine.resume(&state, contact_id, self.kx_tx.clone(), cancel) {
            Ok(run) => run.start(),
            Err(err) => self.fatal(SpoolchatError::KeyExchange {
                reason: format!("failed to restart key exchange for {nickname}: {err}"),
            }),
        }
    }

    /// Marks an exchange as permanently failed. The contact stays
    /// present and pending; the caller decides whether to remove it.
    fn fail_exchange(&mut self, contact_id: ContactId, reason: String) {
        let Some(contact) = self.registry.get_mut(contact_id) else {
            return;
        };
        let nickname = contact.nickname.clone();
        contact.kx_result = Some(reason.clone());
        contact.kx_cancel = None;
        tracing::info!(%nickname, %reason, "key exchange failed");
        self.emit(ClientEvent::KeyExchangeCompleted {
            nickname,
            error: Some(reason),
        });
    }

    fn complete_exchange(&mut self, contact_id: ContactId, nickname: &str, blob: &[u8]) {
        if let Some(contact) = self.registry.get_mut(contact_id) {
            contact.kx_state = None;
        }
        let exchange = match ContactExchange::from_bytes(blob) {
            Ok(exchange) => exchange,
            Err(err) => {
                self.fail_exchange(contact_id, format!("failure to parse contact exchange bytes: {err}"));
                return;
            }
        };
        let processed = match self.registry.get(contact_id) {
            Some(contact) => contact.process_key_exchange(&exchange.signed_kx),
            None => return,
        };
        if let Err(err) = processed {
            self.fail_exchange(contact_id, format!("double ratchet key exchange failure: {err}"));
            return;
        }
        if let Some(contact) = self.registry.get_mut(contact_id) {
            contact.spool_write = Some(exchange.spool_write_descriptor);
            contact.is_pending = false;
            contact.kx_cancel = None;
        }
        tracing::info!(%nickname, "key exchange completed");
        self.emit(ClientEvent::KeyExchangeCompleted {
            nickname: nickname.to_string(),
            error: None,
        });
    }

    // -----------------------------------------------------------------------
    // Housekeeping
    // -----------------------------------------------------------------------

    fn collect_garbage(&mut self) {
        let removed = self
            .conversations
            .garbage_collect(&Timestamp::now(), self.config.message_expiration);
        if removed > 0 {
            tracing::debug!(removed, "expired messages collected");
        }
        self.persist();
    }

    /// Builds a state snapshot from the live stores.
    fn snapshot(&self) -> Result<State> {
        Ok(State {
            version: STATE_VERSION,
            user: self.user.clone(),
            provider: self.provider.clone(),
            link_key: self.link_key.clone(),
            contacts: self.registry.records()?,
            spool_read_descriptor: self.spool_read.clone(),
            conversations: self.conversations.all(),
        })
    }

    /// Writes a snapshot, propagating the error.
    pub(crate) fn try_persist(&self) -> Result<()> {
        let bytes = self.snapshot()?.to_bytes()?;
        self.store.write(&bytes)?;
        tracing::debug!(bytes = bytes.len(), "state snapshot written");
        Ok(())
    }

    /// Writes a snapshot; a failure is fatal.
    fn persist(&mut self) {
        if let Err(err) = self.try_persist() {
            self.fatal(err);
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn fatal(&self, err: SpoolchatError) {
        tracing::error!(%err, "fatal client error");
        let _ = self.fatal_tx.try_send(err);
    }
}

// ---------------------------------------------------------------------------
// Read-offset tagging
// ---------------------------------------------------------------------------

/// Encodes a spool offset into the first four message-id bytes.
fn offset_message_id(sequence: u32) -> MessageId {
    let mut bytes = [0u8; MessageId::LEN];
    bytes[..4].copy_from_slice(&sequence.to_be_bytes());
    MessageId::new(bytes)
}

/// Recovers the spool offset from a read-poll tracker entry.
fn message_id_offset(id: &MessageId) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&id.as_bytes()[..4]);
    u32::from_be_bytes(bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

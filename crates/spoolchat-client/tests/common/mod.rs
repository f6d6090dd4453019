//! In-memory doubles for the client's external collaborators.
//!
//! One shared [`SpoolServer`] plays the remote spool service; each
//! client gets its own [`MemorySession`] that routes command blobs to
//! the server and feeds replies back as transport events. The toy
//! ratchet tags ciphertexts so trial decryption fails for the wrong
//! contact, and the rendezvous engine pairs exchanges through a
//! secret-keyed meeting place.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use spoolchat_client::{
    Client, ClientConfig, ClientEvent, ContactId, FileStateStore, KeyExchangeEngine,
    KeyExchangeRun, KxDetail, KxUpdate, LinkKey, MixSession, PandaConfig, Ratchet, RatchetFactory,
    Result, ServiceDescriptor, SpoolClient, SpoolId, SpoolReadDescriptor, SpoolResponse,
    SpoolStatus, SpoolchatError, TransportEvent, TransportId,
};

// ---------------------------------------------------------------------------
// Spool server
// ---------------------------------------------------------------------------

/// Wire commands exchanged between the fake codec and the fake server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WireCommand {
    Append { spool_id: SpoolId, message: Vec<u8> },
    Read { spool_id: SpoolId, offset: u32 },
}

/// Shared in-memory spool service.
#[derive(Default)]
pub struct SpoolServer {
    spools: Mutex<HashMap<SpoolId, Vec<Vec<u8>>>>,
    next_spool: AtomicU64,
}

impl SpoolServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_spool(&self) -> SpoolId {
        let seq = self.next_spool.fetch_add(1, Ordering::SeqCst) + 1;
        let mut bytes = [0u8; SpoolId::LEN];
        bytes[..8].copy_from_slice(&seq.to_be_bytes());
        let id = SpoolId::new(bytes);
        self.spools.lock().unwrap().insert(id, Vec::new());
        id
    }

    pub fn handle(&self, command: &WireCommand) -> SpoolResponse {
        let mut spools = self.spools.lock().unwrap();
        match command {
            WireCommand::Append { spool_id, message } => match spools.get_mut(spool_id) {
                Some(slots) => {
                    slots.push(message.clone());
                    SpoolResponse {
                        message_id: (slots.len() - 1) as u32,
                        status: SpoolStatus::Ok,
                        spool_id: *spool_id,
                        message: Vec::new(),
                    }
                }
                None => SpoolResponse {
                    message_id: 0,
                    status: SpoolStatus::Error("no such spool".into()),
                    spool_id: *spool_id,
                    message: Vec::new(),
                },
            },
            WireCommand::Read { spool_id, offset } => {
                let slot = spools
                    .get(spool_id)
                    .and_then(|slots| slots.get(*offset as usize));
                match slot {
                    Some(message) => SpoolResponse {
                        message_id: *offset,
                        status: SpoolStatus::Ok,
                        spool_id: *spool_id,
                        message: message.clone(),
                    },
                    None => SpoolResponse {
                        message_id: *offset,
                        status: SpoolStatus::Error("no such message".into()),
                        spool_id: *spool_id,
                        message: Vec::new(),
                    },
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Spool client
// ---------------------------------------------------------------------------

pub struct MemorySpoolClient {
    server: Arc<SpoolServer>,
}

impl MemorySpoolClient {
    pub fn new(server: Arc<SpoolServer>) -> Arc<Self> {
        Arc::new(Self { server })
    }
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).map_err(|e| SpoolchatError::SpoolCodec {
        reason: e.to_string(),
    })?;
    Ok(bytes)
}

#[async_trait]
impl SpoolClient for MemorySpoolClient {
    async fn create_read_descriptor(
        &self,
        receiver: &str,
        provider: &str,
    ) -> Result<SpoolReadDescriptor> {
        let mut read_key = vec![0u8; 32];
        OsRng.fill_bytes(&mut read_key);
        Ok(SpoolReadDescriptor {
            id: self.server.create_spool(),
            receiver: receiver.to_string(),
            provider: provider.to_string(),
            read_key,
            read_offset: 0,
        })
    }

    fn append_command(&self, spool_id: &SpoolId, message: &[u8]) -> Result<Vec<u8>> {
        to_cbor(&WireCommand::Append {
            spool_id: *spool_id,
            message: message.to_vec(),
        })
    }

    fn read_command(&self, spool_id: &SpoolId, offset: u32, _read_key: &[u8]) -> Result<Vec<u8>> {
        to_cbor(&WireCommand::Read {
            spool_id: *spool_id,
            offset,
        })
    }

    fn parse_response(&self, payload: &[u8]) -> Result<SpoolResponse> {
        ciborium::from_reader(payload).map_err(|e| SpoolchatError::SpoolCodec {
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct MemorySession {
    provider: String,
    server: Arc<SpoolServer>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    next_transport: AtomicU64,
    defer_replies: AtomicBool,
    deferred: Mutex<Vec<(TransportId, WireCommand)>>,
    submissions: Mutex<Vec<WireCommand>>,
}

impl MemorySession {
    pub fn new(provider: &str, server: Arc<SpoolServer>) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            provider: provider.to_string(),
            server,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            next_transport: AtomicU64::new(0),
            defer_replies: AtomicBool::new(false),
            deferred: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
        })
    }

    /// When set, replies are held until [`flush_replies`] instead of
    /// being delivered immediately. Submission acks still flow.
    pub fn set_defer_replies(&self, on: bool) {
        self.defer_replies.store(on, Ordering::SeqCst);
    }

    /// Processes all held commands against the server and delivers the
    /// replies, in submission order.
    pub fn flush_replies(&self) {
        let deferred: Vec<(TransportId, WireCommand)> =
            self.deferred.lock().unwrap().drain(..).collect();
        for (id, command) in deferred {
            let response = self.server.handle(&command);
            if let Ok(payload) = to_cbor(&response) {
                let _ = self.events_tx.send(TransportEvent::MessageReply { id, payload });
            }
        }
    }

    pub fn append_count(&self) -> usize {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, WireCommand::Append { .. }))
            .count()
    }

    pub fn deferred_read_count(&self) -> usize {
        self.deferred
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| matches!(c, WireCommand::Read { .. }))
            .count()
    }

    fn fresh_id(&self) -> TransportId {
        let seq = self.next_transport.fetch_add(1, Ordering::SeqCst) + 1;
        let mut bytes = [0u8; TransportId::LEN];
        bytes[..8].copy_from_slice(&seq.to_be_bytes());
        TransportId::new(bytes)
    }
}

#[async_trait]
impl MixSession for MemorySession {
    fn provider(&self) -> String {
        self.provider.clone()
    }

    async fn get_service(&self, name: &str) -> Result<ServiceDescriptor> {
        Ok(ServiceDescriptor {
            name: name.to_string(),
            provider: self.provider.clone(),
        })
    }

    fn panda_config(&self) -> Option<PandaConfig> {
        Some(PandaConfig {
            blob_size: 1000,
            receiver: "panda".into(),
            provider: self.provider.clone(),
        })
    }

    async fn send_unreliable(
        &self,
        _receiver: &str,
        _provider: &str,
        payload: &[u8],
    ) -> Result<TransportId> {
        let command: WireCommand =
            ciborium::from_reader(payload).map_err(|e| SpoolchatError::Transport {
                reason: format!("unroutable payload: {e}"),
            })?;
        let id = self.fresh_id();
        self.submissions.lock().unwrap().push(command.clone());
        let _ = self.events_tx.send(TransportEvent::MessageSent { id });
        if self.defer_replies.load(Ordering::SeqCst) {
            self.deferred.lock().unwrap().push((id, command));
        } else {
            let response = self.server.handle(&command);
            let reply = to_cbor(&response)?;
            let _ = self.events_tx.send(TransportEvent::MessageReply { id, payload: reply });
        }
        Ok(id)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    fn shutdown(&self) {}
}

// ---------------------------------------------------------------------------
// Toy ratchet
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct RatchetBlob {
    own_tag: [u8; 8],
    peer_tag: Option<[u8; 8]>,
}

/// Deterministic pairable ratchet stand-in.
///
/// Ciphertexts carry the sender's 8-byte tag; decrypt succeeds only
/// when the tag matches the session peer, so trial decryption behaves
/// like the real primitive.
pub struct TestRatchet {
    own_tag: [u8; 8],
    peer_tag: Option<[u8; 8]>,
}

impl Ratchet for TestRatchet {
    fn key_exchange_offer(&mut self) -> Result<Vec<u8>> {
        Ok(self.own_tag.to_vec())
    }

    fn process_key_exchange(&mut self, signed_kx: &[u8]) -> Result<()> {
        if signed_kx.len() != 8 {
            return Err(SpoolchatError::Ratchet {
                reason: format!("bad key exchange blob of {} bytes", signed_kx.len()),
            });
        }
        let mut tag = [0u8; 8];
        tag.copy_from_slice(signed_kx);
        self.peer_tag = Some(tag);
        Ok(())
    }

    fn encrypt(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + payload.len());
        out.extend_from_slice(&self.own_tag);
        out.extend(
            payload
                .iter()
                .enumerate()
                .map(|(i, b)| b ^ self.own_tag[i % 8]),
        );
        out
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let peer = self.peer_tag.ok_or_else(|| SpoolchatError::Ratchet {
            reason: "no peer session".into(),
        })?;
        if ciphertext.len() < 8 || ciphertext[..8] != peer {
            return Err(SpoolchatError::Ratchet {
                reason: "ciphertext is not for this session".into(),
            });
        }
        Ok(ciphertext[8..]
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ peer[i % 8])
            .collect())
    }

    fn save(&self) -> Result<Vec<u8>> {
        to_cbor(&RatchetBlob {
            own_tag: self.own_tag,
            peer_tag: self.peer_tag,
        })
    }
}

pub struct TestRatchetFactory {
    pub payload_length: usize,
    pub max_missing: u32,
}

impl Default for TestRatchetFactory {
    fn default() -> Self {
        Self {
            payload_length: 256,
            max_missing: 17,
        }
    }
}

impl RatchetFactory for TestRatchetFactory {
    fn create(&self) -> Result<Box<dyn Ratchet>> {
        let mut own_tag = [0u8; 8];
        OsRng.fill_bytes(&mut own_tag);
        Ok(Box::new(TestRatchet {
            own_tag,
            peer_tag: None,
        }))
    }

    fn restore(&self, blob: &[u8]) -> Result<Box<dyn Ratchet>> {
        let blob: RatchetBlob =
            ciborium::from_reader(blob).map_err(|e| SpoolchatError::Ratchet {
                reason: format!("bad ratchet blob: {e}"),
            })?;
        Ok(Box::new(TestRatchet {
            own_tag: blob.own_tag,
            peer_tag: blob.peer_tag,
        }))
    }

    fn payload_length(&self) -> usize {
        self.payload_length
    }

    fn max_missing_messages(&self) -> u32 {
        self.max_missing
    }
}

// ---------------------------------------------------------------------------
// Rendezvous engine
// ---------------------------------------------------------------------------

/// Behavior of spawned rendezvous tasks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KxScript {
    /// Pair through the meeting place and emit `Success`.
    Normal,
    /// Emit the same `Progress` bytes twice, then idle until cancelled.
    EchoProgress,
    /// Emit `Timeout` on the first run; complete normally once resumed.
    TimeoutThenComplete,
    /// Emit nothing until cancelled.
    Silent,
}

#[derive(Clone, Serialize, Deserialize)]
struct KxStateBlob {
    secret: Vec<u8>,
    intro: Vec<u8>,
    resumed: bool,
}

struct MeetingSlot {
    intro: Vec<u8>,
    reply_tx: oneshot::Sender<Vec<u8>>,
}

pub struct MemoryKxEngine {
    meetings: Arc<Mutex<HashMap<Vec<u8>, MeetingSlot>>>,
    script: KxScript,
    resume_count: Arc<AtomicU64>,
}

impl MemoryKxEngine {
    pub fn new(script: KxScript) -> Arc<Self> {
        Arc::new(Self {
            meetings: Arc::new(Mutex::new(HashMap::new())),
            script,
            resume_count: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn resume_count(&self) -> u64 {
        self.resume_count.load(Ordering::SeqCst)
    }

    fn run(
        &self,
        state: KxStateBlob,
        contact_id: ContactId,
        updates: mpsc::Sender<KxUpdate>,
        cancel: CancellationToken,
    ) -> Box<dyn KeyExchangeRun> {
        Box::new(MemoryKxRun {
            meetings: self.meetings.clone(),
            script: self.script,
            state,
            contact_id,
            updates,
            cancel,
        })
    }
}

impl KeyExchangeEngine for MemoryKxEngine {
    fn begin(
        &self,
        shared_secret: &[u8],
        intro: &[u8],
        contact_id: ContactId,
        updates: mpsc::Sender<KxUpdate>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn KeyExchangeRun>> {
        let state = KxStateBlob {
            secret: shared_secret.to_vec(),
            intro: intro.to_vec(),
            resumed: false,
        };
        Ok(self.run(state, contact_id, updates, cancel))
    }

    fn resume(
        &self,
        state: &[u8],
        contact_id: ContactId,
        updates: mpsc::Sender<KxUpdate>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn KeyExchangeRun>> {
        let mut state: KxStateBlob =
            ciborium::from_reader(state).map_err(|e| SpoolchatError::KeyExchange {
                reason: format!("bad rendezvous state: {e}"),
            })?;
        state.resumed = true;
        self.resume_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.run(state, contact_id, updates, cancel))
    }
}

struct MemoryKxRun {
    meetings: Arc<Mutex<HashMap<Vec<u8>, MeetingSlot>>>,
    script: KxScript,
    state: KxStateBlob,
    contact_id: ContactId,
    updates: mpsc::Sender<KxUpdate>,
    cancel: CancellationToken,
}

enum Rendezvous {
    Ready(Vec<u8>),
    Wait(oneshot::Receiver<Vec<u8>>),
}

impl KeyExchangeRun for MemoryKxRun {
    fn serialized(&self) -> Vec<u8> {
        to_cbor(&self.state).unwrap_or_default()
    }

    fn start(self: Box<Self>) {
        let run = *self;
        tokio::spawn(run.drive());
    }
}

impl MemoryKxRun {
    async fn send(&self, detail: KxDetail) {
        let _ = self
            .updates
            .send(KxUpdate {
                contact_id: self.contact_id,
                detail,
            })
            .await;
    }

    async fn drive(self) {
        match self.script {
            KxScript::Silent => {
                self.cancel.cancelled().await;
                return;
            }
            KxScript::EchoProgress => {
                let mut progress = to_cbor(&self.state).unwrap_or_default();
                progress.push(0xEE);
                self.send(KxDetail::Progress(progress.clone())).await;
                self.send(KxDetail::Progress(progress)).await;
                self.cancel.cancelled().await;
                return;
            }
            KxScript::TimeoutThenComplete if !self.state.resumed => {
                self.send(KxDetail::Timeout).await;
                return;
            }
            _ => {}
        }

        let rendezvous = {
            let mut meetings = self.meetings.lock().unwrap();
            match meetings.remove(&self.state.secret) {
                Some(slot) => {
                    let _ = slot.reply_tx.send(self.state.intro.clone());
                    Rendezvous::Ready(slot.intro)
                }
                None => {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    meetings.insert(
                        self.state.secret.clone(),
                        MeetingSlot {
                            intro: self.state.intro.clone(),
                            reply_tx,
                        },
                    );
                    Rendezvous::Wait(reply_rx)
                }
            }
        };

        let peer_intro = match rendezvous {
            Rendezvous::Ready(intro) => intro,
            Rendezvous::Wait(reply_rx) => tokio::select! {
                _ = self.cancel.cancelled() => return,
                reply = reply_rx => match reply {
                    Ok(intro) => intro,
                    Err(_) => {
                        self.send(KxDetail::Failure("meeting place closed".into())).await;
                        return;
                    }
                },
            },
        };
        self.send(KxDetail::Success(peer_intro)).await;
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

static DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns a unique temporary directory for each test client.
pub fn temp_dir() -> PathBuf {
    let id = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "spoolchat-test-{}-{}-{}",
        std::process::id(),
        id,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    ));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

/// Tick intervals short enough for tests, GC effectively disabled.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        read_inbox_interval: Duration::from_millis(25),
        gc_interval: Duration::from_secs(3600),
        ..ClientConfig::default()
    }
}

pub struct TestNet {
    pub server: Arc<SpoolServer>,
    pub kx: Arc<MemoryKxEngine>,
}

impl TestNet {
    pub fn new(script: KxScript) -> Self {
        Self {
            server: SpoolServer::new(),
            kx: MemoryKxEngine::new(script),
        }
    }
}

pub struct TestClientHandle {
    pub client: Client,
    pub events: mpsc::Receiver<ClientEvent>,
    pub session: Arc<MemorySession>,
    pub store_path: PathBuf,
}

/// Opt-in log output for debugging: `RUST_LOG=debug cargo test`.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Builds, persists, and starts a client wired to the shared test net.
pub async fn spawn_client(
    name: &str,
    net: &TestNet,
    ratchets: Arc<TestRatchetFactory>,
    config: ClientConfig,
) -> TestClientHandle {
    init_tracing();
    let session = MemorySession::new("provider-test", net.server.clone());
    let spool = MemorySpoolClient::new(net.server.clone());
    let store_path = temp_dir().join(format!("{name}.state"));
    let store = Arc::new(FileStateStore::new(&store_path));

    let mut client = Client::new_with_remote_spool(
        store,
        session.clone(),
        spool,
        ratchets,
        net.kx.clone(),
        config,
        name,
        LinkKey::new(vec![0x4B; 32]),
    )
    .await
    .expect("client construction");
    let events = client.take_events().expect("event stream");
    client.start().expect("client start");

    TestClientHandle {
        client,
        events,
        session,
        store_path,
    }
}

/// Receives the next event or panics after five seconds.
pub async fn next_event(events: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("event stream closed")
}

/// Asserts that no event arrives within the window.
pub async fn assert_no_event(events: &mut mpsc::Receiver<ClientEvent>, window: Duration) {
    if let Ok(event) = tokio::time::timeout(window, events.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

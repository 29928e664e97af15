//! Session object (C4): owns the PTY, child, emulator, ring, recorder,
//! chat buffer, and client set for one shared terminal. Generalizes the
//! teacher's PTY-output-fanout task
//! (`while let Some(d) = pty_rx.recv().await { buffer.push(&d); live_tx.send(...) }`)
//! to also feed the VT emulator and an optional recorder under the same
//! lock, and to broadcast structured frames to a per-client bounded queue
//! instead of raw bytes over a `broadcast` channel.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::client::{
    ChatMessage, ChunkEncoding, ClientHandle, ClientId, ClientInfo, EnqueueOutcome, OutboundMessage,
};
use crate::client::{chunk_output, ServerFrame, SessionStatusInfo, StatusFeatures, StatusPorts};
use crate::pty::{self, PtyBridge, PtyRunState, ResizeSender};
use crate::recording::Recording;
use crate::ring::ScrollbackRing;
use crate::vt::Emulator;

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;
const CHAT_HISTORY_CAP: usize = 10;
const RESTART_BANNER: &str = "\r\n\x1b[33m[session] process exited, restarting...\x1b[0m\r\n";

/// Per-session offset counter for `previewPort` allocation (spec.md §3):
/// each session gets `preview_port_base + offset`, offsets handed out in
/// creation order and never reused within the process lifetime.
static PREVIEW_PORT_OFFSET: AtomicU16 = AtomicU16::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionMetadata {
    pub created_at: u64,
    pub name: Option<String>,
    pub assistant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
}

struct ClientEntry {
    handle: ClientHandle,
    info: ClientInfo,
}

/// Everything that must move together under one lock per spec.md's
/// "single lock across steps 2-4+6" output pipeline invariant.
struct SessionState {
    emulator: Emulator,
    ring: ScrollbackRing,
    recording: Option<Recording>,
    clients: HashMap<ClientId, ClientEntry>,
    cols: u16,
    rows: u16,
    chat: VecDeque<ChatMessage>,
    ending: bool,
}

impl SessionState {
    fn recompute_dims(&mut self) -> Option<(u16, u16)> {
        let mut min_cols = None;
        let mut min_rows = None;
        for entry in self.clients.values() {
            min_cols = Some(min_cols.map_or(entry.info.cols, |c: u16| c.min(entry.info.cols)));
            min_rows = Some(min_rows.map_or(entry.info.rows, |r: u16| r.min(entry.info.rows)));
        }
        let (new_cols, new_rows) = match (min_cols, min_rows) {
            (Some(c), Some(r)) if c > 0 && r > 0 => (c, r),
            _ => return None,
        };
        if new_cols == self.cols && new_rows == self.rows {
            return None;
        }
        self.cols = new_cols;
        self.rows = new_rows;
        Some((new_cols, new_rows))
    }

    fn broadcast_raw(&mut self, bytes: &[u8]) {
        let to_evict = self.enqueue_to_all(chunk_output(bytes, ChunkEncoding::Identity));
        self.evict_all(to_evict);
    }

    fn enqueue_to_all(&self, messages: Vec<OutboundMessage>) -> Vec<ClientId> {
        let mut evict = Vec::new();
        for (id, entry) in &self.clients {
            for message in &messages {
                if entry.handle.enqueue(message.clone()) == EnqueueOutcome::Evict {
                    evict.push(*id);
                    break;
                }
            }
        }
        evict
    }

    fn evict_all(&mut self, ids: Vec<ClientId>) {
        for id in ids {
            self.clients.remove(&id);
        }
    }
}

/// One shared PTY session. `Arc<Session>` is held by the registry and by
/// each background task (output pump, state watcher, janitor scan).
pub struct Session {
    pub id: SessionId,
    pub metadata: RwLock<SessionMetadata>,
    state: Mutex<SessionState>,
    bridge: Mutex<Option<PtyBridge>>,
    resize_tx: Mutex<Option<ResizeSender>>,
    pub run_state: RwLock<PtyRunState>,
    last_active: AtomicU64,
    restart_argv: Vec<String>,
    restart_backoff: Duration,
    pub workdir: PathBuf,
    /// This session's unique preview-proxy port (`previewPort`), allocated
    /// once at spawn time from `preview_port_base + offset`.
    pub preview_port: u16,
    recording_enabled: bool,
    preview_proxy_enabled: bool,
}

impl Session {
    /// Spawn a new session: opens the PTY, starts the output pump and
    /// restart-supervisor tasks, and returns the session handle.
    pub fn spawn(
        id: SessionId,
        metadata: SessionMetadata,
        initial_argv: Vec<String>,
        restart_argv: Vec<String>,
        workdir: PathBuf,
        ring_capacity: usize,
        restart_backoff: Duration,
        recording: Option<Recording>,
        preview_port_base: u16,
        preview_proxy_enabled: bool,
        recording_enabled: bool,
    ) -> Result<Arc<Self>, crate::error::PtyError> {
        let (bridge, pty_rx, resize_tx, state_rx) = pty::spawn_pty(&initial_argv, Some(workdir.clone()))?;
        let preview_port = preview_port_base.wrapping_add(PREVIEW_PORT_OFFSET.fetch_add(1, Ordering::Relaxed));

        let state = SessionState {
            emulator: Emulator::new(DEFAULT_COLS, DEFAULT_ROWS),
            ring: ScrollbackRing::new(ring_capacity),
            recording,
            clients: HashMap::new(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            chat: VecDeque::with_capacity(CHAT_HISTORY_CAP),
            ending: false,
        };

        let session = Arc::new(Self {
            id,
            metadata: RwLock::new(metadata),
            state: Mutex::new(state),
            bridge: Mutex::new(Some(bridge)),
            resize_tx: Mutex::new(Some(resize_tx)),
            run_state: RwLock::new(PtyRunState::Running),
            last_active: AtomicU64::new(unix_now_secs()),
            restart_argv,
            restart_backoff,
            workdir,
            preview_port,
            recording_enabled,
            preview_proxy_enabled,
        });

        tokio::spawn(Arc::clone(&session).pump_output(pty_rx));
        tokio::spawn(Arc::clone(&session).watch_state(state_rx));

        Ok(session)
    }

    #[instrument(skip_all, fields(session = %self.id))]
    async fn pump_output(self: Arc<Self>, mut pty_rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(bytes) = pty_rx.recv().await {
            self.handle_pty_output(&bytes);
        }
        debug!("pty output channel closed");
    }

    /// Output pipeline, per spec.md §4.4: one lock across feed-emulator,
    /// append-ring, append-recording, and client fan-out.
    fn handle_pty_output(&self, bytes: &[u8]) {
        let mut state = self.state.lock().expect("session state mutex poisoned");
        state.emulator.feed(bytes);
        state.ring.write(bytes);
        if let Some(rec) = state.recording.as_mut() {
            if let Err(e) = rec.record_output(bytes) {
                warn!(error = %e, "recording write failed, disabling recording for this session");
                state.recording = None;
                self.broadcast_status_frame(&mut state);
            }
        }
        state.broadcast_raw(bytes);
    }

    #[instrument(skip_all, fields(session = %self.id))]
    async fn watch_state(self: Arc<Self>, mut state_rx: mpsc::Receiver<PtyRunState>) {
        while let Some(new_state) = state_rx.recv().await {
            let exited = matches!(new_state, PtyRunState::Exited { .. });
            *self.run_state.write().expect("run_state lock poisoned") = new_state.clone();
            if let PtyRunState::Exited { exit_code } = new_state {
                self.broadcast_exit(exit_code);
            }

            if exited {
                let ending = self.state.lock().expect("session state mutex poisoned").ending;
                if ending {
                    break;
                }
                info!("child exited, scheduling restart");
                self.handle_pty_output(RESTART_BANNER.as_bytes());
                tokio::time::sleep(self.restart_backoff).await;
                match self.restart().await {
                    Ok((pty_rx, new_state_rx)) => {
                        state_rx = new_state_rx;
                        tokio::spawn(Arc::clone(&self).pump_output(pty_rx));
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to restart child, session will have no live process");
                        break;
                    }
                }
            }
        }
    }

    async fn restart(
        self: &Arc<Self>,
    ) -> Result<(mpsc::Receiver<Vec<u8>>, mpsc::Receiver<PtyRunState>), crate::error::PtyError> {
        let (bridge, pty_rx, resize_tx, state_rx) =
            pty::spawn_pty(&self.restart_argv, Some(self.workdir.clone()))?;
        *self.bridge.lock().expect("bridge mutex poisoned") = Some(bridge);
        *self.resize_tx.lock().expect("resize_tx mutex poisoned") = Some(resize_tx);
        Ok((pty_rx, state_rx))
    }

    /// Broadcast an `exit` frame for a PTY run-state transition. Distinct
    /// from the `status` metadata frame (see `status_frame`).
    fn broadcast_exit(&self, exit_code: u32) {
        let frame = ServerFrame::Exit {
            exit_code: Some(exit_code),
        };
        let mut state = self.state.lock().expect("session state mutex poisoned");
        let text = serde_json::to_string(&frame).expect("ServerFrame serializes");
        let evict = state.enqueue_to_all(vec![OutboundMessage::Text(text)]);
        state.evict_all(evict);
    }

    /// Build the `status` metadata frame (spec.md §6, §4.9): session
    /// identity/geometry, the allocated preview port, and process-wide
    /// feature flags. Sent in the attach prelude and whenever it changes.
    fn status_frame(&self, state: &SessionState) -> ServerFrame {
        let metadata = self.metadata.read().expect("metadata lock poisoned");
        ServerFrame::Status {
            session: SessionStatusInfo {
                uuid: self.id.0,
                name: metadata.name.clone(),
                assistant: metadata.assistant.clone(),
                cols: state.cols,
                rows: state.rows,
                recording: state.recording.is_some(),
            },
            ports: StatusPorts {
                preview: self.preview_port,
                agent_chat: None,
            },
            features: StatusFeatures {
                recording_enabled: self.recording_enabled,
                preview_proxy_enabled: self.preview_proxy_enabled,
            },
        }
    }

    fn broadcast_status_frame(&self, state: &mut SessionState) {
        let frame = self.status_frame(state);
        let text = serde_json::to_string(&frame).expect("ServerFrame serializes");
        let evict = state.enqueue_to_all(vec![OutboundMessage::Text(text)]);
        state.evict_all(evict);
    }

    /// Attach a new client: register it, send the ring + snapshot prelude,
    /// then fold it into dimension negotiation. The prelude is delivered
    /// under the same lock as registration so no broadcast can interleave
    /// before it.
    pub fn attach(&self, info: ClientInfo, queue_capacity: usize) -> (ClientId, mpsc::Receiver<OutboundMessage>) {
        let client_id = ClientId::new();
        let (handle, rx) = ClientHandle::new(client_id, queue_capacity);

        let mut state = self.state.lock().expect("session state mutex poisoned");
        let ring_bytes = state.ring.read_all();
        for message in chunk_output(&ring_bytes, ChunkEncoding::Deflate) {
            handle.enqueue(message);
        }
        let snapshot = state.emulator.snapshot();
        for message in chunk_output(&snapshot, ChunkEncoding::Identity) {
            handle.enqueue(message);
        }
        let history = ServerFrame::ChatHistory {
            messages: state.chat.iter().cloned().collect(),
        };
        handle.enqueue(OutboundMessage::Text(
            serde_json::to_string(&history).expect("ServerFrame serializes"),
        ));
        let status = self.status_frame(&state);
        handle.enqueue(OutboundMessage::Text(
            serde_json::to_string(&status).expect("ServerFrame serializes"),
        ));

        state.clients.insert(client_id, ClientEntry { handle, info });
        if let Some((cols, rows)) = state.recompute_dims() {
            self.apply_dims(&mut state, cols, rows);
        }
        drop(state);

        self.touch();
        (client_id, rx)
    }

    pub fn detach(&self, client_id: ClientId) {
        let mut state = self.state.lock().expect("session state mutex poisoned");
        state.clients.remove(&client_id);
        if let Some((cols, rows)) = state.recompute_dims() {
            self.apply_dims(&mut state, cols, rows);
        }
        drop(state);
        self.touch();
    }

    pub fn resize_client(&self, client_id: ClientId, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 {
            return;
        }
        let mut state = self.state.lock().expect("session state mutex poisoned");
        if let Some(entry) = state.clients.get_mut(&client_id) {
            entry.info.cols = cols;
            entry.info.rows = rows;
        }
        if let Some((new_cols, new_rows)) = state.recompute_dims() {
            self.apply_dims(&mut state, new_cols, new_rows);
        }
    }

    fn apply_dims(&self, state: &mut SessionState, cols: u16, rows: u16) {
        state.emulator.resize(cols, rows);
        if let Some(rec) = state.recording.as_mut() {
            let _ = rec.observe_size(cols, rows);
        }
        if let Some(tx) = self.resize_tx.lock().expect("resize_tx mutex poisoned").as_ref() {
            let _ = tx.send((cols, rows));
        }
        self.broadcast_status_frame(state);
    }

    /// Write input bytes to the PTY master. Non-blocking with respect to
    /// callers in the sense that there is no cross-caller ordering
    /// guarantee beyond arrival order at the PTY master — matches
    /// spec.md's stated lack of an ordering contract here.
    pub fn write_input(&self, bytes: &[u8]) -> std::io::Result<()> {
        let guard = self.bridge.lock().expect("bridge mutex poisoned");
        let Some(bridge) = guard.as_ref() else {
            return Ok(());
        };
        let mut writer = bridge.writer.lock().expect("pty writer mutex poisoned");
        writer.write_all(bytes)
    }

    pub fn send_chat(&self, username: &str, message: &str) {
        let chat = ChatMessage {
            username: username.to_string(),
            message: message.to_string(),
            at: chrono::Utc::now().timestamp(),
        };
        let mut state = self.state.lock().expect("session state mutex poisoned");
        if state.chat.len() == CHAT_HISTORY_CAP {
            state.chat.pop_front();
        }
        state.chat.push_back(chat.clone());
        let frame = ServerFrame::Chat {
            username: chat.username,
            message: chat.message,
            at: chat.at,
        };
        let text = serde_json::to_string(&frame).expect("ServerFrame serializes");
        let evict = state.enqueue_to_all(vec![OutboundMessage::Text(text)]);
        state.evict_all(evict);
        drop(state);
        self.touch();
    }

    /// Send an app-level keepalive ping to one client. Returns `false` if
    /// the client is no longer attached or its queue was full (in which
    /// case it is evicted), `true` otherwise.
    pub fn ping_client(&self, client_id: ClientId) -> bool {
        let mut state = self.state.lock().expect("session state mutex poisoned");
        let Some(entry) = state.clients.get(&client_id) else {
            return false;
        };
        let text = serde_json::to_string(&ServerFrame::Ping).expect("ServerFrame serializes");
        let ok = entry.handle.enqueue(OutboundMessage::Text(text)) == EnqueueOutcome::Sent;
        if !ok {
            state.clients.remove(&client_id);
        }
        ok
    }

    /// Send a single control frame to exactly one attached client (used by
    /// the upload sink for per-client `file_uploaded` notifications).
    /// Silently does nothing if the client is no longer attached.
    pub fn notify_client(&self, client_id: ClientId, frame: ServerFrame) {
        let mut state = self.state.lock().expect("session state mutex poisoned");
        let Some(entry) = state.clients.get(&client_id) else {
            return;
        };
        let text = serde_json::to_string(&frame).expect("ServerFrame serializes");
        if entry.handle.enqueue(OutboundMessage::Text(text)) == EnqueueOutcome::Evict {
            state.clients.remove(&client_id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().expect("session state mutex poisoned").clients.len()
    }

    pub fn touch(&self) {
        self.last_active.store(unix_now_secs(), Ordering::Relaxed);
    }

    pub fn idle_seconds(&self) -> u64 {
        unix_now_secs().saturating_sub(self.last_active.load(Ordering::Relaxed))
    }

    /// Terminate the child, finalize the recording, and evict every client.
    /// Idempotent: may be called more than once (e.g. janitor + explicit
    /// end racing) without harm.
    pub fn end(&self) {
        let mut state = self.state.lock().expect("session state mutex poisoned");
        if state.ending {
            return;
        }
        state.ending = true;
        if let Some(rec) = state.recording.as_mut() {
            let _ = rec.finalize();
        }
        let ids: Vec<ClientId> = state.clients.keys().copied().collect();
        state.evict_all(ids);
        drop(state);

        if let Some(bridge) = self.bridge.lock().expect("bridge mutex poisoned").as_ref() {
            let _ = bridge.kill();
        }
    }
}

pub fn unix_now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientInfo;

    fn info(cols: u16, rows: u16) -> ClientInfo {
        ClientInfo {
            browser_session_id: "b1".into(),
            username: "alice".into(),
            cols,
            rows,
            debug: false,
            observer: false,
        }
    }

    #[tokio::test]
    async fn attach_sends_prelude_before_broadcast() {
        let session = Session::spawn(
            SessionId::new(),
            SessionMetadata {
                created_at: unix_now_secs(),
                name: None,
                assistant: None,
                project_path: None,
            },
            vec!["echo".to_string(), "hi".to_string()],
            vec!["echo".to_string(), "hi".to_string()],
            std::env::temp_dir(),
            4096,
            Duration::from_millis(10),
            None,
            3000,
            true,
            true,
        )
        .unwrap();

        let (_id, mut rx) = session.attach(info(80, 24), 64);
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(first.is_ok());
    }

    #[test]
    fn dimension_is_min_over_clients() {
        let mut state = SessionState {
            emulator: Emulator::new(80, 24),
            ring: ScrollbackRing::new(1024),
            recording: None,
            clients: HashMap::new(),
            cols: 80,
            rows: 24,
            chat: VecDeque::new(),
            ending: false,
        };
        let (h1, _r1) = ClientHandle::new(ClientId::new(), 4);
        let (h2, _r2) = ClientHandle::new(ClientId::new(), 4);
        state.clients.insert(
            h1.id,
            ClientEntry {
                handle: h1,
                info: info(100, 40),
            },
        );
        state.clients.insert(
            h2.id,
            ClientEntry {
                handle: h2,
                info: info(60, 20),
            },
        );
        let dims = state.recompute_dims();
        assert_eq!(dims, Some((60, 20)));
    }

    #[test]
    fn empty_client_set_keeps_last_dims() {
        let mut state = SessionState {
            emulator: Emulator::new(80, 24),
            ring: ScrollbackRing::new(1024),
            recording: None,
            clients: HashMap::new(),
            cols: 80,
            rows: 24,
            chat: VecDeque::new(),
            ending: false,
        };
        assert_eq!(state.recompute_dims(), None);
        assert_eq!((state.cols, state.rows), (80, 24));
    }
}

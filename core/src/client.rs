//! Client connection primitives (C5), kept transport-agnostic: the wire
//! frame taxonomy, the chunking algorithm for large payloads, and the
//! bounded per-client output queue. The actual two-task (reader/writer)
//! orchestration loop that drives these against `axum`'s `WebSocket` lives
//! in the server crate — partly grounded on `deepgram-wsh`'s generic
//! `handle_client<S: AsyncRead + AsyncWrite>` pattern of keeping transport
//! wiring separate from session logic.
//!
//! Chunking and frame taxonomy follow spec.md §4.5/§6; the bounded-queue +
//! evict-on-overflow policy and the ping/pong/select! multiplexing shape
//! are grounded on the teacher's `handle_socket_attach` and on
//! `ekzhang-sshx`'s `web.rs::handle_socket` (`loop { select! { ... } }`
//! over a broadcast stream and client input).

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 512;
pub const CHUNK_THRESHOLD_BYTES: usize = 48 * 1024;
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Client-attached metadata: advertised size and identity, used for
/// dimension negotiation and chat attribution.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub browser_session_id: String,
    pub username: String,
    pub cols: u16,
    pub rows: u16,
    pub debug: bool,
    pub observer: bool,
}

/// Encoding used for a chunked binary output payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkEncoding {
    Identity,
    Deflate,
}

/// Text control-plane frames sent server -> client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Output { data: String },
    ChunkStart { total_size: usize, chunk_count: usize, encoding: ChunkEncoding },
    ChunkEnd,
    /// Session metadata, sent on attach and whenever it changes (dimension
    /// negotiation, recording toggled off on write failure). Distinct from
    /// `Exit`, which reports a child-process run-state transition.
    Status {
        session: SessionStatusInfo,
        ports: StatusPorts,
        features: StatusFeatures,
    },
    Chat { username: String, message: String, at: i64 },
    ChatHistory { messages: Vec<ChatMessage> },
    Ping,
    Exit { exit_code: Option<u32> },
    FileUploaded { filename: String, error: Option<String> },
    ClaudeSessionId { session_id: String },
    PermissionRequest { request_id: String, summary: String },
    PermissionResponse { request_id: String, approved: bool },
}

/// `status.session` — current session metadata, as opposed to transport
/// or process state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusInfo {
    pub uuid: Uuid,
    pub name: Option<String>,
    pub assistant: Option<String>,
    pub cols: u16,
    pub rows: u16,
    /// Whether this session currently has an active recorder (distinct
    /// from `features.recording_enabled`, the process-wide capability
    /// flag: a session's own recorder can be disabled mid-session on a
    /// write failure even while the feature stays enabled).
    pub recording: bool,
}

/// `status.ports` — `preview` is this session's allocated preview-proxy
/// port (base + per-session offset, spec.md §3 `previewPort`).
/// `agent_chat` has no implementation in this build (no separate
/// agent-chat service exists here); always `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPorts {
    pub preview: u16,
    pub agent_chat: Option<u16>,
}

/// `status.features` — process-wide capability flags, the same for every
/// session in this server instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFeatures {
    pub recording_enabled: bool,
    pub preview_proxy_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: String,
    pub message: String,
    pub at: i64,
}

/// Text control-plane frames received client -> server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Input { data: String },
    Resize { cols: u16, rows: u16 },
    Pong,
    Chat { message: String },
    PermissionResponse { request_id: String, approved: bool },
}

/// An outbound unit of work for a client's writer task: either a control
/// frame (sent as WS text, JSON-encoded) or a binary output chunk.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Split an output payload into chunk frames when it exceeds
/// `CHUNK_THRESHOLD_BYTES`. Below the threshold, returns a single `Output`
/// text frame (steady-state path). Above it (mandatory for the initial
/// ring replay), returns a `ChunkStart` text frame, then one `Binary`
/// message per chunk, then a `ChunkEnd` text frame.
pub fn chunk_output(payload: &[u8], encoding: ChunkEncoding) -> Vec<OutboundMessage> {
    if payload.len() <= CHUNK_THRESHOLD_BYTES {
        use base64::Engine;
        return vec![OutboundMessage::Text(
            serde_json::to_string(&ServerFrame::Output {
                data: base64::engine::general_purpose::STANDARD.encode(payload),
            })
            .expect("ServerFrame serializes"),
        )];
    }

    let encoded = match encoding {
        ChunkEncoding::Identity => payload.to_vec(),
        ChunkEncoding::Deflate => deflate(payload),
    };

    let chunks: Vec<&[u8]> = encoded.chunks(CHUNK_THRESHOLD_BYTES).collect();
    let mut messages = Vec::with_capacity(chunks.len() + 2);
    messages.push(OutboundMessage::Text(
        serde_json::to_string(&ServerFrame::ChunkStart {
            total_size: encoded.len(),
            chunk_count: chunks.len(),
            encoding,
        })
        .expect("ServerFrame serializes"),
    ));
    for chunk in chunks {
        messages.push(OutboundMessage::Binary(chunk.to_vec()));
    }
    messages.push(OutboundMessage::Text(
        serde_json::to_string(&ServerFrame::ChunkEnd).expect("ServerFrame serializes"),
    ));
    messages
}

fn deflate(data: &[u8]) -> Vec<u8> {
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("in-memory deflate write");
    encoder.finish().expect("in-memory deflate finish")
}

/// Producer-side handle into a client's bounded output queue. The session
/// holds this; it is the sole producer. `try_send` never blocks — overflow
/// means the client is evicted, never that the producer stalls.
#[derive(Clone)]
pub struct ClientHandle {
    pub id: ClientId,
    sender: mpsc::Sender<OutboundMessage>,
}

/// Outcome of enqueuing onto a client: either the message was accepted, or
/// the client's queue is full/closed and it must be evicted.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Sent,
    Evict,
}

impl ClientHandle {
    pub fn new(id: ClientId, capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { id, sender: tx }, rx)
    }

    pub fn enqueue(&self, message: OutboundMessage) -> EnqueueOutcome {
        match self.sender.try_send(message) {
            Ok(()) => EnqueueOutcome::Sent,
            Err(_) => EnqueueOutcome::Evict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_is_single_output_frame() {
        let msgs = chunk_output(b"hello", ChunkEncoding::Identity);
        assert_eq!(msgs.len(), 1);
        matches!(msgs[0], OutboundMessage::Text(_));
    }

    #[test]
    fn large_payload_is_chunked_with_start_and_end() {
        let payload = vec![b'x'; CHUNK_THRESHOLD_BYTES * 3 + 10];
        let msgs = chunk_output(&payload, ChunkEncoding::Identity);
        assert!(matches!(msgs.first(), Some(OutboundMessage::Text(_))));
        assert!(matches!(msgs.last(), Some(OutboundMessage::Text(_))));
        let binary_count = msgs
            .iter()
            .filter(|m| matches!(m, OutboundMessage::Binary(_)))
            .count();
        assert!(binary_count >= 3);
    }

    #[test]
    fn overflow_enqueue_is_reported_as_evict() {
        let (handle, mut rx) = ClientHandle::new(ClientId::new(), 1);
        assert_eq!(handle.enqueue(OutboundMessage::Text("a".into())), EnqueueOutcome::Sent);
        assert_eq!(handle.enqueue(OutboundMessage::Text("b".into())), EnqueueOutcome::Evict);
        rx.close();
    }

    #[test]
    fn deflate_round_trips() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbb";
        let compressed = deflate(data);
        let mut decoder = flate2::read::DeflateDecoder::new(&compressed[..]);
        use std::io::Read;
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}

//! Client connection (C5) wiring: one axum `WebSocket` per attached
//! browser client, driven by two cooperating tasks (writer, reader) that
//! forward against the core `Session`/`ClientHandle` primitives.
//!
//! Grounded on the teacher's `handle_socket_attach` (split the socket,
//! `tokio::select!` over broadcast vs. input) and on `ekzhang-sshx`'s
//! `web.rs::handle_socket`, whose `loop { select! { ... } }` multiplexing
//! several streams into one dispatch is the template for the reader loop
//! below (here multiplexing client frames against the ping ticker instead
//! of a CBOR send/recv pair, since this protocol's frames are JSON text +
//! raw binary rather than CBOR).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use termshare_core::client::{ClientFrame, ClientId, ClientInfo, OutboundMessage};
use termshare_core::session::Session;
use termshare_core::upload;

use crate::router::AppState;

const MAX_MISSED_PONGS: u32 = 2;

#[derive(Debug, Default, serde::Deserialize)]
pub struct AttachQuery {
    pub browser_session_id: Option<String>,
    pub username: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub debug: Option<bool>,
    pub observer: Option<bool>,
}

pub async fn handle_socket(socket: WebSocket, session: Arc<Session>, query: AttachQuery, state: AppState) {
    let info = ClientInfo {
        browser_session_id: query.browser_session_id.unwrap_or_default(),
        username: query.username.unwrap_or_else(|| "anonymous".to_string()),
        cols: query.cols.unwrap_or(80),
        rows: query.rows.unwrap_or(24),
        debug: query.debug.unwrap_or(false),
        observer: query.observer.unwrap_or(false),
    };

    let username = info.username.clone();
    let (client_id, mut outbound_rx) = session.attach(info, state.config.client_queue_capacity);
    info!(session = %session.id, client = %client_id, "client attached");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let ws_msg = match msg {
                OutboundMessage::Text(t) => Message::Text(t.into()),
                OutboundMessage::Binary(b) => Message::Binary(b.into()),
            };
            if ws_tx.send(ws_msg).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut ping_interval = tokio::time::interval(state.config.ping_interval);
    ping_interval.tick().await; // consume the immediate first tick
    let mut missed_pongs: u32 = 0;

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_frame(&session, client_id, &username, &text, &mut missed_pongs) {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(bin))) => {
                        if !handle_upload(&session, &state, client_id, &bin).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read error");
                        break;
                    }
                    None => break,
                }
            }
            _ = ping_interval.tick() => {
                missed_pongs += 1;
                if missed_pongs > MAX_MISSED_PONGS {
                    warn!(session = %session.id, client = %client_id, "client missed too many pongs, closing");
                    break;
                }
                if !session.ping_client(client_id) {
                    break;
                }
            }
        }
    }

    session.detach(client_id);
    writer_task.abort();
    info!(session = %session.id, client = %client_id, "client detached");
}

/// Handle one text frame from the client. Returns `false` if the
/// connection should close.
fn handle_client_frame(
    session: &Arc<Session>,
    client_id: ClientId,
    username: &str,
    text: &str,
    missed_pongs: &mut u32,
) -> bool {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(error = %e, "ignoring malformed client frame");
            return true;
        }
    };
    match frame {
        ClientFrame::Input { data } => {
            let _ = session.write_input(data.as_bytes());
        }
        ClientFrame::Resize { cols, rows } => {
            session.resize_client(client_id, cols, rows);
        }
        ClientFrame::Pong => {
            *missed_pongs = 0;
        }
        ClientFrame::Chat { message } => {
            session.send_chat(username, &message);
        }
        ClientFrame::PermissionResponse { .. } => {}
    }
    true
}

/// Handle one binary upload frame. Returns `false` if the connection must
/// be closed (an oversized upload per spec's size-cap invariant), `true`
/// otherwise. Every failure path notifies the originating client with a
/// `file_uploaded` frame carrying an `error` (spec §4.7, §7#4).
async fn handle_upload(session: &Arc<Session>, state: &AppState, client_id: ClientId, bin: &[u8]) -> bool {
    use termshare_core::client::ServerFrame;
    use termshare_core::error::UploadError;

    match upload::parse_envelope(bin, state.config.upload_max_bytes) {
        Ok(parsed) => {
            let filename = parsed.filename.clone();
            match upload::write_upload(&session.workdir, &parsed) {
                Ok(path) => {
                    let _ = session.write_input(format!("{}\n", path.display()).as_bytes());
                    debug!(session = %session.id, %filename, "upload written");
                    session.notify_client(
                        client_id,
                        ServerFrame::FileUploaded {
                            filename,
                            error: None,
                        },
                    );
                }
                Err(e) => {
                    warn!(session = %session.id, %filename, error = %e, "upload failed");
                    session.notify_client(
                        client_id,
                        ServerFrame::FileUploaded {
                            filename,
                            error: Some(e.to_string()),
                        },
                    );
                }
            }
            true
        }
        Err(e) => {
            let too_large = matches!(e, UploadError::TooLarge);
            warn!(session = %session.id, error = %e, "rejecting upload envelope");
            session.notify_client(
                client_id,
                ServerFrame::FileUploaded {
                    filename: String::new(),
                    error: Some(e.to_string()),
                },
            );
            // Oversized uploads close the connection per the size-cap
            // invariant; other envelope errors (truncated, bad tag, unsafe
            // filename) just report and let the client retry.
            !too_large
        }
    }
}

//! Preview reverse proxy (C8): forwards `/proxy/{uuid}/preview/...` to a
//! user app listening on a local port, stripping the prefix and rewriting
//! `Set-Cookie` so cookies scope to the session's public origin.
//!
//! HTTP forwarding via `reqwest::Client` (already the teacher's HTTP
//! client dependency in both `core` and `server`); WebSocket passthrough
//! via `tokio-tungstenite` connecting out to the origin and bridging
//! frames against the inbound `axum` `WebSocket` — grounded on
//! `Tonksthebear-trybotster/cli`'s own `tokio-tungstenite` dependency, the
//! one place in the retrieved pack where the same author reaches for it
//! for exactly this kind of bidirectional WS bridging.

use axum::body::Body;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tracing::{debug, warn};

use crate::router::AppState;

const PROXY_MARKER_HEADER: &str = "x-agent-reverse-proxy";

const WAITING_PAGE: &str = r#"<!DOCTYPE html>
<html><head><meta http-equiv="refresh" content="2"><title>Starting...</title></head>
<body><p>Waiting for the preview app to start. This page will refresh automatically.</p></body>
</html>"#;

fn origin_base(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Plain HTTP forwarding for `/proxy/{uuid}/preview/*rest`.
pub async fn proxy_http(
    State(state): State<AppState>,
    Path((id, rest)): Path<(String, String)>,
    headers: HeaderMap,
    method: axum::http::Method,
    uri: Uri,
    body: Body,
) -> Response {
    let Ok(session_id) = id.parse::<termshare_core::session::SessionId>() else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };
    let Some(session) = state.registry.get(session_id) else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    let port = session.preview_port;
    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    let target = format!("{}/{rest}{query}", origin_base(port));

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid request body").into_response(),
    };

    let mut req = state.http_client.request(method, &target).body(body_bytes.to_vec());
    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        req = req.header(name, value);
    }

    match req.send().await {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut response_headers = HeaderMap::new();
            for (name, value) in upstream.headers() {
                if name.as_str().eq_ignore_ascii_case("set-cookie") {
                    if let Ok(rewritten) = rewrite_set_cookie(value) {
                        response_headers.append(name.clone(), rewritten);
                        continue;
                    }
                }
                response_headers.append(name.clone(), value.clone());
            }
            response_headers.insert(
                HeaderName::from_static(PROXY_MARKER_HEADER),
                HeaderValue::from_static("1"),
            );
            let bytes = upstream.bytes().await.unwrap_or_default();
            let mut resp = Response::builder().status(status);
            for (name, value) in response_headers.iter() {
                resp = resp.header(name, value);
            }
            resp.body(Body::from(bytes)).unwrap_or_else(|_| {
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to build response").into_response()
            })
        }
        Err(e) => {
            debug!(error = %e, "preview origin unreachable, serving waiting page");
            let mut resp = Response::builder()
                .status(StatusCode::OK)
                .header(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")
                .header(PROXY_MARKER_HEADER, "1")
                .body(Body::from(WAITING_PAGE))
                .expect("static waiting page response always builds");
            resp.headers_mut()
                .insert(PROXY_MARKER_HEADER, HeaderValue::from_static("1"));
            resp
        }
    }
}

/// Strip `Domain=...` and force the cookie to the session's own origin so
/// it scopes correctly behind the reverse proxy.
fn rewrite_set_cookie(value: &HeaderValue) -> Result<HeaderValue, ()> {
    let raw = value.to_str().map_err(|_| ())?;
    let rewritten: String = raw
        .split(';')
        .filter(|attr| {
            let trimmed = attr.trim().to_ascii_lowercase();
            !trimmed.starts_with("domain=")
        })
        .collect::<Vec<_>>()
        .join(";");
    HeaderValue::from_str(&rewritten).map_err(|_| ())
}

/// WebSocket upgrade passthrough for the preview app.
pub async fn proxy_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((id, rest)): Path<(String, String)>,
) -> Response {
    let Ok(session_id) = id.parse::<termshare_core::session::SessionId>() else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };
    let Some(session) = state.registry.get(session_id) else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };
    let port = session.preview_port;
    let target = format!("ws://127.0.0.1:{port}/{rest}");
    ws.on_upgrade(move |socket| bridge_ws(socket, target))
}

async fn bridge_ws(inbound: WebSocket, target_url: String) {
    let origin = match tokio_tungstenite::connect_async(&target_url).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!(error = %e, url = %target_url, "preview websocket origin unreachable");
            return;
        }
    };

    let (mut inbound_tx, mut inbound_rx) = inbound.split();
    let (mut origin_tx, mut origin_rx) = origin.split();

    let client_to_origin = async {
        while let Some(Ok(msg)) = inbound_rx.next().await {
            let forwarded = match msg {
                AxumMessage::Text(t) => TungsteniteMessage::Text(t.to_string().into()),
                AxumMessage::Binary(b) => TungsteniteMessage::Binary(b.to_vec().into()),
                AxumMessage::Close(_) => break,
                _ => continue,
            };
            if origin_tx.send(forwarded).await.is_err() {
                break;
            }
        }
    };

    let origin_to_client = async {
        while let Some(Ok(msg)) = origin_rx.next().await {
            let forwarded = match msg {
                TungsteniteMessage::Text(t) => AxumMessage::Text(t.to_string().into()),
                TungsteniteMessage::Binary(b) => AxumMessage::Binary(b.to_vec().into()),
                TungsteniteMessage::Close(_) => break,
                _ => continue,
            };
            if inbound_tx.send(forwarded).await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = client_to_origin => {}
        _ = origin_to_client => {}
    }
}

//! Front router (C9): routing, cookie auth, embedded static assets, the
//! session HTML shell, and the WS upgrade.
//!
//! Route table mirrors spec.md §4.9. Static assets are embedded into the
//! binary via `rust-embed` with content-hashed, immutable-cached URLs —
//! grounded on the `deepgram-wsh` manifest's own `rust-embed` dependency
//! for exactly this "bundle the web UI into the binary" need, since the
//! teacher instead serves an on-disk `dist/` directory via
//! `tower_http::services::ServeDir`, which this service's single-binary
//! deployment model doesn't have.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cookie::{Cookie, CookieBuilder, SameSite};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use termshare_core::config::Config;
use termshare_core::recording::RecordingMetadata;
use termshare_core::registry::Registry;
use termshare_core::session::SessionId;

use crate::proxy;
use crate::ws::{handle_socket, AttachQuery};

#[derive(RustEmbed)]
#[folder = "assets/"]
pub struct Assets;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub config: &'static Config,
    pub http_client: reqwest::Client,
}

pub fn build_router(state: AppState) -> Router {
    let auth_gated = Router::new()
        .route("/", get(index_handler))
        .route("/session", get(mint_session_handler))
        .route("/session/{uuid}", get(session_page_handler))
        .route("/ws/{uuid}", get(ws_upgrade_handler))
        .route("/api/session/{uuid}/end", post(end_session_handler))
        .route("/api/recording/list", get(list_recordings_handler))
        .route("/api/recording/{uuid}", get(get_recording_handler))
        .route("/api/recording/{uuid}/download", get(download_recording_handler))
        .route("/api/recording/{uuid}/keep", post(keep_recording_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth_cookie));

    let mut router = Router::new().merge(auth_gated);

    if state.config.preview_proxy_enabled {
        let preview = Router::new()
            .route("/proxy/{uuid}/preview/{*rest}", axum::routing::any(proxy::proxy_http))
            .route("/proxy/{uuid}/preview/ws/{*rest}", get(proxy::proxy_ws));
        router = router.merge(preview);
    }

    router
        .route("/login", get(login_page_handler).post(login_submit_handler))
        .route("/assets/{*path}", get(asset_handler))
        .fallback(asset_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

const AUTH_COOKIE_NAME: &str = "termshare_auth";

async fn require_auth_cookie(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let is_websocket = request.uri().path().starts_with("/ws/");
    let Some(cookie_header) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) else {
        return unauthorized(is_websocket);
    };
    let Some(value) = extract_cookie(cookie_header, AUTH_COOKIE_NAME) else {
        return unauthorized(is_websocket);
    };
    if termshare_core::auth::verify(&state.config.auth_secret, &value).is_err() {
        return unauthorized(is_websocket);
    }
    next.run(request).await
}

fn unauthorized(is_api_or_ws: bool) -> Response {
    if is_api_or_ws {
        StatusCode::UNAUTHORIZED.into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}

fn extract_cookie(header_value: &str, name: &str) -> Option<String> {
    Cookie::split_parse(header_value)
        .filter_map(Result::ok)
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
}

async fn login_page_handler() -> Html<&'static str> {
    Html("<!DOCTYPE html><html><body><form method=\"post\"><button type=\"submit\">Enter</button></form></body></html>")
}

async fn login_submit_handler(State(state): State<AppState>) -> Response {
    let value = termshare_core::auth::sign_new(&state.config.auth_secret);
    let cookie = CookieBuilder::new(AUTH_COOKIE_NAME, value)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::days(365))
        .build();
    let mut response = Redirect::to("/").into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, cookie.to_string().parse().expect("cookie header is ASCII"));
    response
}

async fn index_handler(State(state): State<AppState>) -> Html<String> {
    let ids = state.registry.ids();
    let rows: String = ids
        .iter()
        .map(|id| format!("<li><a href=\"/session/{id}\">{id}</a></li>"))
        .collect();
    Html(format!(
        "<!DOCTYPE html><html><body><ul>{rows}</ul><a href=\"/session\">new session</a></body></html>"
    ))
}

async fn mint_session_handler() -> Redirect {
    let id = SessionId::new();
    Redirect::to(&format!("/session/{id}"))
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionPageQuery {
    pub assistant: Option<String>,
    pub pwd: Option<String>,
    pub name: Option<String>,
    pub debug: Option<bool>,
    pub color: Option<String>,
    pub parent: Option<String>,
}

async fn session_page_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SessionPageQuery>,
) -> Response {
    let Ok(session_id) = id.parse::<SessionId>() else {
        return (StatusCode::NOT_FOUND, "invalid session id").into_response();
    };

    if state.registry.get(session_id).is_none() {
        let argv = state.config.shell.clone();
        let restart_argv = state.config.shell_restart.clone();
        let workdir = query
            .pwd
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| state.config.working_directory.clone());
        let recording = if state.config.recording_enabled {
            termshare_core::recording::Recording::start(
                &state.config.recordings_dir,
                session_id.0,
                query.name.clone(),
                query.assistant.clone(),
            )
            .ok()
        } else {
            None
        };
        match termshare_core::session::Session::spawn(
            session_id,
            termshare_core::session::SessionMetadata {
                created_at: termshare_core::session::unix_now_secs(),
                name: query.name.clone(),
                assistant: query.assistant.clone(),
                project_path: query.pwd.clone(),
            },
            argv,
            restart_argv,
            workdir,
            state.config.ring_capacity_bytes,
            state.config.child_restart_backoff,
            recording,
            state.config.preview_port,
            state.config.preview_proxy_enabled,
            state.config.recording_enabled,
        ) {
            Ok(session) => {
                state.registry.insert(session);
            }
            Err(e) => {
                warn!(error = %e, "failed to spawn session");
                return (StatusCode::INTERNAL_SERVER_ERROR, "failed to start session").into_response();
            }
        }
    }

    Html(session_shell_html(&id)).into_response()
}

fn session_shell_html(id: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>session {id}</title></head><body><div id=\"terminal\" data-session=\"{id}\"></div><script src=\"/assets/app.js\"></script></body></html>"
    )
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AttachQuery>,
) -> Response {
    let Ok(session_id) = id.parse::<SessionId>() else {
        return (StatusCode::NOT_FOUND, "invalid session id").into_response();
    };
    let Some(session) = state.registry.get(session_id) else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, session, query, state))
}

async fn end_session_handler(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    let Ok(session_id) = id.parse::<SessionId>() else {
        return StatusCode::NOT_FOUND;
    };
    state.registry.end(session_id);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
struct RecordingListItem {
    session_id: uuid::Uuid,
    name: Option<String>,
    assistant: Option<String>,
    started_at: chrono::DateTime<chrono::Utc>,
    ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn list_recordings_handler(State(state): State<AppState>) -> Json<Vec<RecordingListItem>> {
    let mut items = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&state.config.recordings_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.to_string_lossy().ends_with(".metadata.json") {
                continue;
            }
            if let Ok(data) = std::fs::read(&path) {
                if let Ok(meta) = serde_json::from_slice::<RecordingMetadata>(&data) {
                    items.push(RecordingListItem {
                        session_id: meta.session_id,
                        name: meta.name,
                        assistant: meta.assistant,
                        started_at: meta.started_at,
                        ended_at: meta.ended_at,
                    });
                }
            }
        }
    }
    Json(items)
}

async fn get_recording_handler(State(state): State<AppState>, Path(id): Path<uuid::Uuid>) -> Response {
    let path = state.config.recordings_dir.join(format!("session-{id}.metadata.json"));
    match std::fs::read(&path) {
        Ok(data) => ([(header::CONTENT_TYPE, "application/json")], data).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn download_recording_handler(State(state): State<AppState>, Path(id): Path<uuid::Uuid>) -> Response {
    let path = state.config.recordings_dir.join(format!("session-{id}.log"));
    match std::fs::read(&path) {
        Ok(data) => ([(header::CONTENT_TYPE, "application/octet-stream")], data).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn keep_recording_handler(State(state): State<AppState>, Path(id): Path<uuid::Uuid>) -> StatusCode {
    let path = state.config.recordings_dir.join(format!("session-{id}.metadata.json"));
    let Ok(data) = std::fs::read(&path) else {
        return StatusCode::NOT_FOUND;
    };
    let Ok(mut meta) = serde_json::from_slice::<RecordingMetadata>(&data) else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };
    meta.kept_at = Some(chrono::Utc::now());
    let Ok(json) = serde_json::to_vec_pretty(&meta) else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };
    match std::fs::write(&path, json) {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn asset_handler(uri: axum::http::Uri) -> Response {
    let path = uri.path().trim_start_matches('/').trim_start_matches("assets/");
    let path = if path.is_empty() { "index.html" } else { path };
    match Assets::get(path) {
        Some(file) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            let mut response = (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                file.data.into_owned(),
            )
                .into_response();
            if path != "index.html" {
                response.headers_mut().insert(
                    header::CACHE_CONTROL,
                    header::HeaderValue::from_static("public, max-age=31536000, immutable"),
                );
            }
            response
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

//! Chat endpoints.
//!
//! - `POST   /api/v1/chat`                    — one utterance, one reply
//! - `POST   /api/v1/chat/stream`             — SSE: `data: <chunk>` frames
//!   terminated by `data: [DONE]`
//! - `GET    /api/v1/chat/history/:session`   — ordered turns
//! - `GET    /api/v1/chat/sessions`           — the caller's sessions
//! - `DELETE /api/v1/chat/sessions/:session`  — clear (idempotent)

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::dispatch::{dispatch_chat, dispatch_chat_stream, CancelToken, RouteClass, StreamFragment};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub user_input: String,
    /// Explicit persona override; absent = routed by the utterance.
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "d_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn d_limit() -> usize {
    50
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ChatRequest>,
) -> Response {
    // `stream: true` on /chat behaves exactly like /chat/stream.
    if body.stream {
        return run_stream(state, user, body, RouteClass::Chat);
    }

    if let Err(e) = state.rate_limiter.check(RouteClass::Chat, &user.user_id) {
        return ApiError(e).into_response();
    }

    match dispatch_chat(
        &state,
        &user.caller(),
        &body.session_id,
        &body.user_input,
        body.character.as_deref(),
    )
    .await
    {
        Ok(outcome) => {
            let _ = state.auth.store().update(&user.user_id, |u| {
                u.quota_used = u.quota_used.saturating_add(1);
            });
            Json(json!({
                "session_id": outcome.session_id,
                "character": outcome.persona,
                "response": outcome.response,
                "metadata": {
                    "quota_info": outcome.quota,
                    "turn": outcome.metadata,
                },
                "timestamp": outcome.timestamp,
            }))
            .into_response()
        }
        Err(e) => {
            state.metrics.record_error(e.kind());
            ApiError(e).into_response()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ChatRequest>,
) -> Response {
    run_stream(state, user, body, RouteClass::ChatStream)
}

fn run_stream(state: AppState, user: AuthUser, body: ChatRequest, route: RouteClass) -> Response {
    if let Err(e) = state.rate_limiter.check(route, &user.user_id) {
        return ApiError(e).into_response();
    }

    let cancel = CancelToken::new();
    let rx = dispatch_chat_stream(
        state,
        user.caller(),
        body.session_id,
        body.user_input,
        body.character,
        cancel,
    );

    Sse::new(make_sse_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Frame fragments per the wire contract: each fragment is one
/// `data: <text>` event; the terminator is the literal `data: [DONE]`.
fn make_sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<StreamFragment>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(fragment) = rx.recv().await {
            match fragment {
                StreamFragment::Chunk(text) => {
                    yield Ok(Event::default().data(text));
                }
                StreamFragment::Done => {
                    yield Ok(Event::default().data("[DONE]"));
                    break;
                }
                StreamFragment::Failed(e) => {
                    let payload = json!({
                        "error": { "type": e.kind(), "message": e.to_string() }
                    });
                    yield Ok(Event::default().data(payload.to_string()));
                    yield Ok(Event::default().data("[DONE]"));
                    break;
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History and session management
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    choir_domain::validate::validate_session_id(&session_id)?;
    let internal_id = state.session_map.resolve(&user.user_id, &session_id);
    let turns = state
        .memory
        .session_history(&internal_id, query.limit, query.offset)
        .await?;

    let history: Vec<serde_json::Value> = turns
        .iter()
        .map(|t| {
            json!({
                "turn_index": t.turn_index,
                "speaker": t.speaker,
                "content": t.content,
                "timestamp": t.timestamp,
                "metadata": t.metadata,
            })
        })
        .collect();

    Ok(Json(json!({
        "session_id": session_id,
        "history": history,
        "total_turns": state.memory.turn_count(&internal_id),
    })))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let mut sessions = Vec::new();
    for (external_id, internal_id) in state.session_map.sessions_for(&user.user_id) {
        let summary = state.memory.load_session(&internal_id).await?;
        sessions.push(json!({
            "session_id": external_id,
            "turn_count": state.memory.turn_count(&internal_id),
            "last_activity": summary.map(|s| s.last_activity),
        }));
    }

    Ok(Json(json!({
        "user_id": user.user_id,
        "total_sessions": sessions.len(),
        "sessions": sessions,
    })))
}

/// Clear a session. Idempotent: clearing an unknown or already-cleared
/// session succeeds.
pub async fn clear_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    choir_domain::validate::validate_session_id(&session_id)?;
    if let Some(internal_id) = state.session_map.remove(&user.user_id, &session_id) {
        state.memory.clear_session(&internal_id).await?;
    }
    Ok(Json(json!({ "status": "cleared", "session_id": session_id })))
}

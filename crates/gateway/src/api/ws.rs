//! The bidirectional channel.
//!
//! A WebSocket accepting JSON frames of shape `{ "type": ..., ... }`:
//!
//! - `auth` — carries an access token, yields `auth_response`
//! - `chat` — carries `session_id` + `user_input` (+ optional
//!   `character`), yields `chat_response`
//! - `ping` — yields `pong`
//!
//! Unauthenticated connections may only issue `auth` and `ping`; unknown
//! types yield an `error` frame.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use choir_domain::error::Error;

use crate::api::middleware::AuthUser;
use crate::dispatch::{dispatch_chat, RouteClass};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct WsFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_input: Option<String>,
    #[serde(default)]
    character: Option<String>,
}

pub async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut caller: Option<AuthUser> = None;

    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue, // binary / ping / pong frames are ignored
        };

        let frame: WsFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                let reply = error_frame(&Error::Validation(format!("malformed frame: {e}")));
                if send(&mut socket, reply).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let reply = match frame.kind.as_str() {
            "auth" => handle_auth(&state, &frame, &mut caller),
            "ping" => json!({ "type": "pong", "timestamp": Utc::now() }),
            "chat" => handle_chat(&state, &frame, caller.as_ref()).await,
            other => error_frame(&Error::Validation(format!(
                "unknown message type \"{other}\""
            ))),
        };

        if send(&mut socket, reply).await.is_err() {
            break;
        }
    }
}

fn handle_auth(state: &AppState, frame: &WsFrame, caller: &mut Option<AuthUser>) -> Value {
    let token = frame.token.as_deref().unwrap_or("");
    match state.auth.verify_access(token) {
        Ok(user) => {
            let auth_user = AuthUser::from(&user);
            let user_id = auth_user.user_id.clone();
            *caller = Some(auth_user);
            json!({
                "type": "auth_response",
                "status": "ok",
                "user_id": user_id,
            })
        }
        Err(e) => {
            state.metrics.record_error(e.kind());
            json!({
                "type": "auth_response",
                "status": "error",
                "error": { "type": e.kind(), "message": e.to_string() },
            })
        }
    }
}

async fn handle_chat(state: &AppState, frame: &WsFrame, caller: Option<&AuthUser>) -> Value {
    let Some(user) = caller else {
        return error_frame(&Error::Authorization(
            "authenticate before sending chat messages".into(),
        ));
    };

    let (Some(session_id), Some(user_input)) = (&frame.session_id, &frame.user_input) else {
        return error_frame(&Error::Validation(
            "chat frames require session_id and user_input".into(),
        ));
    };

    if let Err(e) = state.rate_limiter.check(RouteClass::Chat, &user.user_id) {
        return error_frame(&e);
    }

    match dispatch_chat(
        state,
        &user.caller(),
        session_id,
        user_input,
        frame.character.as_deref(),
    )
    .await
    {
        Ok(outcome) => {
            let _ = state.auth.store().update(&user.user_id, |u| {
                u.quota_used = u.quota_used.saturating_add(1);
            });
            json!({
                "type": "chat_response",
                "session_id": outcome.session_id,
                "character": outcome.persona,
                "response": outcome.response,
                "timestamp": outcome.timestamp,
            })
        }
        Err(e) => {
            state.metrics.record_error(e.kind());
            error_frame(&e)
        }
    }
}

fn error_frame(e: &Error) -> Value {
    json!({
        "type": "error",
        "error": { "type": e.kind(), "message": e.to_string() },
    })
}

async fn send(socket: &mut WebSocket, payload: Value) -> Result<(), axum::Error> {
    socket.send(Message::Text(payload.to_string())).await
}

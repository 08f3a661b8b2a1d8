pub mod auth;
pub mod chat;
pub mod error;
pub mod memory;
pub mod middleware;
pub mod ws;

use axum::extract::State;
use axum::middleware as axum_middleware;
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (register, login, refresh, health, the
/// WebSocket channel — which authenticates in-band) and **protected**
/// (everything else, gated behind the bearer-token middleware). Admin
/// routes additionally require the admin role.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/refresh", post(auth::refresh))
        .route("/api/v1/ws", get(ws::websocket));

    let admin = Router::new()
        .route("/api/v1/auth/users/:id", delete(auth::delete_user))
        .route("/api/v1/memory/admin/flush", post(memory::flush))
        .route_layer(axum_middleware::from_fn(middleware::require_admin));

    let protected = Router::new()
        // Auth (session-holder surface)
        .route("/api/v1/auth/me", get(auth::me))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/change-password", post(auth::change_password))
        // Chat
        .route("/api/v1/chat", post(chat::chat))
        .route("/api/v1/chat/stream", post(chat::chat_stream))
        .route("/api/v1/chat/history/:session", get(chat::history))
        .route("/api/v1/chat/sessions", get(chat::list_sessions))
        .route("/api/v1/chat/sessions/:session", delete(chat::clear_session))
        // Memory
        .route("/api/v1/memory/search", post(memory::search))
        .route("/api/v1/memory", post(memory::store))
        .route("/api/v1/memory/stats", get(memory::stats))
        .route(
            "/api/v1/memory/sessions/:session/all",
            delete(memory::purge_session),
        )
        .route("/api/v1/memory/:id", delete(memory::delete))
        // Admin routes share the bearer middleware below.
        .merge(admin)
        // Applied last so it runs first: auth before any admin check.
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "personas": state.router.config().names(),
        "providers": state.providers.ids(),
    }))
}

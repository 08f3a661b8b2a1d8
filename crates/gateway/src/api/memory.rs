//! Memory endpoints.
//!
//! - `POST   /api/v1/memory/search`            — ranked cross-tier search
//! - `POST   /api/v1/memory`                   — store a record
//! - `DELETE /api/v1/memory/:id`               — remove a record
//! - `GET    /api/v1/memory/stats`             — per-tier counts
//! - `DELETE /api/v1/memory/sessions/:s/all`   — purge a session's records
//! - `POST   /api/v1/memory/admin/flush`       — admin: migrate short→mid

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::Extension;
use serde::Deserialize;
use serde_json::{json, Value};

use choir_domain::error::Error;
use choir_domain::types::MemoryLayer;
use choir_domain::validate;

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::dispatch::RouteClass;
use crate::state::AppState;

const MAX_SEARCH_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub memory_types: Vec<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "d_search_limit")]
    pub limit: usize,
}

fn d_search_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct StoreRequest {
    pub memory_type: String,
    pub content: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn search(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .rate_limiter
        .check(RouteClass::MemorySearch, &user.user_id)?;
    validate::validate_limit(body.limit, 1, MAX_SEARCH_LIMIT)?;

    let layers = parse_layers(&body.memory_types)?;
    let mut hits = state.memory.search_memory(&body.query, &layers, body.limit);

    // Optional session scoping: keep hits owned by the caller's internal
    // session id.
    if let Some(external_id) = &body.session_id {
        validate::validate_session_id(external_id)?;
        let internal_id = state.session_map.resolve(&user.user_id, external_id);
        hits.retain(|h| h.session_id.as_deref() == Some(internal_id.as_str()));
    }

    Ok(Json(json!({
        "query": body.query,
        "count": hits.len(),
        "results": hits,
    })))
}

pub async fn store(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<StoreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .rate_limiter
        .check(RouteClass::MemoryStore, &user.user_id)?;
    validate::validate_metadata(&body.metadata)?;

    let layer = MemoryLayer::parse(&body.memory_type)
        .ok_or_else(|| Error::Validation(format!("unknown memory type \"{}\"", body.memory_type)))?;

    let session_id = match &body.session_id {
        Some(external_id) => {
            validate::validate_session_id(external_id)?;
            Some(state.session_map.resolve(&user.user_id, external_id))
        }
        None => None,
    };

    let memory_id = state
        .memory
        .store_memory(layer, &body.content, session_id.as_deref(), body.metadata)
        .await
        .inspect_err(|e| state.metrics.record_error(e.kind()))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "memory_id": memory_id,
            "memory_type": layer,
        })),
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(memory_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.memory.delete_memory(&memory_id).await?;
    Ok(Json(json!({ "memory_id": memory_id, "deleted": removed })))
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = state.config.quota.limit_for(&user.user_id, user.quota_limit);
    let quota = state.quota.info(&user.user_id, limit).await;
    Ok(Json(json!({
        "memory": state.memory.memory_stats(),
        "quota": quota,
        "metrics": state.metrics.summary(),
    })))
}

pub async fn purge_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate::validate_session_id(&session_id)?;
    if let Some(internal_id) = state.session_map.lookup(&user.user_id, &session_id) {
        state.memory.clear_session(&internal_id).await?;
    }
    Ok(Json(json!({ "status": "purged", "session_id": session_id })))
}

/// Admin: force the short→mid migration pass.
pub async fn flush(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let moved = state.memory.flush_short_to_mid().await?;
    Ok(Json(json!({ "status": "flushed", "migrated": moved })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Empty `memory_types` means every layer; unknown names are rejected.
fn parse_layers(memory_types: &[String]) -> Result<Vec<MemoryLayer>, Error> {
    if memory_types.is_empty() {
        return Ok(MemoryLayer::ALL.to_vec());
    }
    memory_types
        .iter()
        .map(|name| {
            MemoryLayer::parse(name)
                .ok_or_else(|| Error::Validation(format!("unknown memory type \"{name}\"")))
        })
        .collect()
}

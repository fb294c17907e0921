//! HTTP route handlers for the relay API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::conversations::core::ids::{AccountId, SessionId};
use crate::conversations::core::turn::{ConversationRecord, ConversationWithMessages, StorageStats};
use crate::conversations::retention::scheduler::{PurgeCycleSummary, run_purge_cycle};
use crate::conversations::store::sqlite_store::ConversationStore;
use crate::router::session_router::QueryOutcome;

use super::state::AppState;

/// Default page size for conversation listings.
const DEFAULT_LIST_LIMIT: u64 = 50;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/query", post(handle_query))
        .route(
            "/api/accounts/{account_id}/conversations",
            get(list_conversations),
        )
        .route(
            "/api/accounts/{account_id}/conversations/{session_id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/api/accounts/{account_id}/stats", get(storage_stats))
        .route("/api/maintenance/purge", post(run_purge))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chat-relay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn parse_account(raw: &str) -> Result<AccountId, (StatusCode, String)> {
    AccountId::new(raw).map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid account id: {e}")))
}

/// Query request.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// Owning account.
    pub account_id: String,
    /// Optional session to continue; a fresh one is assigned when absent.
    pub session_id: Option<String>,
    /// The user's prompt.
    pub prompt: String,
}

/// Handle a routed query.
async fn handle_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>, (StatusCode, String)> {
    let account_id = parse_account(&request.account_id)?;
    let session_id = request.session_id.map(SessionId::new);

    let outcome = state
        .router
        .handle_query(&account_id, session_id, &request.prompt)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, format!("Generation error: {e}")))?;

    Ok(Json(outcome))
}

/// Pagination parameters for listings.
#[derive(Debug, Deserialize)]
pub struct Pagination {
    /// Maximum conversations to return.
    pub limit: Option<u64>,
    /// Offset into the sorted listing.
    pub offset: Option<u64>,
}

/// Conversation listing response.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    /// Conversations, most recently active first.
    pub conversations: Vec<ConversationRecord>,
    /// Number of conversations returned.
    pub count: usize,
}

/// List an account's conversations.
///
/// Listing a never-seen account returns an empty page without creating a
/// scope for it.
async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Query(page): Query<Pagination>,
) -> Result<Json<ListResponse>, (StatusCode, String)> {
    let account_id = parse_account(&account_id)?;
    let Some(scope) = state
        .scopes
        .existing_scope(&account_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {e}")))?
    else {
        return Ok(Json(ListResponse {
            conversations: Vec::new(),
            count: 0,
        }));
    };

    let conversations = scope
        .list_conversations(
            account_id,
            page.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            page.offset.unwrap_or(0),
        )
        .await;
    let count = conversations.len();

    Ok(Json(ListResponse {
        conversations,
        count,
    }))
}

/// Fetch one conversation with its messages.
async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path((account_id, session_id)): Path<(String, String)>,
) -> Result<Json<ConversationWithMessages>, (StatusCode, String)> {
    let account_id = parse_account(&account_id)?;
    let not_found = || (StatusCode::NOT_FOUND, "Conversation not found".to_string());
    let scope = state
        .scopes
        .existing_scope(&account_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {e}")))?
        .ok_or_else(not_found)?;

    match scope.get_conversation(SessionId::new(session_id)).await {
        Some(found) => Ok(Json(found)),
        None => Err(not_found()),
    }
}

/// Deletion response.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    /// Whether the delete succeeded (nonexistent ids count as success).
    pub deleted: bool,
}

/// Delete one conversation and its messages.
async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path((account_id, session_id)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, (StatusCode, String)> {
    let account_id = parse_account(&account_id)?;
    let Some(scope) = state
        .scopes
        .existing_scope(&account_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {e}")))?
    else {
        // Nothing stored for this account; deleting nothing is a success.
        return Ok(Json(DeleteResponse { deleted: true }));
    };

    let deleted = scope.delete_conversation(SessionId::new(session_id)).await;
    Ok(Json(DeleteResponse { deleted }))
}

/// Stats query parameters.
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// Retention threshold override in milliseconds.
    pub retention_threshold_ms: Option<u64>,
}

/// Report storage statistics for an account scope.
async fn storage_stats(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StorageStats>, (StatusCode, String)> {
    let account_id = parse_account(&account_id)?;
    let Some(scope) = state
        .scopes
        .existing_scope(&account_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {e}")))?
    else {
        return Ok(Json(StorageStats::default()));
    };

    let threshold = query
        .retention_threshold_ms
        .unwrap_or(state.config.retention.threshold_ms);
    Ok(Json(scope.storage_stats(threshold).await))
}

/// Trigger a purge cycle over every registered scope.
async fn run_purge(State(state): State<Arc<AppState>>) -> Json<PurgeCycleSummary> {
    let summary = run_purge_cycle(&state.scopes, state.config.retention.threshold_ms).await;
    Json(summary)
}

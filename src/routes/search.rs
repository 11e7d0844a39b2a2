use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::grep::{grep_workspace, GrepQuery, GrepResponse};
use crate::retrieval::ContextItem;
use crate::state::{AppState, ServerEvent};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub active_file_path: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<ContextItem>,
}

/// Trigger (or re-trigger) a full rescan of a workspace's retrieval index.
pub async fn index_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let ws = state.workspace_manager.get_workspace(&workspace_id)?;
    let index = state.index_for(&workspace_id, std::path::Path::new(&ws.path));

    if index.is_worker_running() {
        return Ok(Json(serde_json::json!({
            "status": "already_indexing",
            "workspace_id": workspace_id,
        })));
    }

    let _ = state.event_tx.send(ServerEvent::IndexingStarted {
        workspace_id: workspace_id.clone(),
    });
    index.enqueue_full_rescan();

    let ws_id = workspace_id.clone();
    let idx = index.clone();
    let workspace_manager = state.workspace_manager.clone();
    let event_tx = state.event_tx.clone();
    tokio::spawn(async move {
        // Poll until the worker drains; cheap since it only checks an atomic.
        while idx.is_worker_running() {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let bm25_count = idx.bm25_chunk_count();
        let _ = workspace_manager.update_workspace_stats(&ws_id, bm25_count, 0, idx.is_indexed());
        let _ = event_tx.send(ServerEvent::IndexingCompleted {
            workspace_id: ws_id.clone(),
            total_files: bm25_count,
            duration_ms: 0,
        });
        let _ = event_tx.send(ServerEvent::SearchReady { workspace_id: ws_id });
    });

    Ok(Json(serde_json::json!({
        "status": "indexing_started",
        "workspace_id": workspace_id,
    })))
}

pub async fn index_status(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let ws = state.workspace_manager.get_workspace(&workspace_id)?;
    let index = state.index_for(&workspace_id, std::path::Path::new(&ws.path));

    Ok(Json(serde_json::json!({
        "indexed": index.is_indexed(),
        "is_indexing": index.is_worker_running(),
        "bm25_chunk_count": index.bm25_chunk_count(),
        "vector_chunk_count": index.vector_chunk_count(),
    })))
}

/// Hybrid search: fans out to BM25 and the hashed vector index, fuses by
/// RRF, and diversifies by MMR. See `crate::retrieval::coordinator`.
pub async fn search(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    Json(req): Json<SearchRequest>,
) -> AppResult<Json<SearchResponse>> {
    if req.query.trim().is_empty() {
        return Err(AppError::BadRequest("Search query must not be empty".to_string()));
    }
    if req.query.len() > crate::config::MAX_SEARCH_QUERY_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Search query too long ({} chars). Maximum allowed is {}.",
            req.query.len(),
            crate::config::MAX_SEARCH_QUERY_LENGTH,
        )));
    }

    let ws = state.workspace_manager.get_workspace(&workspace_id)?;
    let index = state.index_for(&workspace_id, std::path::Path::new(&ws.path));
    index.ensure_loaded();

    let limit = req.limit.unwrap_or_else(|| state.retrieval_settings.read().top_k);
    let results = index.coordinator_search(&req.query, limit, None).await;
    Ok(Json(SearchResponse { results }))
}

pub async fn grep_search(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    Json(query): Json<GrepQuery>,
) -> AppResult<Json<GrepResponse>> {
    if query.pattern.trim().is_empty() {
        return Err(AppError::BadRequest("Grep pattern must not be empty".to_string()));
    }
    if query.pattern.len() > crate::config::MAX_SEARCH_QUERY_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Grep pattern too long ({} chars). Maximum allowed is {}.",
            query.pattern.len(),
            crate::config::MAX_SEARCH_QUERY_LENGTH,
        )));
    }
    let ws = state.workspace_manager.get_workspace(&workspace_id)?;
    let response = grep_workspace(ws.root_path(), &query)?;
    Ok(Json(response))
}

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::error::AppResult;
use crate::state::{AppState, ServerEvent};

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    /// Accepts both "path" and "root_path" from the client
    #[serde(alias = "root_path")]
    pub path: String,
}

pub async fn list_workspaces(State(state): State<AppState>) -> AppResult<Json<Vec<crate::workspace::Workspace>>> {
    let workspaces = state.workspace_manager.list_workspaces();
    Ok(Json(workspaces))
}

pub async fn create_workspace(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> AppResult<Json<crate::workspace::Workspace>> {
    let workspace = state.workspace_manager.create_workspace(req.name, req.path.clone())?;

    let index = state.index_for(&workspace.id, std::path::Path::new(&workspace.path));
    if let Err(e) = state.watcher_manager.start_watching(&workspace.id, &workspace.path, index.clone()) {
        tracing::warn!("Failed to start file watcher for workspace: {}", e);
    }

    index.enqueue_full_rescan();
    let _ = state.event_tx.send(ServerEvent::IndexingStarted {
        workspace_id: workspace.id.clone(),
    });

    let _ = state.event_tx.send(ServerEvent::WorkspaceCreated {
        workspace_id: workspace.id.clone(),
        path: workspace.path.clone(),
    });

    Ok(Json(workspace))
}

pub async fn get_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> AppResult<Json<crate::workspace::Workspace>> {
    let workspace = state.workspace_manager.get_workspace(&workspace_id)?;
    Ok(Json(workspace))
}

pub async fn remove_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    state.watcher_manager.stop_watching(&workspace_id);
    state.drop_index(&workspace_id);
    state.workspace_manager.remove_workspace(&workspace_id)?;

    let _ = state.event_tx.send(ServerEvent::WorkspaceRemoved {
        workspace_id: workspace_id.clone(),
    });

    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn activate_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> AppResult<Json<crate::workspace::Workspace>> {
    let workspace = state.workspace_manager.activate_workspace(&workspace_id)?;

    let index = state.index_for(&workspace_id, std::path::Path::new(&workspace.path));
    if !state.watcher_manager.is_watching(&workspace_id) {
        if let Err(e) = state.watcher_manager.start_watching(&workspace_id, &workspace.path, index.clone()) {
            tracing::warn!("Failed to start file watcher: {}", e);
        }
    }

    index.ensure_loaded();
    if !index.is_indexed() {
        index.enqueue_full_rescan();
        let _ = state.event_tx.send(ServerEvent::IndexingStarted {
            workspace_id: workspace_id.clone(),
        });
    }

    Ok(Json(workspace))
}

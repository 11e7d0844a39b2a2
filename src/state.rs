use crate::config::AppConfig;
use crate::error::AppResult;
use crate::retrieval::settings::RetrievalSettings;
use crate::retrieval::WorkspaceIndex;
use crate::watcher::FileWatcherManager;
use crate::workspace::WorkspaceManager;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events broadcast to all connected WebSocket clients
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "workspace_created")]
    WorkspaceCreated { workspace_id: String, path: String },
    #[serde(rename = "workspace_removed")]
    WorkspaceRemoved { workspace_id: String },
    #[serde(rename = "index_started")]
    IndexingStarted { workspace_id: String },
    #[serde(rename = "index_progress")]
    IndexingProgress { workspace_id: String, indexed: usize, total: usize },
    #[serde(rename = "index_complete")]
    IndexingCompleted { workspace_id: String, total_files: usize, duration_ms: u64 },
    #[serde(rename = "index_error")]
    IndexingError { workspace_id: String, error: String },
    #[serde(rename = "file_changed")]
    FileChanged { workspace_id: String, path: String, change_type: String },
    #[serde(rename = "search_ready")]
    SearchReady { workspace_id: String },
}

impl ServerEvent {
    /// The workspace this event belongs to, used to filter WebSocket
    /// delivery to subscribed clients.
    pub fn workspace_id(&self) -> &str {
        match self {
            ServerEvent::WorkspaceCreated { workspace_id, .. }
            | ServerEvent::WorkspaceRemoved { workspace_id }
            | ServerEvent::IndexingStarted { workspace_id }
            | ServerEvent::IndexingProgress { workspace_id, .. }
            | ServerEvent::IndexingCompleted { workspace_id, .. }
            | ServerEvent::IndexingError { workspace_id, .. }
            | ServerEvent::FileChanged { workspace_id, .. }
            | ServerEvent::SearchReady { workspace_id } => workspace_id,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub workspace_manager: Arc<WorkspaceManager>,
    pub watcher_manager: Arc<FileWatcherManager>,
    pub event_tx: broadcast::Sender<ServerEvent>,
    pub retrieval_settings: Arc<RwLock<RetrievalSettings>>,
    indexes: Arc<DashMap<String, Arc<WorkspaceIndex>>>,
    data_dir: PathBuf,
}

impl AppState {
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        let (event_tx, _) = broadcast::channel(1024);

        let data_dir = PathBuf::from(&config.data_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(crate::error::AppError::Io)?;

        let workspace_manager = Arc::new(WorkspaceManager::new(data_dir.clone(), Vec::new()));
        let watcher_manager = Arc::new(FileWatcherManager::new(config.watcher_debounce_ms, event_tx.clone()));

        let retrieval_settings = RetrievalSettings {
            enable_semantic_index: config.enable_semantic_index,
            enable_bm25: config.enable_bm25,
            index_paused: false,
            top_k: config.default_top_k,
            chunk_words: config.chunk_words,
            chunk_overlap_words: config.chunk_overlap_words,
            chunk_heading_level: config.chunk_heading_level,
            excluded_folders: Vec::new(),
            active_profile: Vec::new(),
        };

        Ok(Self {
            config,
            workspace_manager,
            watcher_manager,
            event_tx,
            retrieval_settings: Arc::new(RwLock::new(retrieval_settings)),
            indexes: Arc::new(DashMap::new()),
            data_dir,
        })
    }

    /// Fetch (creating if necessary) the per-workspace retrieval index.
    pub fn index_for(&self, workspace_id: &str, root: &Path) -> Arc<WorkspaceIndex> {
        if let Some(existing) = self.indexes.get(workspace_id) {
            return existing.clone();
        }
        let index_dir = self.data_dir.join("indexes").join(workspace_id);
        let settings = self.retrieval_settings.read().clone();
        let index = WorkspaceIndex::new(
            workspace_id.to_string(),
            root.to_path_buf(),
            index_dir,
            settings,
            self.event_tx.clone(),
        );
        self.indexes.insert(workspace_id.to_string(), index.clone());
        index
    }

    pub fn drop_index(&self, workspace_id: &str) {
        self.indexes.remove(workspace_id);
    }

    /// Push the current settings to every loaded workspace index.
    pub fn broadcast_settings(&self) {
        let settings = self.retrieval_settings.read().clone();
        for entry in self.indexes.iter() {
            entry.value().update_settings(settings.clone());
        }
    }
}

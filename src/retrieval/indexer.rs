//! Background indexer (§4.4): a cooperative, debounced worker that drains a
//! path queue, re-chunks changed Markdown files, and keeps the BM25 and
//! vector indexes for one workspace in sync with the filesystem.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::retrieval::bm25::Bm25Index;
use crate::retrieval::coordinator::{RetrievalCoordinator, SearchOptions, SearchQuery};
use crate::retrieval::hash::fnv1a32_str;
use crate::retrieval::provider::{ContextItem, ProviderFlags};
use crate::retrieval::settings::RetrievalSettings;
use crate::retrieval::vector::VectorIndex;
use crate::state::ServerEvent;

const WORKER_YIELD: Duration = Duration::from_millis(10);
const PERSIST_DEBOUNCE: Duration = Duration::from_secs(1);

/// Per-workspace pair of indexes plus the queue/worker/debounce machinery
/// driving them. Exactly one worker runs per `WorkspaceIndex` at a time,
/// enforced by `worker_running`.
pub struct WorkspaceIndex {
    workspace_id: String,
    root: PathBuf,
    index_dir: PathBuf,
    bm25: RwLock<Bm25Index>,
    vector: RwLock<VectorIndex>,
    pending: Mutex<HashSet<String>>,
    worker_running: Arc<AtomicBool>,
    persist_scheduled: Arc<AtomicBool>,
    settings: RwLock<RetrievalSettings>,
    event_tx: broadcast::Sender<ServerEvent>,
    indexed_once: AtomicBool,
}

impl WorkspaceIndex {
    pub fn new(
        workspace_id: String,
        root: PathBuf,
        index_dir: PathBuf,
        settings: RetrievalSettings,
        event_tx: broadcast::Sender<ServerEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            workspace_id,
            root,
            index_dir,
            bm25: RwLock::new(Bm25Index::new()),
            vector: RwLock::new(VectorIndex::new()),
            pending: Mutex::new(HashSet::new()),
            worker_running: Arc::new(AtomicBool::new(false)),
            persist_scheduled: Arc::new(AtomicBool::new(false)),
            settings: RwLock::new(settings),
            event_tx,
            indexed_once: AtomicBool::new(false),
        })
    }

    fn bm25_path(&self) -> PathBuf {
        self.index_dir.join("bm25.json")
    }

    fn vector_path(&self) -> PathBuf {
        self.index_dir.join("index.json")
    }

    /// Idempotent: load persisted payloads from disk into memory.
    pub fn ensure_loaded(&self) {
        let settings = self.settings.read().clone();
        let bm25_raw = std::fs::read_to_string(self.bm25_path()).ok();
        self.bm25.write().ensure_loaded(bm25_raw.as_deref());

        let vector_raw = std::fs::read_to_string(self.vector_path()).ok();
        self.vector
            .write()
            .ensure_loaded(vector_raw.as_deref(), settings.vector_chunking_config());
    }

    pub fn update_settings(&self, settings: RetrievalSettings) {
        *self.settings.write() = settings;
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed_once.load(Ordering::Relaxed)
    }

    pub fn bm25_chunk_count(&self) -> usize {
        self.bm25.read().chunk_count()
    }

    pub fn vector_chunk_count(&self) -> usize {
        self.vector.read().chunk_count()
    }

    pub fn is_worker_running(&self) -> bool {
        self.worker_running.load(Ordering::Relaxed)
    }

    /// Add every non-excluded Markdown path under `root` to the queue.
    pub fn enqueue_full_rescan(self: &Arc<Self>) {
        self.ensure_loaded();
        let settings = self.settings.read().clone();
        let paths = collect_markdown_files(&self.root);
        let mut pending = self.pending.lock();
        for path in paths {
            if !settings.is_excluded(&path) {
                pending.insert(path);
            }
        }
        drop(pending);
        self.spawn_worker_if_idle();
    }

    pub fn queue_update(self: &Arc<Self>, path: &str) {
        self.pending.lock().insert(path.to_string());
        self.spawn_worker_if_idle();
    }

    /// Immediately tombstone a path: remove it from both indexes and drop it
    /// from the pending queue without waiting for dequeue.
    pub fn queue_remove(self: &Arc<Self>, path: &str) {
        self.pending.lock().remove(path);
        self.bm25.write().remove_path(path);
        self.vector.write().remove_path(path);
        self.schedule_persist();
    }

    fn spawn_worker_if_idle(self: &Arc<Self>) {
        if self
            .worker_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return; // a worker is already draining the queue
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.run_worker().await;
        });
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let settings = self.settings.read().clone();
            if settings.index_paused {
                break;
            }

            let next_path = {
                let mut pending = self.pending.lock();
                let path = pending.iter().next().cloned();
                if let Some(ref p) = path {
                    pending.remove(p);
                }
                path
            };

            let Some(path) = next_path else {
                break;
            };

            self.process_path(&path, &settings).await;
            tokio::time::sleep(WORKER_YIELD).await;
        }
        self.worker_running.store(false, Ordering::Release);

        // A concurrent enqueue may have lost the race against this worker's
        // exit; re-check and restart if the queue is non-empty.
        if !self.pending.lock().is_empty() {
            self.spawn_worker_if_idle();
        }
    }

    async fn process_path(self: &Arc<Self>, path: &str, settings: &RetrievalSettings) {
        if settings.is_excluded(path) {
            self.bm25.write().remove_path(path);
            self.vector.write().remove_path(path);
            self.schedule_persist();
            return;
        }
        if !settings.is_markdown_path(path) {
            self.bm25.write().remove_path(path);
            self.vector.write().remove_path(path);
            return;
        }

        let full = self.root.join(path);
        let content = match tokio::fs::read_to_string(&full).await {
            Ok(c) => c,
            Err(_) => {
                // Unreadable file: skip, no tombstone, retried on next event.
                return;
            }
        };
        let file_hash = fnv1a32_str(&content);

        let already_current = self
            .bm25
            .read()
            .file_state(path)
            .map(|s| s.file_hash == file_hash && s.chunk_count > 0)
            .unwrap_or(false);
        if already_current {
            return;
        }

        self.bm25
            .write()
            .reindex_file(path, &content, file_hash, settings.bm25_chunking_config());
        self.vector
            .write()
            .reindex_file(path, &content, settings.vector_chunking_config());

        self.indexed_once.store(true, Ordering::Relaxed);
        self.schedule_persist();
    }

    fn schedule_persist(self: &Arc<Self>) {
        if self
            .persist_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return; // a persist timer is already pending
        }
        let this = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(PERSIST_DEBOUNCE).await;

            // Serialize at fire time, not at schedule time, so writes that
            // land during the debounce window are still captured.
            let vector_config = this.settings.read().vector_chunking_config();
            let bm25_json = serde_json::to_string_pretty(&this.bm25.read().to_payload()).ok();
            let vector_json = serde_json::to_string_pretty(&this.vector.read().to_payload(vector_config)).ok();

            if let Err(e) = persist_atomic(&this.index_dir, &this.bm25_path(), bm25_json.as_deref()).await {
                tracing::warn!("bm25 persist failed, will retry on next debounce: {e}");
            }
            if let Err(e) = persist_atomic(&this.index_dir, &this.vector_path(), vector_json.as_deref()).await {
                tracing::warn!("vector persist failed, will retry on next debounce: {e}");
            }
            this.persist_scheduled.store(false, Ordering::Release);
        });
    }

    pub async fn coordinator_search(&self, query_text: &str, limit: usize, captured: Option<&HashSet<String>>) -> Vec<ContextItem> {
        let settings = self.settings.read().clone();
        let bm25 = self.bm25.read();
        let vector = self.vector.read();
        let coordinator = RetrievalCoordinator::new(
            &bm25,
            &vector,
            ProviderFlags {
                enable_bm25: settings.enable_bm25,
                enable_semantic_index: settings.enable_semantic_index,
            },
        );
        let query = SearchQuery {
            text: query_text.to_string(),
            active_file_path: None,
            mode: None,
        };
        coordinator.search(&query, SearchOptions { limit }, captured).await
    }
}

async fn persist_atomic(dir: &Path, target: &Path, contents: Option<&str>) -> std::io::Result<()> {
    let Some(contents) = contents else {
        return Ok(());
    };
    tokio::fs::create_dir_all(dir).await?;
    let tmp = target.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, target).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("retrieval-indexer-test-{}", uuid::Uuid::new_v4()))
    }

    fn new_index(root: PathBuf, index_dir: PathBuf) -> Arc<WorkspaceIndex> {
        let (tx, _rx) = broadcast::channel(16);
        WorkspaceIndex::new("ws".to_string(), root, index_dir, RetrievalSettings::default(), tx)
    }

    /// Poll until `bm25_chunk_count` is non-zero or the deadline passes, since
    /// indexing happens on the spawned worker rather than synchronously.
    async fn wait_for_indexed(index: &WorkspaceIndex) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while index.bm25_chunk_count() == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn queue_update_indexes_a_new_markdown_file() {
        let root = scratch_dir();
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("note.md"), "# Title\n\nHello world, this is a note about cats.").unwrap();

        let index = new_index(root.clone(), root.join(".index"));
        index.ensure_loaded();
        assert!(!index.is_indexed());

        index.queue_update("note.md");
        wait_for_indexed(&index).await;

        assert!(index.is_indexed());
        assert!(index.bm25_chunk_count() > 0);
        assert!(index.vector_chunk_count() > 0);

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn queue_update_skips_excluded_and_non_markdown_paths() {
        let root = scratch_dir();
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("note.txt"), "plain text, not markdown").unwrap();

        let index = new_index(root.clone(), root.join(".index"));
        index.queue_update("note.txt");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(index.bm25_chunk_count(), 0);
        assert!(!index.is_indexed());

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn queue_remove_tombstones_immediately() {
        let root = scratch_dir();
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("note.md"), "# Title\n\nContent about dogs and parks.").unwrap();

        let index = new_index(root.clone(), root.join(".index"));
        index.queue_update("note.md");
        wait_for_indexed(&index).await;
        assert!(index.bm25_chunk_count() > 0);

        index.queue_remove("note.md");
        assert_eq!(index.bm25_chunk_count(), 0);
        assert_eq!(index.vector_chunk_count(), 0);

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn enqueue_full_rescan_honors_exclusions() {
        let root = scratch_dir();
        std::fs::create_dir_all(root.join("private")).unwrap();
        std::fs::write(root.join("keep.md"), "# Keep\n\nThis file should be indexed.").unwrap();
        std::fs::write(root.join("private/secret.md"), "# Secret\n\nThis file should not be indexed.").unwrap();

        let settings = RetrievalSettings { excluded_folders: vec!["private".to_string()], ..Default::default() };
        let (tx, _rx) = broadcast::channel(16);
        let index = WorkspaceIndex::new("ws".to_string(), root.clone(), root.join(".index"), settings, tx);

        index.enqueue_full_rescan();
        wait_for_indexed(&index).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(index.bm25_chunk_count() > 0);
        let bm25 = index.bm25.read();
        assert!(bm25.file_state("keep.md").is_some());
        assert!(bm25.file_state("private/secret.md").is_none());
        drop(bm25);

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn reindexing_unchanged_content_is_a_no_op() {
        let root = scratch_dir();
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("note.md"), "# Title\n\nStable content that never changes.").unwrap();

        let index = new_index(root.clone(), root.join(".index"));
        index.queue_update("note.md");
        wait_for_indexed(&index).await;
        let first_count = index.bm25_chunk_count();

        // Queueing the same unchanged file again should not duplicate chunks.
        index.queue_update("note.md");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(index.bm25_chunk_count(), first_count);

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn coordinator_search_returns_matches_after_indexing() {
        let root = scratch_dir();
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("note.md"), "# Astronomy\n\nJupiter is the largest planet in the solar system.").unwrap();

        let index = new_index(root.clone(), root.join(".index"));
        index.queue_update("note.md");
        wait_for_indexed(&index).await;

        let results = index.coordinator_search("largest planet", 10, None).await;
        assert!(!results.is_empty());
        assert_eq!(results[0].path, "note.md");

        std::fs::remove_dir_all(&root).ok();
    }
}

/// Walk `root` for Markdown files, returning vault-relative, forward-slash
/// normalized paths.
fn collect_markdown_files(root: &Path) -> Vec<String> {
    use ignore::WalkBuilder;

    WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .max_depth(Some(64))
        .build()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter_map(|entry| {
            let path = entry.path();
            let ext = path.extension()?.to_string_lossy().to_lowercase();
            if !matches!(ext.as_str(), "md" | "mdx" | "markdown") {
                return None;
            }
            let relative = path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/");
            Some(relative)
        })
        .collect()
}

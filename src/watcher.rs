use crate::retrieval::WorkspaceIndex;
use crate::state::ServerEvent;
use dashmap::DashMap;
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent};
use notify::RecursiveMode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Minimum interval between reindex operations for the same path. Absorbs
/// rapid successive saves so a single edit burst doesn't re-chunk and
/// re-embed a file on every debounced event.
const REINDEX_COOLDOWN_MS: u64 = 5000;

pub struct FileWatcherManager {
    watchers: DashMap<String, WatcherHandle>,
    debounce_ms: u64,
    event_tx: broadcast::Sender<ServerEvent>,
}

struct WatcherHandle {
    _watcher: notify_debouncer_full::Debouncer<notify::RecommendedWatcher, notify_debouncer_full::FileIdMap>,
}

/// Per-path cooldown tracker, checked before a debounced event reaches the
/// retrieval index's queue.
struct ReindexCooldownTracker {
    last_reindex: HashMap<String, Instant>,
}

impl ReindexCooldownTracker {
    fn new() -> Self {
        Self { last_reindex: HashMap::new() }
    }

    /// Returns true if `path` is past its cooldown and should be reindexed.
    fn should_reindex(&mut self, path: &str) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_reindex.get(path) {
            if now.duration_since(*last) < Duration::from_millis(REINDEX_COOLDOWN_MS) {
                return false;
            }
        }
        self.last_reindex.insert(path.to_string(), now);
        true
    }

    fn cleanup_stale(&mut self) {
        let cutoff = Instant::now() - Duration::from_secs(60);
        self.last_reindex.retain(|_, v| *v > cutoff);
    }
}

impl FileWatcherManager {
    pub fn new(debounce_ms: u64, event_tx: broadcast::Sender<ServerEvent>) -> Self {
        Self {
            watchers: DashMap::new(),
            debounce_ms,
            event_tx,
        }
    }

    /// Start watching a workspace directory, forwarding each debounced
    /// change into the workspace's retrieval index queue.
    pub fn start_watching(
        &self,
        workspace_id: &str,
        path: &str,
        index: Arc<WorkspaceIndex>,
    ) -> Result<(), notify::Error> {
        if self.watchers.contains_key(workspace_id) {
            return Ok(()); // Already watching
        }

        let ws_id = workspace_id.to_string();
        let event_tx = self.event_tx.clone();
        let ws_path = PathBuf::from(path);
        let rt_handle = tokio::runtime::Handle::try_current().ok();
        let cooldown = Arc::new(Mutex::new(ReindexCooldownTracker::new()));
        let cleanup_counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut debouncer = new_debouncer(
            Duration::from_millis(self.debounce_ms),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let count = cleanup_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    if count % 50 == 0 {
                        cooldown.lock().cleanup_stale();
                    }

                    let mut file_events: HashMap<PathBuf, String> = HashMap::new();
                    for event in &events {
                        let change_type = classify_debounced_event(event);
                        if change_type == "access" || change_type == "other" {
                            continue;
                        }
                        for path in &event.paths {
                            if crate::config::is_excluded_directory(
                                path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
                            ) {
                                continue;
                            }
                            file_events.insert(path.clone(), change_type.to_string());
                        }
                    }

                    for (path, change_type) in file_events {
                        let relative = path
                            .strip_prefix(&ws_path)
                            .unwrap_or(&path)
                            .to_string_lossy()
                            .replace('\\', "/");

                        if !cooldown.lock().should_reindex(&relative) {
                            continue;
                        }

                        let _ = event_tx.send(ServerEvent::FileChanged {
                            workspace_id: ws_id.clone(),
                            path: relative.clone(),
                            change_type: change_type.clone(),
                        });

                        if let Some(handle) = &rt_handle {
                            let index = index.clone();
                            let relative = relative.clone();
                            handle.spawn(async move {
                                if change_type == "remove" {
                                    index.queue_remove(&relative);
                                } else {
                                    index.queue_update(&relative);
                                }
                            });
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!("File watcher error: {:?}", e);
                    }
                }
            },
        )?;

        debouncer
            .watch(PathBuf::from(path).as_path(), RecursiveMode::Recursive)
            .map_err(|e| notify::Error::generic(&format!("Watch failed: {}", e)))?;

        self.watchers.insert(workspace_id.to_string(), WatcherHandle { _watcher: debouncer });

        info!("Started watching workspace {} at {} (debounce: {}ms)", workspace_id, path, self.debounce_ms);
        Ok(())
    }

    pub fn stop_watching(&self, workspace_id: &str) {
        if self.watchers.remove(workspace_id).is_some() {
            info!("Stopped watching workspace {}", workspace_id);
        }
    }

    pub fn is_watching(&self, workspace_id: &str) -> bool {
        self.watchers.contains_key(workspace_id)
    }
}

fn classify_debounced_event(event: &DebouncedEvent) -> &'static str {
    use notify::EventKind;
    match event.kind {
        EventKind::Create(_) => "create",
        EventKind::Modify(_) => "modify",
        EventKind::Remove(_) => "remove",
        EventKind::Access(_) => "access",
        _ => "other",
    }
}

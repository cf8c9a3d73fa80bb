//! Durable storage for the offline action queue.
//!
//! The store survives process restarts and keeps actions in creation order.
//! An action leaves the store only through [`QueueStore::remove`], which the
//! replay worker calls strictly after a confirmed success response.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::action::{ActionDraft, QueuedAction};
use crate::error::{Error, Result};

/// Abstraction over durable queue storage for testability.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persists a new action, assigning the next creation-order id.
    ///
    /// Storage failures are returned to the caller; the action is never
    /// silently dropped.
    async fn enqueue(&self, draft: ActionDraft) -> Result<QueuedAction>;

    /// Returns every queued action in insertion order.
    async fn list_all(&self) -> Result<Vec<QueuedAction>>;

    /// Removes an action by id. Returns `false` if no such action exists.
    async fn remove(&self, id: u64) -> Result<bool>;

    /// Number of queued actions.
    async fn len(&self) -> Result<usize>;

    /// Whether the queue is empty.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// On-disk representation of the queue file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    /// Next id to assign; persisted so ids stay monotonic across restarts.
    next_id: u64,
    actions: Vec<QueuedAction>,
}

/// File-backed queue store.
///
/// The whole queue lives in one JSON file rewritten atomically (write tmp,
/// fsync, rename) on every mutation. An async mutex serializes mutations so
/// concurrent enqueue/remove calls cannot interleave a write.
#[derive(Debug)]
pub struct FileQueueStore {
    path: PathBuf,
    max_queued: usize,
    state: Mutex<QueueFile>,
}

impl FileQueueStore {
    /// Opens the store at `path`, creating an empty queue if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the file
    /// cannot be read, or an existing file does not parse.
    pub async fn open(path: impl Into<PathBuf>, max_queued: usize) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| Error::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => QueueFile::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            max_queued,
            state: Mutex::new(state),
        })
    }

    /// Writes the queue file atomically (write tmp + fsync + rename).
    fn persist(path: &Path, state: &QueueFile) -> Result<()> {
        let json = serde_json::to_string(state).map_err(|e| Error::Storage(e.to_string()))?;
        let tmp_path = path.with_extension("json.tmp");

        let mut file = std::fs::File::create(&tmp_path)?;
        use std::io::Write;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn enqueue(&self, draft: ActionDraft) -> Result<QueuedAction> {
        let mut state = self.state.lock().await;

        if state.actions.len() >= self.max_queued {
            return Err(Error::QueueFull {
                capacity: self.max_queued,
            });
        }

        let id = state.next_id;
        let action = draft.into_action(id, Utc::now());
        state.next_id += 1;
        state.actions.push(action.clone());

        // Memory first, then disk; roll back on a failed write so the
        // in-memory view never claims an action the file does not hold.
        if let Err(e) = Self::persist(&self.path, &state) {
            state.actions.pop();
            state.next_id = id;
            return Err(e);
        }

        log::debug!("queued action {id} {} {}", action.method, action.url);
        Ok(action)
    }

    async fn list_all(&self) -> Result<Vec<QueuedAction>> {
        Ok(self.state.lock().await.actions.clone())
    }

    async fn remove(&self, id: u64) -> Result<bool> {
        let mut state = self.state.lock().await;

        let Some(index) = state.actions.iter().position(|a| a.id == id) else {
            return Ok(false);
        };
        let removed = state.actions.remove(index);

        if let Err(e) = Self::persist(&self.path, &state) {
            state.actions.insert(index, removed);
            return Err(e);
        }

        log::debug!("removed action {id}");
        Ok(true)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.lock().await.actions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn draft(url: &str) -> ActionDraft {
        ActionDraft::new(url, "POST").with_body("a=1")
    }

    #[tokio::test]
    async fn enqueue_assigns_increasing_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path().join("queue.json"), 100)
            .await
            .unwrap();

        let first = store.enqueue(draft("/api/one")).await.unwrap();
        let second = store.enqueue(draft("/api/two")).await.unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn list_all_returns_insertion_order() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path().join("queue.json"), 100)
            .await
            .unwrap();

        for i in 0..5 {
            store.enqueue(draft(&format!("/api/{i}"))).await.unwrap();
        }

        let actions = store.list_all().await.unwrap();
        let urls: Vec<_> = actions.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["/api/0", "/api/1", "/api/2", "/api/3", "/api/4"]);
    }

    #[tokio::test]
    async fn queue_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");

        {
            let store = FileQueueStore::open(&path, 100).await.unwrap();
            store.enqueue(draft("/api/x")).await.unwrap();
            store.enqueue(draft("/api/y")).await.unwrap();
        }

        let reopened = FileQueueStore::open(&path, 100).await.unwrap();
        let actions = reopened.list_all().await.unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].url, "/api/x");
        assert_eq!(actions[1].url, "/api/y");
    }

    #[tokio::test]
    async fn ids_stay_monotonic_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");

        let last_id = {
            let store = FileQueueStore::open(&path, 100).await.unwrap();
            let action = store.enqueue(draft("/api/x")).await.unwrap();
            store.remove(action.id).await.unwrap();
            action.id
        };

        let reopened = FileQueueStore::open(&path, 100).await.unwrap();
        let fresh = reopened.enqueue(draft("/api/y")).await.unwrap();
        assert!(fresh.id > last_id);
    }

    #[tokio::test]
    async fn remove_deletes_exactly_one() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path().join("queue.json"), 100)
            .await
            .unwrap();

        let a = store.enqueue(draft("/api/a")).await.unwrap();
        let b = store.enqueue(draft("/api/b")).await.unwrap();

        assert!(store.remove(a.id).await.unwrap());
        let remaining = store.list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b.id);

        // Removing again is a no-op, not an error.
        assert!(!store.remove(a.id).await.unwrap());
    }

    #[tokio::test]
    async fn enqueue_past_capacity_fails_loudly() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path().join("queue.json"), 2)
            .await
            .unwrap();

        store.enqueue(draft("/api/a")).await.unwrap();
        store.enqueue(draft("/api/b")).await.unwrap();
        let err = store.enqueue(draft("/api/c")).await.unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 2 }));
        assert_eq!(store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported_not_wiped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = FileQueueStore::open(&path, 100).await.unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
        // The unreadable file is left in place for inspection.
        assert!(path.exists());
    }

    #[tokio::test]
    async fn concurrent_enqueues_do_not_corrupt_the_sequence() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(
            FileQueueStore::open(dir.path().join("queue.json"), 100)
                .await
                .unwrap(),
        );

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move { store.enqueue(draft(&format!("/api/{i}"))).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let actions = store.list_all().await.unwrap();
        assert_eq!(actions.len(), 10);
        // Ids are unique and strictly increasing in list order.
        for pair in actions.windows(2) {
            assert!(pair[0].id < pair[1].id);
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(16))]

            /// Whatever gets enqueued comes back in creation order after a
            /// reopen, field-for-field.
            #[test]
            fn reopen_preserves_order_and_fields(urls in proptest::collection::vec("[a-z0-9/]{1,12}", 1..8)) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async move {
                    let dir = TempDir::new().unwrap();
                    let path = dir.path().join("queue.json");

                    let mut queued = Vec::new();
                    {
                        let store = FileQueueStore::open(&path, 100).await.unwrap();
                        for url in &urls {
                            queued.push(store.enqueue(draft(url)).await.unwrap());
                        }
                    }

                    let reopened = FileQueueStore::open(&path, 100).await.unwrap();
                    let listed = reopened.list_all().await.unwrap();
                    assert_eq!(listed, queued);
                });
            }
        }
    }
}

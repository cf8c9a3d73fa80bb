//! Queue replay against the network.
//!
//! A replay pass snapshots the queue in creation order and dispatches the
//! actions independently with bounded concurrency. An action is removed from
//! the store only after the server confirms it with a 2xx; every other
//! outcome leaves the record untouched for the next pass. There is no backoff
//! here; the engine re-runs a whole pass on the next connectivity or manual
//! trigger.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;
use futures::{StreamExt, stream};

use crate::action::QueuedAction;
use crate::config::QueueConfig;
use crate::error::Result;
use crate::events::Notifier;
use crate::queue::QueueStore;
use crate::transport::{OutboundRequest, Transport};

/// Summary of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Actions confirmed by the server and removed from the queue.
    pub replayed: usize,
    /// Actions that failed (network error or non-2xx) and stayed queued.
    pub failed: usize,
    /// Actions dropped because they outlived the configured age.
    pub expired: usize,
    /// Actions still queued when the pass finished.
    pub remaining: usize,
}

impl ReplayReport {
    /// `true` when the pass left nothing behind.
    #[must_use]
    pub const fn drained(&self) -> bool {
        self.remaining == 0
    }
}

/// Registry of action ids currently being replayed.
///
/// Guarantees at-most-once-in-flight per id even if passes overlap: an id is
/// dispatched only by the pass that claimed it, and released once that
/// dispatch settles.
#[derive(Debug, Default)]
struct InFlight {
    ids: Mutex<HashSet<u64>>,
}

impl InFlight {
    /// Claims an id. Returns `false` if another pass already holds it.
    fn claim(&self, id: u64) -> bool {
        self.ids.lock().expect("in-flight lock poisoned").insert(id)
    }

    fn release(&self, id: u64) {
        self.ids.lock().expect("in-flight lock poisoned").remove(&id);
    }
}

/// Outcome of a single dispatched action.
enum ActionOutcome {
    Replayed,
    Failed,
}

/// Drains the offline queue against the transport.
pub struct ReplayWorker {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    in_flight: InFlight,
    concurrency: usize,
    max_age: Option<chrono::Duration>,
}

impl ReplayWorker {
    /// Creates a worker over the given store and transport.
    #[must_use]
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        config: &QueueConfig,
    ) -> Self {
        let max_age = config
            .max_age_secs
            .map(|secs| chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));
        Self {
            store,
            transport,
            notifier,
            in_flight: InFlight::default(),
            concurrency: config.concurrent_replays.max(1),
            max_age,
        }
    }

    /// Runs one replay pass over the current queue snapshot.
    ///
    /// Per-action failures are reported through the notifier and counted in
    /// the returned [`ReplayReport`]; only a failure to read the store itself
    /// is an `Err`.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be listed.
    pub async fn run_pass(&self) -> Result<ReplayReport> {
        let snapshot = self.store.list_all().await?;
        let now = Utc::now();

        let mut expired = 0;
        let mut claimed = Vec::new();
        for action in snapshot {
            if self.max_age.is_some_and(|max| action.age(now) > max) {
                // Expiry failures are not fatal to the pass; the action will
                // be rechecked next time.
                match self.store.remove(action.id).await {
                    Ok(true) => {
                        expired += 1;
                        self.notifier.action_expired(&action);
                    }
                    Ok(false) => {}
                    Err(e) => log::error!("could not expire action {}: {e}", action.id),
                }
                continue;
            }
            if self.in_flight.claim(action.id) {
                claimed.push(action);
            }
        }

        let outcomes: Vec<ActionOutcome> = stream::iter(claimed)
            .map(|action| self.replay_one(action))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let replayed = outcomes
            .iter()
            .filter(|o| matches!(o, ActionOutcome::Replayed))
            .count();
        let report = ReplayReport {
            replayed,
            failed: outcomes.len() - replayed,
            expired,
            remaining: self.store.len().await?,
        };

        log::info!(
            "replay pass: {} replayed, {} failed, {} expired, {} remaining",
            report.replayed,
            report.failed,
            report.expired,
            report.remaining
        );
        self.notifier.sync_finished(&report);
        Ok(report)
    }

    /// Dispatches one claimed action, releasing the claim afterwards.
    async fn replay_one(&self, action: QueuedAction) -> ActionOutcome {
        let outcome = self.dispatch(&action).await;
        self.in_flight.release(action.id);
        outcome
    }

    async fn dispatch(&self, action: &QueuedAction) -> ActionOutcome {
        match self.transport.send(OutboundRequest::from_action(action)).await {
            Ok(response) if response.is_success() => {
                // Removal strictly follows the confirmed success; if the
                // store write fails the action stays queued and the worst
                // case is a duplicate replay later (at-least-once).
                match self.store.remove(action.id).await {
                    Ok(_) => {
                        self.notifier.action_replayed(action);
                        ActionOutcome::Replayed
                    }
                    Err(e) => {
                        log::error!("action {} replayed but not removed: {e}", action.id);
                        self.notifier.action_failed(action, &e.to_string());
                        ActionOutcome::Failed
                    }
                }
            }
            Ok(response) => {
                log::warn!(
                    "replay of action {} rejected: HTTP {}",
                    action.id,
                    response.status
                );
                self.notifier
                    .action_failed(action, &format!("HTTP {}", response.status));
                ActionOutcome::Failed
            }
            Err(e) => {
                log::warn!("replay of action {} failed: {e}", action.id);
                self.notifier.action_failed(action, &e.to_string());
                ActionOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::TempDir;

    use crate::action::ActionDraft;
    use crate::error::Error;
    use crate::events::NoNotifier;
    use crate::queue::FileQueueStore;
    use crate::transport::TransportResponse;

    /// Transport answering from a URL → status table; unknown URLs are
    /// network errors. Every request is recorded.
    struct MockTransport {
        statuses: HashMap<String, u16>,
        requests: Mutex<Vec<OutboundRequest>>,
    }

    impl MockTransport {
        fn new(statuses: &[(&str, u16)]) -> Self {
            Self {
                statuses: statuses
                    .iter()
                    .map(|(url, status)| ((*url).to_string(), *status))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<OutboundRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: OutboundRequest) -> Result<TransportResponse> {
            self.requests.lock().unwrap().push(request.clone());
            match self.statuses.get(&request.url) {
                Some(&status) => Ok(TransportResponse {
                    status,
                    headers: Vec::new(),
                    body: Bytes::new(),
                }),
                None => Err(Error::InvalidRequest(format!(
                    "connection refused: {}",
                    request.url
                ))),
            }
        }
    }

    async fn store_with(dir: &TempDir, urls: &[&str]) -> Arc<FileQueueStore> {
        let store = FileQueueStore::open(dir.path().join("queue.json"), 100)
            .await
            .unwrap();
        for url in urls {
            store
                .enqueue(ActionDraft::new(*url, "POST").with_body("a=1"))
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    fn worker(
        store: Arc<FileQueueStore>,
        transport: Arc<MockTransport>,
        config: &QueueConfig,
    ) -> ReplayWorker {
        ReplayWorker::new(store, transport, Arc::new(NoNotifier), config)
    }

    #[tokio::test]
    async fn successful_replay_removes_action() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, &["/api/x"]).await;
        let transport = Arc::new(MockTransport::new(&[("/api/x", 200)]));
        let worker = worker(Arc::clone(&store), Arc::clone(&transport), &QueueConfig::default());

        let report = worker.run_pass().await.unwrap();
        assert_eq!(report.replayed, 1);
        assert_eq!(report.failed, 0);
        assert!(report.drained());
        assert!(store.is_empty().await.unwrap());

        // The replay carried the stored body verbatim.
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, "POST");
        assert_eq!(sent[0].body.as_deref(), Some(b"a=1".as_slice()));
    }

    #[tokio::test]
    async fn server_error_leaves_action_queued_untouched() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, &["/api/x"]).await;
        let before = store.list_all().await.unwrap();
        let transport = Arc::new(MockTransport::new(&[("/api/x", 500)]));
        let worker = worker(Arc::clone(&store), transport, &QueueConfig::default());

        let report = worker.run_pass().await.unwrap();
        assert_eq!(report.replayed, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining, 1);

        // Idempotent retry: identical fields after the failed pass.
        assert_eq!(store.list_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn network_error_leaves_action_queued() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, &["/api/x"]).await;
        let transport = Arc::new(MockTransport::new(&[]));
        let worker = worker(Arc::clone(&store), transport, &QueueConfig::default());

        let report = worker.run_pass().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mixed_pass_counts_each_outcome() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, &["/api/ok", "/api/err", "/api/down"]).await;
        let transport = Arc::new(MockTransport::new(&[("/api/ok", 201), ("/api/err", 503)]));
        let worker = worker(Arc::clone(&store), transport, &QueueConfig::default());

        let report = worker.run_pass().await.unwrap();
        assert_eq!(report.replayed, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.remaining, 2);

        let urls: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.url)
            .collect();
        assert_eq!(urls, vec!["/api/err", "/api/down"]);
    }

    #[tokio::test]
    async fn retrigger_after_failure_replays_again() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, &["/api/x"]).await;

        let down = Arc::new(MockTransport::new(&[]));
        let worker = ReplayWorker::new(
            Arc::clone(&store) as Arc<dyn QueueStore>,
            down,
            Arc::new(NoNotifier),
            &QueueConfig::default(),
        );
        assert_eq!(worker.run_pass().await.unwrap().failed, 1);

        let up = Arc::new(MockTransport::new(&[("/api/x", 200)]));
        let worker = ReplayWorker::new(
            Arc::clone(&store) as Arc<dyn QueueStore>,
            up,
            Arc::new(NoNotifier),
            &QueueConfig::default(),
        );
        assert!(worker.run_pass().await.unwrap().drained());
    }

    #[tokio::test]
    async fn claimed_ids_are_not_dispatched_twice() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, &["/api/x"]).await;
        let id = store.list_all().await.unwrap()[0].id;
        let transport = Arc::new(MockTransport::new(&[("/api/x", 200)]));
        let worker = worker(Arc::clone(&store), Arc::clone(&transport), &QueueConfig::default());

        // Another pass holds the claim: this pass must skip the action.
        assert!(worker.in_flight.claim(id));
        let report = worker.run_pass().await.unwrap();
        assert_eq!(report.replayed + report.failed, 0);
        assert_eq!(report.remaining, 1);
        assert!(transport.sent().is_empty());

        worker.in_flight.release(id);
        let report = worker.run_pass().await.unwrap();
        assert_eq!(report.replayed, 1);
    }

    #[tokio::test]
    async fn stale_actions_expire_instead_of_replaying() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, &["/api/old", "/api/new"]).await;

        // Age the first action past the limit by editing the stored record.
        {
            let path = dir.path().join("queue.json");
            let text = std::fs::read_to_string(&path).unwrap();
            let mut file: serde_json::Value = serde_json::from_str(&text).unwrap();
            file["actions"][0]["queued_at"] = serde_json::json!("2020-01-01T00:00:00Z");
            std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();
        }
        let store = Arc::new(
            FileQueueStore::open(dir.path().join("queue.json"), 100)
                .await
                .unwrap(),
        );

        let transport = Arc::new(MockTransport::new(&[("/api/new", 200)]));
        let config = QueueConfig::default().with_max_age_secs(Some(3600));
        let worker = worker(Arc::clone(&store), Arc::clone(&transport), &config);

        let report = worker.run_pass().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.replayed, 1);
        assert!(report.drained());
        // The expired action never hit the network.
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.sent()[0].url, "/api/new");
    }

    #[tokio::test]
    async fn no_expiry_when_max_age_disabled() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, &["/api/x"]).await;
        let transport = Arc::new(MockTransport::new(&[]));
        let config = QueueConfig::default().with_max_age_secs(None);
        let worker = worker(Arc::clone(&store), transport, &config);

        let report = worker.run_pass().await.unwrap();
        assert_eq!(report.expired, 0);
        assert_eq!(report.remaining, 1);
    }
}

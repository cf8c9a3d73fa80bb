//! Top-level sync engine.
//!
//! The host constructs the engine with its capabilities (config, transport,
//! notifier) and drives it through explicit methods; nothing here hangs off
//! ambient global state. A background task owns replay: connectivity
//! restoration and manual sync requests are queued as triggers and drained
//! one pass at a time.

use std::sync::Arc;

use reqwest::Url;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::action::{FormSubmission, QueuedAction};
use crate::cache::{AssetCache, CacheRequest, FetchOutcome};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::events::{Connectivity, Notifier, SyncTrigger};
use crate::push::{self, PushMessage, PushSubscription};
use crate::queue::{FileQueueStore, QueueStore};
use crate::replay::{ReplayReport, ReplayWorker};
use crate::search::{self, SearchResults};
use crate::submit::{Interceptor, SubmitOutcome};
use crate::transport::Transport;

enum LoopMessage {
    Trigger(SyncTrigger),
    Stop,
}

/// Offline-first sync engine: durable action queue, replay on reconnect,
/// versioned asset cache.
pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<dyn QueueStore>,
    cache: AssetCache,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    connectivity: Connectivity,
    worker: Arc<ReplayWorker>,
    interceptor: Interceptor,
    loop_tx: mpsc::UnboundedSender<LoopMessage>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Creates an engine with the default file-backed queue store under the
    /// configured data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue store cannot be opened or the base URL
    /// is invalid.
    pub async fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let store =
            Arc::new(FileQueueStore::open(config.queue_path(), config.queue.max_queued).await?);
        Self::with_store(config, store, transport, notifier)
    }

    /// Creates an engine over a custom queue store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured base URL does not parse.
    pub fn with_store(
        config: SyncConfig,
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let origin = config
            .api
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| Error::Config(format!("invalid base URL: {e}")))?;

        let cache = AssetCache::new(
            &config.cache,
            config.cache_root(),
            origin,
            Arc::clone(&transport),
        );
        let worker = Arc::new(ReplayWorker::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            Arc::clone(&notifier),
            &config.queue,
        ));
        let interceptor = Interceptor::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            Arc::clone(&notifier),
        );

        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let loop_task = tokio::spawn(run_trigger_loop(Arc::clone(&worker), loop_rx));

        Ok(Self {
            config,
            store,
            cache,
            transport,
            notifier,
            connectivity: Connectivity::new(true),
            worker,
            interceptor,
            loop_tx,
            loop_task: Mutex::new(Some(loop_task)),
        })
    }

    /// Records a connectivity transition reported by the host.
    ///
    /// Coming back online queues a replay trigger.
    pub fn set_online(&self, online: bool) {
        let previous = self.connectivity.set_online(online);
        if previous == online {
            return;
        }
        self.notifier.connectivity_changed(online);
        if online {
            self.trigger(SyncTrigger::ConnectivityRestored);
        }
    }

    /// Current connectivity state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Requests a replay pass (the background-sync analog). Returns
    /// immediately; the pass runs on the engine's background task.
    pub fn sync_now(&self) {
        self.trigger(SyncTrigger::Manual);
    }

    fn trigger(&self, trigger: SyncTrigger) {
        log::debug!("sync trigger: {trigger:?}");
        if self.loop_tx.send(LoopMessage::Trigger(trigger)).is_err() {
            log::warn!("sync trigger dropped: engine is shut down");
        }
    }

    /// Runs a replay pass inline and returns its report.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub async fn replay_now(&self) -> Result<ReplayReport> {
        self.worker.run_pass().await
    }

    /// Submits a form, deferring it to the queue when offline or when the
    /// live send fails at the network level.
    ///
    /// # Errors
    ///
    /// Returns an error if deferral fails (storage unavailable, queue full);
    /// the caller must surface this to the user.
    pub async fn submit_form(&self, form: FormSubmission) -> Result<SubmitOutcome> {
        self.interceptor.submit(form, self.is_online()).await
    }

    /// Serves a request through the asset cache.
    pub async fn fetch(&self, request: &CacheRequest) -> FetchOutcome {
        self.cache.fetch(request).await
    }

    /// The asset cache (install/activate/quiesce live here).
    #[must_use]
    pub const fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// Every queued action in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub async fn queued_actions(&self) -> Result<Vec<QueuedAction>> {
        self.store.list_all().await
    }

    /// Registers a push subscription with the application server.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or is rejected.
    pub async fn register_push_subscription(&self, subscription: &PushSubscription) -> Result<()> {
        push::register_subscription(
            self.transport.as_ref(),
            subscription,
            self.config.api.csrf_token.as_deref(),
        )
        .await
    }

    /// Parses an incoming push payload and hands it to the notifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    pub fn handle_push(&self, payload: &[u8]) -> Result<PushMessage> {
        let message = PushMessage::parse(payload)?;
        self.notifier.push_received(&message);
        Ok(message)
    }

    /// Runs a global search.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    pub async fn search(&self, query: &str) -> Result<SearchResults> {
        search::search(
            self.transport.as_ref(),
            query,
            self.config.api.csrf_token.as_deref(),
        )
        .await
    }

    /// Stops the background replay task and waits for pending cache writes.
    ///
    /// In-flight replay attempts are simply abandoned; removal only ever
    /// happens after confirmed success, so abandonment is safe.
    pub async fn shutdown(&self) {
        let _ = self.loop_tx.send(LoopMessage::Stop);
        if let Some(task) = self.loop_task.lock().await.take() {
            if let Err(e) = task.await {
                log::warn!("trigger loop ended abnormally: {e}");
            }
        }
        self.cache.quiesce().await;
    }
}

/// Drains sync triggers, one replay pass per trigger.
async fn run_trigger_loop(
    worker: Arc<ReplayWorker>,
    mut rx: mpsc::UnboundedReceiver<LoopMessage>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            LoopMessage::Trigger(trigger) => {
                log::debug!("running replay pass ({trigger:?})");
                if let Err(e) = worker.run_pass().await {
                    log::error!("replay pass failed: {e}");
                }
            }
            LoopMessage::Stop => break,
        }
    }
}

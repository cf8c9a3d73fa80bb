//! outpost - an offline-first sync engine.
//!
//! This library keeps a machinery-management client usable without a network:
//! failed or offline form submissions land in a durable queue and are
//! replayed (at-least-once) when connectivity returns, while a versioned
//! asset cache serves pages cache-first with offline fallbacks.
//!
//! The host environment injects its capabilities (configuration, an HTTP
//! [`Transport`], a user-feedback [`Notifier`]) and drives the engine
//! through explicit methods instead of ambient global event handlers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use outpost::{
//!     FormSubmission, HttpTransport, NoNotifier, SubmitOutcome, SyncConfig, SyncEngine,
//! };
//!
//! # async fn example() -> outpost::Result<()> {
//! let config = SyncConfig::default();
//! let transport = Arc::new(HttpTransport::new(&config.api)?);
//! let engine = SyncEngine::new(config, transport, Arc::new(NoNotifier)).await?;
//!
//! // The host reports connectivity; the engine queues while offline.
//! engine.set_online(false);
//! let outcome = engine
//!     .submit_form(FormSubmission::new("/api/orders/").with_field("machine", "lathe-3"))
//!     .await?;
//! assert!(matches!(outcome, SubmitOutcome::Deferred(_)));
//!
//! // Back online: the queue replays in the background.
//! engine.set_online(true);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod action;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod push;
pub mod queue;
pub mod replay;
pub mod search;
pub mod submit;
pub mod transport;

// Re-export main types for convenience
pub use action::{ActionDraft, FormSubmission, QueuedAction};
pub use cache::{AssetCache, CacheEntry, CacheRequest, FetchOutcome, RequestKind};
pub use config::{ApiConfig, CacheConfig, PathConfig, QueueConfig, SyncConfig};
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use events::{Connectivity, NoNotifier, Notifier, SyncTrigger};
pub use push::{PushKeys, PushMessage, PushSubscription};
pub use queue::{FileQueueStore, QueueStore};
pub use replay::{ReplayReport, ReplayWorker};
pub use search::SearchResults;
pub use submit::SubmitOutcome;
pub use transport::{HttpTransport, OutboundRequest, Transport, TransportResponse};

//! Form-submission interception.
//!
//! Only form submissions flow through this path; programmatic fetches are
//! never queued automatically. When the client is offline, or a live send
//! dies before producing an HTTP response, the submission is serialized and
//! parked in the durable queue instead of being lost.

use std::sync::Arc;

use crate::action::FormSubmission;
use crate::error::Result;
use crate::events::Notifier;
use crate::queue::QueueStore;
use crate::transport::{OutboundRequest, Transport, TransportResponse};

/// What happened to a submitted form.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// The server answered; any status counts as "sent".
    Sent(TransportResponse),
    /// The submission was queued for replay; holds the assigned action id.
    Deferred(u64),
}

/// Routes form submissions to the network or the offline queue.
pub struct Interceptor {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
}

impl Interceptor {
    /// Creates an interceptor over the given store and transport.
    #[must_use]
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            transport,
            notifier,
        }
    }

    /// Submits a form, deferring it when `online` is false or the live send
    /// fails at the transport level.
    ///
    /// # Errors
    ///
    /// Returns an error if the deferral itself fails (storage unavailable or
    /// queue full); the action was not queued and the caller must tell the
    /// user.
    pub async fn submit(&self, form: FormSubmission, online: bool) -> Result<SubmitOutcome> {
        if !online {
            return self.defer(form).await;
        }

        let draft = form.clone().into_draft();
        let request = OutboundRequest {
            url: draft.url.clone(),
            method: draft.method.clone(),
            headers: draft.headers.clone(),
            body: Some(bytes::Bytes::from(draft.body.clone())),
        };
        match self.transport.send(request).await {
            Ok(response) => Ok(SubmitOutcome::Sent(response)),
            Err(e) => {
                // The send never reached the server; park it like an offline
                // submission rather than dropping it.
                log::warn!("live submit to {} failed ({e}), deferring", form.url);
                self.defer(form).await
            }
        }
    }

    async fn defer(&self, form: FormSubmission) -> Result<SubmitOutcome> {
        let action = self.store.enqueue(form.into_draft()).await?;
        self.notifier.action_deferred(&action);
        Ok(SubmitOutcome::Deferred(action.id))
    }
}

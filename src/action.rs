//! Deferred actions and form-submission capture.

use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

/// Characters left untouched by `application/x-www-form-urlencoded` escaping.
const FORM: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'*')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_');

/// One deferred network request, persisted until a replay succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Unique, monotonically increasing creation-order key.
    pub id: u64,
    /// Target URL (absolute, or relative to the configured API base).
    pub url: String,
    /// HTTP method, e.g. `POST`.
    pub method: String,
    /// Headers to send verbatim on replay.
    pub headers: Vec<(String, String)>,
    /// Request body to send verbatim on replay.
    pub body: String,
    /// Creation time, used for ordering checks and expiry.
    pub queued_at: DateTime<Utc>,
}

impl QueuedAction {
    /// Returns the age of this action relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.queued_at)
    }
}

/// The request-shaped fields of an action before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDraft {
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Headers to replay verbatim.
    pub headers: Vec<(String, String)>,
    /// Body to replay verbatim.
    pub body: String,
}

impl ActionDraft {
    /// Creates a draft with no headers and an empty body.
    #[must_use]
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Finalizes the draft into a [`QueuedAction`] with a store-assigned id.
    #[must_use]
    pub fn into_action(self, id: u64, queued_at: DateTime<Utc>) -> QueuedAction {
        QueuedAction {
            id,
            url: self.url,
            method: self.method,
            headers: self.headers,
            body: self.body,
            queued_at,
        }
    }
}

/// A captured form submission: target, method and ordered fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    /// Form action URL.
    pub url: String,
    /// Form method; defaults to `POST` as browsers do for form submission.
    pub method: String,
    /// Ordered `(name, value)` pairs.
    pub fields: Vec<(String, String)>,
}

impl FormSubmission {
    /// Creates a submission targeting `url` with the default `POST` method.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            fields: Vec::new(),
        }
    }

    /// Overrides the HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Appends a form field, preserving insertion order.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Serializes the fields as `application/x-www-form-urlencoded`.
    #[must_use]
    pub fn encoded_body(&self) -> String {
        self.fields
            .iter()
            .map(|(name, value)| format!("{}={}", form_encode(name), form_encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Converts the submission into a replayable [`ActionDraft`].
    #[must_use]
    pub fn into_draft(self) -> ActionDraft {
        let body = self.encoded_body();
        ActionDraft::new(self.url, self.method)
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(body)
    }
}

/// Escapes one form field component. Spaces become `+` per the form rules.
fn form_encode(component: &str) -> String {
    utf8_percent_encode(component, FORM)
        .to_string()
        .replace("%20", "+")
}

//! Global search client.

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::{OutboundRequest, Transport};

/// Search results grouped by category. Item payloads are opaque to the
/// engine and handed to the host as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub machines: Vec<serde_json::Value>,
    #[serde(default)]
    pub orders: Vec<serde_json::Value>,
    #[serde(default)]
    pub documents: Vec<serde_json::Value>,
}

impl SearchResults {
    /// `true` when no category has results.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty() && self.orders.is_empty() && self.documents.is_empty()
    }
}

/// Runs a global search against `GET /api/search/?q=<query>`.
///
/// # Errors
///
/// Returns an error if the request fails or the server answers with a
/// non-2xx status or an unparseable body.
pub async fn search(
    transport: &dyn Transport,
    query: &str,
    csrf_token: Option<&str>,
) -> Result<SearchResults> {
    let encoded = utf8_percent_encode(query, NON_ALPHANUMERIC);
    let mut request = OutboundRequest::get(format!("/api/search/?q={encoded}"));
    if let Some(token) = csrf_token {
        request = request.with_header("X-CSRFToken", token);
    }

    let response = transport.send(request).await?;
    if !response.is_success() {
        return Err(Error::Rejected(response.status));
    }
    serde_json::from_slice(&response.body)
        .map_err(|e| Error::InvalidRequest(format!("bad search response: {e}")))
}

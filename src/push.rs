//! Push subscription registration and incoming notification payloads.

use serde::{Deserialize, Serialize};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::{Error, Result};
use crate::transport::{OutboundRequest, Transport};

/// Endpoint the server posts the subscription to.
pub const SUBSCRIPTION_ENDPOINT: &str = "/api/push-subscription/";

/// Client keys of a push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    /// Client public key.
    pub p256dh: String,
    /// Authentication secret.
    pub auth: String,
}

/// A push subscription in its wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    /// Push-service endpoint URL.
    pub endpoint: String,
    /// Client keys.
    pub keys: PushKeys,
}

/// Decodes an application-server (VAPID) public key from its URL-safe
/// base64 text form into raw bytes.
///
/// # Errors
///
/// Returns an error if the input is not valid URL-safe base64.
pub fn decode_server_key(key: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(key.trim_end_matches('='))
        .map_err(|e| Error::InvalidRequest(format!("bad server key: {e}")))
}

/// Registers a subscription with the application server.
///
/// Sends `POST /api/push-subscription/` with the subscription JSON and the
/// CSRF token header when one is configured.
///
/// # Errors
///
/// Returns an error if the request cannot be sent or the server answers with
/// a non-2xx status.
pub async fn register_subscription(
    transport: &dyn Transport,
    subscription: &PushSubscription,
    csrf_token: Option<&str>,
) -> Result<()> {
    let body = serde_json::to_string(subscription)
        .map_err(|e| Error::InvalidRequest(e.to_string()))?;
    let mut request = OutboundRequest::post_json(SUBSCRIPTION_ENDPOINT, body);
    if let Some(token) = csrf_token {
        request = request.with_header("X-CSRFToken", token);
    }

    let response = transport.send(request).await?;
    if response.is_success() {
        Ok(())
    } else {
        Err(Error::Rejected(response.status))
    }
}

/// An incoming push payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Notification title.
    pub title: String,
    /// Notification body text.
    pub message: String,
    /// Optional URL to open when the notification is activated.
    #[serde(default)]
    pub url: Option<String>,
}

impl PushMessage {
    /// Parses a raw push payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not the expected JSON shape.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| Error::InvalidRequest(format!("bad push payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::transport::TransportResponse;

    struct CapturingTransport {
        status: u16,
        seen: Mutex<Option<OutboundRequest>>,
    }

    #[async_trait]
    impl Transport for CapturingTransport {
        async fn send(&self, request: OutboundRequest) -> Result<TransportResponse> {
            *self.seen.lock().unwrap() = Some(request);
            Ok(TransportResponse {
                status: self.status,
                headers: Vec::new(),
                body: Bytes::new(),
            })
        }
    }

    fn subscription() -> PushSubscription {
        PushSubscription {
            endpoint: "https://push.example/send/abc".to_string(),
            keys: PushKeys {
                p256dh: "BKey".to_string(),
                auth: "secret".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn register_posts_json_with_csrf_header() {
        let transport = CapturingTransport {
            status: 201,
            seen: Mutex::new(None),
        };

        register_subscription(&transport, &subscription(), Some("tok123"))
            .await
            .unwrap();

        let request = transport.seen.lock().unwrap().take().unwrap();
        assert_eq!(request.url, SUBSCRIPTION_ENDPOINT);
        assert_eq!(request.method, "POST");
        assert!(
            request
                .headers
                .contains(&("X-CSRFToken".to_string(), "tok123".to_string()))
        );

        let body: PushSubscription =
            serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, subscription());
    }

    #[tokio::test]
    async fn register_rejection_is_an_error() {
        let transport = CapturingTransport {
            status: 403,
            seen: Mutex::new(None),
        };
        let err = register_subscription(&transport, &subscription(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(403)));
    }

    #[test]
    fn decode_server_key_accepts_url_safe_alphabet() {
        let key = URL_SAFE_NO_PAD.encode([0x04, 0xff, 0x7e, 0x01]);
        assert_eq!(decode_server_key(&key).unwrap(), vec![0x04, 0xff, 0x7e, 0x01]);
    }

    #[test]
    fn decode_server_key_tolerates_padding() {
        let padded = format!("{}==", URL_SAFE_NO_PAD.encode([1u8, 2, 3, 4]));
        assert_eq!(decode_server_key(&padded).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn decode_server_key_rejects_garbage() {
        assert!(decode_server_key("!!!").is_err());
    }

    #[test]
    fn push_message_parses_with_and_without_url() {
        let with = PushMessage::parse(
            br#"{"title":"Mantenimiento","message":"Orden 12 lista","url":"/orders/12/"}"#,
        )
        .unwrap();
        assert_eq!(with.title, "Mantenimiento");
        assert_eq!(with.url.as_deref(), Some("/orders/12/"));

        let without = PushMessage::parse(br#"{"title":"t","message":"m"}"#).unwrap();
        assert!(without.url.is_none());
    }

    #[test]
    fn push_message_rejects_malformed_payload() {
        assert!(PushMessage::parse(b"not json").is_err());
    }
}

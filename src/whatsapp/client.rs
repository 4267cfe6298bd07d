//! HTTP client for the WhatsApp Cloud API.
//!
//! All deliveries go to a single configured recipient through
//! `{api_base}/{phone_number_id}/messages`; media is uploaded first through
//! `{api_base}/{phone_number_id}/media` and referenced by id.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::providers::{check_http_response, HttpError};
use crate::routing::{DeliveryReceipt, MediaCategory, Sink, SinkError};

/// Default Graph API root.
pub const DEFAULT_API_BASE: &str = "https://graph.facebook.com/v21.0";

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Messaging product tag required on every request.
const MESSAGING_PRODUCT: &str = "whatsapp";

/// Response of the messages endpoint.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// Response of the media upload endpoint.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

/// Client for one WhatsApp business number and one recipient.
#[derive(Clone)]
pub struct WhatsAppClient {
    client: reqwest::Client,
    base_url: String,
    recipient: String,
    token: String,
}

impl std::fmt::Debug for WhatsAppClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhatsAppClient")
            .field("base_url", &self.base_url)
            .field("recipient", &self.recipient)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl WhatsAppClient {
    /// Create a client for `phone_number_id` under `api_base`.
    pub fn new(
        api_base: &str,
        phone_number_id: &str,
        recipient: String,
        token: String,
        request_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            base_url: format!("{}/{phone_number_id}", api_base.trim_end_matches('/')),
            recipient,
            token,
        }
    }

    /// URL of the messages endpoint.
    pub fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    /// URL of the media upload endpoint.
    pub fn media_url(&self) -> String {
        format!("{}/media", self.base_url)
    }

    async fn post_message(&self, payload: &Value) -> Result<DeliveryReceipt, SinkError> {
        let resp = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await
            .map_err(HttpError::from)?;
        let body = check_http_response(resp).await.inspect_err(|e| {
            warn!(error = %e, "WhatsApp API error");
        })?;
        parse_receipt(&body)
    }
}

#[async_trait]
impl Sink for WhatsAppClient {
    async fn send_text(&self, text: &str) -> Result<DeliveryReceipt, SinkError> {
        let receipt = self
            .post_message(&text_payload(&self.recipient, text))
            .await?;
        debug!(message_id = ?receipt.message_id, "text sent via WhatsApp");
        Ok(receipt)
    }

    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        filename: &str,
    ) -> Result<String, SinkError> {
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(filename.to_owned())
            .mime_str(mime_type)
            .map_err(HttpError::from)?;
        let form = Form::new()
            .text("messaging_product", MESSAGING_PRODUCT)
            .text("type", mime_type.to_owned())
            .part("file", part);

        let resp = self
            .client
            .post(self.media_url())
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(HttpError::from)?;
        let body = check_http_response(resp).await.inspect_err(|e| {
            warn!(error = %e, "WhatsApp media upload error");
        })?;
        let uploaded: UploadResponse = serde_json::from_str(&body)
            .map_err(|e| SinkError::Parse(format!("invalid upload response: {e}")))?;
        debug!(media_id = %uploaded.id, mime = mime_type, size, "media uploaded to WhatsApp");
        Ok(uploaded.id)
    }

    async fn send_media(
        &self,
        category: MediaCategory,
        media_id: &str,
        caption: Option<&str>,
    ) -> Result<DeliveryReceipt, SinkError> {
        let payload = media_payload(&self.recipient, category, media_id, caption);
        let receipt = self.post_message(&payload).await?;
        debug!(%category, message_id = ?receipt.message_id, "media sent via WhatsApp");
        Ok(receipt)
    }
}

// ---------------------------------------------------------------------------
// Payload builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// JSON body of a text message.
#[doc(hidden)]
pub fn text_payload(recipient: &str, body: &str) -> Value {
    json!({
        "messaging_product": MESSAGING_PRODUCT,
        "to": recipient,
        "type": "text",
        "text": { "body": body },
    })
}

/// JSON body of a media message. The caption is dropped for categories that
/// do not render one.
#[doc(hidden)]
pub fn media_payload(
    recipient: &str,
    category: MediaCategory,
    media_id: &str,
    caption: Option<&str>,
) -> Value {
    let mut media = json!({ "id": media_id });
    if let Some(caption) = caption.filter(|c| !c.is_empty() && category.accepts_caption()) {
        media["caption"] = Value::String(caption.to_owned());
    }
    let kind = category.as_str();
    let mut payload = json!({
        "messaging_product": MESSAGING_PRODUCT,
        "to": recipient,
        "type": kind,
    });
    payload[kind] = media;
    payload
}

/// Extract the delivery receipt from a messages-endpoint body.
///
/// # Errors
///
/// Returns `SinkError::Parse` if the body is not JSON of the expected shape.
#[doc(hidden)]
pub fn parse_receipt(body: &str) -> Result<DeliveryReceipt, SinkError> {
    let response: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| SinkError::Parse(format!("invalid messages response: {e}")))?;
    Ok(DeliveryReceipt {
        message_id: response.messages.into_iter().next().map(|m| m.id),
    })
}

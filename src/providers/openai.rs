//! Filter-rule evaluation through an OpenAI-compatible `/chat/completions` API.
//!
//! Each rule is one request: the rule prompt goes into the system message,
//! the post text is the user message, and a strict JSON schema constrains
//! the reply to `{"action": "FORWARD" | "SKIP", "reason": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::check_http_response;
use crate::routing::filter::{FilterError, RuleDecision, RuleEvaluator};

/// Default API root for OpenAI.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// HTTP request timeout for a single rule evaluation.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// System prompt wrapped around each rule prompt.
const SYSTEM_PROMPT_TEMPLATE: &str = "You are a content filter for a Telegram-to-WhatsApp message forwarder.\n\
Analyze the message and decide if it should be forwarded or skipped based on the following rule:\n\n";

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Chat completions request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Structured output constraint.
    pub response_format: Value,
}

/// A message in chat format.
#[doc(hidden)]
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role (`system`, `user`, `assistant`).
    pub role: String,
    /// Text content.
    pub content: Option<String>,
}

/// Chat completions response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    /// Response choices.
    pub choices: Vec<ChatChoice>,
}

/// A response choice.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    /// Assistant message for this choice.
    pub message: ChatMessage,
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// [`RuleEvaluator`] backed by an OpenAI-compatible API.
#[derive(Clone)]
pub struct OpenAiRuleEvaluator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for OpenAiRuleEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiRuleEvaluator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAiRuleEvaluator {
    /// Create an evaluator for `model` at `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(base_url: &str, api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeout, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            endpoint: chat_completions_url(base_url),
            api_key,
            model,
        }
    }

    /// Full URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RuleEvaluator for OpenAiRuleEvaluator {
    async fn evaluate(
        &self,
        rule_name: &str,
        rule_prompt: &str,
        text: &str,
    ) -> Result<RuleDecision, FilterError> {
        let request = build_request(&self.model, rule_prompt, text);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(super::HttpError::from)?;
        let body = check_http_response(response).await?;
        let decision = parse_response(&body)?;
        debug!(rule = rule_name, action = decision.action.as_str(), "rule evaluated");
        Ok(decision)
    }
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// `<base>/chat/completions`, tolerating a trailing slash on the base.
#[doc(hidden)]
pub fn chat_completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// Build the request evaluating `text` against one rule prompt.
#[doc(hidden)]
pub fn build_request(model: &str, rule_prompt: &str, text: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_owned(),
        messages: vec![
            ChatMessage {
                role: "system".to_owned(),
                content: Some(format!("{SYSTEM_PROMPT_TEMPLATE}{rule_prompt}")),
            },
            ChatMessage {
                role: "user".to_owned(),
                content: Some(text.to_owned()),
            },
        ],
        response_format: decision_schema(),
    }
}

/// JSON schema response format for a filter decision.
fn decision_schema() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "filter_decision",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["FORWARD", "SKIP"] },
                    "reason": { "type": "string" }
                },
                "required": ["action", "reason"],
                "additionalProperties": false
            }
        }
    })
}

/// Parse a chat completions body into a rule decision.
///
/// # Errors
///
/// Returns `FilterError::Parse` when the body, the first choice, or its JSON
/// content does not match the decision schema.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<RuleDecision, FilterError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| FilterError::Parse(format!("invalid completion body: {e}")))?;
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| FilterError::Parse("completion has no content".to_owned()))?;
    serde_json::from_str::<RuleDecision>(content.trim())
        .map_err(|e| FilterError::Parse(format!("invalid decision JSON: {e}")))
}

//! HTTP-backed collaborators and the helpers they share.
//!
//! - [`openai::OpenAiRuleEvaluator`]: filter rules judged by an
//!   OpenAI-compatible `/chat/completions` endpoint
//!
//! [`check_http_response`] turns non-2xx responses into [`HttpError`] with a
//! collapsed, redacted and truncated body, so upstream errors can be logged
//! without leaking credentials.

use regex::Regex;

pub mod openai;

/// Upper bound on error body length kept in errors and logs.
const MAX_ERROR_BODY_CHARS: usize = 256;

/// Token shapes redacted from upstream error bodies.
const SECRET_PATTERNS: &[&str] = &[
    r"sk-ant-[A-Za-z0-9_\-]{10,}",
    r"sk-[A-Za-z0-9_\-]{20,}",
    r"EAA[A-Za-z0-9]{20,}",
    r"\d{8,10}:[A-Za-z0-9_\-]{30,}",
    r"(?i)bearer\s+[A-Za-z0-9._\-]{16,}",
];

/// Transport-level failure talking to an HTTP API.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Connection, timeout or body read failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("non-success status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
}

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `HttpError::Request` on transport failure, `HttpError::Status` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, HttpError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(HttpError::Status {
            status: status.as_u16(),
            body: sanitize_error_body(&body),
        });
    }
    Ok(body)
}

/// Collapse whitespace, redact token-like strings and truncate.
pub fn sanitize_error_body(raw: &str) -> String {
    let mut sanitized = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    for pattern in SECRET_PATTERNS {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

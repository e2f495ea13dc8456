//! HTTP utilities for GCP REST API calls

use super::errors::ApiError;
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Per-request ceiling; pool deadlines cover the scan as a whole
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Truncate a response body and strip control characters before it reaches
/// a log line or an error message
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| c.is_control(), " ")
}

/// HTTP client wrapper for GCP API calls.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone, Debug)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("gcpscan/{}", crate::VERSION))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// GET `url` with optional query parameters.
    ///
    /// Non-success statuses come back as an [`ApiError`] inside the
    /// `anyhow::Error`, so callers can classify them.
    pub async fn get(&self, url: &str, token: &str, query: &[(String, String)]) -> Result<Value> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::debug!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(ApiError::from_response(status.as_u16(), url, &body).into());
        }

        if body.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}

/// Format a GCP API error for display
/// Security: generic messages avoid leaking API structure details
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    let api = error.chain().find_map(|c| c.downcast_ref::<ApiError>());

    if let Some(api) = api {
        return match api.status {
            403 => "Permission denied. Check your GCP IAM permissions.".to_string(),
            401 => "Authentication failed. Run 'gcloud auth application-default login'."
                .to_string(),
            404 => "Resource not found.".to_string(),
            429 => "Rate limit exceeded. Please try again later.".to_string(),
            400 => "Invalid request. Check your parameters.".to_string(),
            409 => "Resource conflict.".to_string(),
            500..=599 => "GCP service temporarily unavailable. Please try again.".to_string(),
            _ => format!("Request failed with status {}.", api.status),
        };
    }

    let error_str = error.to_string();
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(80)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates() {
        let body = "x".repeat(500);
        let out = sanitize_for_log(&body);
        assert!(out.starts_with(&"x".repeat(200)));
        assert!(out.contains("500 bytes total"));
    }

    #[test]
    fn test_sanitize_multibyte_boundary() {
        let body = "é".repeat(150);
        let out = sanitize_for_log(&body);
        assert!(out.contains("truncated"));
    }

    #[test]
    fn test_sanitize_strips_newlines() {
        assert_eq!(sanitize_for_log("a\nb"), "a b");
    }

    #[test]
    fn test_format_api_error() {
        let err: anyhow::Error = ApiError::from_response(429, "https://x", "{}").into();
        assert_eq!(
            format_gcp_error(&err),
            "Rate limit exceeded. Please try again later."
        );

        let err: anyhow::Error = ApiError::from_response(503, "https://x", "{}").into();
        assert!(format_gcp_error(&err).contains("temporarily unavailable"));
    }

    #[test]
    fn test_format_plain_error_truncated() {
        let err = anyhow::anyhow!("{}", "y".repeat(120));
        assert!(format_gcp_error(&err).ends_with("..."));
    }
}

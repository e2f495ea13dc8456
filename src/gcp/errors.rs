//! GCP API errors and their classification
//!
//! Regional listings routinely hit locations a project cannot use: the API is
//! disabled, the region is not enabled for the organisation, or IAM denies
//! the call there. Those are expected and get skipped. Everything else
//! (throttling, server errors, malformed requests, transport failures) is a
//! real failure.

use serde::Deserialize;
use serde_json::Value;

/// Google API status values that mean "not permitted here"
const DENIED_STATUSES: &[&str] = &["PERMISSION_DENIED", "SERVICE_DISABLED"];

/// Legacy `errors[].reason` / `ErrorInfo.reason` values with the same meaning
const DENIED_REASONS: &[&str] = &[
    "accessNotConfigured",
    "forbidden",
    "SERVICE_DISABLED",
    "API_DISABLED",
    "LOCATION_POLICY_VIOLATED",
];

/// Message fragments of authorization denials from other clouds' gateways
const DENIED_MESSAGES: &[&str] = &["AccessDenied", "UnauthorizedOperation", "AuthorizationError"];

/// Transport failures that mean the regional endpoint does not exist
const UNREACHABLE_ENDPOINT: &[&str] = &[
    "dns error",
    "no such host",
    "failed to lookup address",
    "unknownendpoint",
    "could not resolve endpoint",
];

/// Error returned by a GCP REST API
#[derive(Debug, Clone, thiserror::Error)]
#[error("API request to {url} failed: {status} {message}")]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Canonical status, e.g. `PERMISSION_DENIED`
    pub code: Option<String>,
    /// First machine-readable reason found in the error details
    pub reason: Option<String>,
    pub message: String,
    pub url: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
    #[serde(default)]
    details: Vec<Value>,
}

#[derive(Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: Option<String>,
}

impl ApiError {
    /// Build from a non-success response. Bodies that are not the standard
    /// Google error envelope keep a truncated copy of the body as the message.
    pub fn from_response(status: u16, url: &str, body: &str) -> Self {
        let url = url.split('?').next().unwrap_or(url).to_string();

        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => {
                let body = envelope.error;
                let reason = body
                    .errors
                    .iter()
                    .find_map(|e| e.reason.clone())
                    .or_else(|| {
                        body.details
                            .iter()
                            .find_map(|d| d.get("reason").and_then(|r| r.as_str()))
                            .map(str::to_string)
                    });

                Self {
                    status,
                    code: body.status,
                    reason,
                    message: super::http::sanitize_for_log(&body.message.unwrap_or_default()),
                    url,
                }
            }
            Err(_) => Self {
                status,
                code: None,
                reason: None,
                message: super::http::sanitize_for_log(body),
                url,
            },
        }
    }

    /// Authorization or opt-in denial for this project/location/service
    pub fn is_access_denied(&self) -> bool {
        if self.status != 400 && self.status != 403 {
            return false;
        }

        let code_matches = self
            .code
            .as_deref()
            .is_some_and(|c| DENIED_STATUSES.contains(&c));
        let reason_matches = self
            .reason
            .as_deref()
            .is_some_and(|r| DENIED_REASONS.contains(&r));
        let message_matches = DENIED_MESSAGES.iter().any(|m| self.message.contains(m));

        code_matches || reason_matches || message_matches
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn is_throttled(&self) -> bool {
        self.status == 429
    }
}

fn api_error(err: &anyhow::Error) -> Option<&ApiError> {
    err.chain().find_map(|cause| cause.downcast_ref::<ApiError>())
}

/// True for provider errors that mean "this operation is not permitted for
/// this region/service under the current project". Listing jobs turn these
/// into an empty (or partial) success.
pub fn is_soft_skippable(err: &anyhow::Error) -> bool {
    api_error(err).is_some_and(ApiError::is_access_denied)
}

/// True when the endpoint hostname could not be resolved at all. Only
/// meaningful for per-region hostnames; against a global host it is an outage.
pub fn is_region_unavailable(err: &anyhow::Error) -> bool {
    if api_error(err).is_some() {
        return false;
    }
    let rendered = format!("{:#}", err).to_lowercase();
    UNREACHABLE_ENDPOINT.iter().any(|p| rendered.contains(p))
}

pub fn is_not_found(err: &anyhow::Error) -> bool {
    api_error(err).is_some_and(ApiError::is_not_found)
}

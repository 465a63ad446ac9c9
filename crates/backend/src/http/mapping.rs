use reqwest::StatusCode;
use serde::Deserialize;

use crate::repository::BackendError;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "message", alias = "error")]
    reason: Option<String>,
}

pub(crate) fn map_transport_error(err: &reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else if err.is_decode() {
        BackendError::Serialization(err.to_string())
    } else {
        BackendError::Unreachable(err.to_string())
    }
}

/// Classify a non-success response.
///
/// Server-side outages and throttling are transient; any other refusal is the
/// server's final word (e.g. exam closed or already submitted).
pub(crate) fn map_status(status: StatusCode, body: &str) -> BackendError {
    if status == StatusCode::NOT_FOUND {
        return BackendError::NotFound;
    }
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        return BackendError::Unavailable {
            status: status.as_u16(),
        };
    }

    let reason = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request rejected")
                .to_owned()
        });
    BackendError::Rejected {
        status: Some(status.as_u16()),
        reason,
    }
}

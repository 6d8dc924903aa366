use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error bodies from the backend look like `{"detail": "..."}` or `{"message": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
    message: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            400 | 422 => ApiError::InvalidRequest(truncated),
            401 => ApiError::Unauthorized(truncated),
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// True when the backend answered and refused the request, as opposed to
    /// the request never completing.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ApiError::InvalidRequest(_)
                | ApiError::Unauthorized(_)
                | ApiError::AccessDenied(_)
                | ApiError::NotFound(_)
        )
    }

    /// Message suitable for showing to the user.
    ///
    /// Prefers the `detail` or `message` field of a JSON error body and falls
    /// back to the error's display text.
    pub fn user_message(&self) -> String {
        let body = match self {
            ApiError::InvalidRequest(body)
            | ApiError::Unauthorized(body)
            | ApiError::AccessDenied(body)
            | ApiError::NotFound(body)
            | ApiError::ServerError(body) => body,
            ApiError::NetworkError(_) => {
                return "Network error. Check your connection.".to_string()
            }
            _ => return self.to_string(),
        };

        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|parsed| {
                let detail = parsed.detail.and_then(|d| match d {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                });
                detail.or(parsed.message)
            })
            .filter(|msg| !msg.is_empty())
            .unwrap_or_else(|| self.to_string())
    }
}

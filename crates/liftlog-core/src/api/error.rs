use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// The backend explained the failure in a human-readable message
    #[error("{message}")]
    App { status: u16, message: String },

    /// The access token was rejected. Handled inside the client by
    /// refreshing; surfaced as `SessionExpired` if that is not possible.
    #[error("Access token expired")]
    TokenExpired,

    #[error("Session expired - please sign in again")]
    SessionExpired,

    #[error("Unauthorized")]
    Unauthorized,

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

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Messages the backend uses for a rejected access token
const TOKEN_EXPIRED_MESSAGES: [&str; 2] = ["token.expired", "token.invalid"];

/// Structured error body, e.g. `{"status": "error", "message": "..."}`
#[derive(Debug, Deserialize)]
struct ErrorPayload {
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

    fn payload_message(body: &str) -> Option<String> {
        serde_json::from_str::<ErrorPayload>(body)
            .ok()
            .and_then(|p| p.message)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let code = status.as_u16();

        if let Some(message) = Self::payload_message(body) {
            if code == 401 && TOKEN_EXPIRED_MESSAGES.contains(&message.as_str()) {
                return ApiError::TokenExpired;
            }
            return ApiError::App {
                status: code,
                message,
            };
        }

        let truncated = Self::truncate_body(body);
        match code {
            401 => ApiError::Unauthorized,
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// True when the backend supplied a message meant for the user
    pub fn is_app_error(&self) -> bool {
        matches!(self, ApiError::App { .. })
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired | ApiError::TokenExpired)
    }

    /// Message to show the user: the backend's own message for application
    /// errors, `fallback` for everything else.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ApiError::App { message, .. } => message.clone(),
            ApiError::SessionExpired | ApiError::TokenExpired => {
                "Session expired. Please sign in again.".to_string()
            }
            _ => fallback.to_string(),
        }
    }
}

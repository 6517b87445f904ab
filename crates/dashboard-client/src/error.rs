use dashboard_session::{CredentialShapeError, FlightAbandoned, StoreError};
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

/// Why a token refresh failed. Cloned to every request waiting on the refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("refresh_token_missing")]
    MissingRefreshToken,
    #[error("refresh_timeout")]
    Timeout,
    #[error("refresh_request_failed:{message}")]
    Request { message: String },
    #[error("refresh_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("refresh_decode_failed:{message}")]
    Decode { message: String },
    #[error("refresh_response_invalid:{0}")]
    Shape(#[from] CredentialShapeError),
    #[error("refresh_store_failed:{message}")]
    Store { message: String },
    #[error("refresh_abandoned")]
    Abandoned,
}

impl From<FlightAbandoned> for RefreshError {
    fn from(_: FlightAbandoned) -> Self {
        Self::Abandoned
    }
}

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("api_client_invalid_path")]
    InvalidPath,
    #[error("api_client_build_failed:{message}")]
    ClientBuild { message: String },
    #[error("api_request_timeout")]
    Timeout,
    #[error("api_request_failed:{message}")]
    Request { message: String },
    #[error("api_read_failed:{message}")]
    Read { message: String },
    #[error("api_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("api_json_decode_failed:{message}")]
    Decode { message: String },
    #[error("api_json_encode_failed:{message}")]
    Encode { message: String },
    #[error("api_session_expired")]
    SessionExpired,
    #[error("api_refresh_failed:{0}")]
    RefreshFailed(RefreshError),
    #[error("api_login_rejected:{0}")]
    LoginRejected(CredentialShapeError),
    #[error("api_store_failed:{0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ApiClientError {
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RefreshFailed(RefreshError::Http { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// The caller is no longer signed in and must log in again.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::RefreshFailed(_))
            || self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> ApiClientError {
    ApiClientError::Http {
        status,
        body: body_excerpt(body),
    }
}

pub(crate) fn body_excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "<empty>".to_string()
    } else {
        trimmed.to_string()
    }
}

pub(crate) fn request_error(error: &reqwest::Error) -> ApiClientError {
    if error.is_timeout() {
        ApiClientError::Timeout
    } else {
        ApiClientError::Request {
            message: error.to_string(),
        }
    }
}

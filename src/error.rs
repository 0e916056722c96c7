use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::warn;

/// キャッシュストア側の障害
#[derive(Debug, Error)]
#[error("cache store unavailable: {0}")]
pub struct StoreError(pub String);

/// リクエスト単位で発生するエラー。プロセス全体には波及させない。
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("cannot derive cache key: {0}")]
    KeyDerivation(String),

    #[error("origin unreachable ({uri}): {reason}")]
    OriginUnreachable { uri: String, reason: String },

    #[error("origin timed out ({uri})")]
    OriginTimeout { uri: String },

    #[error("redirect limit of {limit} exceeded (last location: {location})")]
    RedirectLimitExceeded { limit: usize, location: String },

    #[error("invalid redirect location: {0}")]
    InvalidRedirect(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::KeyDerivation(_) => StatusCode::BAD_REQUEST,
            ProxyError::OriginTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::OriginUnreachable { .. }
            | ProxyError::RedirectLimitExceeded { .. }
            | ProxyError::InvalidRedirect(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        warn!(status = status.as_u16(), "request failed: {}", self);
        (status, self.to_string()).into_response()
    }
}

//! Error types for genproxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::provider::ProviderError;

/// Result type alias for genproxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for genproxy.
///
/// These errors are reported before a response body starts; once frames
/// are flowing, failures travel in-band as `[ERROR]` frames.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("No providers available for model '{model}'")]
    NoProviders { model: String },

    #[error("Provider '{provider}' does not support {capability}")]
    Unsupported {
        provider: String,
        capability: String,
    },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UnknownProvider(_) => StatusCode::NOT_FOUND,
            Error::NoProviders { .. } => StatusCode::BAD_REQUEST,
            Error::Unsupported { .. } => StatusCode::BAD_REQUEST,
            Error::Provider(_) => StatusCode::BAD_GATEWAY,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Return OpenAI-compatible error format
        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": "genproxy_error",
                "code": status.as_u16()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bad_request_body() {
        let response = Error::BadRequest("No messages provided".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["message"], "Invalid request: No messages provided");
        assert_eq!(json["error"]["code"], 400);
    }

    #[test]
    fn test_unknown_provider_is_not_found() {
        let response = Error::UnknownProvider("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

//! Errors reported by provider clients.

use serde::Deserialize;

/// A failure returned by (or while talking to) an upstream provider.
///
/// `code` and `param` mirror the OpenAI error object so callers can tell a
/// capability mismatch apart from a genuine failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    /// HTTP status, when the failure came from an HTTP response.
    pub status: Option<u16>,
    pub code: Option<String>,
    pub param: Option<String>,
    pub message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorObject,
}

#[derive(Deserialize)]
struct ErrorObject {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    param: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl ProviderError {
    /// An error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            param: None,
            message: message.into(),
        }
    }

    /// The provider does not offer this capability at all.
    pub fn unsupported(capability: &str, provider: &str) -> Self {
        Self::new(format!(
            "Provider '{}' does not support {}",
            provider, capability
        ))
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Build an error from a non-2xx response body.
    ///
    /// Understands the `{"error": {...}}` envelope used by OpenAI, Azure and
    /// Gemini; anything else is reported verbatim.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => Self::from_error_object(envelope.error).with_status(status),
            Err(_) => {
                let body = body.trim();
                let message = if body.is_empty() {
                    format!("Provider returned status {}", status)
                } else {
                    format!("Provider returned status {}: {}", status, body)
                };
                Self::new(message).with_status(status)
            }
        }
    }

    /// Build an error from an in-band error object (e.g. an SSE `error` event).
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let object = value.get("error")?;
        if object.is_null() {
            return None;
        }
        let parsed: ErrorObject = serde_json::from_value(object.clone()).ok()?;
        Some(Self::from_error_object(parsed))
    }

    fn from_error_object(object: ErrorObject) -> Self {
        let code = object.code.and_then(|c| match c {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        let message = object
            .message
            .or(object.kind)
            .unwrap_or_else(|| "Unknown provider error".to_string());
        Self {
            status: None,
            code,
            param: object.param,
            message,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        let error = Self::new(format!("Failed to reach provider: {}", e));
        match e.status() {
            Some(status) => error.with_status(status.as_u16()),
            None => error,
        }
    }
}

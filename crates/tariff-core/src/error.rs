use bytes::Bytes;
use http::StatusCode;
use tariff_protocol::openai::ErrorBody;

/// Error surfaced at the HTTP boundary: a status and a ready-to-send
/// JSON body.
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ProxyError {
    fn json(status: StatusCode, kind: &str, message: impl Into<String>) -> Self {
        let body = serde_json::to_vec(&ErrorBody::new(kind, message)).unwrap_or_default();
        Self {
            status,
            body: Bytes::from(body),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::json(StatusCode::BAD_REQUEST, "invalid_request_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::json(StatusCode::NOT_FOUND, "not_found_error", message)
    }

    pub fn no_provider(message: impl Into<String>) -> Self {
        Self::json(
            StatusCode::SERVICE_UNAVAILABLE,
            "no_provider_configured",
            message,
        )
    }

    pub fn bad_upstream(message: impl Into<String>) -> Self {
        Self::json(StatusCode::BAD_GATEWAY, "bad_upstream", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::json(StatusCode::GATEWAY_TIMEOUT, "upstream_timeout", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::json(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    /// Pass an upstream error through with its own status and body.
    pub fn passthrough(status: StatusCode, body: Bytes) -> Self {
        Self { status, body }
    }
}

/// Malformed bytes inside the dialect adapter. Never recovered there;
/// the engine decides how to surface it.
#[derive(Debug)]
pub struct TranslateError {
    pub message: String,
}

impl TranslateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "translation failed: {}", self.message)
    }
}

impl std::error::Error for TranslateError {}

impl From<serde_json::Error> for TranslateError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

//! What counts as retryable. Statuses are a fixed set; within the
//! 4xx portion the upstream body must also match one of the documented
//! error classes. The class patterns are data so new provider phrasings
//! are an entry, not a code change.

const RETRYABLE_STATUSES: &[u16] = &[400, 401, 402, 403, 429, 500, 502, 503, 504];

/// Documented error classes and the lowercase needles that identify them.
const ERROR_CLASS_PATTERNS: &[(&str, &[&str])] = &[
    ("billing", &["billing", "payment required", "insufficient credit", "credit balance"]),
    ("quota", &["quota", "exceeded your current quota", "resource_exhausted"]),
    ("rate_limit", &["rate limit", "rate_limit", "too many requests", "requests per minute"]),
    ("capacity", &["capacity", "server is busy", "no available", "try again later"]),
    ("auth_invalid", &["invalid api key", "invalid x-api-key", "authentication_error", "incorrect api key", "unauthorized"]),
    ("model_unavailable", &["model not found", "model_not_found", "does not exist", "unknown model", "unsupported model"]),
    ("overloaded", &["overloaded", "overloaded_error", "server overloaded"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorClass {
    Retryable(&'static str),
    Fatal,
}

/// A response is retryable if its status is in the set *and* either the
/// status is a 5xx or the body names a known error class.
pub fn classify_upstream_error(status: u16, body: &[u8]) -> UpstreamErrorClass {
    if !RETRYABLE_STATUSES.contains(&status) {
        return UpstreamErrorClass::Fatal;
    }
    if status >= 500 {
        return UpstreamErrorClass::Retryable("server_error");
    }
    let body = String::from_utf8_lossy(body).to_lowercase();
    for (class, needles) in ERROR_CLASS_PATTERNS {
        if needles.iter().any(|needle| body.contains(needle)) {
            return UpstreamErrorClass::Retryable(class);
        }
    }
    UpstreamErrorClass::Fatal
}

pub fn is_retryable(status: u16, body: &[u8]) -> bool {
    matches!(
        classify_upstream_error(status, body),
        UpstreamErrorClass::Retryable(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_hundreds_retry_regardless_of_body() {
        assert!(is_retryable(500, b""));
        assert!(is_retryable(502, b"<html>bad gateway</html>"));
        assert!(is_retryable(503, b"unrecognized wording"));
    }

    #[test]
    fn four_hundreds_need_a_known_error_class() {
        assert!(is_retryable(429, b"{\"error\":\"rate limit exceeded\"}"));
        assert!(is_retryable(402, b"insufficient credit balance"));
        assert!(is_retryable(401, b"invalid api key provided"));
        assert!(is_retryable(400, b"model not found: gpt-x"));
        assert!(!is_retryable(
            400,
            b"{\"error\":\"messages: first message must use the user role\"}"
        ));
    }

    #[test]
    fn statuses_outside_the_set_are_fatal() {
        assert!(!is_retryable(404, b"model not found"));
        assert!(!is_retryable(422, b"rate limit"));
        assert!(!is_retryable(200, b""));
    }

    #[test]
    fn classes_are_named() {
        assert_eq!(
            classify_upstream_error(429, b"too many requests"),
            UpstreamErrorClass::Retryable("rate_limit")
        );
        assert_eq!(
            classify_upstream_error(403, b"your quota was exceeded"),
            UpstreamErrorClass::Retryable("quota")
        );
    }
}

use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

const ALLOWED_CONTENT_TYPE: &str = "application/logplex-1";
const DRAIN_TOKEN_PREFIX: &str = "d.";

/// Validates that requests to the logs server are legitimate drain
/// deliveries. Root GET requests are skipped since they redirect to the
/// docs.
pub async fn authentication(request: Request, next: Next) -> Response {
    if request.method() != Method::GET && request.uri().path() != "/" {
        let content_type = request
            .headers()
            .get("Content-Type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if content_type != ALLOWED_CONTENT_TYPE {
            return StatusCode::BAD_REQUEST.into_response();
        }

        let drain_token = request
            .headers()
            .get("Logplex-Drain-Token")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if drain_token.is_empty() || !drain_token.starts_with(DRAIN_TOKEN_PREFIX) {
            return StatusCode::BAD_REQUEST.into_response();
        }
    }

    next.run(request).await
}

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use services::services::logs::LogProcessor;

const SETUP_URL: &str = "https://postgresmonitor.com/app/setup/";

/// Accepts raw syslog frames from the log drain. The body is handed off
/// for asynchronous processing so the drain sees a fast 200.
pub async fn post_logs(State(processor): State<LogProcessor>, body: String) -> StatusCode {
    tokio::spawn(async move {
        processor.process_log_line(&body);
    });

    StatusCode::OK
}

/// Redirect to the setup flow when hitting the agent root endpoint.
pub async fn redirect_to_setup() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, SETUP_URL)]).into_response()
}

pub mod logs;

use axum::routing::{get, post};
use axum::Router;
use services::services::logs::LogProcessor;

pub fn router(processor: LogProcessor) -> Router {
    Router::new()
        .route("/logs", post(logs::post_logs))
        .route("/", get(logs::redirect_to_setup))
        .with_state(processor)
}

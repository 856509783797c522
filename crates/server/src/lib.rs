pub mod agent;
pub mod config;
pub mod middleware;
pub mod routes;

use axum::Router;
use services::services::logs::LogProcessor;
use tracing::{error, info};

/// Build the logs router with the authentication layer applied.
pub fn app(processor: LogProcessor) -> Router {
    routes::router(processor)
        .layer(axum::middleware::from_fn(middleware::auth::authentication))
}

/// Bind and serve the logs endpoint. Runs until the process exits.
pub async fn serve(port: u16, processor: LogProcessor) {
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, port, "unable to bind logs server");
            return;
        }
    };

    info!(port, "starting /logs server");

    if let Err(err) = axum::serve(listener, app(processor)).await {
        error!(%err, "logs server error");
    }
}

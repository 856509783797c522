use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::client::PostgresClient;
use crate::errors::ErrorSink;

/// One monitor category (metadata, query stats, schema, ...). Monitors are
/// stateless between calls except for the delta state they share.
#[async_trait]
pub trait Monitor: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self, client: &PostgresClient);
}

/// Runs one monitor pass inside a panic boundary. A panicking monitor is
/// reported on the error channel and must never take down the scheduler.
pub struct MonitorWorker {
    monitor: Arc<dyn Monitor>,
    client: Arc<PostgresClient>,
    errors: ErrorSink,
}

impl MonitorWorker {
    pub fn new(monitor: Arc<dyn Monitor>, client: Arc<PostgresClient>, errors: ErrorSink) -> Self {
        Self {
            monitor,
            client,
            errors,
        }
    }

    pub async fn start(self) {
        let name = self.monitor.name();
        let server = self.client.server_id().name.clone();
        let started_at = Instant::now();

        let monitor = Arc::clone(&self.monitor);
        let client = Arc::clone(&self.client);
        let result = tokio::spawn(async move { monitor.run(&client).await }).await;

        match result {
            Ok(()) => {
                let duration_ms =
                    utils::num::round2(started_at.elapsed().as_secs_f64() * 1000.0);
                debug!(monitor = name, server, duration_ms, "monitor ran");
            }
            Err(err) if err.is_panic() => {
                let panic = panic_message(err.into_panic());
                self.errors.report_panic(&panic);
                error!(monitor = name, server, panic, "monitor panicked!");
            }
            Err(err) => {
                error!(monitor = name, server, %err, "monitor was cancelled");
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic without message".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_downcast_to_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("boom".to_string())), "boom");
        assert_eq!(panic_message(Box::new(42_u8)), "panic without message");
    }
}

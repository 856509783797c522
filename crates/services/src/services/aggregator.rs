use std::sync::Arc;

use db::errors::ErrorReport;
use db::events::Event;
use tokio::sync::mpsc;
use tracing::info;

use crate::services::data::Data;
use crate::services::shipper::Shipper;

/// Callback that starts the logs HTTP server. Invoked at most once, when
/// a monitored platform turns out to need log drain ingestion.
pub type LogsServerStarter = Box<dyn FnMut() + Send>;

/// Brokers messages between the event channels and the shared `Data`
/// accumulators. A single loop with a non-deterministic select keeps
/// cross-channel fairness best-effort.
pub struct Aggregator {
    pub data: Arc<Data>,
    pub shipper: Arc<Shipper>,
    pub logs_server_starter: LogsServerStarter,
}

impl Aggregator {
    /// Runs until every channel has closed.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<Event>,
        mut errors: mpsc::Receiver<ErrorReport>,
        mut log_test: mpsc::Receiver<String>,
        mut start_logs_server: mpsc::Receiver<bool>,
    ) {
        let mut started_logs_server = false;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.data.add_event(event);
                }
                error = errors.recv() => {
                    let Some(error) = error else { break };
                    self.data.add_error_report(error);
                }
                line = log_test.recv() => {
                    let Some(_line) = line else { break };
                    // log test messages only arrive during --test-logs
                    // runs; report the receipt timestamp immediately
                    info!("log test message was received");
                    self.data
                        .add_log_test_message_received_at(utils::time::now_unix());
                    let shipper = Arc::clone(&self.shipper);
                    tokio::spawn(async move { shipper.tick().await });
                }
                start = start_logs_server.recv() => {
                    let Some(start) = start else { break };
                    // only start the logs server when the platform needs it
                    if start && !started_logs_server {
                        (self.logs_server_starter)();
                        started_logs_server = true;
                    }
                }
            }
        }
    }
}

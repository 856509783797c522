use std::backtrace::Backtrace;

use tokio::sync::mpsc;
use tracing::warn;

/// Error reports queued for the single aggregator consumer.
pub const ERROR_CHANNEL_CAPACITY: usize = 100;

/// Agent errors and panics are reported to the ingest API so agent issues
/// surface without access to customer logs.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub error: String,
    pub panic: bool,
    pub stack_trace: String,
}

/// Clonable handle for submitting error reports to the aggregator.
/// Injected into workers instead of global state so tests can observe
/// emissions deterministically.
#[derive(Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<ErrorReport>,
}

impl ErrorSink {
    pub fn new(tx: mpsc::Sender<ErrorReport>) -> Self {
        Self { tx }
    }

    pub fn report(&self, error: impl ToString) {
        self.send(error.to_string(), false);
    }

    pub fn report_panic(&self, error: impl ToString) {
        self.send(error.to_string(), true);
    }

    fn send(&self, error: String, panic: bool) {
        let report = ErrorReport {
            error,
            panic,
            stack_trace: Backtrace::force_capture().to_string(),
        };
        if self.tx.try_send(report).is_err() {
            warn!("dropping error report: channel buffer full");
        }
    }
}

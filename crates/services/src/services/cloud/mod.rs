//! Cloud-side monitoring for RDS and Aurora backed servers.
//!
//! Provider SDK calls are abstracted behind [`CloudApi`] so the observer
//! logic (scheduling, marker cache, metric shaping) stays testable with a
//! mock implementation.

pub mod observer;
pub mod os_metrics;
pub mod rds_logs;

use async_trait::async_trait;
use db::events::{MetricResult, RdsInstance};
use tracing::debug;

/// A chunk of an instance log file plus the marker to resume from.
#[derive(Debug, Clone)]
pub struct LogFilePortion {
    pub data: String,
    pub marker: Option<String>,
}

/// The abstract cloud operations the observer consumes.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Look up instance metadata (class, monitoring resource id,
    /// enhanced monitoring flag).
    async fn describe_instance(&self, instance_id: &str) -> Option<RdsInstance>;

    /// Fetch datapoints for the named metrics over `[start, end)` unix
    /// seconds at the given period, averaged per period.
    async fn fetch_metric_window(
        &self,
        instance: &RdsInstance,
        metric_names: &[&'static str],
        start: i64,
        end: i64,
        period_secs: i32,
    ) -> Vec<MetricResult>;

    /// The most recent OS metrics log event for the instance, as the raw
    /// JSON message.
    async fn latest_os_metrics_event(&self, instance: &RdsInstance) -> Option<String>;

    /// Names of instance log files written since the given unix time.
    async fn list_log_files(&self, instance_id: &str, written_since: i64) -> Vec<String>;

    /// Download a log file from the saved marker onwards.
    async fn download_log_file(
        &self,
        instance_id: &str,
        log_file_name: &str,
        marker: Option<&str>,
    ) -> Option<LogFilePortion>;
}

/// Default implementation used when no cloud credentials are wired in.
/// Every operation reports nothing.
#[derive(Debug, Default)]
pub struct UnconfiguredCloudApi;

#[async_trait]
impl CloudApi for UnconfiguredCloudApi {
    async fn describe_instance(&self, instance_id: &str) -> Option<RdsInstance> {
        debug!(instance_id, "cloud api not configured, skipping describe");
        None
    }

    async fn fetch_metric_window(
        &self,
        instance: &RdsInstance,
        _metric_names: &[&'static str],
        _start: i64,
        _end: i64,
        _period_secs: i32,
    ) -> Vec<MetricResult> {
        debug!(instance_id = instance.instance_id, "cloud api not configured, skipping metrics");
        Vec::new()
    }

    async fn latest_os_metrics_event(&self, _instance: &RdsInstance) -> Option<String> {
        None
    }

    async fn list_log_files(&self, _instance_id: &str, _written_since: i64) -> Vec<String> {
        Vec::new()
    }

    async fn download_log_file(
        &self,
        _instance_id: &str,
        _log_file_name: &str,
        _marker: Option<&str>,
    ) -> Option<LogFilePortion> {
        None
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Scripted cloud api for observer tests.
    #[derive(Default)]
    pub struct MockCloudApi {
        pub instances: HashMap<String, RdsInstance>,
        pub metric_results: Vec<MetricResult>,
        pub os_metrics_event: Option<String>,
        pub log_files: Mutex<HashMap<String, Vec<String>>>,
        pub log_file_contents: Mutex<HashMap<String, LogFilePortion>>,
        pub seen_markers: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl CloudApi for MockCloudApi {
        async fn describe_instance(&self, instance_id: &str) -> Option<RdsInstance> {
            self.instances.get(instance_id).cloned()
        }

        async fn fetch_metric_window(
            &self,
            _instance: &RdsInstance,
            _metric_names: &[&'static str],
            _start: i64,
            _end: i64,
            _period_secs: i32,
        ) -> Vec<MetricResult> {
            self.metric_results.clone()
        }

        async fn latest_os_metrics_event(&self, _instance: &RdsInstance) -> Option<String> {
            self.os_metrics_event.clone()
        }

        async fn list_log_files(&self, instance_id: &str, _written_since: i64) -> Vec<String> {
            self.log_files
                .lock()
                .unwrap()
                .get(instance_id)
                .cloned()
                .unwrap_or_default()
        }

        async fn download_log_file(
            &self,
            _instance_id: &str,
            log_file_name: &str,
            marker: Option<&str>,
        ) -> Option<LogFilePortion> {
            self.seen_markers
                .lock()
                .unwrap()
                .push(marker.map(str::to_string));
            self.log_file_contents
                .lock()
                .unwrap()
                .get(log_file_name)
                .cloned()
        }
    }
}

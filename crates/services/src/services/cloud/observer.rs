use std::sync::Arc;
use std::time::Duration;

use db::events::{Event, RdsInstance, RdsInstanceFound, RdsInstanceMetrics};
use db::slow_query::SlowQuery;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::{os_metrics, rds_logs, CloudApi};

/// Cloud metrics take up to 10 minutes to finalize, so the fetch window
/// trails behind now.
const METRIC_WINDOW_START_OFFSET: Duration = Duration::from_secs(15 * 60);
const METRIC_WINDOW_END_OFFSET: Duration = Duration::from_secs(10 * 60);
const METRIC_PERIOD_SECS: i32 = 60;

/// Only log files written recently are listed and downloaded.
const LOG_FILE_WRITTEN_WINDOW: Duration = Duration::from_secs(5 * 60);

pub const RDS_METRICS: &[&str] = &[
    "CheckpointLag",
    "ConnectionAttempts",
    "CPUUtilization",
    "DiskQueueDepth",
    "FreeableMemory",
    "FreeStorageSpace",
    "MaximumUsedTransactionIDs",
    "NetworkReceiveThroughput",
    "NetworkTransmitThroughput",
    "OldestReplicationSlotLag",
    "ReadIOPS",
    "ReadLatency",
    "ReadThroughput",
    "ReplicaLag",
    "ReplicationSlotDiskUsage",
    "SwapUsage",
    "TransactionLogsDiskUsage",
    "TransactionLogsGeneration",
    "WriteIOPS",
    "WriteLatency",
    "WriteThroughput",
];

pub const AURORA_METRICS: &[&str] = &[
    "AuroraReplicaLag",
    "AuroraReplicaLagMaximum",
    "AuroraReplicaLagMinimum",
    "BufferCacheHitRatio",
    "CommitLatency",
    "CommitThroughput",
    "ConnectionAttempts",
    "CPUUtilization",
    "Deadlocks",
    "DiskQueueDepth",
    "FreeableMemory",
    "FreeLocalStorage",
    "MaximumUsedTransactionIDs",
    "NetworkReceiveThroughput",
    "NetworkTransmitThroughput",
    "RDSToAuroraPostgreSQLReplicaLag",
    "ReadIOPS",
    "ReadLatency",
    "ReadThroughput",
    "ReplicationSlotDiskUsage",
    "StorageNetworkReceiveThroughput",
    "StorageNetworkTransmitThroughput",
    "SwapUsage",
    "TransactionLogsDiskUsage",
    "WriteIOPS",
    "WriteLatency",
    "WriteThroughput",
];

#[derive(Debug, Clone)]
pub struct CloudObserverConfig {
    pub monitor_cloudwatch_metrics: bool,
    pub monitor_aws_logs: bool,
    pub metrics_interval: Duration,
    pub os_metrics_interval: Duration,
    pub log_files_interval: Duration,
}

impl Default for CloudObserverConfig {
    fn default() -> Self {
        Self {
            monitor_cloudwatch_metrics: true,
            monitor_aws_logs: true,
            metrics_interval: Duration::from_secs(5 * 60),
            os_metrics_interval: Duration::from_secs(60),
            log_files_interval: Duration::from_secs(2 * 60),
        }
    }
}

/// Cursor into one instance log file.
#[derive(Debug, Clone)]
struct AwsLogFile {
    instance_id: String,
    log_file_name: String,
    marker: Option<String>,
}

#[derive(Default)]
struct CloudState {
    instances: Vec<RdsInstance>,
    log_files: Vec<AwsLogFile>,
    scheduled_monitors: bool,
}

/// Watches for discovered RDS/Aurora instances and runs the periodic
/// cloud-side fetches. One async mutex guards the instance list and the
/// log file marker cache, serializing cloud calls within the observer.
pub struct CloudObserver {
    config: CloudObserverConfig,
    api: Arc<dyn CloudApi>,
    events: mpsc::Sender<Event>,
    raw_slow_queries: mpsc::Sender<SlowQuery>,
    state: Mutex<CloudState>,
}

impl CloudObserver {
    pub fn new(
        config: CloudObserverConfig,
        api: Arc<dyn CloudApi>,
        events: mpsc::Sender<Event>,
        raw_slow_queries: mpsc::Sender<SlowQuery>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            api,
            events,
            raw_slow_queries,
            state: Mutex::new(CloudState::default()),
        })
    }

    /// Runs until the discovery channel closes.
    pub async fn run(self: Arc<Self>, mut instance_found: mpsc::Receiver<RdsInstanceFound>) {
        while let Some(event) = instance_found.recv().await {
            let observer = Arc::clone(&self);
            tokio::spawn(async move { observer.track_instance(event).await });
        }
    }

    pub async fn track_instance(self: Arc<Self>, event: RdsInstanceFound) {
        info!(
            instance_id = event.instance_id,
            is_aurora = event.is_aurora,
            "tracking rds instance"
        );

        let mut instance = self
            .api
            .describe_instance(&event.instance_id)
            .await
            .unwrap_or_else(|| RdsInstance {
                instance_id: event.instance_id.clone(),
                ..RdsInstance::default()
            });
        instance.is_aurora = event.is_aurora;

        let mut state = self.state.lock().await;
        state.instances.push(instance);

        if state.scheduled_monitors {
            return;
        }
        state.scheduled_monitors = true;
        drop(state);

        if self.config.monitor_cloudwatch_metrics {
            let observer = Arc::clone(&self);
            tokio::spawn(async move {
                let run = || {
                    let observer = Arc::clone(&observer);
                    async move { observer.monitor_metrics().await }
                };
                utils::schedule::schedule_and_run_now(run, observer.config.metrics_interval).await;
            });

            let observer = Arc::clone(&self);
            tokio::spawn(async move {
                let run = || {
                    let observer = Arc::clone(&observer);
                    async move { observer.monitor_os_metrics().await }
                };
                utils::schedule::schedule_and_run_now(run, observer.config.os_metrics_interval)
                    .await;
            });
        }

        if self.config.monitor_aws_logs {
            let observer = Arc::clone(&self);
            tokio::spawn(async move {
                let run = || {
                    let observer = Arc::clone(&observer);
                    async move { observer.monitor_log_files().await }
                };
                utils::schedule::schedule_and_run_now(run, observer.config.log_files_interval)
                    .await;
            });
        }
    }

    pub async fn monitor_metrics(&self) {
        let state = self.state.lock().await;

        for instance in &state.instances {
            debug!(instance_id = instance.instance_id, "fetching cloud metrics");

            let metric_names = if instance.is_aurora { AURORA_METRICS } else { RDS_METRICS };
            let now = utils::time::now_unix();
            let start = now - METRIC_WINDOW_START_OFFSET.as_secs() as i64;
            let end = now - METRIC_WINDOW_END_OFFSET.as_secs() as i64;

            let metrics = self
                .api
                .fetch_metric_window(instance, metric_names, start, end, METRIC_PERIOD_SECS)
                .await;

            if !metrics.is_empty() {
                self.send_instance_metrics(instance, metrics);
            }
        }
    }

    pub async fn monitor_os_metrics(&self) {
        let state = self.state.lock().await;

        for instance in &state.instances {
            // enhanced monitoring is required for rds os metrics
            if !instance.enhanced_monitoring_enabled {
                continue;
            }

            debug!(instance_id = instance.instance_id, "fetching rds os metrics");

            let Some(message) = self.api.latest_os_metrics_event(instance).await else {
                continue;
            };

            let metrics = os_metrics::convert_os_log_event_into_metrics(&message);
            if !metrics.is_empty() {
                self.send_instance_metrics(instance, metrics);
            }
        }
    }

    pub async fn monitor_log_files(&self) {
        let mut state = self.state.lock().await;
        let instances = state.instances.clone();

        for instance in &instances {
            let written_since =
                utils::time::now_unix() - LOG_FILE_WRITTEN_WINDOW.as_secs() as i64;
            let log_file_names = self
                .api
                .list_log_files(&instance.instance_id, written_since)
                .await;

            for log_file_name in &log_file_names {
                let marker =
                    find_or_create_cached_log_file(&mut state, &instance.instance_id, log_file_name)
                        .marker
                        .clone();

                let Some(portion) = self
                    .api
                    .download_log_file(&instance.instance_id, log_file_name, marker.as_deref())
                    .await
                else {
                    continue;
                };

                let cached =
                    find_or_create_cached_log_file(&mut state, &instance.instance_id, log_file_name);
                cached.marker = portion.marker.clone();

                if portion.data.is_empty() {
                    continue;
                }

                debug!(
                    instance_id = instance.instance_id,
                    file_name = log_file_name,
                    len = portion.data.len(),
                    "rds log file"
                );

                let log_lines = rds_logs::parse_rds_log_file(&portion.data);
                self.process_rds_log_lines(&log_lines, &instance.instance_id);
            }

            // evict cache entries for files gone from the latest listing
            remove_stale_cached_log_files(&mut state, &instance.instance_id, &log_file_names);
        }
    }

    fn process_rds_log_lines(&self, log_lines: &[rds_logs::RdsLogLine], instance_id: &str) {
        for log_line in log_lines {
            let Some(slow_query) = rds_logs::parse_rds_query_explain(log_line, instance_id) else {
                continue;
            };

            if self.raw_slow_queries.try_send(slow_query).is_err() {
                warn!("dropping aws slow query: channel buffer full");
            }
        }
    }

    fn send_instance_metrics(&self, instance: &RdsInstance, metrics: Vec<db::events::MetricResult>) {
        let event = Event::RdsInstanceMetrics(RdsInstanceMetrics {
            instance: instance.clone(),
            metrics,
        });
        if self.events.try_send(event).is_err() {
            warn!("dropping rds instance metrics: channel buffer full");
        }
    }
}

fn find_or_create_cached_log_file<'a>(
    state: &'a mut CloudState,
    instance_id: &str,
    log_file_name: &str,
) -> &'a mut AwsLogFile {
    let position = state
        .log_files
        .iter()
        .position(|file| file.instance_id == instance_id && file.log_file_name == log_file_name);

    match position {
        Some(position) => &mut state.log_files[position],
        None => {
            state.log_files.push(AwsLogFile {
                instance_id: instance_id.to_string(),
                log_file_name: log_file_name.to_string(),
                marker: None,
            });
            state.log_files.last_mut().unwrap()
        }
    }
}

fn remove_stale_cached_log_files(
    state: &mut CloudState,
    instance_id: &str,
    log_file_names: &[String],
) {
    state.log_files.retain(|file| {
        file.instance_id != instance_id
            || log_file_names.iter().any(|name| name == &file.log_file_name)
    });
}

#[cfg(test)]
mod tests {
    use db::events::{MetricDatapoint, MetricResult};

    use crate::services::cloud::mock::MockCloudApi;
    use crate::services::cloud::LogFilePortion;

    use super::*;

    /// Background schedules are disabled so each test drives the monitor
    /// passes explicitly.
    fn manual_config() -> CloudObserverConfig {
        CloudObserverConfig {
            monitor_cloudwatch_metrics: false,
            monitor_aws_logs: false,
            ..CloudObserverConfig::default()
        }
    }

    fn observer_with_api(api: MockCloudApi) -> (Arc<CloudObserver>, mpsc::Receiver<Event>, mpsc::Receiver<SlowQuery>) {
        let (events_tx, events_rx) = mpsc::channel(100);
        let (slow_query_tx, slow_query_rx) = mpsc::channel(100);

        let observer = CloudObserver::new(manual_config(), Arc::new(api), events_tx, slow_query_tx);

        (observer, events_rx, slow_query_rx)
    }

    fn instance(instance_id: &str, enhanced_monitoring: bool) -> RdsInstance {
        RdsInstance {
            instance_id: instance_id.to_string(),
            instance_class: "db.t3.medium".to_string(),
            monitoring_resource_id: "db-ABC123".to_string(),
            enhanced_monitoring_enabled: enhanced_monitoring,
            is_aurora: false,
        }
    }

    async fn track(observer: &Arc<CloudObserver>, instance_id: &str) {
        Arc::clone(observer)
            .track_instance(RdsInstanceFound {
                instance_id: instance_id.to_string(),
                is_aurora: false,
            })
            .await;
    }

    #[tokio::test]
    async fn metrics_are_fetched_and_reported_per_instance() {
        let mut api = MockCloudApi::default();
        api.instances
            .insert("test-database-1".to_string(), instance("test-database-1", false));
        api.metric_results = vec![MetricResult {
            name: "CPUUtilization".to_string(),
            datapoints: vec![MetricDatapoint {
                measured_at: 100,
                value: 42.0,
            }],
        }];

        let (observer, mut events_rx, _slow_query_rx) = observer_with_api(api);
        track(&observer, "test-database-1").await;

        observer.monitor_metrics().await;

        match events_rx.recv().await.unwrap() {
            Event::RdsInstanceMetrics(metrics) => {
                assert_eq!(metrics.instance.instance_id, "test-database-1");
                assert_eq!(metrics.metrics[0].name, "CPUUtilization");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn os_metrics_require_enhanced_monitoring() {
        let mut api = MockCloudApi::default();
        // enhanced monitoring disabled
        api.instances
            .insert("test-database-1".to_string(), instance("test-database-1", false));
        api.os_metrics_event = Some(r#"{"timestamp": "2023-10-28T19:01:19Z", "cpuUtilization": {"idle": 90.0}}"#.to_string());

        let (observer, mut events_rx, _slow_query_rx) = observer_with_api(api);
        track(&observer, "test-database-1").await;

        observer.monitor_os_metrics().await;
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn log_file_markers_are_cached_and_stale_entries_evicted() {
        let mut api = MockCloudApi::default();
        api.instances
            .insert("test-database-1".to_string(), instance("test-database-1", false));
        api.log_files.lock().unwrap().insert(
            "test-database-1".to_string(),
            vec!["error/postgresql.log.2023-10-28-19".to_string()],
        );
        api.log_file_contents.lock().unwrap().insert(
            "error/postgresql.log.2023-10-28-19".to_string(),
            LogFilePortion {
                data: String::new(),
                marker: Some("14:200".to_string()),
            },
        );

        let api = Arc::new(api);
        let (events_tx, _events_rx) = mpsc::channel(100);
        let (slow_query_tx, _slow_query_rx) = mpsc::channel(100);
        let observer = CloudObserver::new(
            manual_config(),
            Arc::clone(&api) as Arc<dyn CloudApi>,
            events_tx,
            slow_query_tx,
        );
        track(&observer, "test-database-1").await;

        // first pass downloads with no marker and caches the new one
        observer.monitor_log_files().await;
        // second pass resumes from the cached marker
        observer.monitor_log_files().await;

        {
            let markers = api.seen_markers.lock().unwrap();
            assert_eq!(markers.as_slice(), &[None, Some("14:200".to_string())]);
        }
        {
            let state = observer.state.lock().await;
            assert_eq!(state.log_files.len(), 1);
            assert_eq!(state.log_files[0].marker.as_deref(), Some("14:200"));
        }

        // the file disappears from the listing, so its cursor is evicted
        api.log_files
            .lock()
            .unwrap()
            .insert("test-database-1".to_string(), Vec::new());
        observer.monitor_log_files().await;

        let state = observer.state.lock().await;
        assert!(state.log_files.is_empty());
    }

    #[tokio::test]
    async fn slow_queries_from_log_files_reach_the_channel() {
        let api = MockCloudApi::default();
        api.log_files.lock().unwrap().insert(
            "test-database-1".to_string(),
            vec!["error/postgresql.log".to_string()],
        );
        api.log_file_contents.lock().unwrap().insert(
            "error/postgresql.log".to_string(),
            LogFilePortion {
                data: "2023-10-28 19:01:19 UTC:10.0.0.12(57157):app_user@app:[13441]:LOG:  duration: 105.2 ms  plan:\n\tQuery Text: SELECT * FROM users WHERE id = 5\n\tSeq Scan on users  (cost=0.00..1.05 rows=1 width=8)".to_string(),
                marker: Some("1:100".to_string()),
            },
        );

        let mut api = api;
        api.instances
            .insert("test-database-1".to_string(), instance("test-database-1", false));

        let (observer, _events_rx, mut slow_query_rx) = observer_with_api(api);
        track(&observer, "test-database-1").await;

        observer.monitor_log_files().await;

        let slow_query = slow_query_rx.recv().await.unwrap();
        assert_eq!(slow_query.duration_ms, 105.2);
        assert_eq!(slow_query.server_name, "test-database-1");
    }
}

use std::collections::HashMap;

use crate::client::PostgresServer;
use crate::monitors::metrics::Metric;
use crate::monitors::query_stats::QueryStats;
use crate::monitors::replication::Replication;
use crate::monitors::schema::Database;
use crate::monitors::settings::Setting;

/// Fan-in channel capacity for the aggregator.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
/// Raw slow queries parsed out of log streams.
pub const SLOW_QUERY_CHANNEL_CAPACITY: usize = 100;
/// Log test sentinel notifications.
pub const LOG_TEST_CHANNEL_CAPACITY: usize = 10;
/// One-shot signal to start the logs server.
pub const START_LOGS_SERVER_CHANNEL_CAPACITY: usize = 1;
/// RDS/Aurora instance discovery notifications.
pub const INSTANCE_FOUND_CHANNEL_CAPACITY: usize = 10;

/// Metric values parsed from provider log streams are kept as strings as a
/// lowest common denominator.
pub type LogMetrics = HashMap<String, String>;

/// Typed events multiplexed onto the aggregator's fan-in channel.
#[derive(Debug, Clone)]
pub enum Event {
    Server(PostgresServer),
    Database(Database),
    Replication(Replication),
    Settings(Vec<Setting>),
    Metrics(Vec<Metric>),
    QueryStats(Vec<QueryStats>),
    LogMetrics(LogMetrics),
    RdsInstanceMetrics(RdsInstanceMetrics),
}

/// Emitted by the postgres observer when a discovered client turns out to
/// be backed by RDS or Aurora, so the cloud observer can start tracking it.
#[derive(Debug, Clone)]
pub struct RdsInstanceFound {
    pub instance_id: String,
    pub is_aurora: bool,
}

/// Cloud-side description of an RDS instance. The `monitoring_resource_id`
/// is required for OS metric log stream lookups.
#[derive(Debug, Clone, Default)]
pub struct RdsInstance {
    pub instance_id: String,
    pub instance_class: String,
    pub monitoring_resource_id: String,
    pub enhanced_monitoring_enabled: bool,
    pub is_aurora: bool,
}

#[derive(Debug, Clone)]
pub struct RdsInstanceMetrics {
    pub instance: RdsInstance,
    pub metrics: Vec<MetricResult>,
}

#[derive(Debug, Clone)]
pub struct MetricResult {
    pub name: String,
    pub datapoints: Vec<MetricDatapoint>,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDatapoint {
    pub measured_at: i64,
    pub value: f64,
}

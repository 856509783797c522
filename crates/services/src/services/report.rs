use std::collections::HashMap;
use std::io::Write;

use db::errors::ErrorReport;
use db::events::{LogMetrics, MetricResult, RdsInstanceMetrics};
use db::client::PostgresServer;
use db::monitors::metrics::Metric;
use db::monitors::query_stats::QueryStats;
use db::monitors::replication::{Replica, ReplicaClient};
use db::monitors::schema as schema_types;
use db::monitors::settings::Setting;
use db::platform::{AURORA_PLATFORM, RDS_PLATFORM};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use utils::num::{round2, round4};

use crate::services::data::DataSnapshot;

//
// The json message payload shipped to the ingest api. Optional fields are
// omitted entirely to keep the compressed report small.
//

fn is_zero_i64(value: &i64) -> bool {
    *value == 0
}

fn is_zero_f64(value: &f64) -> bool {
    *value == 0.0
}

/// Identity stamped on every report.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub uuid: String,
    pub version: String,
    pub host_platform: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log_metrics: Vec<LogMetrics>,
    #[serde(rename = "servers", skip_serializing_if = "Vec::is_empty")]
    pub postgres_servers: Vec<ApiPostgresServer>,
    pub reported_at: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub log_test_message_received_at: i64,
    pub agent: ApiAgent,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiPostgresServer {
    pub config_name: String,
    pub config_var_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub platform: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<ApiDatabase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica: Option<ApiReplica>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replicas: Vec<ApiReplicaClient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<ApiMetric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queries: Option<ApiQueries>,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub max_connections: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pg_bouncer: Option<ApiPgBouncer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rds_instance: Option<ApiRdsInstance>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub settings: Vec<ApiSetting>,
    pub version: String,
    pub monitored_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiPgBouncer {
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub max_server_connections: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiRdsInstance {
    pub enhanced_monitoring: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub instance_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub instance_class: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<ApiMetric>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiMetric {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub entity: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ApiMetricValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiMetricValue {
    pub value: f64,
    pub measured_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiQueries {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stats: Vec<ApiQuery>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiQuery {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub database: String,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub query_id: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub query: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub explain: String,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub calls: i64,
    #[serde(rename = "time", skip_serializing_if = "is_zero_f64")]
    pub total_time: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub mean_time: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub min_time: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub max_time: f64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub rows: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub shared_blocks_hit: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub shared_blocks_read: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub shared_blocks_dirtied: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub shared_blocks_written: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub local_blocks_hit: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub local_blocks_read: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub local_blocks_dirtied: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub local_blocks_written: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub temp_blocks_read: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub temp_blocks_written: i64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub block_read_time: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub block_write_time: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub block_total_time: f64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub measured_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiDatabase {
    pub name: String,
    pub schemas: Vec<ApiSchema>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiSchema {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<ApiTable>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiTable {
    pub name: String,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub total_bytes: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub total_bytes_total: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub index_bytes: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub index_bytes_total: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub toast_bytes: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub toast_bytes_total: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub table_bytes: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub table_bytes_total: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub bloat_bytes: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub bloat_bytes_total: i64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub bloat_factor: f64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub sequential_scans: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub sequential_scan_read_rows: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub index_scans: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub index_scan_read_rows: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub inserted_rows: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub updated_rows: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub deleted_rows: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub live_row_estimate: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub live_row_estimate_total: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub dead_row_estimate: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub dead_row_estimate_total: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub modified_rows_since_analyze: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub last_vacuum_at: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub last_autovacuum_at: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub last_analyze_at: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub last_autoanalyze_at: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub vacuum_count: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub autovacuum_count: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub analyze_count: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub autoanalyze_count: i64,
    #[serde(rename = "blocks_read", skip_serializing_if = "is_zero_i64")]
    pub disk_blocks_read: i64,
    #[serde(rename = "blocks_hit", skip_serializing_if = "is_zero_i64")]
    pub disk_blocks_hit: i64,
    #[serde(rename = "blocks_hit_percent", skip_serializing_if = "is_zero_f64")]
    pub disk_blocks_hit_percent: f64,
    #[serde(rename = "index_blocks_read", skip_serializing_if = "is_zero_i64")]
    pub disk_index_blocks_read: i64,
    #[serde(rename = "index_blocks_hit", skip_serializing_if = "is_zero_i64")]
    pub disk_index_blocks_hit: i64,
    #[serde(rename = "toast_blocks_read", skip_serializing_if = "is_zero_i64")]
    pub disk_toast_blocks_read: i64,
    #[serde(rename = "toast_blocks_hit", skip_serializing_if = "is_zero_i64")]
    pub disk_toast_blocks_hit: i64,
    #[serde(rename = "toast_index_blocks_read", skip_serializing_if = "is_zero_i64")]
    pub disk_toast_index_blocks_read: i64,
    #[serde(rename = "toast_index_blocks_hit", skip_serializing_if = "is_zero_i64")]
    pub disk_toast_index_blocks_hit: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ApiColumn>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<ApiIndex>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiColumn {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub data_type: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub max_length: i64,
    #[serde(rename = "precision", skip_serializing_if = "is_zero_i64")]
    pub numeric_precision: i64,
    #[serde(rename = "scale", skip_serializing_if = "is_zero_i64")]
    pub numeric_scale: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub interval_type: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_identity: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiIndex {
    pub name: String,
    pub unique: bool,
    pub unused: bool,
    pub valid: bool,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub bytes: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub bytes_total: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub bloat_bytes: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub bloat_bytes_total: i64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub bloat_factor: f64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub scans: i64,
    #[serde(rename = "blocks_read", skip_serializing_if = "is_zero_i64")]
    pub disk_blocks_read: i64,
    #[serde(rename = "blocks_hit", skip_serializing_if = "is_zero_i64")]
    pub disk_blocks_hit: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub definition: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiAgent {
    pub uuid: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ApiStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiError>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host_platform: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiStats {
    #[serde(rename = "logs", skip_serializing_if = "Option::is_none")]
    pub log_stats: Option<ApiLogStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiLogStats {
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub received: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub postgres: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub handled: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub metric_lines: i64,
    #[serde(rename = "metrics_dropped", skip_serializing_if = "is_zero_i64")]
    pub metric_lines_dropped: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub slow_queries: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub slow_queries_dropped: i64,
}

/// Replica server and client hostnames, IPs and ports are deliberately
/// not exposed in the report.
#[derive(Debug, Clone, Serialize)]
pub struct ApiReplica {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub application_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub primary_config_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub panic: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stack_trace: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiReplicaClient {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub application_name: String,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub backend_start: i64,
    #[serde(rename = "backend_xmin", skip_serializing_if = "is_zero_i64")]
    pub backend_xmin: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub state: String,
    pub sync_priority: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sync_state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiSetting {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub unit: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub context: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub var_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub min_val: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub max_val: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub enum_vals: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub boot_val: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reset_val: String,
    pub pending_restart: bool,
}

impl ReportRequest {
    pub fn new(
        agent: &AgentInfo,
        data: &DataSnapshot,
        reported_at: i64,
        stats: &HashMap<String, i64>,
    ) -> Self {
        Self {
            log_metrics: data.log_metrics.clone(),
            postgres_servers: convert_postgres_servers(data),
            reported_at,
            log_test_message_received_at: data.log_test_message_received_at,
            agent: ApiAgent {
                uuid: agent.uuid.clone(),
                version: agent.version.clone(),
                stats: convert_stats(stats),
                errors: convert_errors(&data.errors),
                host_platform: agent.host_platform.clone(),
            },
        }
    }

    /// Don't ship an empty request.
    pub fn is_valid(&self) -> bool {
        !self.log_metrics.is_empty()
            || !self.postgres_servers.is_empty()
            || self.log_test_message_received_at != 0
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Gzip the json payload; a quick test showed roughly an 8x space
    /// saving over the raw json.
    pub fn to_compressed_json(&self) -> Result<Vec<u8>, std::io::Error> {
        let json = self.to_json().map_err(std::io::Error::other)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        encoder.finish()
    }
}

fn convert_postgres_servers(data: &DataSnapshot) -> Vec<ApiPostgresServer> {
    let mut servers = Vec::new();

    for from in &data.postgres_servers {
        let mut server = ApiPostgresServer {
            config_name: from.server_id.name.clone(),
            config_var_name: from.server_id.config_var_name.clone(),
            platform: from.platform.clone(),
            databases: Vec::new(),
            replica: None,
            replicas: Vec::new(),
            metrics: convert_metrics(&from.server_id.name, &data.metrics),
            queries: convert_queries(&from.server_id.name, &data.query_stats),
            max_connections: from.max_connections,
            pg_bouncer: from.pg_bouncer.as_ref().map(|pg_bouncer| ApiPgBouncer {
                max_server_connections: pg_bouncer.max_server_connections,
                version: pg_bouncer.version.clone(),
            }),
            rds_instance: convert_rds_instance(from, &data.rds_metrics),
            settings: convert_settings(&data.settings, from),
            version: from.version.clone(),
            monitored_at: from.monitored_at,
        };

        // only one tracked database and replication state per server
        for database in &data.databases {
            if database.server_id.name == from.server_id.name {
                server.databases.push(convert_database(database));
            }
        }

        for replication in &data.replications {
            if replication.server_id.name == from.server_id.name {
                server.replica = convert_replica(replication.replica.as_ref());
                server.replicas = convert_replicas(&replication.replicas);
            }
        }

        servers.push(server);
    }

    servers
}

/// Coalesce raw measurements into one metric per `(name, entity)` with an
/// ordered list of timestamped values.
fn convert_metrics(name: &str, from_metrics: &[Metric]) -> Vec<ApiMetric> {
    // unique metric name and entity tuples, in first-seen order
    let mut metric_ids: Vec<(&str, &str)> = Vec::new();
    for from in from_metrics {
        if from.server_id.name == name {
            let id = (from.name.as_str(), from.entity.as_str());
            if !metric_ids.contains(&id) {
                metric_ids.push(id);
            }
        }
    }

    let mut metrics = Vec::new();
    for (metric_name, entity) in metric_ids {
        let values: Vec<ApiMetricValue> = from_metrics
            .iter()
            .filter(|from| {
                from.server_id.name == name && from.name == metric_name && from.entity == entity
            })
            .map(|from| ApiMetricValue {
                value: round4(from.value),
                measured_at: from.measured_at,
            })
            .collect();

        if !values.is_empty() {
            metrics.push(ApiMetric {
                name: metric_name.to_string(),
                entity: entity.to_string(),
                values,
            });
        }
    }

    metrics
}

fn convert_rds_instance(
    server: &PostgresServer,
    from_rds_metrics: &[RdsInstanceMetrics],
) -> Option<ApiRdsInstance> {
    let from = from_rds_metrics.iter().find(|from| {
        from.instance.instance_id == server.server_id.name
            && ((from.instance.is_aurora && server.platform == AURORA_PLATFORM)
                || (!from.instance.is_aurora && server.platform == RDS_PLATFORM))
    })?;

    Some(ApiRdsInstance {
        enhanced_monitoring: from.instance.enhanced_monitoring_enabled,
        instance_id: from.instance.instance_id.clone(),
        instance_class: from.instance.instance_class.clone(),
        metrics: convert_rds_metrics(&from.metrics),
    })
}

fn convert_rds_metrics(from_metrics: &[MetricResult]) -> Vec<ApiMetric> {
    let mut metrics = Vec::new();

    for from in from_metrics {
        let values: Vec<ApiMetricValue> = from
            .datapoints
            .iter()
            .map(|datapoint| ApiMetricValue {
                value: round4(datapoint.value),
                measured_at: datapoint.measured_at,
            })
            .collect();

        if !values.is_empty() {
            metrics.push(ApiMetric {
                name: from.name.clone(),
                entity: String::new(),
                values,
            });
        }
    }

    metrics
}

fn convert_queries(name: &str, from_query_stats: &[QueryStats]) -> Option<ApiQueries> {
    let stats: Vec<ApiQuery> = from_query_stats
        .iter()
        .filter(|from| from.server_id.name == name)
        .map(convert_query_stats)
        .collect();

    if stats.is_empty() {
        None
    } else {
        Some(ApiQueries { stats })
    }
}

fn convert_query_stats(from: &QueryStats) -> ApiQuery {
    ApiQuery {
        database: from.server_id.database.clone(),
        query_id: from.query_id,
        fingerprint: from.fingerprint.clone(),
        query: from.query.clone(),
        comment: from.comment.clone(),
        explain: from.explain.clone(),
        calls: from.calls,
        total_time: round2(from.total_time),
        mean_time: round2(from.mean_time),
        min_time: round2(from.min_time),
        max_time: round2(from.max_time),
        rows: from.rows,
        shared_blocks_hit: from.shared_blocks_hit,
        shared_blocks_read: from.shared_blocks_read,
        shared_blocks_dirtied: from.shared_blocks_dirtied,
        shared_blocks_written: from.shared_blocks_written,
        local_blocks_hit: from.local_blocks_hit,
        local_blocks_read: from.local_blocks_read,
        local_blocks_dirtied: from.local_blocks_dirtied,
        local_blocks_written: from.local_blocks_written,
        temp_blocks_read: from.temp_blocks_read,
        temp_blocks_written: from.temp_blocks_written,
        block_read_time: round2(from.block_read_time),
        block_write_time: round2(from.block_write_time),
        block_total_time: round2(from.total_block_io_time),
        measured_at: from.measured_at,
    }
}

fn convert_database(from: &schema_types::Database) -> ApiDatabase {
    ApiDatabase {
        name: from.name.clone(),
        schemas: from
            .schemas
            .iter()
            .map(|schema| ApiSchema {
                name: schema.name.clone(),
                tables: schema.tables.iter().map(convert_table).collect(),
            })
            .collect(),
    }
}

fn convert_table(from: &schema_types::Table) -> ApiTable {
    ApiTable {
        name: from.name.clone(),
        total_bytes: from.total_bytes,
        total_bytes_total: from.total_bytes_total,
        index_bytes: from.index_bytes,
        index_bytes_total: from.index_bytes_total,
        toast_bytes: from.toast_bytes,
        toast_bytes_total: from.toast_bytes_total,
        table_bytes: from.table_bytes,
        table_bytes_total: from.table_bytes_total,
        bloat_bytes: from.bloat_bytes,
        bloat_bytes_total: from.bloat_bytes_total,
        bloat_factor: from.bloat_factor,
        sequential_scans: from.sequential_scans,
        sequential_scan_read_rows: from.sequential_scan_read_rows,
        index_scans: from.index_scans,
        index_scan_read_rows: from.index_scan_read_rows,
        inserted_rows: from.inserted_rows,
        updated_rows: from.updated_rows,
        deleted_rows: from.deleted_rows,
        live_row_estimate: from.live_row_estimate,
        live_row_estimate_total: from.live_row_estimate_total,
        dead_row_estimate: from.dead_row_estimate,
        dead_row_estimate_total: from.dead_row_estimate_total,
        modified_rows_since_analyze: from.modified_rows_since_analyze,
        last_vacuum_at: from.last_vacuum_at.unwrap_or(0),
        last_autovacuum_at: from.last_autovacuum_at.unwrap_or(0),
        last_analyze_at: from.last_analyze_at.unwrap_or(0),
        last_autoanalyze_at: from.last_autoanalyze_at.unwrap_or(0),
        vacuum_count: from.vacuum_count,
        autovacuum_count: from.autovacuum_count,
        analyze_count: from.analyze_count,
        autoanalyze_count: from.autoanalyze_count,
        disk_blocks_read: from.disk_blocks_read,
        disk_blocks_hit: from.disk_blocks_hit,
        disk_blocks_hit_percent: from.disk_blocks_hit_percent,
        disk_index_blocks_read: from.disk_index_blocks_read,
        disk_index_blocks_hit: from.disk_index_blocks_hit,
        disk_toast_blocks_read: from.disk_toast_blocks_read,
        disk_toast_blocks_hit: from.disk_toast_blocks_hit,
        disk_toast_index_blocks_read: from.disk_toast_index_blocks_read,
        disk_toast_index_blocks_hit: from.disk_toast_index_blocks_hit,
        columns: from.columns.iter().map(convert_column).collect(),
        indexes: from.indexes.iter().map(convert_index).collect(),
    }
}

fn convert_column(from: &schema_types::Column) -> ApiColumn {
    ApiColumn {
        name: from.name.clone(),
        default: from.default.clone().unwrap_or_default(),
        data_type: from.data_type.clone(),
        nullable: from.nullable.as_deref() == Some("YES"),
        max_length: from.max_length.unwrap_or(0),
        numeric_precision: from.numeric_precision.unwrap_or(0),
        numeric_scale: from.numeric_scale.unwrap_or(0),
        interval_type: from.interval_type.clone().unwrap_or_default(),
        is_identity: from.is_identity.as_deref() == Some("YES"),
    }
}

fn convert_index(from: &schema_types::Index) -> ApiIndex {
    ApiIndex {
        name: from.name.clone(),
        unique: from.unique,
        unused: from.unused,
        valid: from.valid,
        bytes: from.bytes,
        bytes_total: from.bytes_total,
        bloat_bytes: from.bloat_bytes,
        bloat_bytes_total: from.bloat_bytes_total,
        bloat_factor: from.bloat_factor,
        scans: from.scans,
        disk_blocks_read: from.disk_blocks_read,
        disk_blocks_hit: from.disk_blocks_hit,
        definition: from.definition.clone(),
    }
}

fn convert_replica(from: Option<&Replica>) -> Option<ApiReplica> {
    let from = from?;
    Some(ApiReplica {
        application_name: from.application_name.clone(),
        primary_config_name: from.primary_config_name.clone(),
        status: from.status.clone(),
    })
}

fn convert_replicas(from: &[ReplicaClient]) -> Vec<ApiReplicaClient> {
    from.iter()
        .map(|from| ApiReplicaClient {
            application_name: from.application_name.clone(),
            backend_start: from.backend_start.unwrap_or(0),
            backend_xmin: from.backend_xmin.unwrap_or(0),
            state: from.state.clone().unwrap_or_default(),
            sync_priority: from.sync_priority.unwrap_or(0) as i64,
            sync_state: from.sync_state.clone().unwrap_or_default(),
        })
        .collect()
}

fn convert_settings(from: &[Setting], server: &PostgresServer) -> Vec<ApiSetting> {
    from.iter()
        .filter(|setting| setting.server_id.name == server.server_id.name)
        .map(|from| ApiSetting {
            name: from.name.clone(),
            value: from.value.clone(),
            unit: from.unit.clone().unwrap_or_default(),
            category: from.category.clone(),
            description: from.description.clone(),
            context: from.context.clone(),
            var_type: from.var_type.clone(),
            source: from.source.clone(),
            min_val: from.min_val.clone().unwrap_or_default(),
            max_val: from.max_val.clone().unwrap_or_default(),
            enum_vals: from.enum_vals.clone().unwrap_or_default(),
            boot_val: from.boot_val.clone().unwrap_or_default(),
            reset_val: from.reset_val.clone().unwrap_or_default(),
            pending_restart: from.pending_restart,
        })
        .collect()
}

fn convert_stats(stats: &HashMap<String, i64>) -> Option<ApiStats> {
    if stats.is_empty() {
        return None;
    }

    let get = |key: &str| stats.get(key).copied().unwrap_or(0);

    Some(ApiStats {
        log_stats: Some(ApiLogStats {
            received: get("logs.received"),
            postgres: get("logs.postgres"),
            handled: get("logs.handled"),
            metric_lines: get("logs.metric_lines"),
            metric_lines_dropped: get("logs.metric_lines.dropped"),
            slow_queries: get("logs.slow_queries"),
            slow_queries_dropped: get("logs.slow_queries.dropped"),
        }),
    })
}

fn convert_errors(errors: &[ErrorReport]) -> Vec<ApiError> {
    errors
        .iter()
        .map(|err| ApiError {
            error: err.error.clone(),
            panic: err.panic,
            stack_trace: err.stack_trace.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use db::client::ServerId;
    use flate2::read::GzDecoder;

    use super::*;

    fn agent_info() -> AgentInfo {
        AgentInfo {
            uuid: "00000000-0000-0000-0000-000000000001".into(),
            version: "0.1.0".into(),
            host_platform: "heroku".into(),
        }
    }

    fn server_id(name: &str) -> ServerId {
        ServerId {
            name: name.into(),
            config_var_name: format!("{name}_URL"),
            database: "app".into(),
        }
    }

    fn snapshot_with_server() -> DataSnapshot {
        DataSnapshot {
            postgres_servers: vec![PostgresServer {
                server_id: server_id("GREEN"),
                platform: "heroku".into(),
                max_connections: 100,
                pg_bouncer: None,
                version: "14.1".into(),
                monitored_at: 1000,
            }],
            ..DataSnapshot::default()
        }
    }

    #[test]
    fn empty_snapshot_builds_an_invalid_request() {
        let request =
            ReportRequest::new(&agent_info(), &DataSnapshot::default(), 1000, &HashMap::new());
        assert!(!request.is_valid());
    }

    #[test]
    fn log_test_message_alone_is_valid() {
        let snapshot = DataSnapshot {
            log_test_message_received_at: 42,
            ..DataSnapshot::default()
        };
        let request = ReportRequest::new(&agent_info(), &snapshot, 1000, &HashMap::new());
        assert!(request.is_valid());
    }

    #[test]
    fn metrics_coalesce_by_name_and_entity() {
        let mut snapshot = snapshot_with_server();
        snapshot.metrics = vec![
            Metric::new("connections.used", 5.0, "", server_id("GREEN"), 10),
            Metric::new("connections.used", 7.0, "", server_id("GREEN"), 40),
            Metric::new("connections.used", 3.0, "db/app", server_id("GREEN"), 40),
            Metric::new("connections.used", 9.0, "", server_id("OTHER"), 40),
        ];

        let request = ReportRequest::new(&agent_info(), &snapshot, 1000, &HashMap::new());
        let metrics = &request.postgres_servers[0].metrics;

        // same name with a different entity stays separate
        assert_eq!(metrics.len(), 2);
        let no_entity = metrics.iter().find(|m| m.entity.is_empty()).unwrap();
        assert_eq!(no_entity.values.len(), 2);
        assert_eq!(no_entity.values[0].measured_at, 10);
        assert_eq!(no_entity.values[1].measured_at, 40);
    }

    #[test]
    fn report_json_omits_empty_fields() {
        let request =
            ReportRequest::new(&agent_info(), &snapshot_with_server(), 1000, &HashMap::new());
        let json = String::from_utf8(request.to_json().unwrap()).unwrap();

        assert!(json.contains("\"servers\""));
        assert!(json.contains("\"config_name\":\"GREEN\""));
        assert!(!json.contains("log_metrics"));
        assert!(!json.contains("log_test_message_received_at"));
        assert!(!json.contains("\"stats\""));
        assert!(!json.contains("\"queries\""));
    }

    #[test]
    fn compressed_json_round_trips() {
        let request =
            ReportRequest::new(&agent_info(), &snapshot_with_server(), 1000, &HashMap::new());

        let json = request.to_json().unwrap();
        let compressed = request.to_compressed_json().unwrap();

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();

        assert_eq!(decompressed, json);
    }

    #[test]
    fn query_times_round_to_two_places() {
        let mut snapshot = snapshot_with_server();
        snapshot.query_stats = vec![QueryStats {
            server_id: server_id("GREEN"),
            fingerprint: "abc".into(),
            query: "select ?".into(),
            calls: 3,
            total_time: 10.2345,
            ..QueryStats::default()
        }];

        let request = ReportRequest::new(&agent_info(), &snapshot, 1000, &HashMap::new());
        let queries = request.postgres_servers[0].queries.as_ref().unwrap();
        assert_eq!(queries.stats[0].total_time, 10.24);
    }

    #[test]
    fn log_stats_map_converts_to_api_stats() {
        let mut stats = HashMap::new();
        stats.insert("logs.received".to_string(), 12_i64);
        stats.insert("logs.slow_queries".to_string(), 2_i64);

        let api_stats = convert_stats(&stats).unwrap();
        let log_stats = api_stats.log_stats.unwrap();
        assert_eq!(log_stats.received, 12);
        assert_eq!(log_stats.slow_queries, 2);
        assert_eq!(log_stats.handled, 0);

        assert!(convert_stats(&HashMap::new()).is_none());
    }
}

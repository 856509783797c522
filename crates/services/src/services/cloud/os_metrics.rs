use db::events::{MetricDatapoint, MetricResult};
use serde::Deserialize;
use tracing::error;

//
// Enhanced monitoring OS metrics arrive as one JSON log event per
// granularity period. The most recent event is decoded into normalized
// aws.rds.os.* metric names.
//

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RdsOsMetricsEvent {
    pub engine: String,
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    #[serde(rename = "instanceResourceID")]
    pub instance_resource_id: String,
    pub timestamp: String,
    pub version: f64,
    pub uptime: String,
    #[serde(rename = "numVCPUs")]
    pub num_vcpus: i32,

    #[serde(rename = "cpuUtilization")]
    pub cpu_utilization: RdsCpuUtilization,
    #[serde(rename = "loadAverageMinute")]
    pub load_average: RdsLoadAverage,
    pub memory: RdsMemory,
    pub swap: RdsSwap,
    #[serde(rename = "diskIO")]
    pub disk_io: Vec<RdsDiskIo>,
    #[serde(rename = "fileSys")]
    pub file_sys: Vec<RdsFileSys>,
    // network needs deltas and processList is noise, both are ignored
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RdsCpuUtilization {
    pub guest: f64,
    pub irq: f64,
    pub system: f64,
    pub wait: f64,
    pub idle: f64,
    pub user: f64,
    pub total: f64,
    pub steal: f64,
    pub nice: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RdsLoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RdsMemory {
    pub writeback: i64,
    #[serde(rename = "hugePagesFree")]
    pub huge_pages_free: i64,
    #[serde(rename = "hugePagesRsvd")]
    pub huge_pages_reserved: i64,
    #[serde(rename = "hugePagesSurp")]
    pub huge_pages_surplus: i64,
    #[serde(rename = "hugePagesSize")]
    pub huge_pages_size: i64,
    #[serde(rename = "hugePagesTotal")]
    pub huge_pages_total: i64,
    pub cached: i64,
    pub free: i64,
    pub active: i64,
    pub inactive: i64,
    pub total: i64,
    pub dirty: i64,
    #[serde(rename = "pageTables")]
    pub page_tables: i64,
    pub mapped: i64,
    pub slab: i64,
    pub buffers: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RdsSwap {
    pub cached: i64,
    pub total: i64,
    pub free: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RdsDiskIo {
    pub device: String,
    #[serde(rename = "avgQueueLen")]
    pub avg_queue_len: f64,
    #[serde(rename = "avgReqSz")]
    pub avg_request_size: f64,
    #[serde(rename = "await")]
    pub io_await: f64,
    #[serde(rename = "readLatency")]
    pub read_latency: f64,
    #[serde(rename = "writeLatency")]
    pub write_latency: f64,
    #[serde(rename = "writeThroughput")]
    pub write_throughput: f64,
    #[serde(rename = "readThroughput")]
    pub read_throughput: f64,
    #[serde(rename = "readIOsPS")]
    pub read_iops: f64,
    #[serde(rename = "readKb")]
    pub read_kb: f64,
    #[serde(rename = "readKbPS")]
    pub read_kbps: f64,
    #[serde(rename = "rrqmPS")]
    pub rrqmps: f64,
    pub tps: f64,
    #[serde(rename = "writeIOsPS")]
    pub write_iops: f64,
    #[serde(rename = "writeKb")]
    pub write_kb: f64,
    #[serde(rename = "writeKbPS")]
    pub write_kbps: f64,
    #[serde(rename = "wrqmPS")]
    pub wrqmps: f64,
    pub util: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RdsFileSys {
    pub name: String,
    #[serde(rename = "mountPoint")]
    pub mount_point: String,
    pub used: i64,
    pub total: i64,
    #[serde(rename = "usedPercent")]
    pub used_percent: f64,
    #[serde(rename = "usedFiles")]
    pub used_files: i64,
    #[serde(rename = "maxFiles")]
    pub max_files: i64,
    #[serde(rename = "usedFilePercent")]
    pub used_files_percent: f64,
}

/// Decode one OS metrics log event into normalized metric results, one
/// datapoint each.
pub fn convert_os_log_event_into_metrics(message: &str) -> Vec<MetricResult> {
    let event: RdsOsMetricsEvent = match serde_json::from_str(message) {
        Ok(event) => event,
        Err(err) => {
            error!(%err, "error decoding rds os metrics event");
            return Vec::new();
        }
    };

    let measured_at = utils::time::parse_timestamp_to_unix(&event.timestamp);
    let mut results = Vec::new();

    let mut metric = |name: String, value: f64| {
        results.push(MetricResult {
            name,
            datapoints: vec![MetricDatapoint { measured_at, value }],
        });
    };

    // cpu
    metric("aws.rds.os.cpu.guest".into(), event.cpu_utilization.guest);
    metric("aws.rds.os.cpu.irq".into(), event.cpu_utilization.irq);
    metric("aws.rds.os.cpu.idle".into(), event.cpu_utilization.idle);
    metric("aws.rds.os.cpu.nice".into(), event.cpu_utilization.nice);
    metric("aws.rds.os.cpu.steal".into(), event.cpu_utilization.steal);
    metric("aws.rds.os.cpu.system".into(), event.cpu_utilization.system);
    metric("aws.rds.os.cpu.total".into(), event.cpu_utilization.total);
    metric("aws.rds.os.cpu.user".into(), event.cpu_utilization.user);
    metric("aws.rds.os.cpu.wait".into(), event.cpu_utilization.wait);

    // load avg
    metric("aws.rds.os.load_avg.1m".into(), event.load_average.one);
    metric("aws.rds.os.load_avg.5m".into(), event.load_average.five);
    metric("aws.rds.os.load_avg.15m".into(), event.load_average.fifteen);

    // memory
    metric("aws.rds.os.memory.active".into(), event.memory.active as f64);
    metric("aws.rds.os.memory.inactive".into(), event.memory.inactive as f64);
    metric("aws.rds.os.memory.free".into(), event.memory.free as f64);
    metric("aws.rds.os.memory.cached".into(), event.memory.cached as f64);
    metric("aws.rds.os.memory.total".into(), event.memory.total as f64);
    metric("aws.rds.os.memory.dirty".into(), event.memory.dirty as f64);
    metric("aws.rds.os.memory.page_tables".into(), event.memory.page_tables as f64);
    metric("aws.rds.os.memory.mapped".into(), event.memory.mapped as f64);
    metric("aws.rds.os.memory.slab".into(), event.memory.slab as f64);
    metric("aws.rds.os.memory.buffers".into(), event.memory.buffers as f64);
    metric("aws.rds.os.memory.write_back".into(), event.memory.writeback as f64);
    metric("aws.rds.os.memory.huge_pages.free".into(), event.memory.huge_pages_free as f64);
    metric(
        "aws.rds.os.memory.huge_pages.reserved".into(),
        event.memory.huge_pages_reserved as f64,
    );
    metric(
        "aws.rds.os.memory.huge_pages.surplus".into(),
        event.memory.huge_pages_surplus as f64,
    );
    metric("aws.rds.os.memory.huge_pages.size".into(), event.memory.huge_pages_size as f64);
    metric("aws.rds.os.memory.huge_pages.total".into(), event.memory.huge_pages_total as f64);

    // swap
    metric("aws.rds.os.memory.swap.cached".into(), event.swap.cached as f64);
    metric("aws.rds.os.memory.swap.total".into(), event.swap.total as f64);
    metric("aws.rds.os.memory.swap.free".into(), event.swap.free as f64);

    // disk io per device
    for disk_io in &event.disk_io {
        let device = if disk_io.device.is_empty() {
            "default"
        } else {
            disk_io.device.as_str()
        };
        let prefix = format!("aws.rds.os.disk.io.{device}");
        metric(format!("{prefix}.avg_queue_length"), disk_io.avg_queue_len);
        metric(format!("{prefix}.avg_request_size"), disk_io.avg_request_size);
        metric(format!("{prefix}.await"), disk_io.io_await);
        metric(format!("{prefix}.rrqmps"), disk_io.rrqmps);
        metric(format!("{prefix}.read.iops"), disk_io.read_iops);
        metric(format!("{prefix}.read.kb"), disk_io.read_kb);
        metric(format!("{prefix}.read.kbps"), disk_io.read_kbps);
        metric(format!("{prefix}.read.latency"), disk_io.read_latency);
        metric(format!("{prefix}.read.throughput"), disk_io.read_throughput);
        metric(format!("{prefix}.transactions_per_sec"), disk_io.tps);
        metric(format!("{prefix}.util"), disk_io.util);
        metric(format!("{prefix}.wrqmps"), disk_io.wrqmps);
        metric(format!("{prefix}.write.iops"), disk_io.write_iops);
        metric(format!("{prefix}.write.kb"), disk_io.write_kb);
        metric(format!("{prefix}.write.kbps"), disk_io.write_kbps);
        metric(format!("{prefix}.write.latency"), disk_io.write_latency);
        metric(format!("{prefix}.write.throughput"), disk_io.write_throughput);
    }

    // filesystem usage
    for file_sys in &event.file_sys {
        let name = if file_sys.name.is_empty() {
            // fall back to the mountpoint for an identifier
            file_sys.mount_point.replace('/', "")
        } else {
            file_sys.name.clone()
        };
        let prefix = format!("aws.rds.os.filesys.{name}");
        metric(format!("{prefix}.used"), file_sys.used as f64);
        metric(format!("{prefix}.total"), file_sys.total as f64);
        metric(format!("{prefix}.used_percent"), file_sys.used_percent);
        metric(format!("{prefix}.used_files"), file_sys.used_files as f64);
        metric(format!("{prefix}.max_files"), file_sys.max_files as f64);
        metric(format!("{prefix}.used_files_percent"), file_sys.used_files_percent);
    }

    results
}

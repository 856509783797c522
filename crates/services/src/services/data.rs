use std::sync::Mutex;

use db::errors::ErrorReport;
use db::events::{Event, LogMetrics, RdsInstanceMetrics};
use db::client::PostgresServer;
use db::monitors::metrics::Metric;
use db::monitors::query_stats::QueryStats;
use db::monitors::replication::Replication;
use db::monitors::schema::Database;
use db::monitors::settings::Setting;

/// At most this many error reports are kept per shipment; one panic is
/// always admitted even past the cap.
const MAX_ERROR_REPORTS: usize = 10;

/// Everything accumulated between two report shipments. A single mutex
/// guards all accumulators so `copy_and_reset` is atomic with respect to
/// every `add_*`.
#[derive(Debug, Default)]
pub struct Data {
    inner: Mutex<DataSnapshot>,
}

/// A plain snapshot of the accumulators, also the shape handed to report
/// building after a reset.
#[derive(Debug, Clone, Default)]
pub struct DataSnapshot {
    pub log_metrics: Vec<LogMetrics>,
    pub metrics: Vec<Metric>,
    pub postgres_servers: Vec<PostgresServer>,
    pub databases: Vec<Database>,
    pub replications: Vec<Replication>,
    pub settings: Vec<Setting>,
    pub query_stats: Vec<QueryStats>,
    pub rds_metrics: Vec<RdsInstanceMetrics>,
    pub errors: Vec<ErrorReport>,
    pub log_test_message_received_at: i64,
}

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    /// Demux one aggregator event into the matching accumulator.
    pub fn add_event(&self, event: Event) {
        match event {
            Event::Server(server) => self.add_postgres_server(server),
            Event::Database(database) => self.add_database(database),
            Event::Replication(replication) => self.add_replication(replication),
            Event::Settings(settings) => self.add_settings(settings),
            Event::Metrics(metrics) => self.add_metrics(metrics),
            Event::QueryStats(stats) => self.add_query_stats(stats),
            Event::LogMetrics(metrics) => self.add_log_metrics(metrics),
            Event::RdsInstanceMetrics(metrics) => self.add_rds_metrics(metrics),
        }
    }

    pub fn add_log_test_message_received_at(&self, received_at: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.log_test_message_received_at = received_at;
    }

    pub fn add_log_metrics(&self, new_log_metrics: LogMetrics) {
        let mut inner = self.inner.lock().unwrap();
        inner.log_metrics.push(new_log_metrics);
    }

    /// Metric records just append; they are coalesced by name and entity
    /// when the report request is built.
    pub fn add_metrics(&self, metrics: Vec<Metric>) {
        let mut inner = self.inner.lock().unwrap();
        inner.metrics.extend(metrics);
    }

    /// Upsert by `(name, config_var_name)`. Later data for the same server
    /// merges into it: the latest monitored_at always wins, version and
    /// max_connections only overwrite when set.
    pub fn add_postgres_server(&self, new_server: PostgresServer) {
        let mut inner = self.inner.lock().unwrap();

        let existing = inner.postgres_servers.iter_mut().find(|server| {
            server.server_id.name == new_server.server_id.name
                && server.server_id.config_var_name == new_server.server_id.config_var_name
        });

        let Some(existing) = existing else {
            inner.postgres_servers.push(new_server);
            return;
        };

        existing.monitored_at = new_server.monitored_at;

        if !new_server.version.is_empty() {
            existing.version = new_server.version;
        }

        if new_server.max_connections != 0 {
            existing.max_connections = new_server.max_connections;
        }
    }

    /// Only the latest schema per database matters, so replace in place.
    pub fn add_database(&self, database: Database) {
        let mut inner = self.inner.lock().unwrap();

        match inner
            .databases
            .iter_mut()
            .find(|existing| existing.server_id == database.server_id)
        {
            Some(existing) => *existing = database,
            None => inner.databases.push(database),
        }
    }

    /// Replication state is replaced per server, latest snapshot wins.
    pub fn add_replication(&self, replication: Replication) {
        let mut inner = self.inner.lock().unwrap();

        match inner
            .replications
            .iter_mut()
            .find(|existing| existing.server_id == replication.server_id)
        {
            Some(existing) => *existing = replication,
            None => inner.replications.push(replication),
        }
    }

    pub fn add_settings(&self, settings: Vec<Setting>) {
        for setting in settings {
            self.add_setting(setting);
        }
    }

    /// Settings are replaced by `(server, name)`.
    pub fn add_setting(&self, setting: Setting) {
        let mut inner = self.inner.lock().unwrap();

        match inner.settings.iter_mut().find(|existing| {
            existing.name == setting.name && existing.server_id == setting.server_id
        }) {
            Some(existing) => *existing = setting,
            None => inner.settings.push(setting),
        }
    }

    /// Query stats accumulate over the shipment interval.
    pub fn add_query_stats(&self, stats: Vec<QueryStats>) {
        let mut inner = self.inner.lock().unwrap();
        inner.query_stats.extend(stats);
    }

    pub fn add_rds_metrics(&self, metrics: RdsInstanceMetrics) {
        let mut inner = self.inner.lock().unwrap();
        inner.rds_metrics.push(metrics);
    }

    /// Track the first 10 errors. Past the cap a panic is still admitted,
    /// unless a panic is already stored.
    pub fn add_error_report(&self, error: ErrorReport) {
        let mut inner = self.inner.lock().unwrap();

        if inner.errors.len() < MAX_ERROR_REPORTS {
            inner.errors.push(error);
        } else if error.panic && !inner.errors.iter().any(|err| err.panic) {
            inner.errors.push(error);
        }
    }

    /// Atomically snapshot and clear every accumulator for shipment.
    pub fn copy_and_reset(&self) -> DataSnapshot {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut *inner)
    }
}

#[cfg(test)]
mod tests {
    use db::client::ServerId;

    use super::*;

    fn server_id(name: &str) -> ServerId {
        ServerId {
            name: name.to_string(),
            config_var_name: format!("{name}_URL"),
            database: "app".to_string(),
        }
    }

    fn server(name: &str, version: &str, max_connections: i64, monitored_at: i64) -> PostgresServer {
        PostgresServer {
            server_id: server_id(name),
            platform: "heroku".into(),
            max_connections,
            pg_bouncer: None,
            version: version.into(),
            monitored_at,
        }
    }

    #[test]
    fn servers_upsert_by_name_and_config_var() {
        let data = Data::new();

        data.add_postgres_server(server("GREEN", "14.1", 100, 10));
        data.add_postgres_server(server("BLUE", "13.2", 50, 10));
        data.add_postgres_server(server("GREEN", "", 0, 20));

        let snapshot = data.copy_and_reset();
        assert_eq!(snapshot.postgres_servers.len(), 2);

        let green = snapshot
            .postgres_servers
            .iter()
            .find(|s| s.server_id.name == "GREEN")
            .unwrap();
        // merged: monitored_at updated, zero/empty fields did not overwrite
        assert_eq!(green.monitored_at, 20);
        assert_eq!(green.version, "14.1");
        assert_eq!(green.max_connections, 100);
    }

    #[test]
    fn databases_replace_by_server_id() {
        let data = Data::new();

        let database = |tables: usize| Database {
            server_id: server_id("GREEN"),
            name: "app".into(),
            schemas: vec![db::monitors::schema::Schema {
                name: "public".into(),
                tables: vec![db::monitors::schema::Table::default(); tables],
            }],
        };

        data.add_database(database(1));
        data.add_database(database(3));

        let snapshot = data.copy_and_reset();
        assert_eq!(snapshot.databases.len(), 1);
        assert_eq!(snapshot.databases[0].schemas[0].tables.len(), 3);
    }

    #[test]
    fn settings_replace_by_server_and_name() {
        let data = Data::new();

        let setting = |name: &str, value: &str| db::monitors::settings::Setting {
            server_id: server_id("GREEN"),
            name: name.into(),
            value: value.into(),
            ..db::monitors::settings::Setting::default()
        };

        data.add_setting(setting("work_mem", "4MB"));
        data.add_setting(setting("work_mem", "8MB"));
        data.add_setting(setting("shared_buffers", "128MB"));

        let snapshot = data.copy_and_reset();
        assert_eq!(snapshot.settings.len(), 2);
        let work_mem = snapshot.settings.iter().find(|s| s.name == "work_mem").unwrap();
        assert_eq!(work_mem.value, "8MB");
    }

    #[test]
    fn query_stats_accumulate() {
        let data = Data::new();
        data.add_query_stats(vec![QueryStats::default()]);
        data.add_query_stats(vec![QueryStats::default(), QueryStats::default()]);

        let snapshot = data.copy_and_reset();
        assert_eq!(snapshot.query_stats.len(), 3);
    }

    #[test]
    fn error_reports_cap_at_ten() {
        let data = Data::new();

        for i in 0..15 {
            data.add_error_report(ErrorReport {
                error: format!("error {i}"),
                panic: false,
                stack_trace: String::new(),
            });
        }

        let snapshot = data.copy_and_reset();
        assert_eq!(snapshot.errors.len(), 10);
    }

    #[test]
    fn one_panic_is_admitted_past_the_cap() {
        let data = Data::new();

        for i in 0..10 {
            data.add_error_report(ErrorReport {
                error: format!("error {i}"),
                panic: false,
                stack_trace: String::new(),
            });
        }

        let panic_report = ErrorReport {
            error: "panicked".into(),
            panic: true,
            stack_trace: "trace".into(),
        };
        data.add_error_report(panic_report.clone());
        // a second panic past the cap is dropped
        data.add_error_report(panic_report);

        let snapshot = data.copy_and_reset();
        assert_eq!(snapshot.errors.len(), 11);
        assert_eq!(snapshot.errors.iter().filter(|e| e.panic).count(), 1);
    }

    #[test]
    fn copy_and_reset_clears_all_accumulators() {
        let data = Data::new();
        data.add_postgres_server(server("GREEN", "14.1", 100, 10));
        data.add_log_metrics(LogMetrics::new());
        data.add_log_test_message_received_at(42);

        let snapshot = data.copy_and_reset();
        assert_eq!(snapshot.postgres_servers.len(), 1);
        assert_eq!(snapshot.log_metrics.len(), 1);
        assert_eq!(snapshot.log_test_message_received_at, 42);

        let empty = data.copy_and_reset();
        assert!(empty.postgres_servers.is_empty());
        assert!(empty.log_metrics.is_empty());
        assert_eq!(empty.log_test_message_received_at, 0);
    }
}

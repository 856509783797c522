use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::client::{PostgresClient, ServerId};
use crate::comment::query_comment;
use crate::events::Event;
use crate::monitor::Monitor;
use crate::monitors::database_stats::DatabaseStatsState;

#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub server_id: ServerId,
    pub entity: String,
    pub measured_at: i64,
}

impl Metric {
    pub fn new(
        name: &str,
        value: f64,
        entity: &str,
        server_id: ServerId,
        measured_at: i64,
    ) -> Self {
        Self {
            name: name.to_string(),
            value,
            entity: entity.to_string(),
            server_id,
            measured_at,
        }
    }
}

/// General-cadence metric collection: connection counts, pg_stat_database
/// deltas and cache hit rates.
pub struct MetricMonitor {
    pub database_stats_state: Arc<DatabaseStatsState>,
    pub events: mpsc::Sender<Event>,
}

#[async_trait]
impl Monitor for MetricMonitor {
    fn name(&self) -> &'static str {
        "MetricMonitor"
    }

    async fn run(&self, client: &PostgresClient) {
        let mut metrics = self.find_used_connections_metric(client).await;
        metrics.extend(self.find_database_stat_metrics(client).await);
        metrics.extend(self.find_database_cache_hit_metrics(client).await);

        if metrics.is_empty() {
            return;
        }

        if self.events.try_send(Event::Metrics(metrics)).is_err() {
            warn!("dropping metrics: channel buffer full");
        }
    }
}

impl MetricMonitor {
    async fn find_used_connections_metric(&self, client: &PostgresClient) -> Vec<Metric> {
        // used connections include active connections and reserved connections
        let query = format!(
            "select used, reserved from
             (select count(*) used from pg_stat_activity) q1,
             (select setting::int reserved from pg_settings where name='superuser_reserved_connections') q2{}",
            query_comment()
        );

        let now = utils::time::now_unix();

        let row = match client.client().query_row(&query).await {
            Ok(row) => row,
            Err(err) => {
                error!(%err, "connection metrics error");
                return Vec::new();
            }
        };

        let (Ok(used), Ok(reserved)) = (row.try_get::<i64, _>(0), row.try_get::<i32, _>(1)) else {
            return Vec::new();
        };

        vec![
            Metric::new("connections.used", used as f64, "", client.server_id().clone(), now),
            Metric::new(
                "connections.reserved",
                reserved as f64,
                "",
                client.server_id().clone(),
                now,
            ),
        ]
    }

    async fn find_database_cache_hit_metrics(&self, client: &PostgresClient) -> Vec<Metric> {
        let query = "select (sum(stati.idx_blks_hit)::float8) / nullif(sum(stati.idx_blks_hit + stati.idx_blks_read),0)::float8 as index_cache_hit,
                     sum(statt.heap_blks_hit)::float8 / nullif(sum(statt.heap_blks_hit) + sum(statt.heap_blks_read),0)::float8 as table_cache_hit
                     from pg_statio_user_indexes stati, pg_statio_user_tables statt";

        let row = match client.client().query_row(query).await {
            Ok(row) => row,
            Err(err) => {
                error!(%err, "database cache hit metrics error");
                return Vec::new();
            }
        };

        let index_cache_hit: Option<f64> = row.try_get(0).unwrap_or(None);
        let table_cache_hit: Option<f64> = row.try_get(1).unwrap_or(None);

        let now = utils::time::now_unix();
        let mut metrics = Vec::new();

        if let Some(hit) = index_cache_hit {
            metrics.push(Metric::new(
                "cache.index.hit.rate",
                hit,
                "",
                client.server_id().clone(),
                now,
            ));
        }
        if let Some(hit) = table_cache_hit {
            metrics.push(Metric::new(
                "cache.table.hit.rate",
                hit,
                "",
                client.server_id().clone(),
                now,
            ));
        }

        metrics
    }
}

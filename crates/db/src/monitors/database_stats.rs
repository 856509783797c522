use std::collections::HashMap;
use std::sync::Mutex;

use sqlx::Row;
use tracing::error;

use crate::client::{PostgresClient, ServerId};
use crate::comment::query_comment;
use crate::monitors::metrics::{Metric, MetricMonitor};

/// Previous pg_stat_database snapshot per server. Deltas between two polls
/// are reported as metrics.
#[derive(Debug, Default)]
pub struct DatabaseStatsState {
    stats: Mutex<HashMap<ServerId, DatabaseStats>>,
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    pub committed_transactions: f64,
    pub rollbacked_transactions: f64,
    pub blocks_read: f64,
    pub blocks_hit: f64,
    pub blocks_hit_percent: f64,
    pub block_read_time: f64,
    pub block_write_time: f64,
    pub rows_returned: f64,
    pub rows_fetched: f64,
    pub rows_inserted: f64,
    pub rows_updated: f64,
    pub rows_deleted: f64,
    pub conflicts: f64,
    pub temp_files: f64,
    pub temp_bytes: f64,
    pub deadlocks: f64,
}

impl DatabaseStats {
    /// Difference between this snapshot and a later one; the hit percent
    /// is recomputed from the interval's hit and read deltas.
    pub fn delta(&self, latest: &DatabaseStats) -> DatabaseStats {
        let mut stats = DatabaseStats {
            committed_transactions: latest.committed_transactions - self.committed_transactions,
            rollbacked_transactions: latest.rollbacked_transactions - self.rollbacked_transactions,
            blocks_read: latest.blocks_read - self.blocks_read,
            blocks_hit: latest.blocks_hit - self.blocks_hit,
            blocks_hit_percent: 0.0,
            block_read_time: latest.block_read_time - self.block_read_time,
            block_write_time: latest.block_write_time - self.block_write_time,
            rows_returned: latest.rows_returned - self.rows_returned,
            rows_fetched: latest.rows_fetched - self.rows_fetched,
            rows_inserted: latest.rows_inserted - self.rows_inserted,
            rows_updated: latest.rows_updated - self.rows_updated,
            rows_deleted: latest.rows_deleted - self.rows_deleted,
            conflicts: latest.conflicts - self.conflicts,
            temp_files: latest.temp_files - self.temp_files,
            temp_bytes: latest.temp_bytes - self.temp_bytes,
            deadlocks: latest.deadlocks - self.deadlocks,
        };
        stats.blocks_hit_percent = utils::num::hit_percent(stats.blocks_hit, stats.blocks_read);
        stats
    }
}

impl MetricMonitor {
    pub(crate) async fn find_database_stat_metrics(&self, client: &PostgresClient) -> Vec<Metric> {
        let query = format!(
            "select xact_commit, xact_rollback, blks_read, blks_hit, tup_returned, tup_fetched, tup_inserted,
             tup_updated, tup_deleted, conflicts, temp_files, temp_bytes, deadlocks, blk_read_time, blk_write_time
             from pg_stat_database where datname = current_database(){}",
            query_comment()
        );

        let now = utils::time::now_unix();

        let row = match client.client().query_row(&query).await {
            Ok(row) => row,
            Err(err) => {
                error!(%err, "database stat metrics error");
                return Vec::new();
            }
        };

        let db_stats = match scan_database_stats(&row) {
            Ok(stats) => stats,
            Err(err) => {
                error!(%err, "database stat metrics error");
                return Vec::new();
            }
        };

        let delta = {
            let mut state = self.database_stats_state.stats.lock().unwrap();

            let Some(previous) = state.get(client.server_id()) else {
                // only report stats once there is a delta from two
                // consecutive polls
                state.insert(client.server_id().clone(), db_stats);
                return Vec::new();
            };

            let delta = previous.delta(&db_stats);
            state.insert(client.server_id().clone(), db_stats);
            delta
        };

        let server_id = client.server_id().clone();
        let entity = format!("database/{}", server_id.database);

        let metric =
            |name: &str, value: f64| Metric::new(name, value, &entity, server_id.clone(), now);

        vec![
            metric("query.transactions.committed", delta.committed_transactions),
            metric("query.transactions.rolledback", delta.rollbacked_transactions),
            metric("query.rows.returned", delta.rows_returned),
            metric("query.rows.fetched", delta.rows_fetched),
            metric("query.rows.inserted", delta.rows_inserted),
            metric("query.rows.updated", delta.rows_updated),
            metric("query.rows.deleted", delta.rows_deleted),
            metric("query.conflicts", delta.conflicts),
            metric("query.deadlocks", delta.deadlocks),
            metric("disk.temp.files", delta.temp_files),
            metric("disk.temp.bytes", delta.temp_bytes),
            metric("disk.io.blocks.read", delta.blocks_read),
            metric("disk.io.blocks.hit", delta.blocks_hit),
            metric("disk.io.blocks.hit.percent", delta.blocks_hit_percent),
            metric("disk.io.blocks.read.time", delta.block_read_time),
            metric("disk.io.blocks.write.time", delta.block_write_time),
        ]
    }
}

fn scan_database_stats(row: &sqlx::postgres::PgRow) -> Result<DatabaseStats, sqlx::Error> {
    Ok(DatabaseStats {
        committed_transactions: row.try_get::<i64, _>(0)? as f64,
        rollbacked_transactions: row.try_get::<i64, _>(1)? as f64,
        blocks_read: row.try_get::<i64, _>(2)? as f64,
        blocks_hit: row.try_get::<i64, _>(3)? as f64,
        rows_returned: row.try_get::<i64, _>(4)? as f64,
        rows_fetched: row.try_get::<i64, _>(5)? as f64,
        rows_inserted: row.try_get::<i64, _>(6)? as f64,
        rows_updated: row.try_get::<i64, _>(7)? as f64,
        rows_deleted: row.try_get::<i64, _>(8)? as f64,
        conflicts: row.try_get::<i64, _>(9)? as f64,
        temp_files: row.try_get::<i64, _>(10)? as f64,
        temp_bytes: row.try_get::<i64, _>(11)? as f64,
        deadlocks: row.try_get::<i64, _>(12)? as f64,
        block_read_time: row.try_get::<f64, _>(13)?,
        block_write_time: row.try_get::<f64, _>(14)?,
        blocks_hit_percent: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_subtracts_every_counter() {
        let previous = DatabaseStats {
            committed_transactions: 100.0,
            rollbacked_transactions: 5.0,
            blocks_read: 50.0,
            blocks_hit: 150.0,
            rows_inserted: 10.0,
            temp_bytes: 1000.0,
            deadlocks: 1.0,
            block_read_time: 12.0,
            ..DatabaseStats::default()
        };
        let latest = DatabaseStats {
            committed_transactions: 160.0,
            rollbacked_transactions: 7.0,
            blocks_read: 70.0,
            blocks_hit: 230.0,
            rows_inserted: 25.0,
            temp_bytes: 1500.0,
            deadlocks: 1.0,
            block_read_time: 15.5,
            ..DatabaseStats::default()
        };

        let delta = previous.delta(&latest);
        assert_eq!(delta.committed_transactions, 60.0);
        assert_eq!(delta.rollbacked_transactions, 2.0);
        assert_eq!(delta.blocks_read, 20.0);
        assert_eq!(delta.blocks_hit, 80.0);
        assert_eq!(delta.rows_inserted, 15.0);
        assert_eq!(delta.temp_bytes, 500.0);
        assert_eq!(delta.deadlocks, 0.0);
        assert_eq!(delta.block_read_time, 3.5);
        // 80 hits of 100 total block accesses in the interval
        assert_eq!(delta.blocks_hit_percent, 0.8);
    }
}

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use regex::Regex;
use sqlx::Row;
use tokio::sync::mpsc;
use tracing::warn;

use crate::clean::clean_query;
use crate::client::{PostgresClient, ServerId};
use crate::comment::{is_agent_query_comment, parse_comment, query_comment};
use crate::events::Event;
use crate::fingerprint::fingerprint_query;
use crate::monitor::Monitor;
use crate::obfuscate::Obfuscator;

/// pg_stat_statements discards query text when too many queries are
/// tracked; those rows surface as one sentinel record per interval.
pub const MISSING_QUERY_STRING: &str = "MISSING";
pub const REDACTED_STRING: &str = "REDACTED";
pub const TRUNCATED_STRING: &str = "TRUNCATED";

pub const MAX_QUERY_TEXT_LENGTH: usize = 5000;

const TOP_QUERIES_PER_CATEGORY: usize = 25;

/// Queries below this mean or block-I/O time are not interesting enough to
/// make the slowest-per-category cut.
const MIN_CATEGORY_TIME_MS: f64 = 10.0;

static IP_ADDRESS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[0-9]{1,3}\.){3}[0-9]{1,3}").unwrap());

/// Stateful store of the previous pg_stat_statements poll per server.
/// Deltas are computed between two consecutive polls and only the top
/// queries per category are reported.
#[derive(Debug, Default)]
pub struct QueryStatsState {
    stats: Mutex<HashMap<ServerId, Vec<QueryStats>>>,
}

/// Shared and local blocks cover regular and temporary tables/indexes;
/// temp blocks cover short-term working data used in sorts and hashes.
/// Dirtied counts previously-unmodified blocks changed by the query,
/// written counts previously-dirtied blocks evicted by this backend.
#[derive(Debug, Clone, Default)]
pub struct QueryStats {
    pub query_id: i64,
    pub fingerprint: String,
    pub server_id: ServerId,
    pub query: String,
    pub comment: String,
    pub explain: String,
    pub calls: i64,
    pub total_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub mean_time: f64,
    pub rows: i64,
    pub shared_blocks_hit: i64,
    pub shared_blocks_read: i64,
    pub shared_blocks_dirtied: i64,
    pub shared_blocks_written: i64,
    pub local_blocks_hit: i64,
    pub local_blocks_read: i64,
    pub local_blocks_dirtied: i64,
    pub local_blocks_written: i64,
    pub temp_blocks_read: i64,
    pub temp_blocks_written: i64,
    pub block_read_time: f64,
    pub block_write_time: f64,
    pub total_block_io_time: f64,
    pub measured_at: i64,
}

impl QueryStats {
    /// Per-interval difference against a later snapshot of the same query
    /// id. Counters subtract, min/max take the latest values, the mean is
    /// recomputed from the interval totals.
    pub fn delta(&self, latest: &QueryStats) -> QueryStats {
        let mut stats = QueryStats {
            query_id: latest.query_id,
            fingerprint: latest.fingerprint.clone(),
            server_id: latest.server_id.clone(),
            query: latest.query.clone(),
            comment: latest.comment.clone(),
            explain: latest.explain.clone(),
            calls: latest.calls - self.calls,
            total_time: latest.total_time - self.total_time,
            min_time: latest.min_time,
            max_time: latest.max_time,
            mean_time: 0.0,
            rows: latest.rows - self.rows,
            shared_blocks_hit: latest.shared_blocks_hit - self.shared_blocks_hit,
            shared_blocks_read: latest.shared_blocks_read - self.shared_blocks_read,
            shared_blocks_dirtied: latest.shared_blocks_dirtied - self.shared_blocks_dirtied,
            shared_blocks_written: latest.shared_blocks_written - self.shared_blocks_written,
            local_blocks_hit: latest.local_blocks_hit - self.local_blocks_hit,
            local_blocks_read: latest.local_blocks_read - self.local_blocks_read,
            local_blocks_dirtied: latest.local_blocks_dirtied - self.local_blocks_dirtied,
            local_blocks_written: latest.local_blocks_written - self.local_blocks_written,
            temp_blocks_read: latest.temp_blocks_read - self.temp_blocks_read,
            temp_blocks_written: latest.temp_blocks_written - self.temp_blocks_written,
            block_read_time: latest.block_read_time - self.block_read_time,
            block_write_time: latest.block_write_time - self.block_write_time,
            total_block_io_time: 0.0,
            measured_at: latest.measured_at,
        };
        stats.mean_time = utils::num::percent(stats.total_time, stats.calls as f64);
        stats.total_block_io_time = stats.block_read_time + stats.block_write_time;
        stats
    }

    /// Merge another delta with the same fingerprint: sum counters, take
    /// min/max extremes and the latest measurement time.
    pub fn aggregate(&mut self, other: &QueryStats) {
        self.calls += other.calls;
        self.total_time += other.total_time;
        self.min_time = self.min_time.min(other.min_time);
        self.max_time = self.max_time.max(other.max_time);
        self.mean_time = utils::num::percent(self.total_time, self.calls as f64);
        self.rows += other.rows;
        self.shared_blocks_hit += other.shared_blocks_hit;
        self.shared_blocks_read += other.shared_blocks_read;
        self.shared_blocks_dirtied += other.shared_blocks_dirtied;
        self.shared_blocks_written += other.shared_blocks_written;
        self.local_blocks_hit += other.local_blocks_hit;
        self.local_blocks_read += other.local_blocks_read;
        self.local_blocks_dirtied += other.local_blocks_dirtied;
        self.local_blocks_written += other.local_blocks_written;
        self.temp_blocks_read += other.temp_blocks_read;
        self.temp_blocks_written += other.temp_blocks_written;
        self.block_read_time += other.block_read_time;
        self.block_write_time += other.block_write_time;
        self.total_block_io_time = self.block_read_time + self.block_write_time;
        self.measured_at = self.measured_at.max(other.measured_at);
    }

    /// Negative values mean pg_stat_statements was reset or crossed its
    /// max threshold and evicted rows. Either way the delta is garbage and
    /// the whole record is discarded.
    pub fn is_valid(&self) -> bool {
        self.total_time > 0.0
            && self.block_read_time >= 0.0
            && self.block_write_time >= 0.0
            && self.calls > 0
            && self.rows >= 0
            && self.shared_blocks_dirtied >= 0
            && self.shared_blocks_hit >= 0
            && self.shared_blocks_read >= 0
            && self.shared_blocks_written >= 0
            && self.total_block_io_time >= 0.0
    }
}

pub fn truncate_query(query: &str) -> String {
    let mut cut = MAX_QUERY_TEXT_LENGTH;
    while !query.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &query[0..cut], TRUNCATED_STRING)
}

pub struct QueryStatsMonitor {
    pub state: Arc<QueryStatsState>,
    pub events: mpsc::Sender<Event>,
    pub obfuscator: Arc<Obfuscator>,
    pub monitor_agent_queries: bool,
}

#[async_trait]
impl Monitor for QueryStatsMonitor {
    fn name(&self) -> &'static str {
        "QueryStatsMonitor"
    }

    async fn run(&self, client: &PostgresClient) {
        let current_stats = self.query_for_stats(client).await;

        let delta_stats = {
            let mut state = self.state.stats.lock().unwrap();

            let Some(previous_stats) = state.get(client.server_id()) else {
                // only report query stats once there is a delta from two
                // consecutive polls
                state.insert(client.server_id().clone(), current_stats);
                return;
            };

            // merge previous stats with current by query id to compute the
            // delta fields, before aggregating by fingerprint
            let mut deltas = Vec::new();
            for previous in previous_stats {
                if let Some(current) = current_stats
                    .iter()
                    .find(|current| current.query_id == previous.query_id)
                {
                    let delta = previous.delta(current);
                    if delta.is_valid() {
                        deltas.push(delta);
                    }
                }
            }

            state.insert(client.server_id().clone(), current_stats);
            deltas
        };

        let aggregated = aggregate_stats(delta_stats);
        let filtered = filter_stats(aggregated);

        if self.events.try_send(Event::QueryStats(filtered)).is_err() {
            warn!("dropping query stats: channel buffer full");
        }
    }
}

impl QueryStatsMonitor {
    async fn query_for_stats(&self, client: &PostgresClient) -> Vec<QueryStats> {
        // postgres 13 renamed the per-statement execution time columns
        let time_fields = if utils::version::version_gte(&client.version(), "13.0") {
            "total_exec_time, min_exec_time, max_exec_time"
        } else {
            "total_time, min_time, max_time"
        };

        let query = format!(
            "select queryid, query, calls, {time_fields},
             rows, shared_blks_hit, shared_blks_read, shared_blks_dirtied, shared_blks_written, local_blks_hit,
             local_blks_read, local_blks_dirtied, local_blks_written, temp_blks_read, temp_blks_written,
             blk_read_time, blk_write_time
             from pg_stat_statements stat
             join pg_database pdb on pdb.oid = stat.dbid
             where pdb.datname = current_database(){}",
            query_comment()
        );

        let rows = match client.client().query(&query).await {
            Ok(rows) => rows,
            Err(_) => return Vec::new(),
        };

        let measured_at = utils::time::now_unix();
        let mut all_stats = Vec::new();

        for row in rows {
            let mut stats = QueryStats {
                server_id: client.server_id().clone(),
                measured_at,
                ..QueryStats::default()
            };

            let nullable_query: Option<String> = match scan_row(&row, &mut stats) {
                Ok(nullable_query) => nullable_query,
                Err(_) => continue,
            };

            match nullable_query {
                None => {
                    // query text was discarded by pg_stat_statements;
                    // lowering pg_stat_statements.max fixes this
                    stats.query = MISSING_QUERY_STRING.to_string();
                }
                Some(query) => {
                    let query = redact(&query);
                    let parsed = parse_comment(&query);
                    stats.comment = parsed.comment;

                    if !self.monitor_agent_queries && is_agent_query_comment(&stats.comment) {
                        continue;
                    }

                    // obfuscate before collapsing whitespace so runs of
                    // spaces inside literals never reach the fingerprint
                    let obfuscated = clean_query(&self.obfuscator.obfuscate_query(&parsed.query));
                    stats.fingerprint = fingerprint_query(&obfuscated);
                    stats.query = obfuscated;
                }
            }

            if stats.query.len() > MAX_QUERY_TEXT_LENGTH {
                stats.query = truncate_query(&stats.query);
            }

            all_stats.push(stats);
        }

        all_stats
    }
}

fn scan_row(row: &sqlx::postgres::PgRow, stats: &mut QueryStats) -> Result<Option<String>, sqlx::Error> {
    stats.query_id = row.try_get(0)?;
    let nullable_query: Option<String> = row.try_get(1)?;
    stats.calls = row.try_get(2)?;
    stats.total_time = row.try_get(3)?;
    stats.min_time = row.try_get(4)?;
    stats.max_time = row.try_get(5)?;
    stats.rows = row.try_get(6)?;
    stats.shared_blocks_hit = row.try_get(7)?;
    stats.shared_blocks_read = row.try_get(8)?;
    stats.shared_blocks_dirtied = row.try_get(9)?;
    stats.shared_blocks_written = row.try_get(10)?;
    stats.local_blocks_hit = row.try_get(11)?;
    stats.local_blocks_read = row.try_get(12)?;
    stats.local_blocks_dirtied = row.try_get(13)?;
    stats.local_blocks_written = row.try_get(14)?;
    stats.temp_blocks_read = row.try_get(15)?;
    stats.temp_blocks_written = row.try_get(16)?;
    stats.block_read_time = row.try_get(17)?;
    stats.block_write_time = row.try_get(18)?;
    Ok(nullable_query)
}

/// Filter out ip addresses before the query text leaves the process.
pub fn redact(query: &str) -> String {
    IP_ADDRESS_REGEX.replace_all(query, REDACTED_STRING).into_owned()
}

/// pg_stat_statements tracks duplicate queries under different query ids
/// for different literal shapes (ex. IN (1, 2) vs IN (1, 2, 3)); the
/// obfuscated queries collapse to one fingerprint and are merged.
pub fn aggregate_stats(query_stats: Vec<QueryStats>) -> Vec<QueryStats> {
    let mut aggregated: HashMap<String, QueryStats> = HashMap::new();

    for stats in query_stats {
        match aggregated.get_mut(&stats.fingerprint) {
            Some(existing) => existing.aggregate(&stats),
            None => {
                aggregated.insert(stats.fingerprint.clone(), stats);
            }
        }
    }

    aggregated.into_values().collect()
}

/// Filter to the union of the top queries per category (most called,
/// highest total time, slowest mean, slowest block I/O) instead of
/// shipping every query.
pub fn filter_stats(query_stats: Vec<QueryStats>) -> Vec<QueryStats> {
    let mut missing_query_server_id: Option<ServerId> = None;
    let mut filtered: HashMap<String, QueryStats> = HashMap::new();

    let mut called: Vec<QueryStats> = Vec::new();
    for stats in query_stats {
        // missing query text gets a placeholder record instead of stats
        if stats.query == MISSING_QUERY_STRING {
            if missing_query_server_id.is_none() {
                missing_query_server_id = Some(stats.server_id.clone());
            }
            continue;
        }

        // only report queries that were called during the interval
        if stats.calls > 0 {
            called.push(stats);
        }
    }

    if let Some(server_id) = missing_query_server_id {
        filtered.insert(
            "0".to_string(),
            QueryStats {
                query: MISSING_QUERY_STRING.to_string(),
                server_id,
                ..QueryStats::default()
            },
        );
    }

    let take_top = |sorted: &[QueryStats],
                        minimum: Option<fn(&QueryStats) -> f64>,
                        filtered: &mut HashMap<String, QueryStats>| {
        let mut count = 0;
        for stats in sorted {
            if let Some(value) = minimum {
                if value(stats) < MIN_CATEGORY_TIME_MS {
                    continue;
                }
            }
            if count >= TOP_QUERIES_PER_CATEGORY {
                break;
            }
            if !filtered.contains_key(&stats.fingerprint) {
                filtered.insert(stats.fingerprint.clone(), stats.clone());
                count += 1;
            }
        }
    };

    called.sort_by(|a, b| b.calls.cmp(&a.calls));
    take_top(&called, None, &mut filtered);

    called.sort_by(|a, b| b.total_time.total_cmp(&a.total_time));
    take_top(&called, None, &mut filtered);

    called.sort_by(|a, b| b.mean_time.total_cmp(&a.mean_time));
    take_top(&called, Some(|stats| stats.mean_time), &mut filtered);

    called.sort_by(|a, b| b.total_block_io_time.total_cmp(&a.total_block_io_time));
    take_top(&called, Some(|stats| stats.total_block_io_time), &mut filtered);

    filtered.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(fingerprint: &str, calls: i64, total_time: f64) -> QueryStats {
        QueryStats {
            fingerprint: fingerprint.to_string(),
            query: format!("select {fingerprint}"),
            calls,
            total_time,
            mean_time: utils::num::percent(total_time, calls as f64),
            ..QueryStats::default()
        }
    }

    #[test]
    fn delta_subtracts_counters_and_recomputes_mean() {
        let previous = QueryStats {
            query_id: 7,
            calls: 10,
            total_time: 100.0,
            rows: 50,
            shared_blocks_hit: 20,
            block_read_time: 5.0,
            block_write_time: 1.0,
            measured_at: 100,
            ..QueryStats::default()
        };
        let latest = QueryStats {
            query_id: 7,
            calls: 14,
            total_time: 120.0,
            min_time: 2.0,
            max_time: 30.0,
            rows: 70,
            shared_blocks_hit: 26,
            block_read_time: 7.0,
            block_write_time: 2.0,
            measured_at: 160,
            ..QueryStats::default()
        };

        let delta = previous.delta(&latest);
        assert_eq!(delta.calls, 4);
        assert_eq!(delta.total_time, 20.0);
        assert_eq!(delta.mean_time, 5.0);
        assert_eq!(delta.rows, 20);
        assert_eq!(delta.shared_blocks_hit, 6);
        assert_eq!(delta.block_read_time, 2.0);
        assert_eq!(delta.total_block_io_time, 3.0);
        // min and max come from the latest snapshot
        assert_eq!(delta.min_time, 2.0);
        assert_eq!(delta.max_time, 30.0);
        assert_eq!(delta.measured_at, 160);
        assert!(delta.is_valid());
    }

    #[test]
    fn negative_deltas_are_invalid() {
        let previous = QueryStats {
            query_id: 7,
            calls: 10,
            total_time: 100.0,
            shared_blocks_hit: 50,
            ..QueryStats::default()
        };
        // counters went backwards: pg_stat_statements was reset
        let latest = QueryStats {
            query_id: 7,
            calls: 2,
            total_time: 5.0,
            shared_blocks_hit: 1,
            ..QueryStats::default()
        };

        assert!(!previous.delta(&latest).is_valid());
    }

    #[test]
    fn uncalled_deltas_are_invalid() {
        let previous = stats("abc", 5, 50.0);
        let latest = stats("abc", 5, 50.0);
        assert!(!previous.delta(&latest).is_valid());
    }

    #[test]
    fn aggregate_merges_by_fingerprint() {
        let mut first = QueryStats {
            fingerprint: "abc".into(),
            calls: 2,
            total_time: 10.0,
            min_time: 1.0,
            max_time: 6.0,
            measured_at: 100,
            ..QueryStats::default()
        };
        let second = QueryStats {
            fingerprint: "abc".into(),
            calls: 2,
            total_time: 30.0,
            min_time: 0.5,
            max_time: 20.0,
            measured_at: 160,
            ..QueryStats::default()
        };

        first.aggregate(&second);
        assert_eq!(first.calls, 4);
        assert_eq!(first.total_time, 40.0);
        assert_eq!(first.mean_time, 10.0);
        assert_eq!(first.min_time, 0.5);
        assert_eq!(first.max_time, 20.0);
        assert_eq!(first.measured_at, 160);
    }

    #[test]
    fn aggregate_stats_collapses_duplicate_fingerprints() {
        let aggregated = aggregate_stats(vec![
            stats("abc", 1, 10.0),
            stats("abc", 3, 20.0),
            stats("def", 1, 5.0),
        ]);

        assert_eq!(aggregated.len(), 2);
        let abc = aggregated.iter().find(|s| s.fingerprint == "abc").unwrap();
        assert_eq!(abc.calls, 4);
        assert_eq!(abc.total_time, 30.0);
    }

    #[test]
    fn filter_caps_new_queries_per_category() {
        // calls and total time rank the 60 queries identically, so the
        // most-called category admits 25 and the total-time category
        // admits the next 25; the rest are cut
        let mut all = Vec::new();
        for i in 0..60_i64 {
            all.push(stats(&format!("fp{i}"), 1000 - i, (1000 - i) as f64));
        }

        let filtered = filter_stats(all);

        assert_eq!(filtered.len(), 2 * TOP_QUERIES_PER_CATEGORY);
        assert!(filtered.iter().any(|s| s.fingerprint == "fp0"));
        assert!(filtered.iter().any(|s| s.fingerprint == "fp49"));
        assert!(!filtered.iter().any(|s| s.fingerprint == "fp55"));
    }

    #[test]
    fn filter_keeps_missing_query_sentinel() {
        let missing = QueryStats {
            query: MISSING_QUERY_STRING.to_string(),
            ..QueryStats::default()
        };

        let filtered = filter_stats(vec![missing, stats("abc", 10, 100.0)]);

        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().any(|s| s.query == MISSING_QUERY_STRING));
    }

    #[test]
    fn filter_drops_uncalled_queries() {
        let filtered = filter_stats(vec![stats("abc", 0, 0.0)]);
        assert!(filtered.is_empty());
    }

    #[test]
    fn slow_categories_require_minimum_times() {
        // 75 busy-but-fast queries fill the most-called and total-time
        // categories; rarely-called queries can only get in through the
        // mean-time category, which has a 10 ms floor
        let mut all = Vec::new();
        for i in 0..75_i64 {
            // mean time of 1 ms, but busy enough to dominate the called
            // and total-time categories
            all.push(stats(&format!("busy{i}"), 10_000 - i, (10_000 - i) as f64));
        }
        all.push(stats("rare-fast", 1, 5.0)); // mean 5 ms: below the floor
        all.push(stats("rare-slow", 1, 50.0)); // mean 50 ms: admitted

        let filtered = filter_stats(all);

        assert_eq!(filtered.len(), 2 * TOP_QUERIES_PER_CATEGORY + 1);
        assert!(filtered.iter().any(|s| s.fingerprint == "rare-slow"));
        assert!(!filtered.iter().any(|s| s.fingerprint == "rare-fast"));
    }

    #[test]
    fn redacts_ip_addresses() {
        assert_eq!(
            redact("select * from hosts where addr = '10.0.12.34'"),
            format!("select * from hosts where addr = '{REDACTED_STRING}'")
        );
    }

    #[test]
    fn truncates_long_query_text() {
        let long = "x".repeat(6000);
        let truncated = truncate_query(&long);
        assert_eq!(truncated.len(), MAX_QUERY_TEXT_LENGTH + TRUNCATED_STRING.len());
        assert!(truncated.ends_with(TRUNCATED_STRING));
    }
}

pub mod heroku_metrics;
pub mod sql;
pub mod syslog;

use std::sync::Arc;

use db::events::{Event, LogMetrics};
use db::slow_query::SlowQuery;
use tokio::sync::mpsc;
use tracing::{info, warn};
use utils::Stats;

use syslog::{parse_syslog_line, SyslogLine};

const APP_POSTGRES: &str = "app postgres.";
const HEROKU_POSTGRES: &str = "heroku-postgres";
const HEROKU_PGBOUNCER: &str = "heroku-pgbouncer";
const POSTGRES_PROCESS_PREFIX: &str = "postgres.";

const LOG_TEST_MESSAGE: &str = "NOTICE:  POSTGRES_MONITOR_AGENT_TEST";

/// Output of the second parsing pass: either a metric map or a slow query.
#[derive(Debug, Clone, Default)]
pub struct ParsedLogLine {
    pub metrics: Option<LogMetrics>,
    pub slow_query: Option<SlowQuery>,
}

pub fn should_handle_test_log_line(line: &str) -> bool {
    !line.is_empty() && line.contains(LOG_TEST_MESSAGE)
}

/// Substring checks benchmarked faster than a regex here and allocate
/// nothing; this runs on every received frame.
pub fn should_handle_log_line(line: &str) -> bool {
    !line.is_empty()
        && (line.contains(APP_POSTGRES)
            || line.contains(HEROKU_POSTGRES)
            || line.contains(HEROKU_PGBOUNCER))
}

fn is_heroku_postgres_syslog_line(line: &SyslogLine) -> bool {
    line.process == HEROKU_POSTGRES
}

// heroku pgbouncer metric lines are flaky and sometimes missing entirely;
// pgbouncer is monitored directly so these are recognized but not parsed
fn is_heroku_pgbouncer_syslog_line(_line: &SyslogLine) -> bool {
    false
}

fn is_sql_syslog_line(line: &SyslogLine) -> bool {
    line.process.starts_with(POSTGRES_PROCESS_PREFIX)
}

/// Parsing happens in two passes: the body is split and stitched into
/// syslog lines, then metrics or queries are extracted per line.
pub fn parse_log_line(line: &str) -> Vec<ParsedLogLine> {
    let syslog_lines = parse_syslog_line(line);

    let mut parsed_log_lines = Vec::new();

    for syslog_line in &syslog_lines {
        let parsed = if is_heroku_postgres_syslog_line(syslog_line)
            || is_heroku_pgbouncer_syslog_line(syslog_line)
        {
            Some(heroku_metrics::parse_heroku_postgres_key_value_log_line(syslog_line))
        } else if is_sql_syslog_line(syslog_line) {
            sql::parse_sql_syslog_line(syslog_line)
        } else {
            None
        };

        if let Some(parsed) = parsed {
            parsed_log_lines.push(parsed);
        }
    }

    parsed_log_lines
}

/// Classifies and parses raw log bodies received by the logs server,
/// fanning metric maps, slow queries and test notifications onto their
/// channels. Counter outcomes feed the next report's agent stats.
#[derive(Clone)]
pub struct LogProcessor {
    pub log_postgres_logs: bool,
    pub stats: Arc<Stats>,
    pub events: mpsc::Sender<Event>,
    pub log_test: mpsc::Sender<String>,
    pub raw_slow_queries: mpsc::Sender<SlowQuery>,
}

impl LogProcessor {
    pub fn process_log_line(&self, line: &str) {
        self.stats.increment("logs.received");

        if should_handle_log_line(line) {
            self.handle_log_line(line);
        }

        if should_handle_test_log_line(line) {
            self.handle_log_test(line);
        }
    }

    fn handle_log_line(&self, line: &str) {
        if self.log_postgres_logs {
            info!(line, "log line");
        }

        self.stats.increment("logs.postgres");

        let parsed_lines = parse_log_line(line);
        if parsed_lines.is_empty() {
            return;
        }

        self.stats.increment_by("logs.handled", parsed_lines.len() as i64);

        for parsed in parsed_lines {
            if let Some(metrics) = parsed.metrics {
                if !metrics.is_empty() {
                    self.stats.increment("logs.metric_lines");

                    if self.events.try_send(Event::LogMetrics(metrics)).is_err() {
                        self.stats.increment("logs.metric_lines.dropped");
                        warn!("dropping log metrics: channel buffer full");
                    }
                }
            }

            if let Some(slow_query) = parsed.slow_query {
                self.stats.increment("logs.slow_queries");

                if self.raw_slow_queries.try_send(slow_query).is_err() {
                    self.stats.increment("logs.slow_queries.dropped");
                    warn!("dropping slow query: channel buffer full");
                }
            }
        }
    }

    fn handle_log_test(&self, line: &str) {
        if self.log_test.try_send(line.to_string()).is_err() {
            warn!("dropping log test line: channel buffer full");
        }
    }
}

use std::sync::LazyLock;

use db::slow_query::SlowQuery;
use regex::Regex;

//
// RDS log files use a different textual shape than syslog drains:
//
// 2023-10-28 19:01:19 UTC:10.0.0.12(57157):user@database:[13441]:LOG:  duration: 12.5 ms  plan: ...
//
// Lines without a leading timestamp are continuations of the previous
// line (multi-line query text and auto_explain plans).
//

static EXPLAINED_QUERY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"duration:\s*(?P<duration>\d+\.\d+)\s*ms\s*plan:\s*Query Text:\s*").unwrap()
});

#[derive(Debug, Clone, Default)]
pub struct RdsLogLine {
    pub timestamp: i64,
    pub ip: String,
    pub username: String,
    pub database: String,
    pub level: String,
    pub message: String,
}

/// Parse a downloaded log file portion into structured log lines.
pub fn parse_rds_log_file(log_file: &str) -> Vec<RdsLogLine> {
    let mut parsed_log_lines = Vec::new();

    for log_line in stitch_rds_log_lines_into_chunks(log_file) {
        let parts: Vec<&str> = log_line.split(':').collect();
        if parts.len() <= 6 {
            continue;
        }

        let timestamp_token = parts[0..3].join(":");
        let timestamp = utils::time::parse_rds_timestamp(&timestamp_token);

        // remove (57157) from 10.0.0.12(57157)
        let ip = parts[3].split('(').next().unwrap_or_default().to_string();

        let user_and_database: Vec<&str> = parts[4].split('@').collect();

        let message = parts[7..].join(":").trim().to_string();

        parsed_log_lines.push(RdsLogLine {
            timestamp,
            ip,
            username: user_and_database.first().unwrap_or(&"").to_string(),
            database: user_and_database.get(1).unwrap_or(&"").to_string(),
            level: parts[6].to_string(),
            message,
        });
    }

    parsed_log_lines
}

/// Group raw file lines into chunks, where each chunk starts at a line
/// with a valid leading timestamp and swallows following continuation
/// lines.
pub fn stitch_rds_log_lines_into_chunks(log_file: &str) -> Vec<String> {
    let mut chunked_lines = Vec::new();
    let mut current_chunk = String::new();

    for raw_line in log_file.split('\n') {
        if raw_line.is_empty() {
            continue;
        }

        let first_token = raw_line.split("UTC:").next().unwrap_or_default();
        if utils::time::parse_rds_timestamp(first_token) != -1 {
            if current_chunk.is_empty() {
                current_chunk = raw_line.to_string();
            } else {
                chunked_lines.push(current_chunk);
                current_chunk = raw_line.to_string();
            }
        } else {
            // not a timestamp, append to the current chunk
            current_chunk.push('\n');
            current_chunk.push_str(raw_line);
        }
    }

    if !current_chunk.is_empty() {
        chunked_lines.push(current_chunk);
    }

    chunked_lines
}

/// Extract a slow query from an auto_explain log line. The query text and
/// plan follow the `duration: ... ms plan: Query Text:` marker on their
/// own lines.
pub fn parse_rds_query_explain(log_line: &RdsLogLine, instance_id: &str) -> Option<SlowQuery> {
    let captures = EXPLAINED_QUERY_REGEX.captures(&log_line.message)?;

    let parts: Vec<&str> = log_line.message.split('\n').collect();

    let query = parts.get(1)?.replace("Query Text:", "").trim().to_string();
    if query.is_empty() {
        return None;
    }

    let mut explain = parts.get(2..).unwrap_or_default().join("\n");
    if explain.is_empty() {
        return None;
    }

    if let Some(stripped) = explain.strip_prefix('\t') {
        explain = stripped.to_string();
    }
    let explain = explain.replace('\t', "    ").trim().to_string();

    let duration_ms = captures
        .name("duration")
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);

    Some(SlowQuery {
        duration_ms,
        raw: query,
        explain,
        measured_at: log_line.timestamp,
        server_name: instance_id.to_string(),
        ..SlowQuery::default()
    })
}

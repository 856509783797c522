use std::sync::LazyLock;

use db::slow_query::SlowQuery;
use regex::Regex;

use super::syslog::SyslogLine;
use super::ParsedLogLine;

// error codes: https://www.postgresql.org/docs/current/errcodes-appendix.html
// many other sql log line formats exist (DETAIL:, ERROR:, STATEMENT:,
// LOG: checkpoint ...); slow queries only come from LOG: duration lines
static SQL_LOG_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"sql_error_code = (?P<error>\d+)\s*(?P<metadata>.*)\s*LOG:\s+duration:\s+(?P<duration>\d+\.\d+) ms\s+execute <\w+>: (?P<query>.*)",
    )
    .unwrap()
});

pub fn parse_sql_syslog_line(line: &SyslogLine) -> Option<ParsedLogLine> {
    let timestamp = utils::time::parse_timestamp_to_unix(&line.timestamp);

    let message = line.message.trim();
    let captures = SQL_LOG_LINE_REGEX.captures(message)?;

    let group = |name: &str| {
        captures
            .name(name)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };

    let duration_ms = group("duration").parse().unwrap_or(0.0);

    let slow_query = SlowQuery {
        sql_error_code: group("error"),
        metadata: group("metadata").trim().to_string(),
        duration_ms,
        raw: group("query"),
        server_name: line.color.clone(),
        measured_at: timestamp,
        ..SlowQuery::default()
    };

    Some(ParsedLogLine {
        metrics: None,
        slow_query: Some(slow_query),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syslog_line(message: &str) -> SyslogLine {
        SyslogLine {
            color: "GREEN".to_string(),
            message: message.to_string(),
            process: "postgres.134597".to_string(),
            timestamp: "2022-06-13T14:10:26+00:00".to_string(),
            ..SyslogLine::default()
        }
    }

    #[test]
    fn parses_a_slow_query_log_line() {
        let line = syslog_line(
            " sql_error_code = 00000 time_ms = \"2022-06-13 14:10:25.954\" LOG:  duration: 17.862 ms  execute <unnamed>: SELECT * FROM users WHERE id = 1",
        );

        let parsed = parse_sql_syslog_line(&line).unwrap();
        let slow_query = parsed.slow_query.unwrap();

        assert_eq!(slow_query.sql_error_code, "00000");
        assert_eq!(slow_query.duration_ms, 17.862);
        assert_eq!(slow_query.raw, "SELECT * FROM users WHERE id = 1");
        assert_eq!(slow_query.server_name, "GREEN");
        assert_eq!(slow_query.measured_at, 1655129426);
        assert!(slow_query.metadata.starts_with("time_ms"));
    }

    #[test]
    fn ignores_statement_and_error_lines() {
        for message in [
            "sql_error_code = 00000 STATEMENT:  select * from users",
            "sql_error_code = 57014 ERROR:  canceling statement due to statement timeout",
            "sql_error_code = 00000 LOG:  checkpoint starting: time",
            "sql_error_code = 00000 LOG:  automatic analyze of table \"app.public.users\"",
        ] {
            assert!(parse_sql_syslog_line(&syslog_line(message)).is_none());
        }
    }
}

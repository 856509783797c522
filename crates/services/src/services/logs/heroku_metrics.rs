use db::events::LogMetrics;

use super::syslog::SyslogLine;
use super::ParsedLogLine;

/// Parse a heroku-postgres metric line of whitespace separated `k=v`
/// tokens into a metric map. `sample#` prefixes are stripped and a
/// synthetic unix `timestamp` key is added from the syslog timestamp.
pub fn parse_heroku_postgres_key_value_log_line(line: &SyslogLine) -> ParsedLogLine {
    let mut key_values = LogMetrics::new();

    key_values.insert(
        "timestamp".to_string(),
        utils::time::parse_timestamp_to_unix(&line.timestamp).to_string(),
    );

    for part in line.message.split_whitespace() {
        if part.len() < 2 {
            continue;
        }

        let key_value: Vec<&str> = part.split('=').collect();
        if key_value.len() != 2 {
            continue;
        }

        let key = key_value[0].replace("sample#", "");
        key_values.insert(key, key_value[1].to_string());
    }

    ParsedLogLine {
        metrics: Some(key_values),
        slow_query: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syslog_line(message: &str) -> SyslogLine {
        SyslogLine {
            message: message.to_string(),
            process: "heroku-postgres".to_string(),
            timestamp: "2022-06-13T14:10:04+00:00".to_string(),
            ..SyslogLine::default()
        }
    }

    #[test]
    fn parses_key_value_tokens_and_strips_sample_prefix() {
        let line = syslog_line(
            "source=DATABASE addon=postgresql-metric-74237 sample#current_transaction=768 sample#db_size=9442399bytes sample#tables=23",
        );

        let parsed = parse_heroku_postgres_key_value_log_line(&line);
        let metrics = parsed.metrics.unwrap();

        assert_eq!(metrics.get("source").map(String::as_str), Some("DATABASE"));
        assert_eq!(metrics.get("current_transaction").map(String::as_str), Some("768"));
        assert_eq!(metrics.get("db_size").map(String::as_str), Some("9442399bytes"));
        assert_eq!(metrics.get("tables").map(String::as_str), Some("23"));
        assert_eq!(metrics.get("timestamp").map(String::as_str), Some("1655129404"));
        assert!(!metrics.contains_key("sample#db_size"));
    }

    #[test]
    fn ignores_malformed_tokens() {
        let line = syslog_line("a ab= =b key=value double=equals=token");

        let parsed = parse_heroku_postgres_key_value_log_line(&line);
        let metrics = parsed.metrics.unwrap();

        // only the well formed token and the synthetic timestamp survive
        assert_eq!(metrics.get("key").map(String::as_str), Some("value"));
        assert_eq!(metrics.get("ab").map(String::as_str), Some(""));
        assert!(!metrics.contains_key("double"));
        assert!(!metrics.contains_key("a"));
    }
}

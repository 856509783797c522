use chrono::{DateTime, NaiveDateTime, Utc};

/// Parse an RFC 3339 syslog timestamp (ex. `2022-06-13T14:10:04+00:00`)
/// into unix seconds. Returns 0 for unparseable input so malformed frames
/// degrade to an absent timestamp instead of an error.
pub fn parse_timestamp_to_unix(timestamp: &str) -> i64 {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.with_timezone(&Utc).timestamp())
        .unwrap_or(0)
}

/// Parse an RDS log line timestamp of the form `2023-10-28 19:01:19 UTC`.
/// Returns -1 when the token is not a timestamp, which callers use to
/// detect continuation lines.
pub fn parse_rds_timestamp(token: &str) -> i64 {
    let token = token.replace(" UTC", "");
    let token = token.trim();
    NaiveDateTime::parse_from_str(token, "%Y-%m-%d %H:%M:%S")
        .map(|t| t.and_utc().timestamp())
        .unwrap_or(-1)
}

pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

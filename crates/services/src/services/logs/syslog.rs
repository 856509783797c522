use std::sync::LazyLock;

use regex::Regex;

//
// Parses the RFC 5424 frames received from log drains. Minimal processing
// happens here; metric and query extraction live in the other parsers.
//

// color and segment are parsed out because multiline logs need their
// messages stitched together and both get in the way of matching
static LOG_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\d+ <\d+>\d+ (?P<timestamp>.*) host app (?P<process>\w+(\.|-)\w+) -\s?\[?(?P<color>\w+)?\]?\s?\[?(?P<segment>\d+)?(-\d+)?\]? (?P<message>.*)",
    )
    .unwrap()
});

/// One parsed postgres log frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyslogLine {
    /// ex. GREEN - set for logs coming from specific databases
    pub color: String,
    pub message: String,
    /// ex. postgres.12345
    pub process: String,
    /// ex. 301 from [301-1]
    pub segment: String,
    pub timestamp: String,
}

/// Split an HTTP body into frames and stitch continuation frames that
/// share `(process, segment)` onto the first frame's message.
pub fn parse_syslog_line(line: &str) -> Vec<SyslogLine> {
    let mut syslog_lines: Vec<SyslogLine> = Vec::new();

    for line in line.split('\n') {
        let Some(captures) = LOG_LINE_REGEX.captures(line) else {
            continue;
        };

        let group = |name: &str| {
            captures
                .name(name)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };

        let message = group("message");
        if message.is_empty() {
            continue;
        }

        let process = group("process");
        let segment = group("segment");

        // grouped messages always share color, timestamp, process and
        // segment, so append continuations to the earlier frame
        if let Some(previous) = syslog_lines
            .iter_mut()
            .find(|previous| previous.process == process && previous.segment == segment)
        {
            previous.message.push_str(&message);
            continue;
        }

        syslog_lines.push(SyslogLine {
            color: group("color"),
            message,
            process,
            segment,
            timestamp: group("timestamp"),
        });
    }

    syslog_lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const METRIC_FRAME: &str = "484 <134>1 2022-06-13T14:10:04+00:00 host app heroku-postgres - source=DATABASE addon=postgresql-metric-74237 sample#current_transaction=768 sample#db_size=9442399bytes sample#tables=23";

    #[test]
    fn parses_a_metric_frame() {
        let lines = parse_syslog_line(METRIC_FRAME);
        assert_eq!(lines.len(), 1);

        let line = &lines[0];
        assert_eq!(line.process, "heroku-postgres");
        assert_eq!(line.timestamp, "2022-06-13T14:10:04+00:00");
        assert!(line.message.starts_with("source=DATABASE"));
        assert_eq!(line.color, "");
        assert_eq!(line.segment, "");
    }

    #[test]
    fn parses_a_postgres_process_frame_with_color_and_segment() {
        let frame = "650 <134>1 2022-06-13T14:10:26+00:00 host app postgres.134597 - [GREEN] [15-1]  sql_error_code = 00000 time_ms = \"2022-06-13 14:10:25.954\" LOG:  duration: 17.862 ms  execute <unnamed>: SELECT * FROM users WHERE id = 1";
        let lines = parse_syslog_line(frame);
        assert_eq!(lines.len(), 1);

        let line = &lines[0];
        assert_eq!(line.process, "postgres.134597");
        assert_eq!(line.color, "GREEN");
        assert_eq!(line.segment, "15");
        assert!(line.message.contains("duration: 17.862 ms"));
    }

    #[test]
    fn stitches_continuation_frames_by_process_and_segment() {
        let body = "600 <134>1 2022-06-13T14:10:26+00:00 host app postgres.134597 - [GREEN] [15-1] sql_error_code = 00000 LOG:  duration: 12.5 ms  execute <unnamed>: SELECT * FROM x\n\
                    200 <134>1 2022-06-13T14:10:26+00:00 host app postgres.134597 - [GREEN] [15-2] WHERE y='2022-01-01' AND z=1";
        let lines = parse_syslog_line(body);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].message.ends_with("SELECT * FROM xWHERE y='2022-01-01' AND z=1"));
    }

    #[test]
    fn different_segments_stay_separate() {
        let body = "600 <134>1 2022-06-13T14:10:26+00:00 host app postgres.134597 - [GREEN] [15-1] first message\n\
                    600 <134>1 2022-06-13T14:10:26+00:00 host app postgres.134597 - [GREEN] [16-1] second message";
        let lines = parse_syslog_line(body);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn unmatched_frames_are_dropped() {
        assert!(parse_syslog_line("not a syslog frame").is_empty());
        assert!(parse_syslog_line("").is_empty());
    }
}

use std::sync::LazyLock;

use regex::Regex;

use crate::monitors::query_stats::TRUNCATED_STRING;

static COMMENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(((/\*)+?[\w\W]+?(\*/)+))").unwrap());

const AGENT_QUERY_COMMENT: &str = "/* app:postgres-monitor-agent */";

const MAX_COMMENT_LENGTH: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedComment {
    pub comment: String,
    pub query: String,
}

/// Strip SQL comments out of the query. Multiple comments are appended
/// together; the combined comment is truncated past 1000 chars.
pub fn parse_comment(query: &str) -> ParsedComment {
    let mut comment = String::new();
    let mut stripped = query.to_string();

    for matched in COMMENT_REGEX.find_iter(query) {
        stripped = stripped.replacen(matched.as_str(), "", 1).trim().to_string();
        comment.push_str(matched.as_str());
    }

    if comment.len() > MAX_COMMENT_LENGTH {
        let mut cut = MAX_COMMENT_LENGTH;
        while !comment.is_char_boundary(cut) {
            cut -= 1;
        }
        comment.truncate(cut);
        comment.push_str(TRUNCATED_STRING);
    }

    ParsedComment {
        comment,
        query: stripped,
    }
}

/// Trailing comment added to every agent query so users can identify
/// which queries come from the agent.
pub fn query_comment() -> &'static str {
    " /* app:postgres-monitor-agent */"
}

/// A query is from the agent if its comment carries the agent tag.
pub fn is_agent_query_comment(comment: &str) -> bool {
    comment.contains(AGENT_QUERY_COMMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_comment() {
        let parsed = parse_comment("/* controller:users */ select * from users");
        assert_eq!(parsed.comment, "/* controller:users */");
        assert_eq!(parsed.query, "select * from users");
    }

    #[test]
    fn appends_multiple_comments() {
        let parsed = parse_comment("/* a */ select 1 /* b */");
        assert_eq!(parsed.comment, "/* a *//* b */");
        assert_eq!(parsed.query, "select 1");
    }

    #[test]
    fn no_comment_passes_through() {
        let parsed = parse_comment("select 1");
        assert_eq!(parsed.comment, "");
        assert_eq!(parsed.query, "select 1");
    }

    #[test]
    fn truncates_very_long_comments() {
        let long = format!("/* {} */", "x".repeat(2000));
        let parsed = parse_comment(&format!("{long} select 1"));
        assert_eq!(parsed.comment.len(), 1000 + TRUNCATED_STRING.len());
        assert!(parsed.comment.ends_with(TRUNCATED_STRING));
    }

    #[test]
    fn recognizes_agent_queries() {
        assert!(is_agent_query_comment("/* app:postgres-monitor-agent */"));
        assert!(!is_agent_query_comment("/* app:web */"));
    }
}

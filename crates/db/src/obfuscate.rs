use std::sync::LazyLock;

use regex::Regex;

// query literals appear after comparison operators and a handful of
// keywords, as quoted strings, bare numbers or bind params (ex. $1)
const QUOTED_PARAM: &str = r"'[^']+'";
const NUMBER_PARAM: &str = r"\d+\.?\d*";
const BIND_PARAM: &str = r"\$\d+";

static QUERY_OPERATOR_PARAM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?P<operator>(=|>|<|i?like|limit|select|offset|then)\s*)(?P<param>\s*{QUOTED_PARAM}|{NUMBER_PARAM}|{BIND_PARAM})"
    ))
    .unwrap()
});

// for both in and values lists - ex. IN (1, 2) and VALUES (1, 2),
// including repeated ,(...) groups for multi-row inserts
static QUERY_LIST_PARAM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?P<operator>\b(in|values)\s*)(?P<param>\(('?.+?'|'?.+?'?)\)(,\s*\(('?.+?'|'?.+?'?)\))*)")
        .unwrap()
});

static QUERY_BETWEEN_PARAM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?P<operator>\bbetween(\s*symmetric)?\s*)(?P<param1>{QUOTED_PARAM}|{NUMBER_PARAM}|{BIND_PARAM})(?P<and>\s*AND\s*)(?P<param2>{QUOTED_PARAM}|{NUMBER_PARAM}|{BIND_PARAM})"
    ))
    .unwrap()
});

static EXPLAIN_PARAM_LINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(Cond:|Filter:)").unwrap());

static EXPLAIN_OPERATOR_PARAM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?P<operator>(=|>|<|~~|ANY \()\s*)(?P<param>\s*{QUOTED_PARAM}|{NUMBER_PARAM}|{BIND_PARAM})"
    ))
    .unwrap()
});

#[derive(Debug, Default)]
pub struct Obfuscator;

impl Obfuscator {
    pub fn new() -> Self {
        Self
    }

    /// Obfuscate query input by replacing literals with `?`. Works on both
    /// user input and bind params (ex. $1). Query comments should be
    /// removed before obfuscation.
    pub fn obfuscate_query(&self, query: &str) -> String {
        let query = QUERY_OPERATOR_PARAM_REGEX.replace_all(query, "${operator}?");
        let query = QUERY_LIST_PARAM_REGEX.replace_all(&query, "${operator}(?)");
        let query = QUERY_BETWEEN_PARAM_REGEX.replace_all(&query, "${operator}?${and}?");

        query.into_owned()
    }

    /// Obfuscate explain plans by replacing query params with `?`. Only
    /// condition and filter lines carry literals.
    pub fn obfuscate_explain(&self, explain: &str) -> String {
        if explain.is_empty() {
            return String::new();
        }

        let lines: Vec<&str> = explain.split('\n').collect();
        let num_lines = lines.len();
        let mut obfuscated = String::with_capacity(explain.len());

        for (index, line) in lines.iter().enumerate() {
            if EXPLAIN_PARAM_LINE_REGEX.is_match(line) {
                obfuscated.push_str(&EXPLAIN_OPERATOR_PARAM_REGEX.replace_all(line, "${operator}?"));
            } else {
                obfuscated.push_str(line);
            }
            if index != num_lines - 1 {
                obfuscated.push('\n');
            }
        }

        obfuscated
    }
}

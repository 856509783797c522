/// Replace tabs and newlines with spaces and collapse runs of spaces.
pub fn clean_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| if c == '\n' || c == '\t' { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

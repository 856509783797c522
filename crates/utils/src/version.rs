use std::cmp::Ordering;

use tracing::error;

/// Compare two dotted numeric versions (ex. `13.2` vs `10.21`).
/// Missing segments compare as zero, so `13` == `13.0`.
fn version_compare(v1: &str, v2: &str) -> Option<Ordering> {
    let a = parse_segments(v1)?;
    let b = parse_segments(v2)?;

    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(Ordering::Equal)
}

fn parse_segments(version: &str) -> Option<Vec<u64>> {
    if version.is_empty() {
        return None;
    }
    version
        .split('.')
        .map(|segment| segment.parse::<u64>().ok())
        .collect()
}

pub fn version_gte(v1: &str, v2: &str) -> bool {
    match version_compare(v1, v2) {
        Some(ordering) => ordering != Ordering::Less,
        None => {
            error!(v1, v2, "invalid version comparison");
            false
        }
    }
}

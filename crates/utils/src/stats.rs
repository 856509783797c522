use std::collections::HashMap;
use std::sync::Mutex;

/// Counter bag shared by multiple components. Counters accumulate between
/// report shipments and are drained atomically with `copy_and_reset`.
#[derive(Debug, Default)]
pub struct Stats {
    data: Mutex<HashMap<String, i64>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, key: &str) {
        self.increment_by(key, 1);
    }

    pub fn increment_by(&self, key: &str, value: i64) {
        let mut data = self.data.lock().unwrap();
        *data.entry(key.to_string()).or_insert(0) += value;
    }

    pub fn get(&self, key: &str) -> i64 {
        let data = self.data.lock().unwrap();
        data.get(key).copied().unwrap_or(0)
    }

    /// Snapshot the counters and clear them in one critical section.
    pub fn copy_and_reset(&self) -> HashMap<String, i64> {
        let mut data = self.data.lock().unwrap();
        std::mem::take(&mut *data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_accumulate() {
        let stats = Stats::new();
        stats.increment("logs.received");
        stats.increment("logs.received");
        stats.increment_by("logs.handled", 5);

        assert_eq!(stats.get("logs.received"), 2);
        assert_eq!(stats.get("logs.handled"), 5);
        assert_eq!(stats.get("logs.postgres"), 0);
    }

    #[test]
    fn copy_and_reset_drains_counters() {
        let stats = Stats::new();
        stats.increment("logs.received");

        let copied = stats.copy_and_reset();
        assert_eq!(copied.get("logs.received"), Some(&1));

        // counters start over after a reset
        assert_eq!(stats.get("logs.received"), 0);
        assert!(stats.copy_and_reset().is_empty());
    }
}

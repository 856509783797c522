use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sqlx::Row;
use tracing::error;

use crate::client::PostgresClient;
use crate::comment::query_comment;
use crate::errors::ErrorSink;
use crate::slow_query::SlowQuery;

/// Queries longer than this can be truncated in postgres logs, which makes
/// the explain statement itself invalid SQL.
const MAX_QUERY_LENGTH: usize = 30_000;

const EXPLAIN_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Explains slow queries at most once per hour per fingerprint. The
/// fingerprint space is small so the cache is unbounded.
#[derive(Debug, Default)]
pub struct Explainer {
    explained: Mutex<HashMap<String, Instant>>,
}

impl Explainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn explain(
        &self,
        client: &PostgresClient,
        slow_query: &SlowQuery,
        errors: &ErrorSink,
    ) -> String {
        {
            let explained = self.explained.lock().unwrap();
            if let Some(expiration) = explained.get(&slow_query.fingerprint) {
                if Instant::now() < *expiration {
                    return String::new();
                }
            }
        }

        if slow_query.raw.len() > MAX_QUERY_LENGTH {
            return String::new();
        }

        let explain_query = format!("EXPLAIN (SUMMARY true) {}{}", slow_query.raw, query_comment());
        let rows = match client.client().query(&explain_query).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(%err, explain_query, "explain error");
                errors.report(&err);
                return String::new();
            }
        };

        let mut explain = String::new();
        for row in rows {
            let Ok(explain_row) = row.try_get::<String, _>(0) else {
                continue;
            };
            explain.push_str(&explain_row);
            explain.push('\n');
        }

        self.explained
            .lock()
            .unwrap()
            .insert(slow_query.fingerprint.clone(), Instant::now() + EXPLAIN_CACHE_TTL);

        explain
    }
}

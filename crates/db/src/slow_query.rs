use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::clean::clean_query;
use crate::client::PostgresClient;
use crate::comment::{is_agent_query_comment, parse_comment};
use crate::errors::ErrorSink;
use crate::events::Event;
use crate::explain::Explainer;
use crate::fingerprint::fingerprint_query;
use crate::monitors::query_stats::{truncate_query, QueryStats, MAX_QUERY_TEXT_LENGTH};
use crate::obfuscate::Obfuscator;

/// One slow query extracted from a log stream. `server_name` is the config
/// name (heroku color tag) or the RDS instance id the query came from.
#[derive(Debug, Clone, Default)]
pub struct SlowQuery {
    pub sql_error_code: String,
    pub metadata: String,
    pub duration_ms: f64,
    pub raw: String,
    pub obfuscated: String,
    pub comment: String,
    pub explain: String,
    pub fingerprint: String,
    pub server_name: String,
    pub measured_at: i64,
}

/// Consumes raw slow queries from the log parsers, obfuscates and explains
/// them and reports them as single-call query stats.
pub struct SlowQueryProcessor {
    pub monitor_agent_queries: bool,
    pub clients: Vec<Arc<PostgresClient>>,
    pub obfuscator: Arc<Obfuscator>,
    pub explainer: Arc<Explainer>,
    pub events: mpsc::Sender<Event>,
    pub errors: ErrorSink,
}

impl SlowQueryProcessor {
    /// Runs until the raw slow query channel closes.
    pub async fn run(self, mut raw_slow_queries: mpsc::Receiver<SlowQuery>) {
        while let Some(slow_query) = raw_slow_queries.recv().await {
            self.process(slow_query).await;
        }
    }

    pub async fn process(&self, mut slow_query: SlowQuery) {
        let parsed = parse_comment(&slow_query.raw);
        slow_query.comment = parsed.comment;

        // skip the agent's own queries unless configured to track them
        if !self.monitor_agent_queries && is_agent_query_comment(&slow_query.comment) {
            return;
        }

        slow_query.raw = parsed.query;

        // obfuscate first so runs of spaces inside string literals are
        // gone before whitespace normalization and fingerprinting
        slow_query.obfuscated = clean_query(&self.obfuscator.obfuscate_query(&slow_query.raw));
        slow_query.fingerprint = fingerprint_query(&slow_query.obfuscated);

        if slow_query.obfuscated.len() > MAX_QUERY_TEXT_LENGTH {
            slow_query.obfuscated = truncate_query(&slow_query.obfuscated);
        }

        // match the query back to a monitored server by config name
        let Some(client) = self
            .clients
            .iter()
            .find(|client| client.server_id().name == slow_query.server_name)
        else {
            debug!(
                server_name = slow_query.server_name,
                "dropping slow query for unknown server"
            );
            return;
        };

        // raw explains can contain query inputs, obfuscate them as well
        if slow_query.explain.is_empty() {
            let explain = self
                .explainer
                .explain(client, &slow_query, &self.errors)
                .await;
            if !explain.is_empty() {
                slow_query.explain = self.obfuscator.obfuscate_explain(&explain);
                debug!(
                    duration_ms = slow_query.duration_ms,
                    fingerprint = slow_query.fingerprint,
                    obfuscated = slow_query.obfuscated,
                    "slow query explained"
                );
            }
        } else {
            slow_query.explain = self.obfuscator.obfuscate_explain(&slow_query.explain);
        }

        let stats = QueryStats {
            server_id: client.server_id().clone(),
            fingerprint: slow_query.fingerprint.clone(),
            query: slow_query.obfuscated.clone(),
            comment: slow_query.comment.clone(),
            explain: slow_query.explain.clone(),
            calls: 1,
            total_time: slow_query.duration_ms,
            min_time: slow_query.duration_ms,
            max_time: slow_query.duration_ms,
            measured_at: slow_query.measured_at,
            ..QueryStats::default()
        };

        if self.events.try_send(Event::QueryStats(vec![stats])).is_err() {
            warn!("dropping query stats: channel buffer full");
        }
    }
}

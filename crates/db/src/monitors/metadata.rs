use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::client::{PostgresClient, PostgresServer, ServerId};
use crate::comment::query_comment;
use crate::errors::ErrorSink;
use crate::events::Event;
use crate::monitor::Monitor;

/// Populates server-level metadata (version, max connections) on the
/// client once and emits a `PostgresServer` snapshot every tick. Runs
/// during bootstrap before the other monitors so they can read the
/// version-dependent state it sets.
pub struct MetadataMonitor {
    pub events: mpsc::Sender<Event>,
    pub errors: ErrorSink,
}

#[async_trait]
impl Monitor for MetadataMonitor {
    fn name(&self) -> &'static str {
        "MetadataMonitor"
    }

    async fn run(&self, client: &PostgresClient) {
        if client.version().is_empty() {
            if let Some(version) = self.find_postgres_version(client).await {
                client.set_version(version);
            }
        }

        if client.max_connections() == 0 {
            client.set_max_connections(self.find_max_connections(client).await);
        }

        let server = PostgresServer {
            server_id: ServerId {
                name: client.server_id().name.clone(),
                config_var_name: client.server_id().config_var_name.clone(),
                database: String::new(),
            },
            platform: client.platform().to_string(),
            max_connections: client.max_connections(),
            pg_bouncer: client.pg_bouncer(),
            version: client.version(),
            monitored_at: utils::time::now_unix(),
        };

        if self.events.try_send(Event::Server(server)).is_err() {
            warn!("dropping server: channel buffer full");
        }
    }
}

impl MetadataMonitor {
    async fn find_max_connections(&self, client: &PostgresClient) -> i64 {
        let query = format!(
            "select setting::bigint max_conn from pg_settings where name='max_connections'{}",
            query_comment()
        );

        match client.client().query_i64(&query).await {
            Ok(max_connections) => max_connections,
            Err(err) => {
                error!(%err, "max connection metrics error");
                self.errors.report(&err);
                0
            }
        }
    }

    async fn find_postgres_version(&self, client: &PostgresClient) -> Option<String> {
        let mut version = String::new();

        if client.is_aurora_platform() {
            version = self.find_aurora_postgres_version(client).await;
        }

        if version.is_empty() {
            let query = format!(
                "select current_setting('server_version') as version{}",
                query_comment()
            );
            match client.client().query_string(&query).await {
                Ok(full_version) => version = full_version,
                Err(err) => {
                    error!(%err, "postgres version error");
                    return None;
                }
            }
        }

        // remove trailing version info - ex. 10.21 (Ubuntu 10.21-1.pgdg20.04+1)
        Some(version.split(' ').next().unwrap_or_default().to_string())
    }

    async fn find_aurora_postgres_version(&self, client: &PostgresClient) -> String {
        // aurora_version() may provide a more specific patch version
        let query = format!("select * from aurora_version(){}", query_comment());
        match client.client().query_string(&query).await {
            Ok(version) => version,
            Err(err) => {
                error!(%err, "aurora version error");
                String::new()
            }
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::client::{build_postgres_clients, PostgresClient};
use crate::errors::ErrorSink;
use crate::events::{Event, RdsInstanceFound};
use crate::explain::Explainer;
use crate::monitor::MonitorWorker;
use crate::monitors::database_stats::DatabaseStatsState;
use crate::monitors::metadata::MetadataMonitor;
use crate::monitors::metrics::MetricMonitor;
use crate::monitors::pgbouncer::{PgBouncerMonitor, PgBouncerStatsState};
use crate::monitors::query_stats::{QueryStatsMonitor, QueryStatsState};
use crate::monitors::replication::ReplicationMonitor;
use crate::monitors::schema::{DatabaseSchemaState, SchemaMonitor};
use crate::monitors::settings::SettingsMonitor;
use crate::obfuscate::Obfuscator;
use crate::platform::platform_requires_log_server;
use crate::slow_query::{SlowQuery, SlowQueryProcessor};

/// Monitor cadences and feature switches for the postgres observer.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub monitor_interval: Duration,
    pub monitor_query_stats_interval: Duration,
    pub monitor_schema_interval: Duration,
    pub monitor_settings_interval: Duration,

    pub monitor_pg_bouncer: bool,
    pub monitor_query_stats: bool,
    pub monitor_replication: bool,
    pub monitor_schema: bool,
    pub monitor_settings: bool,
    pub monitor_agent_queries: bool,
    pub monitor_cloudwatch_metrics: bool,

    pub discover_aurora_reader_endpoint: bool,
}

/// Discovers postgres clients from the environment and drives the
/// per-category monitor schedules against each of them.
pub struct Observer {
    config: ObserverConfig,
    events: mpsc::Sender<Event>,
    start_logs_server: mpsc::Sender<bool>,
    errors: ErrorSink,

    // stateful delta stores for the life of the observer
    database_schema_state: Arc<DatabaseSchemaState>,
    database_stats_state: Arc<DatabaseStatsState>,
    pg_bouncer_stats_state: Arc<PgBouncerStatsState>,
    query_stats_state: Arc<QueryStatsState>,

    explainer: Arc<Explainer>,
    obfuscator: Arc<Obfuscator>,

    clients: Vec<Arc<PostgresClient>>,
}

impl Observer {
    /// Builds clients from the present env vars and notifies the cloud
    /// observer about any RDS or Aurora backed servers.
    pub async fn new(
        config: ObserverConfig,
        events: mpsc::Sender<Event>,
        start_logs_server: mpsc::Sender<bool>,
        instance_found: mpsc::Sender<RdsInstanceFound>,
        errors: ErrorSink,
    ) -> Self {
        let clients = build_postgres_clients(config.discover_aurora_reader_endpoint).await;

        if clients.is_empty() {
            error!("no postgres servers were found");
        } else {
            for client in &clients {
                info!(
                    name = client.server_id().name,
                    platform = client.platform(),
                    "monitoring postgres server"
                );

                if config.monitor_cloudwatch_metrics
                    && (client.is_aurora_platform() || client.is_rds_platform())
                {
                    let event = RdsInstanceFound {
                        instance_id: client.server_id().name.clone(),
                        is_aurora: client.is_aurora_platform(),
                    };
                    if instance_found.try_send(event).is_err() {
                        warn!("dropping rds instance event: channel buffer full");
                    }
                }
            }
        }

        Self {
            config,
            events,
            start_logs_server,
            errors,
            database_schema_state: Arc::new(DatabaseSchemaState::default()),
            database_stats_state: Arc::new(DatabaseStatsState::default()),
            pg_bouncer_stats_state: Arc::new(PgBouncerStatsState::default()),
            query_stats_state: Arc::new(QueryStatsState::default()),
            explainer: Arc::new(Explainer::new()),
            obfuscator: Arc::new(Obfuscator::new()),
            clients,
        }
    }

    pub fn clients(&self) -> &[Arc<PostgresClient>] {
        &self.clients
    }

    /// Raise the log test notice against the first attached database so
    /// end to end log delivery can be verified.
    pub async fn write_log_test_message(&self) {
        let Some(client) = self.clients.first() else {
            warn!("no postgres databases to write log test message to");
            return;
        };

        let test_message = "DO $$ BEGIN RAISE NOTICE 'POSTGRES_MONITOR_AGENT_TEST'; END $$;";

        if let Err(err) = client.client().execute(test_message).await {
            error!(%err, "error writing log test message with RAISE NOTICE");
            self.errors.report(&err);
        }
    }

    /// Bootstrap synchronously, then launch the periodic monitor tasks
    /// and the slow query consumer.
    pub async fn start(self: Arc<Self>, raw_slow_queries: mpsc::Receiver<SlowQuery>) {
        self.bootstrap_metadata_and_schemas().await;

        let observer = Arc::clone(&self);
        tokio::spawn(async move {
            let run = || {
                let observer = Arc::clone(&observer);
                async move { observer.monitor().await }
            };
            utils::schedule::schedule_and_run_now(run, observer.config.monitor_interval).await;
        });

        if self.config.monitor_schema {
            let observer = Arc::clone(&self);
            tokio::spawn(async move {
                let run = || {
                    let observer = Arc::clone(&observer);
                    async move { observer.monitor_schemas().await }
                };
                utils::schedule::schedule_and_run_now(run, observer.config.monitor_schema_interval)
                    .await;
            });
        }

        if self.config.monitor_settings {
            let observer = Arc::clone(&self);
            tokio::spawn(async move {
                let run = || {
                    let observer = Arc::clone(&observer);
                    async move { observer.monitor_settings().await }
                };
                utils::schedule::schedule_and_run_now(
                    run,
                    observer.config.monitor_settings_interval,
                )
                .await;
            });
        }

        if self.config.monitor_query_stats {
            let observer = Arc::clone(&self);
            tokio::spawn(async move {
                let run = || {
                    let observer = Arc::clone(&observer);
                    async move { observer.monitor_query_stats().await }
                };
                utils::schedule::schedule_and_run_now(
                    run,
                    observer.config.monitor_query_stats_interval,
                )
                .await;
            });
        }

        let processor = SlowQueryProcessor {
            monitor_agent_queries: self.config.monitor_agent_queries,
            clients: self.clients.clone(),
            obfuscator: Arc::clone(&self.obfuscator),
            explainer: Arc::clone(&self.explainer),
            events: self.events.clone(),
            errors: self.errors.clone(),
        };
        tokio::spawn(processor.run(raw_slow_queries));
    }

    /// Ordering is load-bearing: pgbouncer detection first so the version
    /// is set on the client, metadata next for version and connection
    /// limits, then a schema pass to seed the delta baseline.
    pub async fn bootstrap_metadata_and_schemas(&self) {
        let mut started_log_server = false;

        for client in &self.clients {
            if self.config.monitor_pg_bouncer {
                self.worker(client, Arc::new(self.pg_bouncer_monitor())).start().await;
            }

            self.worker(client, Arc::new(self.metadata_monitor())).start().await;

            // platforms that deliver logs over a drain need the logs
            // server running
            if !started_log_server && platform_requires_log_server(client.platform()) {
                if self.start_logs_server.try_send(true).is_ok() {
                    started_log_server = true;
                }
            }

            // bootstrap schema as well so delta metrics are correct from
            // the second scheduled schema poll onwards
            if self.config.monitor_schema {
                self.worker(client, Arc::new(self.schema_monitor())).start().await;
            }
        }
    }

    async fn monitor(&self) {
        for client in &self.clients {
            tokio::spawn(self.worker(client, Arc::new(self.metadata_monitor())).start());

            if self.config.monitor_pg_bouncer {
                tokio::spawn(self.worker(client, Arc::new(self.pg_bouncer_monitor())).start());
            }

            if self.config.monitor_replication {
                tokio::spawn(
                    self.worker(
                        client,
                        Arc::new(ReplicationMonitor {
                            clients: self.clients.clone(),
                            events: self.events.clone(),
                        }),
                    )
                    .start(),
                );
            }

            tokio::spawn(
                self.worker(
                    client,
                    Arc::new(MetricMonitor {
                        database_stats_state: Arc::clone(&self.database_stats_state),
                        events: self.events.clone(),
                    }),
                )
                .start(),
            );
        }
    }

    async fn monitor_schemas(&self) {
        for client in &self.clients {
            tokio::spawn(self.worker(client, Arc::new(self.schema_monitor())).start());
        }
    }

    async fn monitor_settings(&self) {
        for client in &self.clients {
            tokio::spawn(
                self.worker(
                    client,
                    Arc::new(SettingsMonitor {
                        events: self.events.clone(),
                    }),
                )
                .start(),
            );
        }
    }

    async fn monitor_query_stats(&self) {
        for client in &self.clients {
            tokio::spawn(
                self.worker(
                    client,
                    Arc::new(QueryStatsMonitor {
                        state: Arc::clone(&self.query_stats_state),
                        events: self.events.clone(),
                        obfuscator: Arc::clone(&self.obfuscator),
                        monitor_agent_queries: self.config.monitor_agent_queries,
                    }),
                )
                .start(),
            );
        }
    }

    fn worker(
        &self,
        client: &Arc<PostgresClient>,
        monitor: Arc<dyn crate::monitor::Monitor>,
    ) -> MonitorWorker {
        MonitorWorker::new(monitor, Arc::clone(client), self.errors.clone())
    }

    fn metadata_monitor(&self) -> MetadataMonitor {
        MetadataMonitor {
            events: self.events.clone(),
            errors: self.errors.clone(),
        }
    }

    fn pg_bouncer_monitor(&self) -> PgBouncerMonitor {
        PgBouncerMonitor {
            state: Arc::clone(&self.pg_bouncer_stats_state),
            events: self.events.clone(),
        }
    }

    fn schema_monitor(&self) -> SchemaMonitor {
        SchemaMonitor {
            state: Arc::clone(&self.database_schema_state),
            events: self.events.clone(),
            errors: self.errors.clone(),
        }
    }
}

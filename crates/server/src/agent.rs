use std::sync::Arc;
use std::time::Duration;

use db::errors::{ErrorSink, ERROR_CHANNEL_CAPACITY};
use db::events::{
    EVENT_CHANNEL_CAPACITY, INSTANCE_FOUND_CHANNEL_CAPACITY, LOG_TEST_CHANNEL_CAPACITY,
    SLOW_QUERY_CHANNEL_CAPACITY, START_LOGS_SERVER_CHANNEL_CAPACITY,
};
use db::observer::{Observer, ObserverConfig};
use services::services::aggregator::Aggregator;
use services::services::cloud::observer::{CloudObserver, CloudObserverConfig};
use services::services::cloud::UnconfiguredCloudApi;
use services::services::data::Data;
use services::services::logs::LogProcessor;
use services::services::report::AgentInfo;
use services::services::shipper::{Shipper, ShipperConfig};
use tokio::sync::mpsc;
use tracing::info;
use utils::Stats;

use crate::config::Config;

/// Wires the channels, aggregator, shipper and observers together and
/// runs the selected mode.
pub struct Agent {
    config: Config,
}

impl Agent {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Normal long-running mode. Returns once everything is spawned; the
    /// caller waits for a shutdown signal.
    pub async fn run(&self) {
        info!(
            uuid = self.config.uuid.to_string(),
            version = self.config.version,
            "starting postgres monitor agent"
        );

        let wiring = self.wire().await;
        wiring.shipper.spawn();
        wiring.observer.start(wiring.raw_slow_queries_rx).await;
    }

    /// Bootstrap once, wait for the data to land, then ship a single
    /// report to verify the setup end to end.
    pub async fn test(&self) {
        info!("testing postgres monitor agent is setup correctly");

        let wiring = self.wire().await;
        wiring.observer.bootstrap_metadata_and_schemas().await;

        info!("waiting 5 seconds to send initial request...");
        tokio::time::sleep(Duration::from_secs(5)).await;

        wiring.shipper.tick().await;
    }

    /// Raise a notice in the first database so log delivery can be
    /// verified end to end by the drain.
    pub async fn test_logs(&self) {
        info!("testing database logs are setup correctly");

        let wiring = self.wire().await;

        info!("writing log test message");
        wiring.observer.write_log_test_message().await;
        info!("successfully wrote log test message!");
    }

    async fn wire(&self) -> Wiring {
        let config = &self.config;

        let data = Arc::new(Data::new());
        let stats = Arc::new(Stats::new());

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let (log_test_tx, log_test_rx) = mpsc::channel(LOG_TEST_CHANNEL_CAPACITY);
        let (start_logs_server_tx, start_logs_server_rx) =
            mpsc::channel(START_LOGS_SERVER_CHANNEL_CAPACITY);
        let (instance_found_tx, instance_found_rx) =
            mpsc::channel(INSTANCE_FOUND_CHANNEL_CAPACITY);
        let (raw_slow_queries_tx, raw_slow_queries_rx) =
            mpsc::channel(SLOW_QUERY_CHANNEL_CAPACITY);

        let errors = ErrorSink::new(errors_tx);

        let agent_info = AgentInfo {
            uuid: config.uuid.to_string(),
            version: config.version.clone(),
            host_platform: config.agent_host_platform.clone(),
        };

        let shipper = Shipper::new(
            ShipperConfig {
                api_endpoint: config.api_endpoint.clone(),
                api_key: config.api_key.clone(),
                test_mode: config.test_mode,
            },
            agent_info,
            Arc::clone(&data),
            Arc::clone(&stats),
        );

        let processor = LogProcessor {
            log_postgres_logs: config.log_postgres_logs || config.is_development(),
            stats: Arc::clone(&stats),
            events: events_tx.clone(),
            log_test: log_test_tx.clone(),
            raw_slow_queries: raw_slow_queries_tx.clone(),
        };
        let port = config.port;
        let logs_server_starter = Box::new(move || {
            let processor = processor.clone();
            tokio::spawn(crate::serve(port, processor));
        });

        let aggregator = Aggregator {
            data: Arc::clone(&data),
            shipper: Arc::clone(&shipper),
            logs_server_starter,
        };
        tokio::spawn(aggregator.run(events_rx, errors_rx, log_test_rx, start_logs_server_rx));

        if config.monitor_cloudwatch_metrics || config.monitor_aws_logs {
            let cloud_observer = CloudObserver::new(
                CloudObserverConfig {
                    monitor_cloudwatch_metrics: config.monitor_cloudwatch_metrics,
                    monitor_aws_logs: config.monitor_aws_logs,
                    metrics_interval: config.monitor_cloudwatch_metrics_interval,
                    os_metrics_interval: config.monitor_cloudwatch_logs_interval,
                    log_files_interval: config.monitor_aws_logs_interval,
                },
                Arc::new(UnconfiguredCloudApi),
                events_tx.clone(),
                raw_slow_queries_tx.clone(),
            );
            tokio::spawn(cloud_observer.run(instance_found_rx));
        }

        let observer = Arc::new(
            Observer::new(
                ObserverConfig {
                    monitor_interval: config.monitor_interval,
                    monitor_query_stats_interval: config.monitor_query_stats_interval,
                    monitor_schema_interval: config.monitor_schema_interval,
                    monitor_settings_interval: config.monitor_settings_interval,
                    monitor_pg_bouncer: config.monitor_pg_bouncer,
                    monitor_query_stats: config.monitor_query_stats,
                    monitor_replication: config.monitor_replication,
                    monitor_schema: config.monitor_schema,
                    monitor_settings: config.monitor_settings,
                    monitor_agent_queries: config.monitor_agent_queries,
                    monitor_cloudwatch_metrics: config.monitor_cloudwatch_metrics,
                    discover_aurora_reader_endpoint: config.discover_aurora_reader_endpoint,
                },
                events_tx.clone(),
                start_logs_server_tx,
                instance_found_tx,
                errors.clone(),
            )
            .await,
        );

        Wiring {
            shipper,
            observer,
            raw_slow_queries_rx,
        }
    }
}

struct Wiring {
    shipper: Arc<Shipper>,
    observer: Arc<Observer>,
    raw_slow_queries_rx: mpsc::Receiver<db::slow_query::SlowQuery>,
}

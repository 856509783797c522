use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row;
use tokio::sync::mpsc;
use tracing::warn;

use crate::client::{PostgresClient, ServerId};
use crate::comment::query_comment;
use crate::events::Event;
use crate::monitor::Monitor;
use crate::monitors::metrics::Metric;

/// Replication topology as seen from one server: `replica` is set when the
/// server itself is a standby, `replicas` lists the standbys following it.
/// Replaced wholesale on each insert since only the latest state matters.
#[derive(Debug, Clone)]
pub struct Replication {
    pub server_id: ServerId,
    pub replica: Option<Replica>,
    pub replicas: Vec<ReplicaClient>,
}

/// Populated on a standby from pg_stat_wal_receiver.
#[derive(Debug, Clone, Default)]
pub struct Replica {
    /// application_name:backend_start so restarts stay distinguishable
    pub application_name: String,
    pub primary_host: String,
    /// config name of the primary when it is also monitored, ex. GREEN
    pub primary_config_name: String,
    pub status: String,
    pub lag_ms: Option<f64>,
    pub measured_at: i64,
}

/// One row of pg_stat_replication on the primary.
#[derive(Debug, Clone, Default)]
pub struct ReplicaClient {
    pub application_name: String,
    pub client_addr: Option<String>,
    pub client_hostname: Option<String>,
    pub client_port: Option<i32>,
    pub backend_start: Option<i64>,
    pub backend_xmin: Option<i64>,
    pub state: Option<String>,
    pub write_lag_ms: Option<f64>,
    pub flush_lag_ms: Option<f64>,
    pub replay_lag_ms: Option<f64>,
    pub write_lag_bytes: f64,
    pub flush_lag_bytes: f64,
    pub replay_lag_bytes: f64,
    pub sync_priority: Option<i32>,
    pub sync_state: Option<String>,
    pub measured_at: i64,
}

pub struct ReplicationMonitor {
    pub clients: Vec<Arc<PostgresClient>>,
    pub events: mpsc::Sender<Event>,
}

#[async_trait]
impl Monitor for ReplicationMonitor {
    fn name(&self) -> &'static str {
        "ReplicationMonitor"
    }

    async fn run(&self, client: &PostgresClient) {
        let replica = self.find_replica(client).await;
        let replicas = self.find_replicas(client).await;

        let metrics = lag_metrics(client.server_id(), replica.as_ref(), &replicas);

        let replication = Replication {
            server_id: client.server_id().clone(),
            replica,
            replicas,
        };

        if self.events.try_send(Event::Replication(replication)).is_err() {
            warn!("dropping replication: channel buffer full");
        }

        if !metrics.is_empty() && self.events.try_send(Event::Metrics(metrics)).is_err() {
            warn!("dropping metrics: channel buffer full");
        }
    }
}

impl ReplicationMonitor {
    async fn find_replicas(&self, client: &PostgresClient) -> Vec<ReplicaClient> {
        // write, flush and replay lag are only useful for sync replication
        let query = format!(
            "select application_name, client_addr::text, client_hostname, client_port,
             extract(epoch from backend_start)::bigint as backend_start,
             backend_xmin::text::bigint as backend_xmin, state,
             (extract(epoch from write_lag) * 1000)::float8 as write_lag_ms,
             (extract(epoch from flush_lag) * 1000)::float8 as flush_lag_ms,
             (extract(epoch from replay_lag) * 1000)::float8 as replay_lag_ms,
             pg_wal_lsn_diff(sent_lsn, write_lsn)::float8 as write_lag_bytes,
             pg_wal_lsn_diff(write_lsn, flush_lsn)::float8 as flush_lag_bytes,
             pg_wal_lsn_diff(flush_lsn, replay_lsn)::float8 as replay_lag_bytes,
             sync_priority, sync_state from pg_stat_replication{}",
            query_comment()
        );

        let Ok(rows) = client.client().query(&query).await else {
            return Vec::new();
        };

        let mut replica_clients = Vec::new();

        for row in rows {
            let scan = || -> Result<(Option<String>, ReplicaClient), sqlx::Error> {
                let application_name: Option<String> = row.try_get(0)?;
                let replica_client = ReplicaClient {
                    application_name: String::new(),
                    client_addr: row.try_get(1)?,
                    client_hostname: row.try_get(2)?,
                    client_port: row.try_get(3)?,
                    backend_start: row.try_get(4)?,
                    backend_xmin: row.try_get(5)?,
                    state: row.try_get(6)?,
                    write_lag_ms: row.try_get(7)?,
                    flush_lag_ms: row.try_get(8)?,
                    replay_lag_ms: row.try_get(9)?,
                    write_lag_bytes: row.try_get::<Option<f64>, _>(10)?.unwrap_or(0.0),
                    flush_lag_bytes: row.try_get::<Option<f64>, _>(11)?.unwrap_or(0.0),
                    replay_lag_bytes: row.try_get::<Option<f64>, _>(12)?.unwrap_or(0.0),
                    sync_priority: row.try_get(13)?,
                    sync_state: row.try_get(14)?,
                    measured_at: 0,
                };
                Ok((application_name, replica_client))
            };
            let Ok((application_name, mut replica_client)) = scan() else {
                continue;
            };

            // application_name:backend_start uniquely identifies a standby
            replica_client.application_name = match (application_name, replica_client.backend_start)
            {
                (Some(name), Some(backend_start)) => format!("{name}:{backend_start}"),
                (Some(name), None) => name,
                (None, _) => String::new(),
            };
            replica_client.measured_at = utils::time::now_unix();

            replica_clients.push(replica_client);
        }

        replica_clients
    }

    async fn find_replica(&self, client: &PostgresClient) -> Option<Replica> {
        // PG 10 doesn't expose sender_host so the primary host is
        // extracted from conninfo instead
        let query = format!("select status, conninfo from pg_stat_wal_receiver{}", query_comment());

        let row = client.client().query_row(&query).await.ok()?;
        let status: String = row.try_get(0).ok()?;
        let conninfo: String = row.try_get(1).ok()?;

        if conninfo.is_empty() {
            // don't report a replica with zero lag
            return None;
        }

        let mut replica = Replica {
            status,
            measured_at: utils::time::now_unix(),
            lag_ms: self.find_replication_lag(client).await,
            ..Replica::default()
        };

        let (primary_host, application_name) = host_and_application_name_from_conninfo(&conninfo);
        replica.primary_host = primary_host;
        replica.application_name = application_name;

        // match the primary host back to a monitored config name
        for other in &self.clients {
            if other.host() == replica.primary_host {
                replica.primary_config_name = other.server_id().name.clone();
                break;
            }
        }

        // append the walreceiver backend start for a unique application id
        if let Some(backend_start) = self.find_wal_receiver_backend_start(client).await {
            replica.application_name = format!("{}:{backend_start}", replica.application_name);
        }

        Some(replica)
    }

    async fn find_wal_receiver_backend_start(&self, client: &PostgresClient) -> Option<i64> {
        let query = format!(
            "select extract(epoch from backend_start)::bigint from pg_stat_activity where backend_type = 'walreceiver'{}",
            query_comment()
        );
        client.client().query_i64(&query).await.ok()
    }

    /// Only useful on active primaries: with no writes the replay
    /// timestamp stands still and the apparent lag grows forever.
    async fn find_replication_lag(&self, client: &PostgresClient) -> Option<f64> {
        let query = format!(
            "select (extract(epoch from (now() - pg_last_xact_replay_timestamp())) * 1000)::float8 as lag_ms{}",
            query_comment()
        );
        let row = client.client().query_row(&query).await.ok()?;
        row.try_get::<Option<f64>, _>(0).ok().flatten()
    }
}

fn lag_metrics(
    server_id: &ServerId,
    replica: Option<&Replica>,
    replica_clients: &[ReplicaClient],
) -> Vec<Metric> {
    let mut metrics = Vec::new();

    // sent when the server itself is a standby
    if let Some(replica) = replica {
        if let Some(lag_ms) = replica.lag_ms {
            metrics.push(Metric::new(
                "replication.standby.lag.local.ms",
                lag_ms,
                &format!("replica/standby/{}", replica.application_name),
                server_id.clone(),
                replica.measured_at,
            ));
        }
    }

    // sent for every standby following the current server
    for replica_client in replica_clients {
        let entity = format!("replica/standby/{}", replica_client.application_name);
        let metric = |name: &str, value: f64| {
            Metric::new(name, value, &entity, server_id.clone(), replica_client.measured_at)
        };

        if let Some(lag) = replica_client.write_lag_ms {
            metrics.push(metric("replication.standby.lag.write.ms", lag));
        }
        if let Some(lag) = replica_client.flush_lag_ms {
            metrics.push(metric("replication.standby.lag.flush.ms", lag));
        }
        if let Some(lag) = replica_client.replay_lag_ms {
            metrics.push(metric("replication.standby.lag.replay.ms", lag));
        }

        metrics.push(metric("replication.standby.lag.write.bytes", replica_client.write_lag_bytes));
        metrics.push(metric("replication.standby.lag.flush.bytes", replica_client.flush_lag_bytes));
        metrics.push(metric(
            "replication.standby.lag.replay.bytes",
            replica_client.replay_lag_bytes,
        ));
    }

    metrics
}

/// Extract the primary host and application name from a libpq conninfo
/// string by splitting on whitespace then on `=`.
pub fn host_and_application_name_from_conninfo(conninfo: &str) -> (String, String) {
    let mut host = String::new();
    let mut application_name = String::new();

    for info in conninfo.split_whitespace() {
        let mut values = info.splitn(2, '=');
        let (Some(key), Some(value)) = (values.next(), values.next()) else {
            continue;
        };

        match key {
            "host" => host = value.to_string(),
            "application_name" => application_name = value.to_string(),
            _ => {}
        }
    }

    (host, application_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_conninfo_host_and_application_name() {
        let conninfo = "user=postgres passfile=/etc/postgresql/recovery_pgpass channel_binding=prefer dbname=replication host=ec2-123-456-789.compute-1.amazonaws.com port=5432 application_name=follower fallback_application_name=walreceiver sslmode=prefer";
        let (host, application_name) = host_and_application_name_from_conninfo(conninfo);
        assert_eq!(host, "ec2-123-456-789.compute-1.amazonaws.com");
        assert_eq!(application_name, "follower");
    }

    #[test]
    fn empty_conninfo_yields_empty_values() {
        let (host, application_name) = host_and_application_name_from_conninfo("");
        assert_eq!(host, "");
        assert_eq!(application_name, "");
    }

    #[test]
    fn lag_metrics_skip_absent_intervals() {
        let server_id = ServerId::default();
        let replica_client = ReplicaClient {
            application_name: "follower:123".into(),
            write_lag_ms: Some(12.0),
            flush_lag_ms: None,
            replay_lag_ms: None,
            write_lag_bytes: 100.0,
            flush_lag_bytes: 0.0,
            replay_lag_bytes: 0.0,
            measured_at: 42,
            ..ReplicaClient::default()
        };

        let metrics = lag_metrics(&server_id, None, &[replica_client]);

        let names: Vec<&str> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"replication.standby.lag.write.ms"));
        assert!(!names.contains(&"replication.standby.lag.flush.ms"));
        assert!(names.contains(&"replication.standby.lag.replay.bytes"));
        assert!(metrics.iter().all(|m| m.entity == "replica/standby/follower:123"));
    }

    #[test]
    fn standby_reports_local_lag() {
        let server_id = ServerId::default();
        let replica = Replica {
            application_name: "follower:99".into(),
            lag_ms: Some(250.0),
            measured_at: 42,
            ..Replica::default()
        };

        let metrics = lag_metrics(&server_id, Some(&replica), &[]);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, "replication.standby.lag.local.ms");
        assert_eq!(metrics[0].value, 250.0);
    }
}

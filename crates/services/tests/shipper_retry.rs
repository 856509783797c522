//! Integration tests for the shipper's LIFO retry buffer against a
//! scripted local HTTP endpoint: newest-first draining, retry on 5xx,
//! drop on client errors and the bounded buffer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use db::client::{PostgresServer, ServerId};
use services::services::data::Data;
use services::services::report::AgentInfo;
use services::services::shipper::{Shipper, ShipperConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use utils::Stats;

/// Minimal HTTP responder that replies with the scripted status codes in
/// order, repeating the last one once the script runs out.
async fn spawn_stub_endpoint(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}/agent/v1/report", listener.local_addr().unwrap());
    let requests_seen = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&requests_seen);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let statuses = statuses.clone();
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                // read the full request (headers plus content-length body)
                // before answering so the client never sees a closed
                // socket mid-write
                let mut request = Vec::new();
                let mut chunk = vec![0_u8; 16 * 1024];
                loop {
                    let Ok(read) = socket.read(&mut chunk).await else {
                        return;
                    };
                    if read == 0 {
                        break;
                    }
                    request.extend_from_slice(&chunk[..read]);

                    let text = String::from_utf8_lossy(&request);
                    if let Some(header_end) = text.find("\r\n\r\n") {
                        let content_length = text
                            .lines()
                            .find_map(|line| {
                                line.to_ascii_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                            })
                            .unwrap_or(0);
                        if request.len() >= header_end + 4 + content_length {
                            break;
                        }
                    }
                }
                if request.is_empty() {
                    return;
                }

                let index = counter.fetch_add(1, Ordering::SeqCst);
                let status = *statuses.get(index).or(statuses.last()).unwrap_or(&200);
                let reason = match status {
                    200 => "OK",
                    401 => "Unauthorized",
                    404 => "Not Found",
                    _ => "Internal Server Error",
                };

                let response =
                    format!("HTTP/1.1 {status} {reason}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });

    (endpoint, requests_seen)
}

fn shipper_against(endpoint: &str, data: &Arc<Data>) -> Arc<Shipper> {
    Shipper::new(
        ShipperConfig {
            api_endpoint: endpoint.to_string(),
            api_key: "test-key".into(),
            test_mode: false,
        },
        AgentInfo {
            uuid: "00000000-0000-0000-0000-000000000001".into(),
            version: "0.1.0".into(),
            host_platform: String::new(),
        },
        Arc::clone(data),
        Arc::new(Stats::new()),
    )
}

/// Add enough data that the next built report is non-empty.
fn add_server_data(data: &Data, monitored_at: i64) {
    data.add_postgres_server(PostgresServer {
        server_id: ServerId {
            name: "GREEN".into(),
            config_var_name: "GREEN_URL".into(),
            database: "app".into(),
        },
        platform: "heroku".into(),
        max_connections: 100,
        pg_bouncer: None,
        version: "14.1".into(),
        monitored_at,
    });
}

#[tokio::test]
async fn empty_reports_are_not_shipped() {
    let (endpoint, requests_seen) = spawn_stub_endpoint(vec![200]).await;
    let data = Arc::new(Data::new());
    let shipper = shipper_against(&endpoint, &data);

    // nothing accumulated: no HTTP call and nothing buffered
    shipper.tick().await;

    assert_eq!(requests_seen.load(Ordering::SeqCst), 0);
    assert_eq!(shipper.buffered_requests(), 0);
}

#[tokio::test]
async fn successful_reports_drain_the_buffer() {
    let (endpoint, requests_seen) = spawn_stub_endpoint(vec![200]).await;
    let data = Arc::new(Data::new());
    let shipper = shipper_against(&endpoint, &data);

    add_server_data(&data, 1);
    shipper.tick().await;

    assert_eq!(requests_seen.load(Ordering::SeqCst), 1);
    assert_eq!(shipper.buffered_requests(), 0);
}

#[tokio::test]
async fn server_errors_keep_reports_for_retry() {
    let (endpoint, _requests_seen) = spawn_stub_endpoint(vec![500]).await;
    let data = Arc::new(Data::new());
    let shipper = shipper_against(&endpoint, &data);

    add_server_data(&data, 1);
    shipper.tick().await;
    add_server_data(&data, 2);
    shipper.tick().await;

    // each tick buffered its report, attempted the newest, failed and
    // stopped, so both reports are waiting
    assert_eq!(shipper.buffered_requests(), 2);
}

#[tokio::test]
async fn client_errors_drop_reports() {
    for status in [401_u16, 404] {
        let (endpoint, requests_seen) = spawn_stub_endpoint(vec![status]).await;
        let data = Arc::new(Data::new());
        let shipper = shipper_against(&endpoint, &data);

        add_server_data(&data, 1);
        shipper.tick().await;

        assert_eq!(requests_seen.load(Ordering::SeqCst), 1);
        assert_eq!(shipper.buffered_requests(), 0, "status {status} should drop");
    }
}

#[tokio::test]
async fn backlog_drains_two_reports_per_tick_newest_first() {
    let (endpoint, requests_seen) = spawn_stub_endpoint(vec![500, 500, 200]).await;
    let data = Arc::new(Data::new());
    let shipper = shipper_against(&endpoint, &data);

    // two failed ticks leave two buffered reports
    add_server_data(&data, 1);
    shipper.tick().await;
    add_server_data(&data, 2);
    shipper.tick().await;
    assert_eq!(shipper.buffered_requests(), 2);

    // endpoint recovered: this tick ships the new report plus one
    // buffered report
    add_server_data(&data, 3);
    shipper.tick().await;
    assert_eq!(shipper.buffered_requests(), 1);
    assert_eq!(requests_seen.load(Ordering::SeqCst), 4);

    // next tick ships the remainder
    add_server_data(&data, 4);
    shipper.tick().await;
    assert_eq!(shipper.buffered_requests(), 0);
}

#[tokio::test]
async fn buffer_is_bounded_and_drops_the_oldest() {
    let (endpoint, _requests_seen) = spawn_stub_endpoint(vec![500]).await;
    let data = Arc::new(Data::new());
    let shipper = shipper_against(&endpoint, &data);

    for tick in 0..12 {
        add_server_data(&data, tick);
        shipper.tick().await;
        assert!(shipper.buffered_requests() <= 10);
    }

    assert_eq!(shipper.buffered_requests(), 10);
}

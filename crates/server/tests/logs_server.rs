//! Integration tests for the /logs ingestion endpoint: drain
//! authentication, the root redirect and end-to-end frame routing onto
//! the slow query and log test channels.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use db::events::Event;
use db::slow_query::SlowQuery;
use services::services::logs::LogProcessor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;
use utils::Stats;

const SLOW_QUERY_FRAME: &str = "650 <134>1 2022-06-13T14:10:26+00:00 host app postgres.134597 - [GREEN] [15-1]  sql_error_code = 00000 LOG:  duration: 17.862 ms  execute <unnamed>: SELECT * FROM users WHERE id = 1";

struct TestChannels {
    events: mpsc::Receiver<Event>,
    log_test: mpsc::Receiver<String>,
    slow_queries: mpsc::Receiver<SlowQuery>,
    stats: Arc<Stats>,
}

fn test_app() -> (axum::Router, TestChannels) {
    let (events_tx, events) = mpsc::channel(16);
    let (log_test_tx, log_test) = mpsc::channel(16);
    let (slow_query_tx, slow_queries) = mpsc::channel(16);
    let stats = Arc::new(Stats::new());

    let processor = LogProcessor {
        log_postgres_logs: false,
        stats: Arc::clone(&stats),
        events: events_tx,
        log_test: log_test_tx,
        raw_slow_queries: slow_query_tx,
    };

    (
        server::app(processor),
        TestChannels {
            events,
            log_test,
            slow_queries,
            stats,
        },
    )
}

fn logs_request(content_type: Option<&str>, drain_token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/logs");
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    if let Some(drain_token) = drain_token {
        builder = builder.header("Logplex-Drain-Token", drain_token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn rejects_wrong_content_type() {
    let (app, _channels) = test_app();

    let response = app
        .oneshot(logs_request(Some("application/json"), Some("d.token"), "body"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rejects_missing_or_malformed_drain_token() {
    let (app, _channels) = test_app();
    let response = app
        .oneshot(logs_request(Some("application/logplex-1"), None, "body"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (app, _channels) = test_app();
    let response = app
        .oneshot(logs_request(Some("application/logplex-1"), Some("token"), "body"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn accepts_authenticated_frames_and_routes_slow_queries() {
    let (app, mut channels) = test_app();

    let response = app
        .oneshot(logs_request(
            Some("application/logplex-1"),
            Some("d.1234-5678"),
            SLOW_QUERY_FRAME,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    // processing is async; the slow query arrives on the channel
    let slow_query = channels.slow_queries.recv().await.unwrap();
    assert_eq!(slow_query.raw, "SELECT * FROM users WHERE id = 1");
    assert_eq!(slow_query.server_name, "GREEN");
    assert_eq!(channels.stats.get("logs.received"), 1);
    assert_eq!(channels.stats.get("logs.slow_queries"), 1);
}

#[tokio::test]
async fn routes_log_test_messages() {
    let (app, mut channels) = test_app();

    let response = app
        .oneshot(logs_request(
            Some("application/logplex-1"),
            Some("d.1234-5678"),
            "119 <134>1 2022-06-13T14:10:26+00:00 host app postgres.134597 - [GREEN] [16-1] NOTICE:  POSTGRES_MONITOR_AGENT_TEST",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(channels.log_test.recv().await.is_some());
}

#[tokio::test]
async fn metric_frames_become_log_metric_events() {
    let (app, mut channels) = test_app();

    let response = app
        .oneshot(logs_request(
            Some("application/logplex-1"),
            Some("d.1234-5678"),
            "484 <134>1 2022-06-13T14:10:04+00:00 host app heroku-postgres - source=DATABASE sample#db_size=9442399bytes",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    match channels.events.recv().await.unwrap() {
        Event::LogMetrics(metrics) => {
            assert_eq!(metrics.get("db_size").map(String::as_str), Some("9442399bytes"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn root_redirects_to_setup() {
    let (app, _channels) = test_app();

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://postgresmonitor.com/app/setup/"
    );
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use tracing::{debug, error, info, warn};
use utils::Stats;

use crate::services::data::Data;
use crate::services::report::{AgentInfo, ReportRequest};

/// Failed reports are buffered for retry; past this many the oldest is
/// dropped.
const MAX_BUFFERED_REQUESTS: usize = 10;

/// How many buffered reports are attempted per tick. At two per tick a
/// backlog drains gradually instead of flooding the ingest endpoint.
const REQUESTS_PER_TICK: usize = 2;

const SHIP_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound for the random startup delay that smooths request arrival
/// across a fleet of agents.
const MAX_START_JITTER_SECS: u64 = 30;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ShipperConfig {
    pub api_endpoint: String,
    pub api_key: String,
    pub test_mode: bool,
}

/// Ships coalesced reports to the ingest api on a fixed cadence, keeping
/// a bounded LIFO of reports that failed with a retryable error.
pub struct Shipper {
    config: ShipperConfig,
    agent: AgentInfo,
    data: Arc<Data>,
    stats: Arc<Stats>,
    requests: Mutex<VecDeque<ReportRequest>>,
    http: reqwest::Client,
}

impl Shipper {
    pub fn new(
        config: ShipperConfig,
        agent: AgentInfo,
        data: Arc<Data>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("http client");

        Arc::new(Self {
            config,
            agent,
            data,
            stats,
            requests: Mutex::new(VecDeque::with_capacity(MAX_BUFFERED_REQUESTS)),
            http,
        })
    }

    /// Report every 60 seconds with some initial jitter delay to smooth
    /// out requests across agents.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let shipper = Arc::clone(self);
        tokio::spawn(async move {
            let jitter =
                Duration::from_secs(rand::rng().random_range(0..MAX_START_JITTER_SECS));
            let run = || {
                let shipper = Arc::clone(&shipper);
                async move { shipper.tick().await }
            };
            utils::schedule::schedule(run, SHIP_INTERVAL, jitter).await;
        })
    }

    /// One shipping pass: drain the accumulators into a report, buffer
    /// it, then attempt the newest buffered reports.
    pub async fn tick(&self) {
        let snapshot = self.data.copy_and_reset();
        let stats = self.stats.copy_and_reset();
        let request =
            ReportRequest::new(&self.agent, &snapshot, utils::time::now_unix(), &stats);

        if !request.is_valid() {
            return;
        }

        {
            let mut requests = self.requests.lock().unwrap();
            // drop the oldest request once the buffer is full
            if requests.len() == MAX_BUFFERED_REQUESTS {
                requests.pop_front();
            }
            requests.push_back(request);
        }

        // send the newest requests first; at two per tick a backlog from
        // an outage backfills gradually
        for _ in 0..REQUESTS_PER_TICK {
            let Some(request) = self.requests.lock().unwrap().pop_back() else {
                break;
            };

            if !self.send_single_request(&request).await {
                info!("saving failed request to retry later");
                self.requests.lock().unwrap().push_back(request);
                break;
            }

            // smooth load on the ingest endpoint between sends
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    pub fn buffered_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// POST one report. Returns false only for retryable failures: a
    /// transport error or a 5xx. Client errors drop the report since
    /// resending it would fail the same way.
    async fn send_single_request(&self, request: &ReportRequest) -> bool {
        let compressed = match request.to_compressed_json() {
            Ok(compressed) => compressed,
            Err(err) => {
                error!(%err, "error generating json");
                return true;
            }
        };

        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Ok(json) = request.to_json() {
                let compression = json.len() as f64 / compressed.len() as f64;
                debug!(json_bytes = json.len(), "json request");
                debug!(
                    compressed_bytes = compressed.len(),
                    compression = utils::num::round2(compression),
                    "compressed json request"
                );
            }
        }

        let response = self
            .http
            .post(&self.config.api_endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Encoding", "gzip")
            .header("Content-Type", "application/json; charset=utf-8")
            .header(
                "User-Agent",
                format!("postgres-monitor-agent/{}", self.agent.version),
            )
            .body(compressed)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                error!(%err, "request error");
                return false;
            }
        };

        let status = response.status();
        info!(status = status.as_u16(), "request status");

        if status == StatusCode::OK {
            if self.config.test_mode {
                info!("test success!");
            }
            true
        } else if status == StatusCode::UNAUTHORIZED {
            // retrying with the same bad key is pointless, drop the report
            warn!(status = 401, "invalid api key");
            true
        } else if status.as_u16() < 500 {
            // client errors are not transient
            true
        } else {
            false
        }
    }
}

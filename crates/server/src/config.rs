use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_API_ENDPOINT: &str = "https://api.postgresmonitor.com/agent/v1/report";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing POSTGRES_MONITOR_API_KEY")]
    MissingApiKey,
}

/// Env-derived agent configuration. Monitor intervals are fixed: if data
/// is sent more frequently the api drops it.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_endpoint: String,
    pub api_key: String,
    /// development vs production
    pub environment: String,
    pub port: u16,
    pub uuid: Uuid,
    pub version: String,

    pub log_level: String,
    pub log_postgres_logs: bool,

    pub monitor_interval: Duration,
    pub monitor_query_stats_interval: Duration,
    pub monitor_schema_interval: Duration,
    pub monitor_settings_interval: Duration,
    pub monitor_cloudwatch_metrics_interval: Duration,
    pub monitor_cloudwatch_logs_interval: Duration,
    pub monitor_aws_logs_interval: Duration,

    pub monitor_pg_bouncer: bool,
    pub monitor_query_stats: bool,
    pub monitor_replication: bool,
    pub monitor_schema: bool,
    pub monitor_settings: bool,
    pub monitor_agent_queries: bool,
    pub monitor_aws_logs: bool,
    pub monitor_cloudwatch_metrics: bool,

    pub discover_aurora_reader_endpoint: bool,

    /// heroku, aws_ecs or empty when unknown
    pub agent_host_platform: String,

    pub test_mode: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = get_env_var("POSTGRES_MONITOR_API_KEY", "");
        if api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        Ok(Self {
            api_endpoint: get_env_var("POSTGRES_MONITOR_API_URL", DEFAULT_API_ENDPOINT),
            api_key,
            environment: get_env_var("AGENT_ENV", "production"),
            port: get_env_var("PORT", "8080").parse().unwrap_or(8080),
            uuid: Uuid::new_v4(),
            version: VERSION.to_string(),
            log_level: get_env_var("LOG_LEVEL", "info"),
            log_postgres_logs: get_env_var_bool("LOG_POSTGRES_LOGS", false),
            monitor_interval: Duration::from_secs(30),
            monitor_query_stats_interval: Duration::from_secs(60),
            monitor_schema_interval: Duration::from_secs(15 * 60),
            monitor_settings_interval: Duration::from_secs(3 * 60 * 60),
            monitor_cloudwatch_metrics_interval: Duration::from_secs(5 * 60),
            monitor_cloudwatch_logs_interval: Duration::from_secs(60),
            monitor_aws_logs_interval: Duration::from_secs(2 * 60),
            monitor_pg_bouncer: get_env_var_bool("MONITOR_PGBOUNCER", true),
            monitor_query_stats: get_env_var_bool("MONITOR_QUERY_STATS", true),
            monitor_replication: get_env_var_bool("MONITOR_REPLICATION", true),
            monitor_schema: get_env_var_bool("MONITOR_SCHEMA", true),
            monitor_settings: get_env_var_bool("MONITOR_SETTINGS", true),
            monitor_agent_queries: get_env_var_bool("MONITOR_AGENT_QUERIES", false),
            monitor_aws_logs: get_env_var_bool("MONITOR_AWS_LOGS", true),
            monitor_cloudwatch_metrics: get_env_var_bool("MONITOR_CLOUDWATCH_METRICS", true),
            discover_aurora_reader_endpoint: get_env_var_bool(
                "AURORA_DISCOVER_READER_ENDPOINT",
                true,
            ),
            agent_host_platform: detect_host_platform(),
            test_mode: false,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn set_test_mode(&mut self) {
        self.test_mode = true;
    }
}

fn get_env_var(name: &str, default_value: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default_value.to_string(),
    }
}

fn get_env_var_bool(name: &str, default_value: bool) -> bool {
    get_env_var(name, if default_value { "true" } else { "false" })
        .parse()
        .unwrap_or(false)
}

/// Tag where the agent itself runs, for the report's agent envelope.
fn detect_host_platform() -> String {
    if !get_env_var("DYNO", "").is_empty() {
        return "heroku".to_string();
    }
    if !get_env_var("ECS_CONTAINER_METADATA_URI_V4", "").is_empty()
        || !get_env_var("ECS_CONTAINER_METADATA_URI", "").is_empty()
        || !get_env_var("ECS_AGENT_URI", "").is_empty()
    {
        return "aws_ecs".to_string();
    }
    String::new()
}

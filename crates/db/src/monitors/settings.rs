use async_trait::async_trait;
use sqlx::Row;
use tokio::sync::mpsc;
use tracing::warn;

use crate::client::{PostgresClient, ServerId};
use crate::comment::query_comment;
use crate::events::Event;
use crate::monitor::Monitor;

/// One row of pg_settings. Replaced by `(server, name)` on every poll.
#[derive(Debug, Clone, Default)]
pub struct Setting {
    pub server_id: ServerId,
    pub name: String,
    pub value: String,
    pub unit: Option<String>,
    pub category: String,
    pub description: String,
    pub context: String,
    pub var_type: String,
    pub source: String,
    pub min_val: Option<String>,
    pub max_val: Option<String>,
    pub enum_vals: Option<String>,
    pub boot_val: Option<String>,
    pub reset_val: Option<String>,
    pub pending_restart: bool,
    pub measured_at: i64,
}

pub struct SettingsMonitor {
    pub events: mpsc::Sender<Event>,
}

#[async_trait]
impl Monitor for SettingsMonitor {
    fn name(&self) -> &'static str {
        "SettingsMonitor"
    }

    async fn run(&self, client: &PostgresClient) {
        let settings = self.find_settings(client).await;
        if settings.is_empty() {
            return;
        }

        if self.events.try_send(Event::Settings(settings)).is_err() {
            warn!("dropping settings: channel buffer full");
        }
    }
}

impl SettingsMonitor {
    async fn find_settings(&self, client: &PostgresClient) -> Vec<Setting> {
        let query = format!(
            "select name, setting, unit, category, short_desc || ' ' || coalesce(extra_desc, '') as desc,
             context, vartype, source, min_val, max_val, enumvals::text, boot_val, reset_val, pending_restart
             from pg_settings{}",
            query_comment()
        );

        let Ok(rows) = client.client().query(&query).await else {
            return Vec::new();
        };

        let measured_at = utils::time::now_unix();
        let mut settings = Vec::new();

        for row in rows {
            let scan = || -> Result<Setting, sqlx::Error> {
                Ok(Setting {
                    server_id: client.server_id().clone(),
                    name: row.try_get(0)?,
                    value: row.try_get(1)?,
                    unit: row.try_get(2)?,
                    category: row.try_get(3)?,
                    description: row.try_get(4)?,
                    context: row.try_get(5)?,
                    var_type: row.try_get(6)?,
                    source: row.try_get(7)?,
                    min_val: row.try_get(8)?,
                    max_val: row.try_get(9)?,
                    enum_vals: row.try_get(10)?,
                    boot_val: row.try_get(11)?,
                    reset_val: row.try_get(12)?,
                    pending_restart: row.try_get(13)?,
                    measured_at,
                })
            };

            if let Ok(setting) = scan() {
                settings.push(setting);
            }
        }

        settings
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::Row;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::client::{PostgresClient, ServerId};
use crate::comment::query_comment;
use crate::errors::ErrorSink;
use crate::events::Event;
use crate::monitor::Monitor;

/// Previous database schema snapshot per server. Table and index deltas
/// are computed between two polling intervals.
#[derive(Debug, Default)]
pub struct DatabaseSchemaState {
    databases: Mutex<HashMap<ServerId, Database>>,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub server_id: ServerId,
    pub name: String,
    pub schemas: Vec<Schema>,
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub tables: Vec<Table>,
}

/// Bytes and row counters carry both a `_total` (latest absolute value)
/// and a delta field computed against the previous poll.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub name: String,
    pub schema: String,
    pub total_bytes: i64,
    pub total_bytes_total: i64,
    pub index_bytes: i64,
    pub index_bytes_total: i64,
    pub toast_bytes: i64,
    pub toast_bytes_total: i64,
    pub table_bytes: i64,
    pub table_bytes_total: i64,
    pub bloat_bytes: i64,
    pub bloat_bytes_total: i64,
    pub bloat_factor: f64,

    pub sequential_scans: i64,
    pub sequential_scan_read_rows: i64,
    pub index_scans: i64,
    pub index_scan_read_rows: i64,
    pub inserted_rows: i64,
    pub updated_rows: i64,
    pub deleted_rows: i64,
    pub live_row_estimate: i64,
    pub live_row_estimate_total: i64,
    pub dead_row_estimate: i64,
    pub dead_row_estimate_total: i64,
    pub modified_rows_since_analyze: i64,
    pub last_vacuum_at: Option<i64>,
    pub last_autovacuum_at: Option<i64>,
    pub last_analyze_at: Option<i64>,
    pub last_autoanalyze_at: Option<i64>,
    pub vacuum_count: i64,
    pub autovacuum_count: i64,
    pub analyze_count: i64,
    pub autoanalyze_count: i64,
    pub disk_blocks_read: i64,
    pub disk_blocks_hit: i64,
    pub disk_blocks_hit_percent: f64,
    pub disk_index_blocks_read: i64,
    pub disk_index_blocks_hit: i64,
    pub disk_toast_blocks_read: i64,
    pub disk_toast_blocks_hit: i64,
    pub disk_toast_index_blocks_read: i64,
    pub disk_toast_index_blocks_hit: i64,

    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
}

#[derive(Debug, Clone, Default)]
pub struct Column {
    pub schema: String,
    pub table_name: String,
    pub name: String,
    pub default: Option<String>,
    pub data_type: String,
    pub nullable: Option<String>,
    pub max_length: Option<i64>,
    pub numeric_precision: Option<i64>,
    pub numeric_scale: Option<i64>,
    pub interval_type: Option<String>,
    pub is_identity: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Index {
    pub name: String,
    pub schema: String,
    pub table_name: String,
    pub unique: bool,
    pub unused: bool,
    pub valid: bool,
    pub definition: String,
    pub bytes: i64,
    pub bytes_total: i64,
    pub bloat_bytes: i64,
    pub bloat_bytes_total: i64,
    pub bloat_factor: f64,
    pub scans: i64,
    pub disk_blocks_read: i64,
    pub disk_blocks_hit: i64,
}

#[derive(Debug, Clone)]
pub struct UnusedIndex {
    pub name: String,
    pub schema: String,
    pub table_name: String,
}

#[derive(Debug, Clone)]
pub struct BloatResult {
    pub kind: String, // table or index
    pub schema_name: String,
    pub name: String,
    pub bloat: f64,
    pub waste: i64,
}

impl Table {
    pub fn delta(&self, latest: &Table) -> Table {
        let mut table = Table {
            name: latest.name.clone(),
            schema: latest.schema.clone(),
            total_bytes: latest.total_bytes_total - self.total_bytes_total,
            total_bytes_total: latest.total_bytes_total,
            index_bytes: latest.index_bytes_total - self.index_bytes_total,
            index_bytes_total: latest.index_bytes_total,
            toast_bytes: latest.toast_bytes_total - self.toast_bytes_total,
            toast_bytes_total: latest.toast_bytes_total,
            table_bytes: latest.table_bytes_total - self.table_bytes_total,
            table_bytes_total: latest.table_bytes_total,
            bloat_bytes_total: latest.bloat_bytes_total,
            bloat_factor: latest.bloat_factor,
            sequential_scans: latest.sequential_scans - self.sequential_scans,
            sequential_scan_read_rows: latest.sequential_scan_read_rows
                - self.sequential_scan_read_rows,
            index_scans: latest.index_scans - self.index_scans,
            index_scan_read_rows: latest.index_scan_read_rows - self.index_scan_read_rows,
            inserted_rows: latest.inserted_rows - self.inserted_rows,
            updated_rows: latest.updated_rows - self.updated_rows,
            deleted_rows: latest.deleted_rows - self.deleted_rows,
            live_row_estimate: latest.live_row_estimate_total - self.live_row_estimate_total,
            live_row_estimate_total: latest.live_row_estimate_total,
            dead_row_estimate_total: latest.dead_row_estimate_total,
            modified_rows_since_analyze: latest.modified_rows_since_analyze,
            last_vacuum_at: latest.last_vacuum_at,
            last_autovacuum_at: latest.last_autovacuum_at,
            last_analyze_at: latest.last_analyze_at,
            last_autoanalyze_at: latest.last_autoanalyze_at,
            vacuum_count: latest.vacuum_count - self.vacuum_count,
            autovacuum_count: latest.autovacuum_count - self.autovacuum_count,
            analyze_count: latest.analyze_count - self.analyze_count,
            autoanalyze_count: latest.autoanalyze_count - self.autoanalyze_count,
            disk_blocks_read: latest.disk_blocks_read - self.disk_blocks_read,
            disk_blocks_hit: latest.disk_blocks_hit - self.disk_blocks_hit,
            disk_index_blocks_read: latest.disk_index_blocks_read - self.disk_index_blocks_read,
            disk_index_blocks_hit: latest.disk_index_blocks_hit - self.disk_index_blocks_hit,
            disk_toast_blocks_read: latest.disk_toast_blocks_read - self.disk_toast_blocks_read,
            disk_toast_blocks_hit: latest.disk_toast_blocks_hit - self.disk_toast_blocks_hit,
            disk_toast_index_blocks_read: latest.disk_toast_index_blocks_read
                - self.disk_toast_index_blocks_read,
            disk_toast_index_blocks_hit: latest.disk_toast_index_blocks_hit
                - self.disk_toast_index_blocks_hit,
            columns: latest.columns.clone(),
            indexes: latest.indexes.clone(),
            ..Table::default()
        };

        // dead row and bloat deltas can go negative when vacuum reclaims
        // space, which reads as nonsense, so they clamp to zero
        let dead_row_estimate = latest.dead_row_estimate_total - self.dead_row_estimate_total;
        if dead_row_estimate > 0 {
            table.dead_row_estimate = dead_row_estimate;
        }
        let bloat_bytes = latest.bloat_bytes_total - self.bloat_bytes_total;
        if bloat_bytes > 0 {
            table.bloat_bytes = bloat_bytes;
        }
        table.disk_blocks_hit_percent = utils::num::hit_percent(
            table.disk_blocks_hit as f64,
            table.disk_blocks_read as f64,
        );
        table
    }
}

impl Index {
    pub fn delta(&self, latest: &Index) -> Index {
        let mut index = Index {
            name: latest.name.clone(),
            schema: latest.schema.clone(),
            table_name: latest.table_name.clone(),
            unique: latest.unique,
            unused: latest.unused,
            valid: latest.valid,
            definition: latest.definition.clone(),
            bytes: latest.bytes_total - self.bytes_total,
            bytes_total: latest.bytes_total,
            bloat_bytes_total: latest.bloat_bytes_total,
            bloat_factor: latest.bloat_factor,
            scans: latest.scans - self.scans,
            disk_blocks_read: latest.disk_blocks_read - self.disk_blocks_read,
            disk_blocks_hit: latest.disk_blocks_hit - self.disk_blocks_hit,
            ..Index::default()
        };
        // bloat can shrink when an index is rebuilt
        let bloat_bytes = latest.bloat_bytes_total - self.bloat_bytes_total;
        if bloat_bytes > 0 {
            index.bloat_bytes = bloat_bytes;
        }
        index
    }
}

pub struct SchemaMonitor {
    pub state: Arc<DatabaseSchemaState>,
    pub events: mpsc::Sender<Event>,
    pub errors: ErrorSink,
}

#[async_trait]
impl Monitor for SchemaMonitor {
    fn name(&self) -> &'static str {
        "SchemaMonitor"
    }

    async fn run(&self, client: &PostgresClient) {
        let schemas = self.find_schemas(client).await;
        let mut tables = self.find_tables(client).await;
        let mut indexes = self.find_indexes(client).await;
        let bloat = self.find_bloat(client).await;

        // stitch bloat onto tables and indexes by type and name before any
        // deltas so bloat totals are present in the delta inputs
        for b in &bloat {
            match b.kind.as_str() {
                "table" => {
                    for table in &mut tables {
                        if table.schema == b.schema_name && table.name == b.name {
                            table.bloat_bytes_total = b.waste;
                            table.bloat_factor = b.bloat;
                        }
                    }
                }
                "index" => {
                    for index in &mut indexes {
                        if index.schema == b.schema_name && index.name == b.name {
                            index.bloat_bytes_total = b.waste;
                            index.bloat_factor = b.bloat;
                        }
                    }
                }
                _ => {}
            }
        }

        // attach indexes to tables by schema and table name
        for index in indexes {
            if let Some(table) = tables
                .iter_mut()
                .find(|table| table.schema == index.schema && table.name == index.table_name)
            {
                table.indexes.push(index);
            }
        }

        // group tables into their schemas
        let schemas: Vec<Schema> = schemas
            .into_iter()
            .map(|name| Schema {
                tables: tables.iter().filter(|t| t.schema == name).cloned().collect(),
                name,
            })
            .collect();

        let current_database = Database {
            server_id: client.server_id().clone(),
            name: client.server_id().database.clone(),
            schemas,
        };

        // delta tables and indexes after stitching so bloat and column
        // data are present; only report once two polls have happened
        let delta_database = {
            let mut state = self.state.databases.lock().unwrap();

            let delta = state.get(client.server_id()).map(|previous| Database {
                server_id: current_database.server_id.clone(),
                name: current_database.name.clone(),
                schemas: current_database
                    .schemas
                    .iter()
                    .map(|schema| Schema {
                        name: schema.name.clone(),
                        tables: delta_tables(&schema.tables, previous),
                    })
                    .collect(),
            });

            state.insert(client.server_id().clone(), current_database);
            delta
        };

        if let Some(delta_database) = delta_database {
            if self.events.try_send(Event::Database(delta_database)).is_err() {
                warn!("dropping schema database: channel buffer full");
            }
        }
    }
}

/// Delta each table against its previous snapshot. Tables without a
/// previous snapshot are skipped; they report from the next interval on.
fn delta_tables(tables: &[Table], previous_database: &Database) -> Vec<Table> {
    let mut deltas = Vec::new();

    for table in tables {
        let previous = previous_database
            .schemas
            .iter()
            .filter(|schema| schema.name == table.schema)
            .flat_map(|schema| &schema.tables)
            .find(|previous| previous.name == table.name);

        if let Some(previous) = previous {
            let mut delta = previous.delta(table);
            delta.indexes = delta_indexes(&table.indexes, previous_database);
            deltas.push(delta);
        }
    }

    deltas
}

fn delta_indexes(indexes: &[Index], previous_database: &Database) -> Vec<Index> {
    let mut deltas = Vec::new();

    for index in indexes {
        let previous = previous_database
            .schemas
            .iter()
            .filter(|schema| schema.name == index.schema)
            .flat_map(|schema| &schema.tables)
            .filter(|table| table.name == index.table_name)
            .flat_map(|table| &table.indexes)
            .find(|previous| previous.name == index.name);

        if let Some(previous) = previous {
            deltas.push(previous.delta(index));
        }
    }

    deltas
}

impl SchemaMonitor {
    async fn find_schemas(&self, client: &PostgresClient) -> Vec<String> {
        let query = format!(
            "select schema_name as name from information_schema.schemata
             where schema_name not in ('pg_catalog', 'information_schema', 'pg_toast', 'heroku_ext')
             and schema_name not like 'pg_toast_temp_%' and schema_name not like 'pg_temp_%'{}",
            query_comment()
        );

        let Ok(rows) = client.client().query(&query).await else {
            return Vec::new();
        };

        rows.iter()
            .filter_map(|row| row.try_get::<String, _>(0).ok())
            .collect()
    }

    async fn find_tables(&self, client: &PostgresClient) -> Vec<Table> {
        let query = format!(
            "select *, total_bytes - index_bytes - coalesce(toast_bytes, 0) as table_bytes from (
               select pgc.relname as name,
                      pgn.nspname as schema,
                      coalesce(pg_total_relation_size(pgc.oid), 0) as total_bytes,
                      coalesce(pg_indexes_size(pgc.oid), 0) as index_bytes,
                      coalesce(pg_total_relation_size(reltoastrelid), 0) as toast_bytes
               from pg_class pgc
               left join pg_namespace pgn on pgn.oid = pgc.relnamespace
               where relkind = 'r'
               and nspname not in ('pg_catalog', 'information_schema', 'pg_toast', 'heroku_ext')
             ) s{}",
            query_comment()
        );

        let Ok(rows) = client.client().query(&query).await else {
            return Vec::new();
        };

        let mut tables = Vec::new();
        for row in rows {
            let scan = || -> Result<Table, sqlx::Error> {
                Ok(Table {
                    name: row.try_get(0)?,
                    schema: row.try_get(1)?,
                    total_bytes_total: row.try_get(2)?,
                    index_bytes_total: row.try_get(3)?,
                    toast_bytes_total: row.try_get(4)?,
                    table_bytes_total: row.try_get(5)?,
                    ..Table::default()
                })
            };
            if let Ok(table) = scan() {
                tables.push(table);
            }
        }

        // merge in table columns
        let columns = self.find_table_columns(client).await;
        for column in columns {
            if let Some(table) = tables
                .iter_mut()
                .find(|table| table.schema == column.schema && table.name == column.table_name)
            {
                table.columns.push(column);
            }
        }

        // merge in table stats
        let table_stats = self.find_table_stats(client).await;
        for stats in table_stats {
            if let Some(table) = tables
                .iter_mut()
                .find(|table| table.schema == stats.schema && table.name == stats.name)
            {
                table.sequential_scans = stats.sequential_scans;
                table.sequential_scan_read_rows = stats.sequential_scan_read_rows;
                table.index_scans = stats.index_scans;
                table.index_scan_read_rows = stats.index_scan_read_rows;
                table.inserted_rows = stats.inserted_rows;
                table.updated_rows = stats.updated_rows;
                table.deleted_rows = stats.deleted_rows;
                table.live_row_estimate_total = stats.live_row_estimate_total;
                table.dead_row_estimate_total = stats.dead_row_estimate_total;
                table.modified_rows_since_analyze = stats.modified_rows_since_analyze;
                table.last_vacuum_at = stats.last_vacuum_at;
                table.last_autovacuum_at = stats.last_autovacuum_at;
                table.last_analyze_at = stats.last_analyze_at;
                table.last_autoanalyze_at = stats.last_autoanalyze_at;
                table.vacuum_count = stats.vacuum_count;
                table.autovacuum_count = stats.autovacuum_count;
                table.analyze_count = stats.analyze_count;
                table.autoanalyze_count = stats.autoanalyze_count;
                table.disk_blocks_read = stats.disk_blocks_read;
                table.disk_blocks_hit = stats.disk_blocks_hit;
                table.disk_index_blocks_read = stats.disk_index_blocks_read;
                table.disk_index_blocks_hit = stats.disk_index_blocks_hit;
                table.disk_toast_blocks_read = stats.disk_toast_blocks_read;
                table.disk_toast_blocks_hit = stats.disk_toast_blocks_hit;
                table.disk_toast_index_blocks_read = stats.disk_toast_index_blocks_read;
                table.disk_toast_index_blocks_hit = stats.disk_toast_index_blocks_hit;
            }
        }

        tables
    }

    async fn find_table_columns(&self, client: &PostgresClient) -> Vec<Column> {
        let query = format!(
            "select table_schema::text, table_name::text, column_name::text, column_default::text,
             is_nullable::text, data_type::text, character_maximum_length::bigint,
             numeric_precision::bigint, numeric_scale::bigint, interval_type::text, is_identity::text
             from information_schema.columns
             where table_catalog = current_database()
             and table_schema not in ('pg_catalog', 'information_schema', 'pg_toast', 'heroku_ext')
             order by table_name asc, column_name asc{}",
            query_comment()
        );

        let rows = match client.client().query(&query).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(%err, "find table columns error");
                self.errors.report(&err);
                return Vec::new();
            }
        };

        let mut columns = Vec::new();
        for row in rows {
            let scan = || -> Result<Column, sqlx::Error> {
                Ok(Column {
                    schema: row.try_get(0)?,
                    table_name: row.try_get(1)?,
                    name: row.try_get(2)?,
                    default: row.try_get(3)?,
                    nullable: row.try_get(4)?,
                    data_type: row.try_get(5)?,
                    max_length: row.try_get(6)?,
                    numeric_precision: row.try_get(7)?,
                    numeric_scale: row.try_get(8)?,
                    interval_type: row.try_get(9)?,
                    is_identity: row.try_get(10)?,
                })
            };
            let mut column = match scan() {
                Ok(column) => column,
                Err(err) => {
                    error!(%err, "find table columns error");
                    self.errors.report(&err);
                    continue;
                }
            };

            // precision and scale only make sense for numeric columns
            if column.data_type != "numeric" {
                column.numeric_precision = None;
                column.numeric_scale = None;
            }

            columns.push(column);
        }

        columns
    }

    async fn find_table_stats(&self, client: &PostgresClient) -> Vec<Table> {
        let query = format!(
            "select stat.relname as name, stat.schemaname as schema, seq_scan, seq_tup_read,
             coalesce(idx_scan, 0) as idx_scan, coalesce(idx_tup_fetch, 0) as idx_tup_fetch,
             n_tup_ins, n_tup_upd, n_tup_del, n_live_tup, n_dead_tup, n_mod_since_analyze,
             extract(epoch from last_vacuum)::bigint as last_vacuum,
             extract(epoch from last_autovacuum)::bigint as last_autovacuum,
             extract(epoch from last_analyze)::bigint as last_analyze,
             extract(epoch from last_autoanalyze)::bigint as last_autoanalyze,
             vacuum_count, autovacuum_count, analyze_count, autoanalyze_count,
             heap_blks_read, heap_blks_hit, idx_blks_read, idx_blks_hit, toast_blks_read, toast_blks_hit,
             tidx_blks_read, tidx_blks_hit
             from pg_stat_user_tables stat
             join pg_statio_user_tables statio on statio.relid = stat.relid
             where stat.schemaname not in ('pg_catalog', 'information_schema', 'pg_toast', 'heroku_ext'){}",
            query_comment()
        );

        let rows = match client.client().query(&query).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(%err, "find table stats error");
                self.errors.report(&err);
                return Vec::new();
            }
        };

        let mut tables = Vec::new();
        for row in rows {
            let scan = || -> Result<Table, sqlx::Error> {
                Ok(Table {
                    name: row.try_get(0)?,
                    schema: row.try_get(1)?,
                    sequential_scans: row.try_get(2)?,
                    sequential_scan_read_rows: row.try_get(3)?,
                    index_scans: row.try_get(4)?,
                    index_scan_read_rows: row.try_get(5)?,
                    inserted_rows: row.try_get(6)?,
                    updated_rows: row.try_get(7)?,
                    deleted_rows: row.try_get(8)?,
                    live_row_estimate_total: row.try_get(9)?,
                    dead_row_estimate_total: row.try_get(10)?,
                    modified_rows_since_analyze: row.try_get(11)?,
                    last_vacuum_at: row.try_get(12)?,
                    last_autovacuum_at: row.try_get(13)?,
                    last_analyze_at: row.try_get(14)?,
                    last_autoanalyze_at: row.try_get(15)?,
                    vacuum_count: row.try_get(16)?,
                    autovacuum_count: row.try_get(17)?,
                    analyze_count: row.try_get(18)?,
                    autoanalyze_count: row.try_get(19)?,
                    disk_blocks_read: row.try_get(20)?,
                    disk_blocks_hit: row.try_get(21)?,
                    disk_index_blocks_read: row.try_get(22)?,
                    disk_index_blocks_hit: row.try_get(23)?,
                    disk_toast_blocks_read: row.try_get::<Option<i64>, _>(24)?.unwrap_or(0),
                    disk_toast_blocks_hit: row.try_get::<Option<i64>, _>(25)?.unwrap_or(0),
                    disk_toast_index_blocks_read: row.try_get::<Option<i64>, _>(26)?.unwrap_or(0),
                    disk_toast_index_blocks_hit: row.try_get::<Option<i64>, _>(27)?.unwrap_or(0),
                    ..Table::default()
                })
            };
            match scan() {
                Ok(table) => tables.push(table),
                Err(err) => {
                    error!(%err, "find table stats error");
                    self.errors.report(&err);
                }
            }
        }

        tables
    }

    async fn find_indexes(&self, client: &PostgresClient) -> Vec<Index> {
        let query = format!(
            "select idx.relname as name,
                    nsp.nspname as schema,
                    tbl.relname as table_name,
                    pgi.indisunique as unique,
                    pgi.indisvalid as valid,
                    pg_relation_size(idx.oid) as bytes,
                    coalesce(istat.idx_scan, 0) as scans,
                    idx_blks_read as blocks_read,
                    idx_blks_hit as blocks_hit,
                    pgis.indexdef as definition
             from pg_index pgi
               join pg_class idx on idx.oid = pgi.indexrelid
               join pg_namespace nsp on nsp.oid = idx.relnamespace
               join pg_class tbl on tbl.oid = pgi.indrelid
               join pg_namespace tnsp on tnsp.oid = tbl.relnamespace
               join pg_stat_user_indexes istat on istat.indexrelid = pgi.indexrelid
               join pg_statio_user_indexes istatio on istatio.indexrelid = pgi.indexrelid
               join pg_indexes pgis on pgis.indexname = idx.relname
             where tnsp.nspname not in ('pg_catalog', 'information_schema', 'pg_toast', 'heroku_ext'){}",
            query_comment()
        );

        let Ok(rows) = client.client().query(&query).await else {
            return Vec::new();
        };

        let mut indexes = Vec::new();
        for row in rows {
            let scan = || -> Result<Index, sqlx::Error> {
                Ok(Index {
                    name: row.try_get(0)?,
                    schema: row.try_get(1)?,
                    table_name: row.try_get(2)?,
                    unique: row.try_get(3)?,
                    valid: row.try_get(4)?,
                    bytes_total: row.try_get(5)?,
                    scans: row.try_get(6)?,
                    disk_blocks_read: row.try_get::<Option<i64>, _>(7)?.unwrap_or(0),
                    disk_blocks_hit: row.try_get::<Option<i64>, _>(8)?.unwrap_or(0),
                    definition: row.try_get(9)?,
                    ..Index::default()
                })
            };
            match scan() {
                Ok(index) => indexes.push(index),
                Err(err) => {
                    error!(%err, "index error");
                    self.errors.report(&err);
                }
            }
        }

        // mark unused indexes
        let unused_indexes = self.find_unused_indexes(client).await;
        for unused in &unused_indexes {
            for index in &mut indexes {
                if index.name == unused.name && index.schema == unused.schema {
                    index.unused = true;
                }
            }
        }

        indexes
    }

    /// A zero scan count alone doesn't make an index unused: unique
    /// indexes and constraint or expression indexes still do work.
    async fn find_unused_indexes(&self, client: &PostgresClient) -> Vec<UnusedIndex> {
        let query = format!(
            "SELECT s.indexrelname AS indexname,
                    s.schemaname,
                    s.relname AS tablename
             FROM pg_catalog.pg_stat_user_indexes s
             JOIN pg_catalog.pg_index i ON s.indexrelid = i.indexrelid
             WHERE coalesce(s.idx_scan, 0) = 0 -- has never been scanned
             AND 0 <>ALL (i.indkey)  -- no index column is an expression
             AND NOT i.indisunique   -- is not a UNIQUE index
             AND NOT EXISTS          -- does not enforce a constraint
                 (SELECT 1 FROM pg_catalog.pg_constraint c
                   WHERE c.conindid = s.indexrelid)
             ORDER BY tablename DESC{}",
            query_comment()
        );

        let Ok(rows) = client.client().query(&query).await else {
            return Vec::new();
        };

        let mut unused_indexes = Vec::new();
        for row in rows {
            let scan = || -> Result<UnusedIndex, sqlx::Error> {
                Ok(UnusedIndex {
                    name: row.try_get(0)?,
                    schema: row.try_get(1)?,
                    table_name: row.try_get(2)?,
                })
            };
            match scan() {
                Ok(unused) => unused_indexes.push(unused),
                Err(err) => {
                    error!(%err, "unused index error");
                    self.errors.report(&err);
                }
            }
        }

        unused_indexes
    }

    // adapted from heroku's pg extras bloat estimation
    async fn find_bloat(&self, client: &PostgresClient) -> Vec<BloatResult> {
        let query = format!(
            "WITH constants AS (
               SELECT current_setting('block_size')::numeric AS bs, 23 AS hdr, 4 AS ma
             ), bloat_info AS (
               SELECT
                 ma,bs,schemaname,tablename,
                 (datawidth+(hdr+ma-(case when hdr%ma=0 THEN ma ELSE hdr%ma END)))::numeric AS datahdr,
                 (maxfracsum*(nullhdr+ma-(case when nullhdr%ma=0 THEN ma ELSE nullhdr%ma END))) AS nullhdr2
               FROM (
                 SELECT
                   schemaname, tablename, hdr, ma, bs,
                   SUM((1-null_frac)*avg_width) AS datawidth,
                   MAX(null_frac) AS maxfracsum,
                   hdr+(
                     SELECT 1+count(*)/8
                     FROM pg_stats s2
                     WHERE null_frac<>0 AND s2.schemaname = s.schemaname AND s2.tablename = s.tablename
                   ) AS nullhdr
                 FROM pg_stats s, constants
                 GROUP BY 1,2,3,4,5
               ) AS foo
             ), table_bloat AS (
               SELECT
                 schemaname, tablename, cc.relpages, bs,
                 CEIL((cc.reltuples*((datahdr+ma-
                   (CASE WHEN datahdr%ma=0 THEN ma ELSE datahdr%ma END))+nullhdr2+4))/(bs-20::float)) AS otta
               FROM bloat_info
               JOIN pg_class cc ON cc.relname = bloat_info.tablename
               JOIN pg_namespace nn ON cc.relnamespace = nn.oid AND nn.nspname = bloat_info.schemaname AND nn.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
             ), index_bloat AS (
               SELECT
                 schemaname, tablename, bs,
                 COALESCE(c2.relname,'?') AS iname, COALESCE(c2.reltuples,0) AS ituples, COALESCE(c2.relpages,0) AS ipages,
                 COALESCE(CEIL((c2.reltuples*(datahdr-12))/(bs-20::float)),0) AS iotta -- very rough approximation, assumes all cols
               FROM bloat_info
               JOIN pg_class cc ON cc.relname = bloat_info.tablename
               JOIN pg_namespace nn ON cc.relnamespace = nn.oid AND nn.nspname = bloat_info.schemaname AND nn.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
               JOIN pg_index i ON indrelid = cc.oid
               JOIN pg_class c2 ON c2.oid = i.indexrelid
             )
             SELECT
               type, schemaname, name, bloat::float8, raw_waste::bigint as waste
             FROM
             (SELECT
               'table' as type,
               schemaname,
               tablename as name,
               ROUND(CASE WHEN otta=0 THEN 0.0 ELSE table_bloat.relpages/otta::numeric END,1) AS bloat,
               CASE WHEN relpages < otta THEN '0' ELSE (bs*(table_bloat.relpages-otta)::bigint)::bigint END AS raw_waste
             FROM
               table_bloat
                 UNION
             SELECT
               'index' as type,
               schemaname,
               iname as name,
               ROUND(CASE WHEN iotta=0 OR ipages=0 THEN 0.0 ELSE ipages/iotta::numeric END,1) AS bloat,
               CASE WHEN ipages < iotta THEN '0' ELSE (bs*(ipages-iotta))::bigint END AS raw_waste
             FROM
               index_bloat) bloat_summary
             ORDER BY raw_waste DESC, bloat DESC{}",
            query_comment()
        );

        let Ok(rows) = client.client().query(&query).await else {
            return Vec::new();
        };

        let mut bloat_results = Vec::new();
        for row in rows {
            let scan = || -> Result<BloatResult, sqlx::Error> {
                Ok(BloatResult {
                    kind: row.try_get(0)?,
                    schema_name: row.try_get(1)?,
                    name: row.try_get(2)?,
                    bloat: row.try_get(3)?,
                    waste: row.try_get(4)?,
                })
            };
            if let Ok(bloat) = scan() {
                bloat_results.push(bloat);
            }
        }

        bloat_results
    }
}

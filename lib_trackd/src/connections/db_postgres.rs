//! # PostgreSQL Sink
//!
//! Relational sink built on `tokio-postgres`. Each node holds one client; the
//! connection future runs on a task of the owning worker's runtime.
//!
//! Every event becomes one idempotent upsert keyed by `(trk_id, date)`:
//!
//! ```sql
//! INSERT INTO <table> (trk_id, date, data, updated_at)
//! VALUES ($1, $2, $3, to_timestamp($4))
//! ON CONFLICT (trk_id, date) DO UPDATE
//!     SET data = EXCLUDED.data, updated_at = EXCLUDED.updated_at
//! ```
//!
//! The table must exist before the daemon starts, with column types matching
//! the bound parameters and a unique key on `(trk_id, date)`. A mismatch
//! (e.g. an `INT4` `trk_id`) fails every insert and keeps the node cooling
//! down. [`table_statement`] returns the expected definition:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS <table> (
//!     trk_id     BIGINT      NOT NULL,
//!     date       TEXT        NOT NULL,
//!     data       BIGINT      NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (trk_id, date)
//! )
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

use crate::auth::signature::{atoi, MIN_DATE};
use crate::configs::{Credentials, OpSettings, SinkEndpoint};
use crate::connections::sink::{SinkAdapter, SinkError};
use crate::core::event::Event;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// The values one event contributes to the stats table.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertRow {
    pub trk_id: i64,
    pub date: String,
    pub data: i64,
    pub seen_at: f64,
}

impl UpsertRow {
    /// Extracts `data`, `date` and `t` from the payload. Missing numbers read
    /// as 0; a date below 19700101 is refused.
    pub fn from_event(event: &Event) -> Result<Self, SinkError> {
        let field = |key: &str| atoi(event.field(key).unwrap_or_default());
        let date = field("date");
        if date < MIN_DATE {
            return Err(SinkError::Payload(format!("date {date} is below {MIN_DATE}")));
        }
        Ok(Self {
            trk_id: i64::from(event.trk_id()),
            date: date.to_string(),
            data: field("data"),
            seen_at: field("t") as f64,
        })
    }
}

/// Builds the upsert statement for `table`.
pub fn upsert_statement(table: &str) -> String {
    format!(
        "INSERT INTO {table} (trk_id, date, data, updated_at) \
         VALUES ($1, $2, $3, to_timestamp($4)) \
         ON CONFLICT (trk_id, date) DO UPDATE \
         SET data = EXCLUDED.data, updated_at = EXCLUDED.updated_at"
    )
}

/// Definition of the stats table the upsert writes to.
pub fn table_statement(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         trk_id BIGINT NOT NULL, \
         date TEXT NOT NULL, \
         data BIGINT NOT NULL, \
         updated_at TIMESTAMPTZ NOT NULL, \
         PRIMARY KEY (trk_id, date))"
    )
}

/// # Postgres Sink
///
/// One connection to one PostgreSQL server.
pub struct PostgresSink {
    endpoint: SinkEndpoint,
    credentials: Credentials,
    statement: String,
    client: Option<Client>,
    connection: Option<JoinHandle<()>>,
}

impl PostgresSink {
    /// Creates an unconnected sink for one endpoint of an opcode.
    pub fn new(op: &OpSettings, endpoint: &SinkEndpoint) -> Self {
        Self {
            endpoint: endpoint.clone(),
            credentials: op.credentials.clone(),
            statement: upsert_statement(&op.table),
            client: None,
            connection: None,
        }
    }

    fn config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(self.endpoint.host.as_str())
            .port(self.endpoint.port)
            .connect_timeout(CONNECT_TIMEOUT);
        if let Some(user) = &self.credentials.user {
            config.user(user.as_str());
        }
        if let Some(pass) = &self.credentials.pass {
            config.password(pass.as_str());
        }
        if let Some(db) = &self.credentials.db {
            config.dbname(db.as_str());
        }
        config
    }

    fn close(&mut self) {
        self.client = None;
        if let Some(task) = self.connection.take() {
            task.abort();
        }
    }

    /// Checks the health of the connection by running a trivial query.
    async fn ping(client: &Client) -> Result<(), SinkError> {
        if client.is_closed() {
            return Err(SinkError::NotConnected);
        }
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| SinkError::Query(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SinkAdapter for PostgresSink {
    fn describe(&self) -> String {
        format!("postgres://{}", self.endpoint)
    }

    async fn connect(&mut self) -> Result<(), SinkError> {
        self.close();
        let (client, connection) =
            self.config()
                .connect(NoTls)
                .await
                .map_err(|e| SinkError::Connect {
                    endpoint: self.endpoint.to_string(),
                    reason: e.to_string(),
                })?;

        let endpoint = self.endpoint.to_string();
        self.connection = Some(tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::warn!("postgres connection to {} closed: {}", endpoint, e);
            }
        }));
        self.client = Some(client);
        log::debug!("connected to postgres at {}", self.endpoint);
        Ok(())
    }

    async fn process(&mut self, event: &Event) -> Result<(), SinkError> {
        let client = self.client.as_ref().ok_or(SinkError::NotConnected)?;
        Self::ping(client).await?;

        let row = UpsertRow::from_event(event)?;
        client
            .execute(
                self.statement.as_str(),
                &[&row.trk_id, &row.date, &row.data, &row.seen_at],
            )
            .await
            .map_err(|e| SinkError::Query(e.to_string()))?;
        Ok(())
    }

    async fn finalize(&mut self) {
        self.close();
        log::debug!("postgres sink {} finalized", self.endpoint);
    }
}

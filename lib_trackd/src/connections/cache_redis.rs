//! # Redis Sink
//!
//! Key-value sink built on a multiplexed `redis` async connection. Two
//! handlers write here:
//!
//! - **counter**: increments the hash `<prefix>_<trk_id>` by `data` under six
//!   time buckets derived from the event's receive time (second, minute, hour,
//!   day, month and year, all in local time).
//! - **snapshot**: stores `data` under the field `date` of `<prefix>_<trk_id>`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};

use crate::auth::signature::atoi;
use crate::configs::{Credentials, HandlerKind, OpSettings, SinkEndpoint};
use crate::connections::sink::{SinkAdapter, SinkError};
use crate::core::event::Event;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Prefix lengths of `%Y%m%d%H%M%S`, finest first.
const BUCKET_LENGTHS: [usize; 6] = [14, 12, 10, 8, 6, 4];

/// Hash key for one tracker.
pub fn hash_key(prefix: &str, trk_id: u32) -> String {
    format!("{prefix}_{trk_id}")
}

/// The six bucket fields for a unix timestamp, finest first.
pub fn bucket_fields(t: i64) -> Vec<String> {
    let stamp = match Local.timestamp_opt(t, 0).earliest() {
        Some(local) => local.format("%Y%m%d%H%M%S").to_string(),
        None => return Vec::new(),
    };
    BUCKET_LENGTHS
        .iter()
        .map(|&len| stamp[..len].to_string())
        .collect()
}

/// Folds the outcome of the bucket increments: at least one must have landed.
/// Failed increments are not rolled back. Returns how many were written.
fn settle_increments<E: fmt::Display>(
    outcomes: impl IntoIterator<Item = Result<(), E>>,
) -> Result<usize, SinkError> {
    let mut written = 0;
    let mut last_error = None;
    for outcome in outcomes {
        match outcome {
            Ok(()) => written += 1,
            Err(e) => last_error = Some(e),
        }
    }
    match (written, last_error) {
        (0, Some(e)) => Err(SinkError::Query(e.to_string())),
        _ => Ok(written),
    }
}

/// Hash field and value written by the snapshot handler.
fn snapshot_entry(event: &Event) -> (&str, i64) {
    let data = atoi(event.field("data").unwrap_or_default());
    (event.field("date").unwrap_or_default(), data)
}

/// Builds the connection URL. The password is placed in the userinfo part
/// and the database index in the path.
fn connection_url(endpoint: &SinkEndpoint, credentials: &Credentials) -> String {
    let auth = match (&credentials.user, &credentials.pass) {
        (Some(user), Some(pass)) => format!("{user}:{pass}@"),
        (None, Some(pass)) => format!(":{pass}@"),
        _ => String::new(),
    };
    let db = credentials
        .db
        .as_deref()
        .filter(|db| !db.is_empty() && db.bytes().all(|b| b.is_ascii_digit()))
        .map(|db| format!("/{db}"))
        .unwrap_or_default();
    format!("redis://{auth}{}:{}{db}", endpoint.host, endpoint.port)
}

/// # Redis Sink
///
/// One connection to one Redis server.
pub struct RedisSink {
    endpoint: SinkEndpoint,
    url: String,
    handler: HandlerKind,
    key_prefix: String,
    conn: Option<MultiplexedConnection>,
}

impl RedisSink {
    /// Creates an unconnected sink for one endpoint of an opcode.
    pub fn new(op: &OpSettings, endpoint: &SinkEndpoint) -> Self {
        Self {
            endpoint: endpoint.clone(),
            url: connection_url(endpoint, &op.credentials),
            handler: op.handler,
            key_prefix: op.key_prefix.clone(),
            conn: None,
        }
    }

    async fn count(
        conn: &mut MultiplexedConnection,
        key: &str,
        event: &Event,
    ) -> Result<(), SinkError> {
        let data = atoi(event.field("data").unwrap_or_default());
        let fields = bucket_fields(atoi(event.field("t").unwrap_or_default()));
        if fields.is_empty() {
            return Err(SinkError::Payload("receive time is not representable".into()));
        }

        let mut outcomes = Vec::with_capacity(fields.len());
        for field in &fields {
            let result: redis::RedisResult<i64> = conn.hincr(key, field, data).await;
            if let Err(e) = &result {
                log::warn!("HINCRBY {} {} failed: {}", key, field, e);
            }
            outcomes.push(result.map(|_| ()));
        }
        settle_increments(outcomes).map(|_| ())
    }

    async fn snapshot(
        conn: &mut MultiplexedConnection,
        key: &str,
        event: &Event,
    ) -> Result<(), SinkError> {
        let (date, data) = snapshot_entry(event);
        let _: i64 = conn
            .hset(key, date, data)
            .await
            .map_err(|e| SinkError::Query(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SinkAdapter for RedisSink {
    fn describe(&self) -> String {
        format!("redis://{}", self.endpoint)
    }

    async fn connect(&mut self) -> Result<(), SinkError> {
        self.conn = None;
        let connect_error = |reason: String| SinkError::Connect {
            endpoint: self.endpoint.to_string(),
            reason,
        };

        let client = Client::open(self.url.as_str()).map_err(|e| connect_error(e.to_string()))?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| connect_error("timed out".into()))?
            .map_err(|e| connect_error(e.to_string()))?;

        self.conn = Some(conn);
        log::debug!("connected to redis at {}", self.endpoint);
        Ok(())
    }

    async fn process(&mut self, event: &Event) -> Result<(), SinkError> {
        let conn = self.conn.as_mut().ok_or(SinkError::NotConnected)?;
        let key = hash_key(&self.key_prefix, event.trk_id());
        match self.handler {
            HandlerKind::Counter => Self::count(conn, &key, event).await,
            HandlerKind::Snapshot => Self::snapshot(conn, &key, event).await,
            HandlerKind::Upsert => Err(SinkError::Unsupported(format!(
                "handler {} on redis",
                self.handler
            ))),
        }
    }

    async fn finalize(&mut self) {
        self.conn = None;
        log::debug!("redis sink {} finalized", self.endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_truncate_the_local_timestamp() {
        let t = 1_700_000_000;
        let stamp = Local
            .timestamp_opt(t, 0)
            .unwrap()
            .format("%Y%m%d%H%M%S")
            .to_string();
        let fields = bucket_fields(t);
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], stamp);
        assert_eq!(fields[1], &stamp[..12]);
        assert_eq!(fields[3], &stamp[..8]);
        assert_eq!(fields[5], &stamp[..4]);
        assert_eq!(fields[5], "2023");
    }

    #[test]
    fn keys_join_prefix_and_tracker() {
        assert_eq!(hash_key("ddtrack", 42), "ddtrack_42");
        assert_eq!(hash_key("dashboard", 7), "dashboard_7");
    }

    #[test]
    fn url_carries_password_and_numeric_db() {
        let endpoint = SinkEndpoint { host: "10.0.0.5".into(), port: 6380 };
        let plain = connection_url(&endpoint, &Credentials::default());
        assert_eq!(plain, "redis://10.0.0.5:6380");

        let credentials = Credentials {
            user: None,
            pass: Some("pw".into()),
            db: Some("3".into()),
        };
        assert_eq!(connection_url(&endpoint, &credentials), "redis://:pw@10.0.0.5:6380/3");

        let named_db = Credentials { db: Some("stats".into()), ..Credentials::default() };
        assert_eq!(connection_url(&endpoint, &named_db), "redis://10.0.0.5:6380");
    }

    #[tokio::test]
    async fn process_before_connect_is_a_connectivity_error() {
        let op = OpSettings {
            op: 1,
            handler: HandlerKind::Counter,
            sink_kind: crate::configs::SinkKind::KeyValue,
            endpoints: vec![SinkEndpoint { host: "127.0.0.1".into(), port: 6379 }],
            credentials: Credentials::default(),
            table: "trk_stat".into(),
            key_prefix: "ddtrack".into(),
        };
        let mut sink = RedisSink::new(&op, &op.endpoints[0]);
        let event = Event::new(1, 42, "t=1700000000&data=5&date=20231114".into());
        let err = sink.process(&event).await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[test]
    fn counter_succeeds_while_any_bucket_lands() {
        let all: Vec<Result<(), String>> = vec![Ok(()); 6];
        assert_eq!(settle_increments(all).unwrap(), 6);

        let partial = vec![Ok(()), Err("READONLY".to_string()), Ok(()), Err("READONLY".to_string())];
        assert_eq!(settle_increments(partial).unwrap(), 2);

        let none: Vec<Result<(), String>> = vec![Err("timeout".into()), Err("connection reset".into())];
        let err = settle_increments(none).unwrap_err();
        assert!(err.is_connectivity());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn snapshot_stores_data_under_the_date() {
        let event = Event::new(2, 7, "t=1700000000&data=-12&date=20231114".into());
        assert_eq!(snapshot_entry(&event), ("20231114", -12));
        assert_eq!(hash_key("dashboard", event.trk_id()), "dashboard_7");

        let bare = Event::new(2, 7, "t=1700000000".into());
        assert_eq!(snapshot_entry(&bare), ("", 0));
    }
}

//! # Daemon Settings
//!
//! Two layers live here:
//!
//! - [`TrackdConfig`]: the raw, all-optional shape read from the JSON config
//!   file and from command line flags. Layers are combined with
//!   [`TrackdConfig::merge`], where the later layer wins for every `Some` field.
//! - [`Settings`]: the validated, immutable result. It is built once by
//!   [`TrackdConfig::into_settings`] and shared behind an `Arc`.
//!
//! Any validation failure is a fatal startup error: the daemon refuses to run
//! in a degraded state.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::SecretTable;

/// Exclusive upper bound of the opcode range.
pub const OP_MAX: u32 = 32;
/// Largest accepted worker count.
pub const MAX_WORKERS: usize = 64;
/// Default number of slots in each worker pool.
pub const DEFAULT_POOL_CAPACITY: usize = 10240;

const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
const DEFAULT_LISTEN_PORT: u16 = 8010;
const DEFAULT_NUM_WORKERS: usize = 4;
const DEFAULT_ROUTE_RETRY_MICROS: u64 = 1000;
const DEFAULT_SINK_COOLDOWN_MS: u64 = 2000;
const DEFAULT_DRAIN_POLL_MS: u64 = 1000;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 500;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no op handlers configured")]
    NoOps,

    #[error("num_worker_threads must be in [1, 64], got {0}")]
    WorkerCount(usize),

    #[error("pool capacity must be at least 2, got {0}")]
    PoolCapacity(usize),

    #[error("op {0} is outside [0, 32)")]
    OpOutOfRange(u32),

    #[error("op {op}: unknown handler '{name}'")]
    UnknownHandler { op: u32, name: String },

    #[error("op {op}: unknown sink type '{name}'")]
    UnknownSinkType { op: u32, name: String },

    #[error("op {op}: handler '{handler}' cannot run on a {sink} sink")]
    HandlerMismatch {
        op: u32,
        handler: HandlerKind,
        sink: SinkKind,
    },

    #[error("op {op}: '{table}' is not a plain table name")]
    BadTable { op: u32, table: String },

    #[error("bad sink server list '{list}': {reason}")]
    SinkServers { list: String, reason: String },
}

/// # Handler Kind
///
/// What a sink does with an event. The names in parentheses are the job
/// names older configurations use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Six time-bucket increments in a per-entity hash (`ddtrack`).
    Counter,
    /// A single date -> value field in a per-entity hash (`dashboard`).
    Snapshot,
    /// An idempotent row keyed by entity and date (`stat`).
    Upsert,
}

impl HandlerKind {
    /// Parses a handler name, accepting the legacy aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "counter" | "ddtrack" => Some(Self::Counter),
            "snapshot" | "dashboard" => Some(Self::Snapshot),
            "upsert" | "stat" => Some(Self::Upsert),
            _ => None,
        }
    }

    /// The sink family able to run this handler.
    pub fn sink_kind(self) -> SinkKind {
        match self {
            Self::Counter | Self::Snapshot => SinkKind::KeyValue,
            Self::Upsert => SinkKind::Relational,
        }
    }

    fn default_key_prefix(self) -> &'static str {
        match self {
            Self::Counter => "ddtrack",
            Self::Snapshot => "dashboard",
            Self::Upsert => "",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Counter => "counter",
            Self::Snapshot => "snapshot",
            Self::Upsert => "upsert",
        };
        f.write_str(name)
    }
}

/// # Sink Kind
///
/// The backend family a sink server belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SinkKind {
    /// A relational store (PostgreSQL).
    Relational,
    /// A key-value store (Redis).
    KeyValue,
}

impl SinkKind {
    /// Parses a sink type tag. `mysql` is accepted for old configs and maps
    /// onto the relational driver.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "relational" | "postgres" | "postgresql" | "mysql" => Some(Self::Relational),
            "key-value" | "keyvalue" | "kv" | "redis" => Some(Self::KeyValue),
            _ => None,
        }
    }

    /// Port used when a server entry omits one.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Relational => 5432,
            Self::KeyValue => 6379,
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relational => f.write_str("relational"),
            Self::KeyValue => f.write_str("key-value"),
        }
    }
}

/// One `host:port` entry of a sink server list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for SinkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// # Parse Sink Servers
///
/// Splits a `host[:port][,host[:port]]...` list. Entries without a port get
/// `default_port`. Blank entries, blank hosts and unparsable ports are errors.
pub fn parse_sink_servers(list: &str, default_port: u16) -> Result<Vec<SinkEndpoint>, ConfigError> {
    let bad = |reason: String| ConfigError::SinkServers {
        list: list.to_string(),
        reason,
    };

    let mut endpoints = Vec::new();
    for entry in list.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(bad("empty entry".to_string()));
        }
        let (host, port) = match entry.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| bad(format!("invalid port in '{entry}'")))?;
                (host, port)
            }
            None => (entry, default_port),
        };
        if host.is_empty() {
            return Err(bad(format!("missing host in '{entry}'")));
        }
        endpoints.push(SinkEndpoint {
            host: host.to_string(),
            port,
        });
    }
    Ok(endpoints)
}

/// Table names are pasted into SQL, so only `[A-Za-z0-9_.]` is allowed.
fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
}

/// Backend credentials shared by every server of one opcode.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: Option<String>,
    pub pass: Option<String>,
    pub db: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "***"))
            .field("db", &self.db)
            .finish()
    }
}

/// # Op Config
///
/// The raw per-opcode block of the config file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct OpConfig {
    pub handler: String,
    pub sink_type: String,
    pub sink_servers: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
    #[serde(default)]
    pub db: Option<String>,
    /// Target table for the relational handler.
    #[serde(default)]
    pub table: Option<String>,
    /// Hash key prefix for key-value handlers.
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// Secret token per tracked entity id.
    #[serde(default)]
    pub tokens: BTreeMap<u32, String>,
}

/// # Trackd Config
///
/// All-optional configuration as read from the JSON file. Keys are camelCase.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackdConfig {
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub num_worker_threads: Option<usize>,
    pub pool_capacity: Option<usize>,
    pub pidfile: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub udp_verify_salt: Option<bool>,
    pub route_retry_micros: Option<u64>,
    pub sink_cooldown_ms: Option<u64>,
    pub drain_poll_ms: Option<u64>,
    pub http_timeout_ms: Option<u64>,
    #[serde(default)]
    pub ops: BTreeMap<u32, OpConfig>,
}

impl TrackdConfig {
    /// Reads and parses a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Merges two layers; `other` overrides `self` for every `Some` value.
    /// The op table is taken from `other` unless it is empty.
    pub fn merge(self, other: TrackdConfig) -> TrackdConfig {
        TrackdConfig {
            listen_host: other.listen_host.or(self.listen_host),
            listen_port: other.listen_port.or(self.listen_port),
            num_worker_threads: other.num_worker_threads.or(self.num_worker_threads),
            pool_capacity: other.pool_capacity.or(self.pool_capacity),
            pidfile: other.pidfile.or(self.pidfile),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            udp_verify_salt: other.udp_verify_salt.or(self.udp_verify_salt),
            route_retry_micros: other.route_retry_micros.or(self.route_retry_micros),
            sink_cooldown_ms: other.sink_cooldown_ms.or(self.sink_cooldown_ms),
            drain_poll_ms: other.drain_poll_ms.or(self.drain_poll_ms),
            http_timeout_ms: other.http_timeout_ms.or(self.http_timeout_ms),
            ops: if other.ops.is_empty() { self.ops } else { other.ops },
        }
    }

    /// # Into Settings
    ///
    /// Applies defaults and validates every field, producing the immutable
    /// settings the daemon runs with.
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let num_workers = self.num_worker_threads.unwrap_or(DEFAULT_NUM_WORKERS);
        if !(1..=MAX_WORKERS).contains(&num_workers) {
            return Err(ConfigError::WorkerCount(num_workers));
        }

        let pool_capacity = self.pool_capacity.unwrap_or(DEFAULT_POOL_CAPACITY);
        if pool_capacity < 2 {
            return Err(ConfigError::PoolCapacity(pool_capacity));
        }

        if self.ops.is_empty() {
            return Err(ConfigError::NoOps);
        }

        let mut ops = BTreeMap::new();
        let mut secrets = SecretTable::default();
        for (op, raw) in self.ops {
            if op >= OP_MAX {
                return Err(ConfigError::OpOutOfRange(op));
            }
            let handler = HandlerKind::parse(&raw.handler).ok_or_else(|| {
                ConfigError::UnknownHandler {
                    op,
                    name: raw.handler.clone(),
                }
            })?;
            let sink_kind = SinkKind::parse(&raw.sink_type).ok_or_else(|| {
                ConfigError::UnknownSinkType {
                    op,
                    name: raw.sink_type.clone(),
                }
            })?;
            if handler.sink_kind() != sink_kind {
                return Err(ConfigError::HandlerMismatch {
                    op,
                    handler,
                    sink: sink_kind,
                });
            }
            let endpoints = parse_sink_servers(&raw.sink_servers, sink_kind.default_port())?;
            let table = raw.table.unwrap_or_else(|| "trk_stat".to_string());
            if !is_plain_identifier(&table) {
                return Err(ConfigError::BadTable { op, table });
            }

            for (trk_id, token) in &raw.tokens {
                secrets.insert(op as u8, *trk_id, token.clone());
            }

            ops.insert(
                op as u8,
                OpSettings {
                    op: op as u8,
                    handler,
                    sink_kind,
                    endpoints,
                    credentials: Credentials {
                        user: raw.user,
                        pass: raw.pass,
                        db: raw.db,
                    },
                    table,
                    key_prefix: raw
                        .key_prefix
                        .unwrap_or_else(|| handler.default_key_prefix().to_string()),
                },
            );
        }

        Ok(Settings {
            listen_host: self
                .listen_host
                .unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string()),
            listen_port: self.listen_port.unwrap_or(DEFAULT_LISTEN_PORT),
            num_workers,
            pool_capacity,
            pidfile: self.pidfile,
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("logs")),
            log_level: self.log_level.unwrap_or_else(|| "notice".to_string()),
            udp_verify_salt: self.udp_verify_salt.unwrap_or(true),
            route_retry: Duration::from_micros(
                self.route_retry_micros.unwrap_or(DEFAULT_ROUTE_RETRY_MICROS),
            ),
            sink_cooldown: Duration::from_millis(
                self.sink_cooldown_ms.unwrap_or(DEFAULT_SINK_COOLDOWN_MS),
            ),
            drain_poll: Duration::from_millis(self.drain_poll_ms.unwrap_or(DEFAULT_DRAIN_POLL_MS)),
            http_timeout: Duration::from_millis(
                self.http_timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS),
            ),
            ops,
            secrets: Arc::new(secrets),
        })
    }
}

/// Validated settings for one opcode.
#[derive(Debug, Clone)]
pub struct OpSettings {
    pub op: u8,
    pub handler: HandlerKind,
    pub sink_kind: SinkKind,
    /// Sink servers in failover order.
    pub endpoints: Vec<SinkEndpoint>,
    pub credentials: Credentials,
    pub table: String,
    pub key_prefix: String,
}

/// # Settings
///
/// Immutable daemon configuration. Built once and passed explicitly.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_host: String,
    pub listen_port: u16,
    pub num_workers: usize,
    pub pool_capacity: usize,
    pub pidfile: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub log_level: String,
    /// Whether datagrams must carry a valid signature, on top of the
    /// structural checks.
    pub udp_verify_salt: bool,
    /// Pause between dispatch attempts when pools are busy or full.
    pub route_retry: Duration,
    /// How long a failed sink node is skipped.
    pub sink_cooldown: Duration,
    /// Poll interval while draining pools at shutdown.
    pub drain_poll: Duration,
    pub http_timeout: Duration,
    pub ops: BTreeMap<u8, OpSettings>,
    pub secrets: Arc<SecretTable>,
}

impl Settings {
    /// Address both listeners bind to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "listenHost": "127.0.0.1",
        "listenPort": 9100,
        "numWorkerThreads": 2,
        "ops": {
            "1": {
                "handler": "ddtrack",
                "sinkType": "redis",
                "sinkServers": "10.0.0.1,10.0.0.2:6380",
                "tokens": { "42": "abc123", "7": "s3cr3t" }
            },
            "2": {
                "handler": "stat",
                "sinkType": "mysql",
                "sinkServers": "db1:5433",
                "user": "trk",
                "pass": "pw",
                "db": "track"
            }
        }
    }"#;

    #[test]
    fn parses_and_validates_sample_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = TrackdConfig::from_file(file.path())
            .unwrap()
            .into_settings()
            .unwrap();

        assert_eq!(settings.listen_addr(), "127.0.0.1:9100");
        assert_eq!(settings.num_workers, 2);
        assert_eq!(settings.pool_capacity, DEFAULT_POOL_CAPACITY);
        assert_eq!(settings.sink_cooldown, Duration::from_secs(2));
        assert!(settings.udp_verify_salt);

        let counter = &settings.ops[&1];
        assert_eq!(counter.handler, HandlerKind::Counter);
        assert_eq!(counter.sink_kind, SinkKind::KeyValue);
        assert_eq!(counter.key_prefix, "ddtrack");
        assert_eq!(
            counter.endpoints,
            vec![
                SinkEndpoint { host: "10.0.0.1".into(), port: 6379 },
                SinkEndpoint { host: "10.0.0.2".into(), port: 6380 },
            ]
        );

        let upsert = &settings.ops[&2];
        assert_eq!(upsert.sink_kind, SinkKind::Relational);
        assert_eq!(upsert.table, "trk_stat");
        assert_eq!(upsert.credentials.db.as_deref(), Some("track"));

        assert_eq!(settings.secrets.get(1, 42), Some("abc123"));
        assert_eq!(settings.secrets.get(2, 42), None);
    }

    #[test]
    fn cli_layer_overrides_file_layer() {
        let file: TrackdConfig = serde_json::from_str(SAMPLE).unwrap();
        let cli = TrackdConfig {
            listen_port: Some(7000),
            num_worker_threads: Some(8),
            ..Default::default()
        };
        let merged = file.merge(cli);
        assert_eq!(merged.listen_port, Some(7000));
        assert_eq!(merged.num_worker_threads, Some(8));
        assert_eq!(merged.listen_host.as_deref(), Some("127.0.0.1"));
        assert_eq!(merged.ops.len(), 2);
    }

    #[test]
    fn rejects_missing_ops_and_bad_worker_count() {
        assert!(matches!(
            TrackdConfig::default().into_settings(),
            Err(ConfigError::NoOps)
        ));

        let mut cfg: TrackdConfig = serde_json::from_str(SAMPLE).unwrap();
        cfg.num_worker_threads = Some(65);
        assert!(matches!(cfg.into_settings(), Err(ConfigError::WorkerCount(65))));

        let mut cfg: TrackdConfig = serde_json::from_str(SAMPLE).unwrap();
        cfg.num_worker_threads = Some(0);
        assert!(matches!(cfg.into_settings(), Err(ConfigError::WorkerCount(0))));
    }

    #[test]
    fn rejects_out_of_range_op_and_mismatched_handler() {
        let mut cfg: TrackdConfig = serde_json::from_str(SAMPLE).unwrap();
        let op = cfg.ops[&1].clone();
        cfg.ops.insert(32, op);
        assert!(matches!(cfg.into_settings(), Err(ConfigError::OpOutOfRange(32))));

        let mut cfg: TrackdConfig = serde_json::from_str(SAMPLE).unwrap();
        if let Some(op) = cfg.ops.get_mut(&2) {
            op.handler = "dashboard".into();
        }
        assert!(matches!(
            cfg.into_settings(),
            Err(ConfigError::HandlerMismatch { op: 2, .. })
        ));
    }

    #[test]
    fn rejects_table_names_that_are_not_identifiers() {
        let mut cfg: TrackdConfig = serde_json::from_str(SAMPLE).unwrap();
        if let Some(op) = cfg.ops.get_mut(&2) {
            op.table = Some("stats; DROP TABLE x".into());
        }
        assert!(matches!(cfg.into_settings(), Err(ConfigError::BadTable { op: 2, .. })));
    }

    #[test]
    fn sink_server_list_parsing() {
        let endpoints = parse_sink_servers("a, b:1234 ,c", 6379).unwrap();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[1].to_string(), "b:1234");
        assert_eq!(endpoints[2].port, 6379);

        assert!(parse_sink_servers("a,,b", 6379).is_err());
        assert!(parse_sink_servers("a:notaport", 6379).is_err());
        assert!(parse_sink_servers(":80", 6379).is_err());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            user: Some("u".into()),
            pass: Some("hunter2".into()),
            db: None,
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}

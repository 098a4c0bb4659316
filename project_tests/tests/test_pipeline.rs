//! End-to-end flow through the library: authenticate, route, worker
//! dispatch with failover, and drain, with in-memory sinks standing in for
//! Redis and PostgreSQL.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lib_trackd::auth::{sign_fields, Authenticator, TrackQuery};
use lib_trackd::configs::{Settings, SinkKind, TrackdConfig};
use lib_trackd::connections::{SinkAdapter, SinkError, SinkRegistry};
use lib_trackd::core::{drain, Dispatcher, Event, WorkerSet};
use tokio_util::sync::CancellationToken;

/// What every in-memory sink saw.
#[derive(Default)]
struct Journal {
    delivered: Mutex<Vec<(String, u8, u32)>>,
    process_calls: AtomicUsize,
    finalized: AtomicUsize,
}

struct MemorySink {
    endpoint: String,
    down: bool,
    journal: Arc<Journal>,
}

#[async_trait]
impl SinkAdapter for MemorySink {
    fn describe(&self) -> String {
        format!("memory://{}", self.endpoint)
    }

    async fn connect(&mut self) -> Result<(), SinkError> {
        if self.down {
            return Err(SinkError::Connect {
                endpoint: self.endpoint.clone(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn process(&mut self, event: &Event) -> Result<(), SinkError> {
        self.journal.process_calls.fetch_add(1, Ordering::SeqCst);
        if self.down {
            return Err(SinkError::NotConnected);
        }
        self.journal
            .delivered
            .lock()
            .unwrap()
            .push((self.endpoint.clone(), event.op(), event.trk_id()));
        Ok(())
    }

    async fn finalize(&mut self) {
        self.journal.finalized.fetch_add(1, Ordering::SeqCst);
    }
}

fn settings() -> Arc<Settings> {
    let config: TrackdConfig = serde_json::from_value(serde_json::json!({
        "numWorkerThreads": 2,
        "poolCapacity": 32,
        "routeRetryMicros": 100,
        "drainPollMs": 10,
        "ops": {
            "1": {
                "handler": "ddtrack",
                "sinkType": "redis",
                "sinkServers": "down-node,kv-b,kv-c",
                "tokens": { "42": "abc123" }
            },
            "2": {
                "handler": "stat",
                "sinkType": "postgres",
                "sinkServers": "pg-a",
                "tokens": { "7": "s3cr3t" }
            }
        }
    }))
    .unwrap();
    Arc::new(config.into_settings().unwrap())
}

fn registry(journal: &Arc<Journal>) -> Arc<SinkRegistry> {
    let mut registry = SinkRegistry::new();
    for kind in [SinkKind::KeyValue, SinkKind::Relational] {
        let journal = Arc::clone(journal);
        registry.register(kind, move |_, endpoint| -> Box<dyn SinkAdapter> {
            Box::new(MemorySink {
                endpoint: endpoint.host.clone(),
                down: endpoint.host == "down-node",
                journal: Arc::clone(&journal),
            })
        });
    }
    Arc::new(registry)
}

fn signed_query(op: u8, trk_id: u32, data: i64, date: i64, token: &str) -> (String, String, String, String, String) {
    (
        op.to_string(),
        date.to_string(),
        data.to_string(),
        trk_id.to_string(),
        sign_fields(i64::from(trk_id), data, date, token),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn authenticated_events_reach_live_sinks_and_drain_finalizes_them() {
    let settings = settings();
    let journal = Arc::new(Journal::default());
    let mut dispatcher = Dispatcher::new(settings.route_retry);
    let workers = WorkerSet::start(
        Arc::clone(&settings),
        registry(&journal),
        &mut dispatcher,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let authenticator = Authenticator::new(Arc::clone(&settings.secrets));

    let mut expected = 0;
    for data in 0..20 {
        let (op, date, data_s, trk_id, salt) = signed_query(1, 42, data, 20240101, "abc123");
        let query = TrackQuery {
            op: Some(op.as_str()),
            date: Some(date.as_str()),
            data: Some(data_s.as_str()),
            trk_id: Some(trk_id.as_str()),
            salt: Some(salt.as_str()),
        };
        let event = authenticator.authenticate(&query, 1_700_000_000).unwrap();
        dispatcher.route(event).await.unwrap();
        expected += 1;
    }
    for data in 0..5 {
        let (op, date, data_s, trk_id, salt) = signed_query(2, 7, data, 20240101, "s3cr3t");
        let query = TrackQuery {
            op: Some(op.as_str()),
            date: Some(date.as_str()),
            data: Some(data_s.as_str()),
            trk_id: Some(trk_id.as_str()),
            salt: Some(salt.as_str()),
        };
        let event = authenticator.authenticate(&query, 1_700_000_000).unwrap();
        dispatcher.route(event).await.unwrap();
        expected += 1;
    }

    let polls = drain(&dispatcher, workers, settings.drain_poll).await.unwrap();
    assert!(polls < 1000, "drain took {polls} polls");

    let delivered = journal.delivered.lock().unwrap().clone();
    assert_eq!(delivered.len(), expected);
    // the unreachable node never received an event
    assert!(delivered.iter().all(|(endpoint, _, _)| endpoint != "down-node"));
    let kv_nodes: HashSet<_> = delivered
        .iter()
        .filter(|(_, op, _)| *op == 1)
        .map(|(endpoint, _, _)| endpoint.as_str())
        .collect();
    assert_eq!(kv_nodes, HashSet::from(["kv-b", "kv-c"]));
    assert!(delivered.iter().filter(|(_, op, _)| *op == 2).all(|(e, _, trk)| e == "pg-a" && *trk == 7));

    // 2 workers x (3 + 1) nodes
    assert_eq!(journal.finalized.load(Ordering::SeqCst), 8);

    // nothing reaches a sink once the drain has finished
    let calls = journal.process_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(journal.process_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn forged_requests_never_enter_a_pool() {
    let settings = settings();
    let authenticator = Authenticator::new(Arc::clone(&settings.secrets));
    let forged = "0".repeat(40);
    let query = TrackQuery {
        op: Some("1"),
        date: Some("20240101"),
        data: Some("5"),
        trk_id: Some("42"),
        salt: Some(forged.as_str()),
    };
    assert!(authenticator.authenticate(&query, 0).is_err());

    // a tracker with no token for this op cannot authenticate either
    let (op, date, data, trk_id, salt) = signed_query(2, 42, 5, 20240101, "abc123");
    let query = TrackQuery {
        op: Some(op.as_str()),
        date: Some(date.as_str()),
        data: Some(data.as_str()),
        trk_id: Some(trk_id.as_str()),
        salt: Some(salt.as_str()),
    };
    assert!(authenticator.authenticate(&query, 0).is_err());
}

//! # Worker Runtime
//!
//! Each worker is one OS thread driving a current-thread tokio runtime. It
//! owns the consumer end of its [`EventPool`], the receiving end of its wake
//! channel and a private [`SinkClientSet`] per configured opcode.
//!
//! ## Core Design Principles:
//!
//! 1.  **One wake, one pop**: the loop sleeps on the wake channel. Every token
//!     pops exactly one event; an empty pop is a spurious wake and is only
//!     logged.
//! 2.  **Thread-confined sinks**: sink sets are built on the worker thread and
//!     never leave it, so cursors and error marks need no synchronisation.
//! 3.  **Ready before ingest**: [`WorkerSet::start`] returns only once every
//!     worker has built its sinks and made its first connection attempts.
//! 4.  **Cooperative stop**: cancelling the shutdown token ends the loop after
//!     the event in hand is dispatched; every sink is then finalized.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::configs::Settings;
use crate::connections::registry::SinkRegistry;
use crate::connections::sink::{DispatchOutcome, SinkClientSet, SinkError};
use crate::core::dispatcher::Dispatcher;
use crate::core::pool::{EventPool, PoolConsumer};

/// Failures while starting or stopping the worker threads.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker thread {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {index} could not build a runtime: {source}")]
    Runtime {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {index} could not build its sinks: {source}")]
    Sinks {
        index: usize,
        #[source]
        source: SinkError,
    },

    #[error("worker {0} exited before it was ready")]
    Vanished(usize),

    #[error("worker {0} panicked")]
    Panicked(usize),
}

/// # Worker Runtime
///
/// The per-worker loop state.
pub struct WorkerRuntime {
    index: usize,
    consumer: PoolConsumer,
    wake: mpsc::UnboundedReceiver<()>,
    sets: BTreeMap<u8, SinkClientSet>,
}

impl WorkerRuntime {
    /// Assembles a worker from its queue ends and its sink sets.
    pub fn new(
        index: usize,
        consumer: PoolConsumer,
        wake: mpsc::UnboundedReceiver<()>,
        sets: BTreeMap<u8, SinkClientSet>,
    ) -> Self {
        Self {
            index,
            consumer,
            wake,
            sets,
        }
    }

    /// First connection attempt for every sink. Returns the connected count.
    pub async fn connect(&mut self) -> usize {
        let mut connected = 0;
        for set in self.sets.values_mut() {
            connected += set.connect_all().await;
        }
        connected
    }

    /// # Handle Wake
    ///
    /// Pops one event and runs it through its opcode's sink set. `None` means
    /// there was nothing to pop or the opcode has no sinks.
    pub async fn handle_wake(&mut self) -> Option<DispatchOutcome> {
        let Some(event) = self.consumer.pop() else {
            log::debug!("worker {}: woken with an empty pool", self.index);
            return None;
        };
        let set = self.sets.get_mut(&event.op())?;
        Some(set.dispatch(&event).await)
    }

    /// # Run
    ///
    /// Serves wake tokens until `shutdown` fires or every sender is gone,
    /// then finalizes all sinks.
    pub async fn run(mut self, shutdown: CancellationToken) {
        log::info!("worker {} running with {} sink set(s)", self.index, self.sets.len());
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                token = self.wake.recv() => match token {
                    Some(()) => {
                        self.handle_wake().await;
                    }
                    None => break,
                },
            }
        }
        for set in self.sets.values_mut() {
            set.finalize().await;
        }
        log::info!("worker {} stopped", self.index);
    }
}

/// # Worker Set
///
/// Handles to every running worker thread.
pub struct WorkerSet {
    threads: Vec<thread::JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerSet {
    /// # Start
    ///
    /// Creates `settings.num_workers` pools, registers them with `dispatcher`
    /// and spawns one thread per worker. Resolves once all workers are ready.
    pub async fn start(
        settings: Arc<Settings>,
        registry: Arc<SinkRegistry>,
        dispatcher: &mut Dispatcher,
        shutdown: CancellationToken,
    ) -> Result<Self, WorkerError> {
        let mut threads = Vec::with_capacity(settings.num_workers);
        let mut ready = Vec::with_capacity(settings.num_workers);

        for index in 0..settings.num_workers {
            let pool = EventPool::new(settings.pool_capacity);
            let consumer = pool.consumer().ok_or(WorkerError::Vanished(index))?;
            let wake = dispatcher.add_worker(pool);
            let (ready_tx, ready_rx) = oneshot::channel();

            let settings = Arc::clone(&settings);
            let registry = Arc::clone(&registry);
            let shutdown = shutdown.clone();
            let handle = thread::Builder::new()
                .name(format!("trk-worker-{index:02}"))
                .spawn(move || {
                    worker_main(index, settings, registry, consumer, wake, shutdown, ready_tx)
                })
                .map_err(|source| WorkerError::Spawn { index, source })?;

            threads.push(handle);
            ready.push(ready_rx);
        }

        let workers = Self { threads, shutdown };
        for (index, ready_rx) in ready.into_iter().enumerate() {
            match ready_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    workers.abort().await;
                    return Err(e);
                }
                Err(_) => {
                    workers.abort().await;
                    return Err(WorkerError::Vanished(index));
                }
            }
        }
        log::info!("{} worker(s) ready", workers.threads.len());
        Ok(workers)
    }

    /// Number of worker threads.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    async fn abort(self) {
        self.shutdown.cancel();
        let _ = self.join().await;
    }

    /// # Stop
    ///
    /// Cancels every worker and waits for the threads to finish.
    pub async fn stop(self) -> Result<(), WorkerError> {
        self.shutdown.cancel();
        self.join().await
    }

    async fn join(self) -> Result<(), WorkerError> {
        let threads = self.threads;
        let joined = tokio::task::spawn_blocking(move || {
            threads
                .into_iter()
                .enumerate()
                .map(|(index, handle)| handle.join().map_err(|_| WorkerError::Panicked(index)))
                .collect::<Result<Vec<()>, WorkerError>>()
        })
        .await;
        match joined {
            Ok(result) => result.map(|_| ()),
            Err(e) => {
                log::error!("worker join task failed: {}", e);
                Err(WorkerError::Panicked(usize::MAX))
            }
        }
    }
}

fn worker_main(
    index: usize,
    settings: Arc<Settings>,
    registry: Arc<SinkRegistry>,
    consumer: PoolConsumer,
    wake: mpsc::UnboundedReceiver<()>,
    shutdown: CancellationToken,
    ready: oneshot::Sender<Result<(), WorkerError>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(source) => {
            let _ = ready.send(Err(WorkerError::Runtime { index, source }));
            return;
        }
    };

    runtime.block_on(async move {
        let sets = match registry.build_sets(&settings) {
            Ok(sets) => sets,
            Err(source) => {
                let _ = ready.send(Err(WorkerError::Sinks { index, source }));
                return;
            }
        };
        let mut worker = WorkerRuntime::new(index, consumer, wake, sets);
        let connected = worker.connect().await;
        log::debug!("worker {}: {} sink node(s) connected", index, connected);
        if ready.send(Ok(())).is_err() {
            return;
        }
        worker.run(shutdown).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::{SinkKind, TrackdConfig};
    use crate::connections::sink::tests::{MockSink, MockState};
    use crate::connections::sink::{SinkAdapter, SinkNode};
    use crate::core::event::Event;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn settings(workers: usize) -> Arc<Settings> {
        let config: TrackdConfig = serde_json::from_value(serde_json::json!({
            "numWorkerThreads": workers,
            "poolCapacity": 64,
            "ops": {
                "1": { "handler": "ddtrack", "sinkType": "redis", "sinkServers": "r1,r2" }
            }
        }))
        .unwrap();
        Arc::new(config.into_settings().unwrap())
    }

    fn mock_registry(state: Arc<MockState>) -> Arc<SinkRegistry> {
        let mut registry = SinkRegistry::new();
        registry.register(SinkKind::KeyValue, move |_, endpoint| -> Box<dyn SinkAdapter> {
            Box::new(MockSink {
                name: endpoint.to_string(),
                state: Arc::clone(&state),
            })
        });
        Arc::new(registry)
    }

    #[tokio::test]
    async fn wake_without_event_is_ignored() {
        let pool = EventPool::new(4);
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut worker = WorkerRuntime::new(0, pool.consumer().unwrap(), rx, BTreeMap::new());
        assert_eq!(worker.handle_wake().await, None);
    }

    #[tokio::test]
    async fn unconfigured_op_is_dropped() {
        let state = Arc::new(MockState::default());
        let pool = EventPool::new(4);
        let (_tx, rx) = mpsc::unbounded_channel();
        let node = SinkNode::new(Box::new(MockSink { name: "n".into(), state: Arc::clone(&state) }));
        let sets = BTreeMap::from([(1u8, SinkClientSet::new(1, vec![node], Duration::from_secs(2)))]);
        let mut worker = WorkerRuntime::new(0, pool.consumer().unwrap(), rx, sets);

        pool.push(Event::new(9, 1, String::new())).unwrap();
        assert_eq!(worker.handle_wake().await, None);
        pool.push(Event::new(1, 1, String::new())).unwrap();
        assert_eq!(worker.handle_wake().await, Some(DispatchOutcome::Delivered(0)));
        assert_eq!(state.processed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn workers_deliver_routed_events_and_finalize_on_stop() {
        let state = Arc::new(MockState::default());
        let mut dispatcher = Dispatcher::new(Duration::from_micros(100));
        let shutdown = CancellationToken::new();
        let workers = WorkerSet::start(settings(3), mock_registry(Arc::clone(&state)), &mut dispatcher, shutdown)
            .await
            .unwrap();
        assert_eq!(workers.len(), 3);
        // two endpoints per worker
        assert_eq!(state.connects.load(Ordering::SeqCst), 6);

        for n in 0..30 {
            dispatcher.route(Event::new(1, n, "t=1&data=1".into())).await;
        }
        while dispatcher.total_size() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        workers.stop().await.unwrap();

        assert_eq!(state.processed.load(Ordering::SeqCst), 30);
        assert!(state.finalized.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_driver_fails_startup() {
        let mut dispatcher = Dispatcher::new(Duration::from_micros(100));
        let result = WorkerSet::start(
            settings(2),
            Arc::new(SinkRegistry::new()),
            &mut dispatcher,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(WorkerError::Sinks { .. })));
    }
}

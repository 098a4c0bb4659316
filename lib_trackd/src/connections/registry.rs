//! # Sink Registry
//!
//! Maps a [`SinkKind`] tag to the factory that builds adapters of that kind.
//! Workers use it at startup to turn the per-opcode settings into their own
//! private [`SinkClientSet`]s.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::configs::{OpSettings, Settings, SinkEndpoint, SinkKind};
use crate::connections::sink::{SinkAdapter, SinkClientSet, SinkError, SinkNode};

/// Builds one adapter for one endpoint of an opcode.
pub type SinkFactory =
    Arc<dyn Fn(&OpSettings, &SinkEndpoint) -> Box<dyn SinkAdapter> + Send + Sync>;

/// # Sink Registry
///
/// Read-only after startup and shared by all workers.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    factories: HashMap<SinkKind, SinkFactory>,
}

impl SinkRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the PostgreSQL and Redis drivers.
    #[cfg(feature = "connections")]
    pub fn with_builtin() -> Self {
        use crate::connections::cache_redis::RedisSink;
        use crate::connections::db_postgres::PostgresSink;

        let mut registry = Self::new();
        registry.register(SinkKind::Relational, |op, endpoint| -> Box<dyn SinkAdapter> {
            Box::new(PostgresSink::new(op, endpoint))
        });
        registry.register(SinkKind::KeyValue, |op, endpoint| -> Box<dyn SinkAdapter> {
            Box::new(RedisSink::new(op, endpoint))
        });
        registry
    }

    /// Registers (or replaces) the factory for a kind.
    pub fn register<F>(&mut self, kind: SinkKind, factory: F)
    where
        F: Fn(&OpSettings, &SinkEndpoint) -> Box<dyn SinkAdapter> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Whether a factory exists for `kind`.
    pub fn supports(&self, kind: SinkKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Builds the failover set for one opcode. Nothing is connected yet.
    pub fn build_set(&self, op: &OpSettings, cooldown: Duration) -> Result<SinkClientSet, SinkError> {
        let factory = self
            .factories
            .get(&op.sink_kind)
            .ok_or_else(|| SinkError::Unsupported(op.sink_kind.to_string()))?;
        let nodes = op
            .endpoints
            .iter()
            .map(|endpoint| SinkNode::new(factory(op, endpoint)))
            .collect();
        Ok(SinkClientSet::new(op.op, nodes, cooldown))
    }

    /// Builds one set per configured opcode.
    pub fn build_sets(&self, settings: &Settings) -> Result<BTreeMap<u8, SinkClientSet>, SinkError> {
        settings
            .ops
            .values()
            .map(|op| Ok((op.op, self.build_set(op, settings.sink_cooldown)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::{Credentials, HandlerKind};
    use crate::connections::sink::tests::{MockSink, MockState};

    fn op_settings(kind: SinkKind) -> OpSettings {
        OpSettings {
            op: 3,
            handler: if kind == SinkKind::KeyValue { HandlerKind::Counter } else { HandlerKind::Upsert },
            sink_kind: kind,
            endpoints: vec![
                SinkEndpoint { host: "a".into(), port: 1 },
                SinkEndpoint { host: "b".into(), port: 2 },
            ],
            credentials: Credentials::default(),
            table: "trk_stat".into(),
            key_prefix: "ddtrack".into(),
        }
    }

    #[test]
    fn builds_one_node_per_endpoint() {
        let mut registry = SinkRegistry::new();
        registry.register(SinkKind::KeyValue, |_, endpoint| -> Box<dyn SinkAdapter> {
            Box::new(MockSink {
                name: endpoint.to_string(),
                state: Arc::new(MockState::default()),
            })
        });

        let set = registry
            .build_set(&op_settings(SinkKind::KeyValue), Duration::from_secs(2))
            .unwrap();
        assert_eq!(set.op(), 3);
        assert_eq!(set.nodes().len(), 2);
        assert!(format!("{:?}", set.nodes()[1]).contains("b:2"));
    }

    #[test]
    fn unknown_kind_is_reported() {
        let registry = SinkRegistry::new();
        let err = registry
            .build_set(&op_settings(SinkKind::Relational), Duration::from_secs(2))
            .unwrap_err();
        assert!(matches!(err, SinkError::Unsupported(_)));
    }
}

pub mod in_memory;
pub mod kafka;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::config::{QueueConfig, QueueKind};
use crate::error::{AppError, AppResult};

pub use in_memory::InMemoryTransport;
pub use kafka::KafkaTransport;

/// Queue message patterns. One pattern maps to one Kafka topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueEvent {
    BaseEventReceived,
}

impl QueueEvent {
    pub fn pattern(&self) -> &'static str {
        match self {
            QueueEvent::BaseEventReceived => "base-event-received",
        }
    }
}

/// Boxed async message handler.
pub type EventHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Queue transport contract.
///
/// `subscribe` registers exactly one handler per pattern; a later call for
/// the same pattern replaces the earlier handler. Messages arriving for a
/// pattern with no handler are dropped. `listen` runs the consumer loop and
/// only returns on a transport-level failure.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, event: QueueEvent, payload: Value) -> AppResult<()>;

    async fn subscribe(&self, event: QueueEvent, handler: EventHandler);

    async fn listen(self: Arc<Self>) -> AppResult<()>;
}

/// Builds and memoizes transports, one instance per kind.
///
/// Owned by the composition root; handing out clones of the same `Arc`
/// keeps publisher and consumer on the same bus.
pub struct TransportRegistry {
    config: QueueConfig,
    built: Mutex<HashMap<QueueKind, Arc<dyn Transport>>>,
}

impl TransportRegistry {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            built: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the transport for the configured kind, building it on first
    /// use. Construction failures are fatal at startup.
    pub fn get(&self) -> AppResult<Arc<dyn Transport>> {
        self.get_kind(self.config.kind)
    }

    pub fn get_kind(&self, kind: QueueKind) -> AppResult<Arc<dyn Transport>> {
        let mut built = self
            .built
            .lock()
            .map_err(|_| AppError::internal("transport registry lock poisoned"))?;
        if let Some(existing) = built.get(&kind) {
            return Ok(existing.clone());
        }
        let transport: Arc<dyn Transport> = match kind {
            QueueKind::InMemory => Arc::new(InMemoryTransport::new()),
            QueueKind::Kafka => Arc::new(KafkaTransport::new(&self.config)?),
        };
        built.insert(kind, transport.clone());
        Ok(transport)
    }
}

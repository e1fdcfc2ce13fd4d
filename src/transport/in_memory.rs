use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{EventHandler, QueueEvent, Transport};
use crate::error::{AppError, AppResult};

const BUS_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
struct BusMessage {
    pattern: &'static str,
    data: Value,
}

/// In-process transport backed by a broadcast channel owned by the
/// instance. Publishing never fails; messages published before `listen`
/// starts are lost, as are messages dropped when the bus overflows.
pub struct InMemoryTransport {
    tx: broadcast::Sender<BusMessage>,
    handlers: RwLock<HashMap<&'static str, EventHandler>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    fn handler_for(&self, pattern: &str) -> Option<EventHandler> {
        self.handlers.read().ok()?.get(pattern).cloned()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, event: QueueEvent, payload: Value) -> AppResult<()> {
        // send() errors only when no listener is subscribed yet; that is a
        // valid fire-and-forget outcome here.
        let _ = self.tx.send(BusMessage {
            pattern: event.pattern(),
            data: payload,
        });
        Ok(())
    }

    async fn subscribe(&self, event: QueueEvent, handler: EventHandler) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(event.pattern(), handler);
        }
    }

    async fn listen(self: Arc<Self>) -> AppResult<()> {
        let mut rx = self.tx.subscribe();
        tracing::info!("In-memory queue listener started");
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if let Some(handler) = self.handler_for(message.pattern) {
                        // Handlers run to completion before the next recv,
                        // so consumption is serialized.
                        handler(message.data).await;
                    } else {
                        tracing::debug!(
                            pattern = message.pattern,
                            "Dropping message with no registered handler"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "In-memory queue listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(AppError::transport("in-memory bus closed"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    fn recording_handler(tx: mpsc::UnboundedSender<Value>) -> EventHandler {
        Arc::new(move |payload| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(payload);
            })
        })
    }

    #[tokio::test]
    async fn test_published_messages_reach_the_handler() {
        let transport = Arc::new(InMemoryTransport::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport
            .subscribe(QueueEvent::BaseEventReceived, recording_handler(tx))
            .await;
        tokio::spawn(transport.clone().listen());
        tokio::task::yield_now().await;

        transport
            .publish(QueueEvent::BaseEventReceived, serde_json::json!({"n": 1}))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("handler was not invoked")
            .unwrap();
        assert_eq!(received, serde_json::json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_the_handler() {
        let transport = Arc::new(InMemoryTransport::new());
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        transport
            .subscribe(QueueEvent::BaseEventReceived, recording_handler(old_tx))
            .await;
        transport
            .subscribe(QueueEvent::BaseEventReceived, recording_handler(new_tx))
            .await;
        tokio::spawn(transport.clone().listen());
        tokio::task::yield_now().await;

        transport
            .publish(QueueEvent::BaseEventReceived, serde_json::json!({"n": 2}))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), new_rx.recv())
            .await
            .expect("replacement handler was not invoked")
            .unwrap();
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_listener_succeeds() {
        let transport = InMemoryTransport::new();
        transport
            .publish(QueueEvent::BaseEventReceived, serde_json::json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_messages_before_listen_are_lost() {
        let transport = Arc::new(InMemoryTransport::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport
            .subscribe(QueueEvent::BaseEventReceived, recording_handler(tx))
            .await;

        transport
            .publish(QueueEvent::BaseEventReceived, serde_json::json!({"n": 1}))
            .await
            .unwrap();
        tokio::spawn(transport.clone().listen());
        tokio::task::yield_now().await;
        transport
            .publish(QueueEvent::BaseEventReceived, serde_json::json!({"n": 2}))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("handler was not invoked")
            .unwrap();
        assert_eq!(received, serde_json::json!({"n": 2}));
        assert!(rx.try_recv().is_err());
    }
}

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use serde_json::Value;

use super::{EventHandler, QueueEvent, Transport};
use crate::config::{QueueConfig, SERVICE_NAME};
use crate::error::{AppError, AppResult};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka transport. Topic = pattern name; all replicas share one consumer
/// group so each message is handled once across the fleet.
pub struct KafkaTransport {
    producer: FutureProducer,
    consumer: StreamConsumer,
    handlers: RwLock<HashMap<&'static str, EventHandler>>,
}

impl KafkaTransport {
    pub fn new(config: &QueueConfig) -> AppResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.url)
            .set("client.id", &config.replica_name)
            .set("message.timeout.ms", "30000")
            .set_log_level(RDKafkaLogLevel::Error)
            .create()?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.url)
            .set("client.id", &config.replica_name)
            .set("group.id", SERVICE_NAME)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set_log_level(RDKafkaLogLevel::Error)
            .create()?;

        Ok(Self {
            producer,
            consumer,
            handlers: RwLock::new(HashMap::new()),
        })
    }

    fn handler_for(&self, topic: &str) -> Option<EventHandler> {
        self.handlers.read().ok()?.get(topic).cloned()
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn publish(&self, event: QueueEvent, payload: Value) -> AppResult<()> {
        let bytes = serde_json::to_vec(&payload)?;
        let record = FutureRecord::<(), Vec<u8>>::to(event.pattern()).payload(&bytes);
        self.producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(err, _)| AppError::from(err))?;
        Ok(())
    }

    async fn subscribe(&self, event: QueueEvent, handler: EventHandler) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(event.pattern(), handler);
        }
    }

    async fn listen(self: Arc<Self>) -> AppResult<()> {
        let topics: Vec<&'static str> = {
            let handlers = self
                .handlers
                .read()
                .map_err(|_| AppError::internal("kafka handler map lock poisoned"))?;
            handlers.keys().copied().collect()
        };
        if topics.is_empty() {
            return Err(AppError::transport("no patterns subscribed"));
        }
        self.consumer.subscribe(&topics)?;
        tracing::info!(topics = ?topics, "Kafka listener started");

        loop {
            match self.consumer.recv().await {
                Ok(message) => {
                    let payload = match message.payload() {
                        Some(bytes) => bytes,
                        None => {
                            tracing::debug!(topic = message.topic(), "Skipping empty message");
                            continue;
                        }
                    };
                    let data: Value = match serde_json::from_slice(payload) {
                        Ok(data) => data,
                        Err(err) => {
                            tracing::warn!(
                                topic = message.topic(),
                                error = %err,
                                "Skipping non-JSON message"
                            );
                            continue;
                        }
                    };
                    if let Some(handler) = self.handler_for(message.topic()) {
                        handler(data).await;
                    } else {
                        tracing::debug!(
                            topic = message.topic(),
                            "Dropping message with no registered handler"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Kafka receive error");
                }
            }
        }
    }
}

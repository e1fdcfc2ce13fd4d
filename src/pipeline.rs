use std::sync::Arc;

use crate::graphql::GraphqlClient;
use crate::models::{BaseEvent, ExtendedEvent};
use crate::transport::{QueueEvent, Transport};

pub const PROCESS_EVENT_MUTATION: &str =
    "mutation ProcessEvent($input: ProcessEventInput!) { processEvent(input: $input) { id } }";

/// Wires the queue consumer: each `BaseEventReceived` payload is enriched
/// with the brand and forwarded to the target via `processEvent`.
///
/// Delivery is best-effort, at most once: any failure is logged and
/// swallowed so one bad event never stalls the listener.
pub async fn register_event_consumer(
    transport: &dyn Transport,
    client: Arc<GraphqlClient>,
    brand: String,
) {
    transport
        .subscribe(
            QueueEvent::BaseEventReceived,
            Arc::new(move |payload| {
                let client = client.clone();
                let brand = brand.clone();
                Box::pin(async move {
                    if let Err(err) = forward_event(&client, &brand, payload).await {
                        tracing::error!(error = %err, "Failed to forward event");
                    }
                })
            }),
        )
        .await;
}

async fn forward_event(
    client: &GraphqlClient,
    brand: &str,
    payload: serde_json::Value,
) -> crate::error::AppResult<()> {
    let base: BaseEvent = serde_json::from_value(payload)?;
    let event = ExtendedEvent::from_base(base, brand);
    event.validate()?;

    tracing::debug!(event_id = %event.id, name = %event.name, "Forwarding event");
    client
        .send(
            PROCESS_EVENT_MUTATION,
            serde_json::json!({ "input": event }),
        )
        .await?;
    Ok(())
}

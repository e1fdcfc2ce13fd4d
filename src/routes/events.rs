use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use super::AuthenticatedUser;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::models::BaseEvent;
use crate::transport::QueueEvent;

pub async fn publish_event(
    State(context): State<Arc<AppContext>>,
    AuthenticatedUser(caller): AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<StatusCode> {
    let event: BaseEvent =
        serde_json::from_value(body).map_err(|err| AppError::validation(err.to_string()))?;
    event.validate()?;

    tracing::debug!(
        event_id = %event.id,
        name = %event.name,
        caller = %caller.auth_id,
        "Accepted event"
    );
    context
        .transport
        .publish(QueueEvent::BaseEventReceived, serde_json::to_value(&event)?)
        .await?;
    Ok(StatusCode::OK)
}

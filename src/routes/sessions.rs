use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::auth::{client_ip, SessionData};
use crate::config::REFRESH_TOKEN_LEN;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    auth_id: String,
    secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshSessionRequest {
    refresh_token: String,
}

// Bodies come in as raw Value so malformed input maps to a uniform 400
// instead of axum's rejection format.
fn parse<T: serde::de::DeserializeOwned>(body: Value) -> AppResult<T> {
    serde_json::from_value(body).map_err(|err| AppError::validation(err.to_string()))
}

pub async fn create_session(
    State(context): State<Arc<AppContext>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> AppResult<(StatusCode, Json<SessionData>)> {
    let request: CreateSessionRequest = parse(body)?;
    let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    let session = context
        .sessions
        .login(&request.auth_id, &request.secret, ip)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn refresh_session(
    State(context): State<Arc<AppContext>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> AppResult<Json<SessionData>> {
    let request: RefreshSessionRequest = parse(body)?;
    if request.refresh_token.len() != REFRESH_TOKEN_LEN {
        return Err(AppError::validation(format!(
            "Refresh token must be exactly {} characters",
            REFRESH_TOKEN_LEN
        )));
    }
    let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    let session = context
        .sessions
        .refresh_session(&request.refresh_token, ip)
        .await?;
    Ok(Json(session))
}

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::context::AppContext;
use crate::error::AppError;
use crate::models::TokenContext;

/// Bearer-token guard. Handlers taking this extractor only run with a valid
/// access token; everything else is rejected with 401.
pub struct AuthenticatedUser(pub TokenContext);

#[async_trait]
impl FromRequestParts<Arc<AppContext>> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::auth("Missing authorization header"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::auth("Authorization header must be a bearer token"))?;
        let context = state.sessions.verify_access_token(token)?;
        Ok(Self(context))
    }
}

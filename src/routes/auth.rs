//! Request authentication

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::services::session;

/// Extractor that validates the session JWT and returns the user id.
///
/// Accepts `Authorization: Bearer <jwt>` (edge handlers, scripts) and falls back
/// to the `access_token` cookie set by the SPA.
pub struct AuthUser(pub Uuid);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);

        let token = match bearer {
            Some(token) => token,
            None => {
                let jar = CookieJar::from_request_parts(parts, state)
                    .await
                    .map_err(|_| StatusCode::UNAUTHORIZED)?;
                jar.get("access_token")
                    .map(|c| c.value().to_string())
                    .ok_or(StatusCode::UNAUTHORIZED)?
            }
        };

        let user_id = session::validate_access_token(&token, &state.jwt_secret).map_err(|e| {
            tracing::debug!(error = %e, "session validation failed");
            StatusCode::UNAUTHORIZED
        })?;

        Ok(AuthUser(user_id))
    }
}

//! Third-party integration endpoints (/integrations/*)

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

use crate::AppState;
use crate::domain::integrations::{self, ConnectedIntegration};
use crate::routes::auth::AuthUser;
use crate::services::error::LogErr;
use crate::services::integrations::{PgTokenStore, ensure_fresh_access_token};
use crate::services::oauth::Provider;

pub fn routes() -> Router<Arc<AppState>> {
    // OAuth handshakes: burst of 5, then 1 every 12 seconds per IP
    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(12)
        .burst_size(5)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("Failed to build rate limit config");

    let rate_limit_layer = GovernorLayer::new(rate_limit_config);

    let oauth = Router::new()
        .route("/integrations/{provider}/connect", get(connect))
        .route("/integrations/{provider}/callback", post(callback))
        .layer(rate_limit_layer);

    Router::new()
        .route("/integrations", get(list_integrations))
        .route(
            "/integrations/{provider}",
            axum::routing::delete(disconnect),
        )
        .route("/integrations/{provider}/token", get(access_token))
        .merge(oauth)
}

fn parse_provider(raw: &str) -> Result<Provider, StatusCode> {
    Provider::parse(raw).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Serialize)]
struct ConnectResponse {
    url: String,
}

/// GET /integrations/{provider}/connect - Start OAuth flow, returns URL to redirect user to
async fn connect(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(provider): Path<String>,
) -> Result<Json<ConnectResponse>, StatusCode> {
    let provider = parse_provider(&provider)?;
    let auth_request = state.oauth(provider).get_authorize_url();

    // Prune abandoned handshakes
    match integrations::cleanup_expired_oauth_states(&state.db).await {
        Ok(0) => {}
        Ok(removed) => tracing::debug!(removed, "expired oauth states removed"),
        Err(e) => tracing::warn!(error = %e, "oauth state cleanup failed"),
    }

    integrations::save_oauth_state(
        &state.db,
        &auth_request.state,
        provider,
        user_id,
        auth_request.code_verifier.as_deref(),
    )
    .await
    .log_500("Save OAuth state error")?;

    Ok(Json(ConnectResponse {
        url: auth_request.url,
    }))
}

#[derive(Deserialize)]
struct CallbackRequest {
    code: String,
    state: String,
}

#[derive(Serialize)]
struct CallbackResponse {
    provider: Provider,
    expires_at: DateTime<Utc>,
}

/// POST /integrations/{provider}/callback - Exchange the OAuth code and store the tokens
async fn callback(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(provider): Path<String>,
    Json(req): Json<CallbackRequest>,
) -> Result<Json<CallbackResponse>, StatusCode> {
    let provider = parse_provider(&provider)?;

    let code_verifier = integrations::take_oauth_state(&state.db, &req.state, provider, user_id)
        .await
        .log_500("Get OAuth state error")?
        .ok_or(StatusCode::BAD_REQUEST)?;

    let tokens = state
        .oauth(provider)
        .exchange_code(&req.code, code_verifier.as_deref())
        .await
        .log_status("Token exchange error", StatusCode::BAD_GATEWAY)?;

    let expires_at = Utc::now() + Duration::seconds(tokens.expires_in);

    integrations::upsert_integration(
        &state.db,
        provider,
        user_id,
        &tokens.access_token,
        tokens.refresh_token.as_deref(),
        expires_at,
    )
    .await
    .log_500("Upsert integration error")?;

    tracing::info!(user_id = %user_id, provider = provider.as_str(), "integration connected");

    Ok(Json(CallbackResponse {
        provider,
        expires_at,
    }))
}

/// GET /integrations - Connected providers for the caller
async fn list_integrations(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<ConnectedIntegration>>, StatusCode> {
    let connected = integrations::list_connected(&state.db, user_id)
        .await
        .log_500("List integrations error")?;

    Ok(Json(connected))
}

/// DELETE /integrations/{provider} - Disconnect
async fn disconnect(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(provider): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let provider = parse_provider(&provider)?;

    let deleted = integrations::delete_integration(&state.db, provider, user_id)
        .await
        .log_500("Delete integration error")?;

    if !deleted {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct AccessTokenResponse {
    access_token: String,
}

/// GET /integrations/{provider}/token - Access token for direct provider calls,
/// refreshed first if it is about to expire
async fn access_token(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(provider): Path<String>,
) -> Result<Json<AccessTokenResponse>, StatusCode> {
    let provider = parse_provider(&provider)?;

    let record = integrations::get_integration(&state.db, provider, user_id)
        .await
        .log_500("Get integration error")?
        .ok_or(StatusCode::NOT_FOUND)?;

    let store = PgTokenStore {
        db: &state.db,
        provider,
    };
    let access_token = ensure_fresh_access_token(&store, state.oauth(provider), record).await;

    Ok(Json(AccessTokenResponse { access_token }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_not_found() {
        assert_eq!(parse_provider("google"), Ok(Provider::Google));
        assert_eq!(parse_provider("tiktok"), Err(StatusCode::NOT_FOUND));
    }
}

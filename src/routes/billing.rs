//! Stripe webhook and subscription status

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::domain::billing::{self, Subscription};
use crate::routes::auth::AuthUser;
use crate::services::error::LogErr;
use crate::services::stripe::{self, StripeEvent, SubscriptionObject};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhooks/stripe", post(stripe_webhook))
        .route("/billing/subscription", get(get_subscription))
}

/// POST /webhooks/stripe - Mirror subscription lifecycle events
async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    stripe::verify_signature(
        signature,
        &body,
        &state.stripe_webhook_secret,
        Utc::now().timestamp(),
    )
    .log_status("Stripe signature rejected", StatusCode::BAD_REQUEST)?;

    let event: StripeEvent =
        serde_json::from_slice(&body).log_status("Stripe event parse error", StatusCode::BAD_REQUEST)?;

    if !event.is_subscription_event() {
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "ignoring stripe event");
        return Ok(StatusCode::OK);
    }

    let sub: SubscriptionObject = serde_json::from_value(event.data.object)
        .log_status("Stripe subscription parse error", StatusCode::BAD_REQUEST)?;

    // Checkout stamps our user id into subscription metadata
    let Some(user_id) = sub
        .metadata
        .get("user_id")
        .and_then(|id| Uuid::parse_str(id).ok())
    else {
        tracing::warn!(event_id = %event.id, subscription = %sub.id, "subscription without user_id metadata");
        return Ok(StatusCode::OK);
    };

    let current_period_end = sub
        .current_period_end
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    billing::upsert_subscription(
        &state.db,
        user_id,
        &sub.customer,
        &sub.id,
        &sub.status,
        current_period_end,
    )
    .await
    .log_500("Upsert subscription error")?;

    tracing::info!(
        event_id = %event.id,
        user_id = %user_id,
        status = %sub.status,
        "subscription updated"
    );

    Ok(StatusCode::OK)
}

/// GET /billing/subscription - The caller's subscription, or null
async fn get_subscription(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Option<Subscription>>, StatusCode> {
    let subscription = billing::get_subscription(&state.db, user_id)
        .await
        .log_500("Get subscription error")?;

    Ok(Json(subscription))
}

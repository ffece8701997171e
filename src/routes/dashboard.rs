//! Dashboard summary (/dashboard/summary), served through the response cache

use axum::{Router, extract::State, http::StatusCode, routing::get};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::AppState;
use crate::constants::DASHBOARD_CACHE_TTL_SECS;
use crate::domain::integrations::{self, ConnectedIntegration};
use crate::domain::{billing, publishing};
use crate::routes::auth::AuthUser;
use crate::services::cache::{self, CacheBypass, CachedJson};
use crate::services::error::LogErr;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/dashboard/summary", get(summary))
}

#[derive(Serialize)]
struct DashboardSummary {
    /// Job counts keyed by status; every status is present
    jobs: BTreeMap<&'static str, i64>,
    total_jobs: i64,
    integrations: Vec<ConnectedIntegration>,
    subscription_status: Option<String>,
    generated_at: chrono::DateTime<Utc>,
}

/// GET /dashboard/summary
async fn summary(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    CacheBypass(bypass): CacheBypass,
) -> Result<CachedJson, StatusCode> {
    let key = cache::cache_key("dashboard", &user_id.to_string(), &[]);

    cache::get_or_compute(&state.cache, key, DASHBOARD_CACHE_TTL_SECS, bypass, || async {
        let counts = publishing::count_by_status(&state.db, user_id)
            .await
            .log_500("Count jobs by status error")?;

        let mut jobs: BTreeMap<&'static str, i64> = publishing::PublishStatus::ALL
            .iter()
            .map(|s| (s.as_str(), 0))
            .collect();
        for (status, count) in counts {
            jobs.insert(status.as_str(), count);
        }
        let total_jobs = jobs.values().sum();

        let integrations = integrations::list_connected(&state.db, user_id)
            .await
            .log_500("List integrations error")?;

        let subscription_status = billing::get_subscription(&state.db, user_id)
            .await
            .log_500("Get subscription error")?
            .map(|s| s.status);

        serde_json::to_value(DashboardSummary {
            jobs,
            total_jobs,
            integrations,
            subscription_status,
            generated_at: Utc::now(),
        })
        .log_500("Serialize dashboard error")
    })
    .await
}

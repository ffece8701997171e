//! Job search (/search), served through the response cache

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::AppState;
use crate::constants::{MAX_SEARCH_RESULTS, SEARCH_CACHE_TTL_SECS};
use crate::domain::publishing::{self, JobFilter};
use crate::routes::auth::AuthUser;
use crate::routes::publishing::parse_status;
use crate::services::cache::{self, CacheBypass, CachedJson};
use crate::services::error::LogErr;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/search", get(search))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    platform: Option<String>,
    status: Option<String>,
    limit: Option<i64>,
}

/// GET /search?q=&platform=&status=&limit=
async fn search(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    CacheBypass(bypass): CacheBypass,
    Query(query): Query<SearchQuery>,
) -> Result<CachedJson, StatusCode> {
    let term = query.q.trim().to_string();
    if term.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let filter = JobFilter {
        status: parse_status(query.status.as_deref())?,
        platform: query.platform.filter(|p| !p.is_empty()),
    };
    let limit = query
        .limit
        .unwrap_or(MAX_SEARCH_RESULTS)
        .clamp(1, MAX_SEARCH_RESULTS);
    let limit_param = limit.to_string();

    let key = cache::cache_key(
        "search",
        &user_id.to_string(),
        &[
            ("q", Some(term.to_lowercase().as_str())),
            ("platform", filter.platform.as_deref()),
            ("status", filter.status.map(|s| s.as_str())),
            ("limit", Some(limit_param.as_str())),
        ],
    );

    cache::get_or_compute(&state.cache, key, SEARCH_CACHE_TTL_SECS, bypass, || async {
        let jobs = publishing::search_jobs(&state.db, user_id, &term, &filter, limit)
            .await
            .log_500("Search jobs error")?;

        Ok(serde_json::json!({
            "query": term,
            "results": jobs,
            "count": jobs.len(),
        }))
    })
    .await
}

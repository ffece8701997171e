//! Process-local TTL response cache used by the dashboard and search handlers.
//!
//! Entries are never evicted proactively: an entry is served while
//! `now < expires_at` and is otherwise treated as a miss until it gets
//! overwritten. There is no size bound and no cross-instance coherency; a
//! caller that needs fresh data sends `x-cache-bypass: true`.

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderName, HeaderValue, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

pub const CACHE_BYPASS_HEADER: &str = "x-cache-bypass";
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache-status");
pub const RESPONSE_TIME_HEADER: HeaderName = HeaderName::from_static("x-response-time-ms");
pub const CACHE_EXPIRES_HEADER: HeaderName = HeaderName::from_static("x-cache-expires-at");

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// Epoch milliseconds
    pub expires_at: i64,
    pub cached_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expires_at)
    }
}

pub struct TtlCache<V, C = SystemClock> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    clock: C,
}

/// Cache shape shared by the JSON edge handlers
pub type ResponseCache = TtlCache<serde_json::Value>;

impl<V: Clone> TtlCache<V, SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<V: Clone> Default for TtlCache<V, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone, C: Clock> TtlCache<V, C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        // A panicked writer can only leave a stale entry behind, never a torn one.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fresh entry for `key`, if any.
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = self.clock.now_ms();
        self.lock()
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .cloned()
    }

    /// Like [`get`](Self::get), but always misses when `bypass` is set.
    pub fn lookup(&self, key: &str, bypass: bool) -> Option<CacheEntry<V>> {
        if bypass { None } else { self.get(key) }
    }

    /// Store `value` for `ttl_secs`, overwriting whatever was there.
    pub fn set(&self, key: impl Into<String>, value: V, ttl_secs: u64) -> CacheEntry<V> {
        let now = self.clock.now_ms();
        let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let entry = CacheEntry {
            value,
            expires_at: now.saturating_add(ttl_ms),
            cached_at: DateTime::from_timestamp_millis(now).unwrap_or_else(Utc::now),
        };
        self.lock().insert(key.into(), entry.clone());
        entry
    }

    /// Most recent entry for `key` regardless of freshness.
    #[cfg(test)]
    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        self.lock().get(key).cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Compose a cache key from the handler scope, the user, and the query
/// parameters. Parameters are sorted and empty values dropped so that
/// `?a=1&b=2` and `?b=2&a=1` share an entry.
pub fn cache_key(scope: &str, user_id: &str, params: &[(&str, Option<&str>)]) -> String {
    let mut pairs: Vec<(&str, &str)> = params
        .iter()
        .filter_map(|(name, value)| value.filter(|v| !v.is_empty()).map(|v| (*name, v)))
        .collect();
    pairs.sort_unstable();

    let query = pairs
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}:{}:{}", scope, user_id, query)
}

/// Extractor for the `x-cache-bypass: true` request header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheBypass(pub bool);

impl<S: Send + Sync> FromRequestParts<S> for CacheBypass {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let bypass = parts
            .headers
            .get(CACHE_BYPASS_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        Ok(CacheBypass(bypass))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// JSON body plus the cache metadata headers.
/// `X-Request-Id` is attached by the request-id layer for every response.
pub struct CachedJson {
    pub status: CacheStatus,
    pub entry: CacheEntry<serde_json::Value>,
    pub started: Instant,
}

impl IntoResponse for CachedJson {
    fn into_response(self) -> Response {
        let elapsed_ms = self.started.elapsed().as_millis();
        let expires_at = self.entry.expires_at_utc().map(|t| t.to_rfc3339());

        let mut response = Json(self.entry.value).into_response();
        let headers = response.headers_mut();
        headers.insert(
            CACHE_STATUS_HEADER,
            HeaderValue::from_static(self.status.as_str()),
        );
        headers.insert(RESPONSE_TIME_HEADER, HeaderValue::from(elapsed_ms as u64));
        if let Some(value) = expires_at.and_then(|t| HeaderValue::from_str(&t).ok()) {
            headers.insert(CACHE_EXPIRES_HEADER, value);
        }
        response
    }
}

/// Serve `key` from the cache or compute it, storing the fresh result.
pub async fn get_or_compute<C, F, Fut>(
    cache: &TtlCache<serde_json::Value, C>,
    key: String,
    ttl_secs: u64,
    bypass: bool,
    compute: F,
) -> Result<CachedJson, StatusCode>
where
    C: Clock,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<serde_json::Value, StatusCode>>,
{
    let started = Instant::now();

    if let Some(entry) = cache.lookup(&key, bypass) {
        tracing::debug!(key = %key, cached_at = %entry.cached_at, "cache hit");
        return Ok(CachedJson {
            status: CacheStatus::Hit,
            entry,
            started,
        });
    }

    let value = compute().await?;
    let entry = cache.set(key, value, ttl_secs);

    Ok(CachedJson {
        status: CacheStatus::Miss,
        entry,
        started,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct ManualClock(Arc<AtomicI64>);

    impl ManualClock {
        fn advance_secs(&self, secs: i64) {
            self.0.fetch_add(secs * 1000, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn cache_at(start_ms: i64) -> (TtlCache<serde_json::Value, ManualClock>, ManualClock) {
        let clock = ManualClock(Arc::new(AtomicI64::new(start_ms)));
        (TtlCache::with_clock(clock.clone()), clock)
    }

    #[test]
    fn get_after_set_returns_value() {
        let (cache, _clock) = cache_at(1_700_000_000_000);
        cache.set("k", serde_json::json!({"n": 1}), 30);
        assert_eq!(cache.get("k").unwrap().value, serde_json::json!({"n": 1}));
    }

    #[test]
    fn entry_expires_after_ttl() {
        let (cache, clock) = cache_at(1_700_000_000_000);
        let entry = cache.set("k", serde_json::json!(1), 30);
        assert_eq!(entry.expires_at, 1_700_000_030_000);

        clock.advance_secs(29);
        assert!(cache.get("k").is_some());

        clock.advance_secs(1);
        assert!(cache.get("k").is_none(), "now == expires_at is a miss");
        assert!(cache.peek("k").is_some(), "expired entries are not evicted");
    }

    #[test]
    fn bypass_always_misses() {
        let (cache, _clock) = cache_at(0);
        cache.set("k", serde_json::json!("v"), 600);
        assert!(cache.lookup("k", true).is_none());
        assert!(cache.lookup("k", false).is_some());
    }

    #[test]
    fn set_overwrites_unconditionally() {
        let (cache, clock) = cache_at(0);
        cache.set("k", serde_json::json!("old"), 600);
        clock.advance_secs(1);
        cache.set("k", serde_json::json!("new"), 1);
        let entry = cache.get("k").unwrap();
        assert_eq!(entry.value, serde_json::json!("new"));
        assert_eq!(entry.expires_at, 2_000);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_key_ignores_param_order_and_empty_values() {
        let a = cache_key("search", "u1", &[("q", Some("cats")), ("platform", Some("instagram"))]);
        let b = cache_key(
            "search",
            "u1",
            &[("platform", Some("instagram")), ("status", None), ("q", Some("cats"))],
        );
        assert_eq!(a, b);
        assert_eq!(a, "search:u1:platform=instagram&q=cats");
        assert_ne!(a, cache_key("search", "u2", &[("q", Some("cats"))]));
    }

    #[tokio::test]
    async fn bypass_header_is_parsed_case_insensitively() {
        let (mut parts, _) = Request::builder()
            .header("x-cache-bypass", "TRUE")
            .body(())
            .unwrap()
            .into_parts();
        let CacheBypass(bypass) = CacheBypass::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(bypass);

        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();
        let CacheBypass(bypass) = CacheBypass::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(!bypass);
    }

    #[tokio::test]
    async fn get_or_compute_hits_then_refreshes_on_bypass() {
        let (cache, _clock) = cache_at(1_000);
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let compute = || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(serde_json::json!({ "call": n }))
        };

        let first = get_or_compute(&cache, "k".into(), 60, false, compute).await.unwrap();
        assert_eq!(first.status, CacheStatus::Miss);

        let second = get_or_compute(&cache, "k".into(), 60, false, compute).await.unwrap();
        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(second.entry.value, serde_json::json!({ "call": 1 }));

        let bypassed = get_or_compute(&cache, "k".into(), 60, true, compute).await.unwrap();
        assert_eq!(bypassed.status, CacheStatus::Miss);
        assert_eq!(bypassed.entry.value, serde_json::json!({ "call": 2 }));
        assert_eq!(cache.get("k").unwrap().value, serde_json::json!({ "call": 2 }));
    }

    #[tokio::test]
    async fn compute_errors_are_not_cached() {
        let (cache, _clock) = cache_at(0);
        let result = get_or_compute(&cache, "k".into(), 60, false, || async {
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        })
        .await;
        assert!(result.is_err());
        assert!(cache.peek("k").is_none());
    }

    #[test]
    fn cached_json_sets_metadata_headers() {
        let (cache, _clock) = cache_at(1_700_000_000_000);
        let entry = cache.set("k", serde_json::json!([]), 60);
        let response = CachedJson {
            status: CacheStatus::Hit,
            entry,
            started: Instant::now(),
        }
        .into_response();

        let headers = response.headers();
        assert_eq!(headers.get("x-cache-status").unwrap(), "HIT");
        assert!(headers.get("x-response-time-ms").is_some());
        assert_eq!(
            headers.get("x-cache-expires-at").unwrap(),
            "2023-11-14T22:14:20+00:00"
        );
    }
}

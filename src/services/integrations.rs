//! Access-token freshness for stored integrations

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::future::Future;
use uuid::Uuid;

use crate::constants::TOKEN_REFRESH_SKEW_SECS;
use crate::domain::integrations::{self, IntegrationRecord};
use crate::services::oauth::{Provider, TokenRefresher};

/// Where refreshed tokens get persisted
pub trait TokenStore {
    fn save_refreshed(
        &self,
        user_id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

/// Postgres-backed store for one provider's integration table
pub struct PgTokenStore<'a> {
    pub db: &'a PgPool,
    pub provider: Provider,
}

impl TokenStore for PgTokenStore<'_> {
    async fn save_refreshed(
        &self,
        user_id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        integrations::update_tokens(
            self.db,
            self.provider,
            user_id,
            access_token,
            refresh_token,
            expires_at,
        )
        .await
        .map(|_| ())
    }
}

/// A token is reusable only if it stays valid past the refresh skew.
pub fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at <= now + Duration::seconds(TOKEN_REFRESH_SKEW_SECS)
}

/// Return an access token for `record`, refreshing it first if it expires
/// within the skew window.
///
/// A failed refresh is not an error here: the stale token is returned and the
/// downstream provider call is left to fail on its own.
pub async fn ensure_fresh_access_token<S, R>(
    store: &S,
    refresher: &R,
    record: IntegrationRecord,
) -> String
where
    S: TokenStore,
    R: TokenRefresher,
{
    let now = Utc::now();
    if !needs_refresh(record.expires_at, now) {
        return record.access_token;
    }

    let Some(refresh_token) = record.refresh_token.as_deref() else {
        tracing::warn!(user_id = %record.user_id, "token near expiry and no refresh token stored");
        return record.access_token;
    };

    let fresh = match refresher.refresh(refresh_token).await {
        Ok(fresh) => fresh,
        Err(e) => {
            tracing::warn!(user_id = %record.user_id, error = %e, "token refresh failed, using stale token");
            return record.access_token;
        }
    };

    let expires_at = Utc::now() + Duration::seconds(fresh.expires_in);
    if let Err(e) = store
        .save_refreshed(
            record.user_id,
            &fresh.access_token,
            fresh.refresh_token.as_deref(),
            expires_at,
        )
        .await
    {
        tracing::error!(user_id = %record.user_id, error = %e, "failed to persist refreshed token");
    }

    fresh.access_token
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::oauth::{OAuthError, TokenResponse};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRefresher {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeRefresher {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, OAuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OAuthError::Api {
                    provider: "google",
                    status: 400,
                    body: "invalid_grant".to_string(),
                });
            }
            Ok(TokenResponse {
                access_token: format!("new-for-{}", refresh_token),
                expires_in: 3600,
                refresh_token: None,
            })
        }
    }

    #[derive(Default)]
    struct FakeStore {
        saved: Mutex<Vec<(Uuid, String, Option<String>, DateTime<Utc>)>>,
    }

    impl TokenStore for FakeStore {
        async fn save_refreshed(
            &self,
            user_id: Uuid,
            access_token: &str,
            refresh_token: Option<&str>,
            expires_at: DateTime<Utc>,
        ) -> Result<(), sqlx::Error> {
            self.saved.lock().unwrap().push((
                user_id,
                access_token.to_string(),
                refresh_token.map(str::to_string),
                expires_at,
            ));
            Ok(())
        }
    }

    fn record(expires_in: Duration) -> IntegrationRecord {
        IntegrationRecord {
            user_id: Uuid::new_v4(),
            access_token: "stale".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: Utc::now() + expires_in,
        }
    }

    #[test]
    fn skew_window_is_sixty_seconds() {
        let now = Utc::now();
        assert!(needs_refresh(now - Duration::seconds(1), now));
        assert!(needs_refresh(now + Duration::seconds(30), now));
        assert!(needs_refresh(now + Duration::seconds(60), now));
        assert!(!needs_refresh(now + Duration::seconds(61), now));
    }

    #[tokio::test]
    async fn fresh_token_is_reused_without_network_call() {
        let store = FakeStore::default();
        let refresher = FakeRefresher::new(false);

        let token = ensure_fresh_access_token(&store, &refresher, record(Duration::hours(1))).await;

        assert_eq!(token, "stale");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_persisted() {
        let store = FakeStore::default();
        let refresher = FakeRefresher::new(false);
        let rec = record(Duration::seconds(-30));
        let user_id = rec.user_id;

        let token = ensure_fresh_access_token(&store, &refresher, rec).await;

        assert_eq!(token, "new-for-rt");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, user_id);
        assert_eq!(saved[0].1, "new-for-rt");
        assert!(saved[0].3 > Utc::now() + Duration::minutes(59));
    }

    #[tokio::test]
    async fn token_inside_skew_window_is_refreshed() {
        let store = FakeStore::default();
        let refresher = FakeRefresher::new(false);

        let token =
            ensure_fresh_access_token(&store, &refresher, record(Duration::seconds(30))).await;

        assert_eq!(token, "new-for-rt");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_returns_stale_token() {
        let store = FakeStore::default();
        let refresher = FakeRefresher::new(true);

        let token =
            ensure_fresh_access_token(&store, &refresher, record(Duration::seconds(-5))).await;

        assert_eq!(token, "stale");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_refresh_token_returns_stale_token() {
        let store = FakeStore::default();
        let refresher = FakeRefresher::new(false);
        let mut rec = record(Duration::seconds(-5));
        rec.refresh_token = None;

        let token = ensure_fresh_access_token(&store, &refresher, rec).await;

        assert_eq!(token, "stale");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }
}

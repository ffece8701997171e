//! Integration records for OAuth-connected providers, and pending OAuth states

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::constants::OAUTH_STATE_MAX_AGE_MINUTES;
use crate::services::oauth::Provider;

/// Stored tokens for one user's connection to a provider
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IntegrationRecord {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Connection summary, safe to return to the client
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedIntegration {
    pub provider: Provider,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn get_integration<'e, E>(
    executor: E,
    provider: Provider,
    user_id: Uuid,
) -> Result<Option<IntegrationRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        "SELECT user_id, access_token, refresh_token, expires_at FROM {} WHERE user_id = $1",
        provider.table()
    );

    sqlx::query_as(&query)
        .bind(user_id)
        .fetch_optional(executor)
        .await
}

/// Create or replace the integration after an OAuth callback
pub async fn upsert_integration<'e, E>(
    executor: E,
    provider: Provider,
    user_id: Uuid,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"
        INSERT INTO {table} (user_id, access_token, refresh_token, expires_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id) DO UPDATE SET
            access_token = $2,
            refresh_token = COALESCE($3, {table}.refresh_token),
            expires_at = $4,
            updated_at = NOW()
        "#,
        table = provider.table()
    );

    sqlx::query(&query)
        .bind(user_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .execute(executor)
        .await?;
    Ok(())
}

/// Persist a refreshed token. A `None` refresh token keeps the stored one.
pub async fn update_tokens<'e, E>(
    executor: E,
    provider: Provider,
    user_id: Uuid,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"
        UPDATE {} SET
            access_token = $2,
            refresh_token = COALESCE($3, refresh_token),
            expires_at = $4,
            updated_at = NOW()
        WHERE user_id = $1
        "#,
        provider.table()
    );

    let result = sqlx::query(&query)
        .bind(user_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete_integration<'e, E>(
    executor: E,
    provider: Provider,
    user_id: Uuid,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!("DELETE FROM {} WHERE user_id = $1", provider.table());

    let result = sqlx::query(&query)
        .bind(user_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// All providers the user has connected
pub async fn list_connected<'e, E>(
    executor: E,
    user_id: Uuid,
) -> Result<Vec<ConnectedIntegration>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(String, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT 'google' AS provider, expires_at, updated_at FROM google_integrations WHERE user_id = $1
        UNION ALL
        SELECT 'instagram' AS provider, expires_at, updated_at FROM instagram_integrations WHERE user_id = $1
        ORDER BY provider
        "#,
    )
    .bind(user_id)
    .fetch_all(executor)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(provider, expires_at, updated_at)| {
            Provider::parse(&provider).map(|provider| ConnectedIntegration {
                provider,
                expires_at,
                updated_at,
            })
        })
        .collect())
}

/// States created before this instant can no longer be redeemed
pub fn oauth_state_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::minutes(OAUTH_STATE_MAX_AGE_MINUTES)
}

/// Drop states that were abandoned before a callback redeemed them
pub async fn cleanup_expired_oauth_states<'e, E>(executor: E) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM oauth_states WHERE created_at <= $1")
        .bind(oauth_state_cutoff(Utc::now()))
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn save_oauth_state<'e, E>(
    executor: E,
    state: &str,
    provider: Provider,
    user_id: Uuid,
    code_verifier: Option<&str>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO oauth_states (state, provider, user_id, code_verifier)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(state)
    .bind(provider.as_str())
    .bind(user_id)
    .bind(code_verifier)
    .execute(executor)
    .await?;
    Ok(())
}

/// Consume a pending OAuth state. Returns `Some(code_verifier)` when the state
/// exists, is fresh, and belongs to this user and provider.
pub async fn take_oauth_state<'e, E>(
    executor: E,
    state: &str,
    provider: Provider,
    user_id: Uuid,
) -> Result<Option<Option<String>>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    // DELETE ... RETURNING so a state can only be redeemed once
    let row: Option<(Option<String>,)> = sqlx::query_as(
        r#"
        DELETE FROM oauth_states
        WHERE state = $1 AND provider = $2 AND user_id = $3
          AND created_at > $4
        RETURNING code_verifier
        "#,
    )
    .bind(state)
    .bind(provider.as_str())
    .bind(user_id)
    .bind(oauth_state_cutoff(Utc::now()))
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|r| r.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cutoff_is_max_age_before_now() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let cutoff = oauth_state_cutoff(now);
        assert_eq!(now - cutoff, Duration::minutes(10));
        assert!(cutoff < now);
    }
}

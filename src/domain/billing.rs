//! Stripe subscription state mirrored per user

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscription {
    #[allow(dead_code)] // Fetched from DB but intentionally not exposed in API responses
    #[serde(skip)]
    pub user_id: Uuid,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub status: String,
    pub current_period_end: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub async fn get_subscription<'e, E>(
    executor: E,
    user_id: Uuid,
) -> Result<Option<Subscription>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT user_id, stripe_customer_id, stripe_subscription_id, status,
               current_period_end, updated_at
        FROM subscriptions WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
}

pub async fn upsert_subscription<'e, E>(
    executor: E,
    user_id: Uuid,
    stripe_customer_id: &str,
    stripe_subscription_id: &str,
    status: &str,
    current_period_end: Option<DateTime<Utc>>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO subscriptions
            (user_id, stripe_customer_id, stripe_subscription_id, status, current_period_end)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id) DO UPDATE SET
            stripe_customer_id = $2,
            stripe_subscription_id = $3,
            status = $4,
            current_period_end = COALESCE($5, subscriptions.current_period_end),
            updated_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(stripe_customer_id)
    .bind(stripe_subscription_id)
    .bind(status)
    .bind(current_period_end)
    .execute(executor)
    .await?;
    Ok(())
}

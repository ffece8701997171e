//! Publishing queue: scheduled posts tracked by a status column

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::types::Json;
use sqlx::{Decode, Encode, Executor, Postgres, Type};
use uuid::Uuid;

/// Publish job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Queued,
    Processing,
    Published,
    Failed,
    Cancelled,
}

impl PublishStatus {
    pub const ALL: [PublishStatus; 5] = [
        PublishStatus::Queued,
        PublishStatus::Processing,
        PublishStatus::Published,
        PublishStatus::Failed,
        PublishStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Queued => "queued",
            PublishStatus::Processing => "processing",
            PublishStatus::Published => "published",
            PublishStatus::Failed => "failed",
            PublishStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(PublishStatus::Queued),
            "processing" => Some(PublishStatus::Processing),
            "published" => Some(PublishStatus::Published),
            "failed" => Some(PublishStatus::Failed),
            "cancelled" => Some(PublishStatus::Cancelled),
            _ => None,
        }
    }

    /// Only terminal, unsuccessful jobs may be re-enqueued
    pub fn is_retriable(&self) -> bool {
        matches!(self, PublishStatus::Failed | PublishStatus::Cancelled)
    }
}

// Stored as text so the column stays readable from the dashboard SQL console
impl Type<Postgres> for PublishStatus {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for PublishStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as Decode<Postgres>>::decode(value)?;
        PublishStatus::parse(s).ok_or_else(|| format!("unknown publish status: {}", s).into())
    }
}

impl Encode<'_, Postgres> for PublishStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <&str as Encode<Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// A row of `publishing_queue_logs`
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PublishJob {
    pub id: i64,
    #[allow(dead_code)] // Fetched from DB but intentionally not exposed in API responses
    #[serde(skip)]
    pub user_id: Uuid,
    pub title: String,
    pub platform: String,
    pub status: PublishStatus,
    pub scheduled_time: DateTime<Utc>,
    pub payload: Json<serde_json::Value>,
    pub error_logs: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Content to schedule
#[derive(Debug, Clone, Deserialize)]
pub struct NewPublishJob {
    pub title: String,
    pub platform: String,
    pub scheduled_time: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Optional list filters; `None` matches everything
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<PublishStatus>,
    pub platform: Option<String>,
}

const JOB_COLUMNS: &str = "id, user_id, title, platform, status, scheduled_time, payload, \
                           COALESCE(error_logs, '[]'::jsonb) AS error_logs, created_at, updated_at";

pub async fn list_jobs<'e, E>(
    executor: E,
    user_id: Uuid,
    filter: &JobFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<PublishJob>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"
        SELECT {}
        FROM publishing_queue_logs
        WHERE user_id = $1
          AND ($2::text IS NULL OR status = $2)
          AND ($3::text IS NULL OR platform = $3)
        ORDER BY scheduled_time DESC, id DESC
        LIMIT $4 OFFSET $5
        "#,
        JOB_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(user_id)
        .bind(filter.status)
        .bind(filter.platform.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await
}

pub async fn count_jobs<'e, E>(
    executor: E,
    user_id: Uuid,
    filter: &JobFilter,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM publishing_queue_logs
        WHERE user_id = $1
          AND ($2::text IS NULL OR status = $2)
          AND ($3::text IS NULL OR platform = $3)
        "#,
    )
    .bind(user_id)
    .bind(filter.status)
    .bind(filter.platform.as_deref())
    .fetch_one(executor)
    .await?;
    Ok(count)
}

/// Fetch the caller's jobs among `ids`; ids owned by others are silently dropped
pub async fn get_jobs_by_ids<'e, E>(
    executor: E,
    user_id: Uuid,
    ids: &[i64],
) -> Result<Vec<PublishJob>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        "SELECT {} FROM publishing_queue_logs WHERE id = ANY($1) AND user_id = $2 ORDER BY id",
        JOB_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(ids)
        .bind(user_id)
        .fetch_all(executor)
        .await
}

pub async fn create_job<'e, E>(
    executor: E,
    user_id: Uuid,
    job: &NewPublishJob,
) -> Result<PublishJob, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"
        INSERT INTO publishing_queue_logs (user_id, title, platform, status, scheduled_time, payload)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        JOB_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(user_id)
        .bind(&job.title)
        .bind(&job.platform)
        .bind(PublishStatus::Queued)
        .bind(job.scheduled_time)
        .bind(Json(&job.payload))
        .fetch_one(executor)
        .await
}

/// Reset retriable jobs to `queued`. The status guard is repeated in SQL so a
/// job that changed state since it was read is not re-enqueued.
/// Returns the number of jobs actually re-enqueued.
pub async fn requeue_jobs<'e, E>(
    executor: E,
    user_id: Uuid,
    ids: &[i64],
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    if ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"
        UPDATE publishing_queue_logs
        SET status = 'queued', updated_at = NOW()
        WHERE id = ANY($1) AND user_id = $2 AND status IN ('failed', 'cancelled')
        "#,
    )
    .bind(ids)
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Cancel a job that has not started yet
pub async fn cancel_job<'e, E>(executor: E, user_id: Uuid, id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE publishing_queue_logs
        SET status = 'cancelled', updated_at = NOW()
        WHERE id = $1 AND user_id = $2 AND status = 'queued'
        "#,
    )
    .bind(id)
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete_job<'e, E>(executor: E, user_id: Uuid, id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM publishing_queue_logs WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Job counts per status (statuses with no jobs are omitted)
pub async fn count_by_status<'e, E>(
    executor: E,
    user_id: Uuid,
) -> Result<Vec<(PublishStatus, i64)>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT status, COUNT(*)
        FROM publishing_queue_logs
        WHERE user_id = $1
        GROUP BY status
        "#,
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
}

/// Case-insensitive title search
pub async fn search_jobs<'e, E>(
    executor: E,
    user_id: Uuid,
    term: &str,
    filter: &JobFilter,
    limit: i64,
) -> Result<Vec<PublishJob>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let pattern = format!("%{}%", escape_like(term));
    let query = format!(
        r#"
        SELECT {}
        FROM publishing_queue_logs
        WHERE user_id = $1
          AND title ILIKE $2 ESCAPE '\'
          AND ($3::text IS NULL OR status = $3)
          AND ($4::text IS NULL OR platform = $4)
        ORDER BY scheduled_time DESC, id DESC
        LIMIT $5
        "#,
        JOB_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(user_id)
        .bind(pattern)
        .bind(filter.status)
        .bind(filter.platform.as_deref())
        .bind(limit)
        .fetch_all(executor)
        .await
}

/// Escape LIKE metacharacters so user input matches literally
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in PublishStatus::ALL {
            assert_eq!(PublishStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PublishStatus::parse("draft"), None);
    }

    #[test]
    fn only_failed_and_cancelled_are_retriable() {
        let retriable: Vec<_> = PublishStatus::ALL
            .into_iter()
            .filter(PublishStatus::is_retriable)
            .collect();
        assert_eq!(retriable, vec![PublishStatus::Failed, PublishStatus::Cancelled]);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PublishStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}

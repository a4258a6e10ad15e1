//! Scheduled post domain - DB queries
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).
//!
//! The publish worker owns every mutation of pipeline state. Each of those
//! updates is guarded with `deleted_at IS NULL` (and usually
//! `status = 'processing'`) so that a post soft-deleted while an attempt is
//! in flight discards the attempt's result instead of persisting it.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

use super::models::{MediaType, ScheduledPost};

const POST_COLUMNS: &str = "id, user_id, media_url, media_type, caption, location_id, user_tags, \
     scheduled_at, status, retry_attempts, last_attempt_at, last_error_message, \
     media_container_id, media_container_status, published_at, deleted_at, created_at";

/// Parsed status filter enum for type-safe query building
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Pending,
    Processing,
    Published,
    Failed,
    All,
}

impl StatusFilter {
    pub fn from_str(s: Option<&str>) -> Self {
        match s {
            Some("pending") => StatusFilter::Pending,
            Some("processing") => StatusFilter::Processing,
            Some("published") => StatusFilter::Published,
            Some("failed") => StatusFilter::Failed,
            _ => StatusFilter::All,
        }
    }

    /// Returns SQL WHERE clause fragment for filtering by pipeline status
    fn where_clause(&self) -> &'static str {
        match self {
            StatusFilter::Pending => "AND status = 'pending'",
            StatusFilter::Processing => "AND status = 'processing'",
            StatusFilter::Published => "AND status = 'published'",
            StatusFilter::Failed => "AND status = 'failed'",
            StatusFilter::All => "",
        }
    }
}

/// Payload for scheduling a new post
#[derive(Debug, Clone)]
pub struct NewPost {
    pub media_url: String,
    pub media_type: MediaType,
    pub caption: String,
    pub location_id: Option<String>,
    pub user_tags: Option<serde_json::Value>,
    pub scheduled_at: DateTime<Utc>,
}

/// Insert a new scheduled post with status pending
pub async fn create_post<'e, E>(
    executor: E,
    user_id: i64,
    post: &NewPost,
) -> Result<ScheduledPost, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"
        INSERT INTO scheduled_posts
            (user_id, media_url, media_type, caption, location_id, user_tags, scheduled_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {POST_COLUMNS}
        "#
    );

    sqlx::query_as(&query)
        .bind(user_id)
        .bind(&post.media_url)
        .bind(post.media_type)
        .bind(&post.caption)
        .bind(&post.location_id)
        .bind(&post.user_tags)
        .bind(post.scheduled_at)
        .fetch_one(executor)
        .await
}

/// Count a user's posts for pagination
pub async fn count_posts<'e, E>(
    executor: E,
    user_id: i64,
    status_filter: Option<&str>,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let filter = StatusFilter::from_str(status_filter);
    let query = format!(
        "SELECT COUNT(*) FROM scheduled_posts WHERE user_id = $1 AND deleted_at IS NULL {}",
        filter.where_clause()
    );

    let (count,): (i64,) = sqlx::query_as(&query)
        .bind(user_id)
        .fetch_one(executor)
        .await?;

    Ok(count)
}

/// List a user's posts with pagination, newest schedule first
pub async fn list_posts_paginated<'e, E>(
    executor: E,
    user_id: i64,
    status_filter: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<ScheduledPost>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let filter = StatusFilter::from_str(status_filter);
    let query = format!(
        r#"SELECT {POST_COLUMNS}
           FROM scheduled_posts
           WHERE user_id = $1 AND deleted_at IS NULL {}
           ORDER BY scheduled_at DESC
           LIMIT $2 OFFSET $3"#,
        filter.where_clause()
    );

    sqlx::query_as(&query)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await
}

/// Get one post scoped to its owner
pub async fn get_post<'e, E>(
    executor: E,
    post_id: i64,
    user_id: i64,
) -> Result<Option<ScheduledPost>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        "SELECT {POST_COLUMNS} FROM scheduled_posts \
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL"
    );

    sqlx::query_as(&query)
        .bind(post_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await
}

/// Soft-delete a post. This is the pipeline's cancellation signal: the
/// worker never claims a deleted row and discards in-flight results for one.
/// Returns true if the post existed and was not already deleted.
pub async fn soft_delete_post<'e, E>(
    executor: E,
    post_id: i64,
    user_id: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE scheduled_posts
        SET deleted_at = NOW()
        WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL
        "#,
    )
    .bind(post_id)
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Knobs for the due-post claim query
#[derive(Debug, Clone, Copy)]
pub struct ClaimParams {
    pub limit: i64,
    /// A `processing` row older than this is considered abandoned by a
    /// crashed worker and becomes claimable again
    pub lease_seconds: i64,
    /// Minimum wait between touches of the same row (container re-polls)
    pub repoll_floor_secs: f64,
    pub backoff_base_secs: f64,
    pub backoff_multiplier: f64,
    pub backoff_max_secs: f64,
}

/// Atomically claim a batch of due posts for exclusive processing.
///
/// Due means: not deleted, past its scheduled time, either parked as
/// `pending` with its repoll/backoff window elapsed, or `processing` with
/// an expired lease. Claiming flips the row to `processing` and stamps
/// `last_attempt_at`; `FOR UPDATE SKIP LOCKED` keeps concurrent workers
/// from ever picking up the same row.
pub async fn claim_due_posts<'e, E>(
    executor: E,
    params: ClaimParams,
) -> Result<Vec<ScheduledPost>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"
        WITH due AS (
            SELECT id
            FROM scheduled_posts
            WHERE deleted_at IS NULL
              AND scheduled_at <= NOW()
              AND (
                  (
                      status = 'pending'
                      AND (
                          last_attempt_at IS NULL
                          OR last_attempt_at <= NOW() - make_interval(secs =>
                              GREATEST(
                                  $1,
                                  CASE WHEN retry_attempts = 0 THEN 0
                                       ELSE LEAST($2 * power($3, retry_attempts - 1), $4)
                                  END))
                      )
                  )
                  OR (
                      status = 'processing'
                      AND last_attempt_at IS NOT NULL
                      AND last_attempt_at < NOW() - ($5::text || ' seconds')::interval
                  )
              )
            ORDER BY scheduled_at ASC
            LIMIT $6
            FOR UPDATE SKIP LOCKED
        )
        UPDATE scheduled_posts p
        SET status = 'processing', last_attempt_at = NOW()
        FROM due
        WHERE p.id = due.id
        RETURNING {}
        "#,
        post_columns_prefixed("p.")
    );

    sqlx::query_as(&query)
        .bind(params.repoll_floor_secs)
        .bind(params.backoff_base_secs)
        .bind(params.backoff_multiplier)
        .bind(params.backoff_max_secs)
        .bind(params.lease_seconds)
        .bind(params.limit)
        .fetch_all(executor)
        .await
}

fn post_columns_prefixed(prefix: &str) -> String {
    POST_COLUMNS
        .split(", ")
        .map(|col| format!("{prefix}{}", col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Has the post been soft-deleted since it was claimed? A missing row
/// counts as cancelled.
pub async fn is_cancelled<'e, E>(executor: E, post_id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(bool,)> =
        sqlx::query_as("SELECT deleted_at IS NOT NULL FROM scheduled_posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(executor)
            .await?;

    Ok(row.map(|(deleted,)| deleted).unwrap_or(true))
}

/// Store the container id after a successful create. Returns false if the
/// post was cancelled in the meantime (result must be discarded).
pub async fn set_container<'e, E>(
    executor: E,
    post_id: i64,
    container_id: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE scheduled_posts
        SET media_container_id = $1
        WHERE id = $2 AND status = 'processing' AND deleted_at IS NULL
        "#,
    )
    .bind(container_id)
    .bind(post_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record the last observed container status string
pub async fn record_container_status<'e, E>(
    executor: E,
    post_id: i64,
    container_status: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE scheduled_posts
        SET media_container_status = $1
        WHERE id = $2 AND deleted_at IS NULL
        "#,
    )
    .bind(container_status)
    .bind(post_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Park a claimed post back to pending so a later trigger cycle resumes it
/// (container still processing, or a backoff too long to wait out in-run)
pub async fn park_post<'e, E>(executor: E, post_id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE scheduled_posts
        SET status = 'pending'
        WHERE id = $1 AND status = 'processing' AND deleted_at IS NULL
        "#,
    )
    .bind(post_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record a failed attempt: bumps the (monotone) retry counter, stamps the
/// attempt time, stores the raw diagnostic. Returns the new attempt count,
/// or None if the post was cancelled in the meantime.
pub async fn record_failure<'e, E>(
    executor: E,
    post_id: i64,
    error_message: &str,
) -> Result<Option<i32>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(i32,)> = sqlx::query_as(
        r#"
        UPDATE scheduled_posts
        SET retry_attempts = retry_attempts + 1,
            last_attempt_at = NOW(),
            last_error_message = $1
        WHERE id = $2 AND deleted_at IS NULL
        RETURNING retry_attempts
        "#,
    )
    .bind(error_message)
    .bind(post_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(attempts,)| attempts))
}

/// Terminal failure. Leaves retry_attempts, last_error_message and
/// media_container_id intact for diagnostics.
pub async fn mark_failed<'e, E>(executor: E, post_id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE scheduled_posts
        SET status = 'failed'
        WHERE id = $1 AND status = 'processing' AND deleted_at IS NULL
        "#,
    )
    .bind(post_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Terminal success (atomic - only succeeds once, and never for a
/// cancelled post). Returns true if the update was applied.
pub async fn mark_published<'e, E>(executor: E, post_id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE scheduled_posts
        SET status = 'published', published_at = NOW()
        WHERE id = $1 AND status = 'processing'
          AND deleted_at IS NULL AND published_at IS NULL
        "#,
    )
    .bind(post_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

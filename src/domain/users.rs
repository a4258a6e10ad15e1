//! User domain - publish credential lookups
//!
//! Connecting an Instagram account (OAuth, token refresh) is another
//! subsystem's job; the pipeline only reads the stored credential and
//! detects that it has expired before spending a remote call on it.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

/// The credential a publish attempt runs under
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PublishCredentials {
    /// Graph API user node the account publishes through
    pub ig_user_id: String,
    pub access_token: String,
    pub token_expires_at: DateTime<Utc>,
}

impl PublishCredentials {
    pub fn token_expired(&self) -> bool {
        self.token_expires_at < Utc::now()
    }
}

/// Get the publish credentials for a user, if an Instagram account is connected
pub async fn get_publish_credentials<'e, E>(
    executor: E,
    user_id: i64,
) -> Result<Option<PublishCredentials>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT ig_user_id, access_token, token_expires_at
        FROM users
        WHERE id = $1 AND ig_user_id IS NOT NULL AND access_token IS NOT NULL
        "#,
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
}

//! Scheduled post model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};

/// Pipeline status of a scheduled post.
///
/// `processing` doubles as the exclusive worker claim: a row is only
/// `processing` while a worker run owns it (or until its lease expires).
/// `published` and `failed` are terminal and never re-entered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Processing => "processing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => PostStatus::Processing,
            "published" => PostStatus::Published,
            "failed" => PostStatus::Failed,
            _ => PostStatus::Pending,
        }
    }
}

// sqlx Type/Decode/Encode for PostStatus to enable FromRow on ScheduledPost
impl Type<Postgres> for PostStatus {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for PostStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Postgres>>::decode(value)?;
        Ok(PostStatus::from_str(&s))
    }
}

impl Encode<'_, Postgres> for PostStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <String as Encode<Postgres>>::encode_by_ref(&self.as_str().to_owned(), buf)
    }
}

/// Kind of media a post publishes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
    Carousel,
}

impl MediaType {
    /// Strict parse for user input
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaType::Image),
            "video" => Some(MediaType::Video),
            "carousel" => Some(MediaType::Carousel),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Carousel => "carousel",
        }
    }

    pub fn from_str(s: &str) -> Self {
        Self::parse(s).unwrap_or(MediaType::Image)
    }
}

impl Type<Postgres> for MediaType {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for MediaType {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Postgres>>::decode(value)?;
        Ok(MediaType::from_str(&s))
    }
}

impl Encode<'_, Postgres> for MediaType {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <String as Encode<Postgres>>::encode_by_ref(&self.as_str().to_owned(), buf)
    }
}

/// One child of a carousel post. Carousel children ride in the post's
/// `media_url` column as a JSON array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarouselItem {
    pub media_url: String,
    pub media_type: MediaType,
}

/// A tagged account, stored as JSON and forwarded on the wire verbatim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTag {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

/// A scheduled post - the pipeline's unit of work
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduledPost {
    pub id: i64,
    pub user_id: i64,
    pub media_url: String,
    pub media_type: MediaType,
    pub caption: String,
    pub location_id: Option<String>,
    pub user_tags: Option<serde_json::Value>,
    pub scheduled_at: DateTime<Utc>,
    pub status: PostStatus,
    pub retry_attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub media_container_id: Option<String>,
    pub media_container_status: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledPost {
    /// Parse the carousel children out of `media_url`. `None` for
    /// non-carousel posts or an unparseable payload.
    pub fn carousel_items(&self) -> Option<Vec<CarouselItem>> {
        if self.media_type != MediaType::Carousel {
            return None;
        }
        serde_json::from_str(&self.media_url).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn post(media_type: MediaType, media_url: &str) -> ScheduledPost {
        ScheduledPost {
            id: 1,
            user_id: 1,
            media_url: media_url.to_string(),
            media_type,
            caption: String::new(),
            location_id: None,
            user_tags: None,
            scheduled_at: Utc::now(),
            status: PostStatus::Pending,
            retry_attempts: 0,
            last_attempt_at: None,
            last_error_message: None,
            media_container_id: None,
            media_container_status: None,
            published_at: None,
            deleted_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            PostStatus::Pending,
            PostStatus::Processing,
            PostStatus::Published,
            PostStatus::Failed,
        ] {
            assert_eq!(PostStatus::from_str(status.as_str()), status);
        }
        assert_eq!(PostStatus::from_str("garbage"), PostStatus::Pending);
    }

    #[test]
    fn media_type_parse_is_strict() {
        assert_eq!(MediaType::parse("image"), Some(MediaType::Image));
        assert_eq!(MediaType::parse("IMAGE"), None);
        assert_eq!(MediaType::parse("gif"), None);
    }

    #[test]
    fn carousel_items_parse_from_media_url() {
        let payload = r#"[
            {"media_url": "https://cdn.example.com/a.jpg", "media_type": "image"},
            {"media_url": "https://cdn.example.com/b.mp4", "media_type": "video"}
        ]"#;
        let items = post(MediaType::Carousel, payload).carousel_items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].media_type, MediaType::Video);

        assert!(post(MediaType::Image, "https://x/a.jpg").carousel_items().is_none());
        assert!(post(MediaType::Carousel, "not json").carousel_items().is_none());
    }
}

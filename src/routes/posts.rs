//! Scheduled post endpoints (/posts/*)

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::constants::{
    DEFAULT_PAGE_SIZE, MAX_CAPTION_LENGTH, MAX_CAROUSEL_ITEMS, MAX_PAGE_SIZE, MIN_CAROUSEL_ITEMS,
};
use crate::domain::posts::queries::{self, NewPost};
use crate::domain::posts::{CarouselItem, MediaType, PostStatus, ScheduledPost, UserTag};
use crate::routes::AuthUser;
use crate::services::error::LogErr;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/posts", get(list_posts).post(schedule_post))
        .route("/posts/{id}", get(get_post).delete(cancel_post))
}

/// Scheduled post API response
#[derive(Debug, Clone, Serialize)]
struct PostResponse {
    id: i64,
    media_url: String,
    media_type: MediaType,
    caption: String,
    location_id: Option<String>,
    user_tags: Option<serde_json::Value>,
    scheduled_at: DateTime<Utc>,
    status: PostStatus,
    retry_attempts: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    last_error_message: Option<String>,
    media_container_id: Option<String>,
    media_container_status: Option<String>,
    published_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<ScheduledPost> for PostResponse {
    fn from(p: ScheduledPost) -> Self {
        Self {
            id: p.id,
            media_url: p.media_url,
            media_type: p.media_type,
            caption: p.caption,
            location_id: p.location_id,
            user_tags: p.user_tags,
            scheduled_at: p.scheduled_at,
            status: p.status,
            retry_attempts: p.retry_attempts,
            last_attempt_at: p.last_attempt_at,
            last_error_message: p.last_error_message,
            media_container_id: p.media_container_id,
            media_container_status: p.media_container_status,
            published_at: p.published_at,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SchedulePostRequest {
    /// Media URL for image/video posts; ignored for carousels
    media_url: Option<String>,
    media_type: String,
    caption: String,
    location_id: Option<String>,
    user_tags: Option<Vec<UserTag>>,
    /// Carousel children, 2-10 items, image/video only
    children: Option<Vec<CarouselItem>>,
    scheduled_at: DateTime<Utc>,
}

/// Validate a schedule request into an insertable record. Carousel
/// children are stored in `media_url` as a JSON array.
fn validate_request(req: SchedulePostRequest) -> Result<NewPost, StatusCode> {
    let media_type = MediaType::parse(&req.media_type).ok_or(StatusCode::BAD_REQUEST)?;

    if req.caption.chars().count() > MAX_CAPTION_LENGTH {
        return Err(StatusCode::BAD_REQUEST);
    }

    let media_url = match media_type {
        MediaType::Carousel => {
            let children = req.children.unwrap_or_default();
            if children.len() < MIN_CAROUSEL_ITEMS || children.len() > MAX_CAROUSEL_ITEMS {
                return Err(StatusCode::BAD_REQUEST);
            }
            if children
                .iter()
                .any(|c| c.media_type == MediaType::Carousel || c.media_url.is_empty())
            {
                return Err(StatusCode::BAD_REQUEST);
            }
            serde_json::to_string(&children).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        }
        MediaType::Image | MediaType::Video => {
            let url = req.media_url.unwrap_or_default();
            if url.is_empty() {
                return Err(StatusCode::BAD_REQUEST);
            }
            url
        }
    };

    let user_tags = match req.user_tags {
        Some(tags) if !tags.is_empty() => {
            Some(serde_json::to_value(tags).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?)
        }
        _ => None,
    };

    Ok(NewPost {
        media_url,
        media_type,
        caption: req.caption,
        location_id: req.location_id,
        user_tags,
        scheduled_at: req.scheduled_at,
    })
}

/// POST /posts - Schedule a post for publishing
async fn schedule_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<SchedulePostRequest>,
) -> Result<(StatusCode, Json<PostResponse>), StatusCode> {
    let new_post = validate_request(req)?;

    let post = queries::create_post(&state.db, user_id, &new_post)
        .await
        .log_500("Create post error")?;

    Ok((StatusCode::CREATED, Json(post.into())))
}

#[derive(Deserialize)]
struct ListPostsQuery {
    limit: Option<i64>,
    offset: Option<i64>,
    status: Option<String>,
}

#[derive(Serialize)]
struct ListPostsResponse {
    posts: Vec<PostResponse>,
    total: i64,
    has_more: bool,
}

/// GET /posts - List a user's scheduled posts with pagination
async fn list_posts(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ListPostsQuery>,
) -> Result<Json<ListPostsResponse>, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    let status_filter = query.status.as_deref();

    let total = queries::count_posts(&state.db, user_id, status_filter)
        .await
        .log_500("Count posts error")?;

    let result = queries::list_posts_paginated(&state.db, user_id, status_filter, limit, offset)
        .await
        .log_500("List posts error")?;

    let has_more = offset + (result.len() as i64) < total;

    Ok(Json(ListPostsResponse {
        posts: result.into_iter().map(PostResponse::from).collect(),
        total,
        has_more,
    }))
}

/// GET /posts/:id - Fetch one scheduled post
async fn get_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(post_id): Path<i64>,
) -> Result<Json<PostResponse>, StatusCode> {
    let post = queries::get_post(&state.db, post_id, user_id)
        .await
        .log_500("Get post error")?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(post.into()))
}

/// DELETE /posts/:id - Cancel a scheduled post (soft delete)
///
/// This is the pipeline's cancellation signal: the worker stops touching
/// the post the moment `deleted_at` is set.
async fn cancel_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(post_id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    let deleted = queries::soft_delete_post(&state.db, post_id, user_id)
        .await
        .log_500("Cancel post error")?;

    if !deleted {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> SchedulePostRequest {
        SchedulePostRequest {
            media_url: Some("https://cdn.example.com/a.jpg".to_string()),
            media_type: "image".to_string(),
            caption: "hello".to_string(),
            location_id: None,
            user_tags: None,
            children: None,
            scheduled_at: Utc::now(),
        }
    }

    #[test]
    fn valid_image_request_passes() {
        let new_post = validate_request(base_request()).unwrap();
        assert_eq!(new_post.media_type, MediaType::Image);
        assert_eq!(new_post.media_url, "https://cdn.example.com/a.jpg");
    }

    #[test]
    fn unknown_media_type_is_rejected() {
        let mut req = base_request();
        req.media_type = "gif".to_string();
        assert_eq!(validate_request(req).unwrap_err(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn over_long_caption_is_rejected() {
        let mut req = base_request();
        req.caption = "x".repeat(MAX_CAPTION_LENGTH + 1);
        assert_eq!(validate_request(req).unwrap_err(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn image_without_url_is_rejected() {
        let mut req = base_request();
        req.media_url = None;
        assert_eq!(validate_request(req).unwrap_err(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn carousel_children_are_packed_into_media_url() {
        let mut req = base_request();
        req.media_type = "carousel".to_string();
        req.media_url = None;
        req.children = Some(vec![
            CarouselItem {
                media_url: "https://cdn.example.com/a.jpg".to_string(),
                media_type: MediaType::Image,
            },
            CarouselItem {
                media_url: "https://cdn.example.com/b.mp4".to_string(),
                media_type: MediaType::Video,
            },
        ]);

        let new_post = validate_request(req).unwrap();
        assert_eq!(new_post.media_type, MediaType::Carousel);
        let parsed: Vec<CarouselItem> = serde_json::from_str(&new_post.media_url).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn carousel_arity_is_enforced() {
        let mut req = base_request();
        req.media_type = "carousel".to_string();
        req.children = Some(vec![CarouselItem {
            media_url: "https://cdn.example.com/a.jpg".to_string(),
            media_type: MediaType::Image,
        }]);
        assert_eq!(validate_request(req).unwrap_err(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn nested_carousel_children_are_rejected() {
        let mut req = base_request();
        req.media_type = "carousel".to_string();
        req.children = Some(vec![
            CarouselItem {
                media_url: "https://cdn.example.com/a.jpg".to_string(),
                media_type: MediaType::Image,
            },
            CarouselItem {
                media_url: "https://cdn.example.com/b".to_string(),
                media_type: MediaType::Carousel,
            },
        ]);
        assert_eq!(validate_request(req).unwrap_err(), StatusCode::BAD_REQUEST);
    }
}

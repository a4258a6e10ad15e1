//! Scheduled post publishing worker
//!
//! Runs as an apalis cron job that claims due posts and drives each one
//! through Instagram's asynchronous publish protocol: create a media
//! container, poll until the platform finishes processing it, publish it.
//!
//! The pipeline is an explicit state machine. [`phase_for`] derives the
//! current phase from the persisted row, [`transition`] is a pure function
//! from a step's outcome to the next move (advance, hold, retry, fail,
//! complete), and the driver performs the effects, persisting after every
//! transition. Claims are exclusive (SKIP LOCKED + lease), cancellation is
//! cooperative: a soft-deleted post is never claimed, is re-checked before
//! every remote call, and guarded updates discard results that arrive after
//! a mid-flight delete.

use std::str::FromStr;
use std::time::Duration;

use apalis::prelude::*;
use apalis_cron::{CronStream, Schedule};
use apalis_sql::postgres::PostgresStorage;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::env;
use tokio::task::JoinSet;

use crate::domain::posts::queries::{self, ClaimParams};
use crate::domain::posts::{MediaType, ScheduledPost};
use crate::domain::users;
use crate::retry::{BackoffPolicy, RetryDecision};
use crate::services::instagram::{
    CarouselChild, ContainerRequest, ContainerStatusCode, InstagramClient, MediaPayload, RawError,
};
use crate::services::instagram_errors::{ErrorVerdict, classify_raw};

const CLAIM_BATCH_SIZE: i64 = 32;
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_CRON_SECONDS: u64 = 10;
const DEFAULT_LEASE_SECONDS: i64 = 600;
const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Container polls per run before parking the post for the next cycle
const IN_RUN_POLL_LIMIT: u32 = 3;
const POLL_INTERVAL_SECONDS: u64 = 5;

/// Longest backoff a run waits out in place; anything longer parks the row
const MAX_INLINE_RETRY_SECONDS: u64 = 10;

/// Minimum wait between touches of the same row across cycles
const REPOLL_FLOOR_SECONDS: f64 = 15.0;

/// Job input - marker for batch processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishJob {
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
}

impl From<chrono::DateTime<chrono::Utc>> for PublishJob {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        PublishJob { scheduled_at: dt }
    }
}

/// Shared context for publish processing
#[derive(Clone)]
pub struct PublisherContext {
    pub pool: PgPool,
    pub instagram: InstagramClient,
    pub policy: BackoffPolicy,
}

/// Job handler - processes a batch of due posts
/// Always returns Ok - individual post failures are logged but don't fail the job
async fn process_publish_job(
    _job: PublishJob,
    ctx: Data<PublisherContext>,
) -> Result<(), Error> {
    let stats = process_publish_batch(&ctx).await;
    if stats.any() {
        tracing::info!(
            published = stats.published,
            parked = stats.parked,
            failed = stats.failed,
            cancelled = stats.cancelled,
            errored = stats.errored,
            "publish batch complete"
        );
    }
    Ok(())
}

/// Start the publish worker
pub async fn run_publish_worker(pool: PgPool, instagram: InstagramClient) {
    let ctx = PublisherContext {
        pool: pool.clone(),
        instagram,
        policy: BackoffPolicy {
            max_attempts: publish_max_attempts(),
            ..BackoffPolicy::default()
        },
    };

    let cron_seconds = publish_cron_seconds();
    let concurrency = publish_concurrency();
    let lease_seconds = publish_lease_seconds();
    let schedule_expr = format!("*/{} * * * * *", cron_seconds);

    // Run apalis migrations
    PostgresStorage::setup(&pool)
        .await
        .expect("Failed to set up apalis storage");

    let storage: PostgresStorage<PublishJob> = PostgresStorage::new(pool.clone());
    let schedule = Schedule::from_str(&schedule_expr).expect("Invalid publish worker schedule");
    let cron = CronStream::new(schedule);
    let backend = cron.pipe_to_storage(storage);

    tracing::info!(
        cron_seconds,
        concurrency,
        lease_seconds,
        "publish worker starting"
    );

    let worker = WorkerBuilder::new("publish-worker")
        .data(ctx)
        .backend(backend)
        .build_fn(process_publish_job);

    Monitor::new()
        .register(worker)
        .run()
        .await
        .expect("Publish worker monitor failed");
}

#[derive(Debug, Default)]
struct BatchStats {
    published: usize,
    parked: usize,
    failed: usize,
    cancelled: usize,
    errored: usize,
}

impl BatchStats {
    fn any(&self) -> bool {
        self.published + self.parked + self.failed + self.cancelled + self.errored > 0
    }
}

/// Claim due posts and drive each through the pipeline, a bounded number
/// concurrently
async fn process_publish_batch(ctx: &PublisherContext) -> BatchStats {
    let mut stats = BatchStats::default();
    let concurrency = publish_concurrency();
    let lease_seconds = publish_lease_seconds();

    let mut tasks: JoinSet<(i64, Result<RunOutcome, sqlx::Error>)> = JoinSet::new();
    let mut drained = false;

    loop {
        let needed = concurrency.saturating_sub(tasks.len());
        if needed > 0 && !drained {
            let params = ClaimParams {
                limit: std::cmp::min(CLAIM_BATCH_SIZE, needed as i64),
                lease_seconds,
                repoll_floor_secs: REPOLL_FLOOR_SECONDS,
                backoff_base_secs: ctx.policy.base_delay_secs,
                backoff_multiplier: ctx.policy.multiplier,
                backoff_max_secs: ctx.policy.max_delay_secs,
            };

            let posts = match queries::claim_due_posts(&ctx.pool, params).await {
                Ok(posts) => posts,
                Err(e) => {
                    tracing::error!("claim error: {}", e);
                    drained = true;
                    Vec::new()
                }
            };
            if posts.is_empty() {
                drained = true;
            }

            for post in posts {
                let ctx = ctx.clone();
                tasks.spawn(async move {
                    let post_id = post.id;
                    (post_id, run_claimed_post(&ctx, post).await)
                });
            }
        }

        if tasks.is_empty() {
            break;
        }

        if let Some(result) = tasks.join_next().await {
            match result {
                Ok((_, Ok(RunOutcome::Published))) => stats.published += 1,
                Ok((_, Ok(RunOutcome::Parked))) => stats.parked += 1,
                Ok((_, Ok(RunOutcome::Failed))) => stats.failed += 1,
                Ok((_, Ok(RunOutcome::Cancelled))) => stats.cancelled += 1,
                Ok((post_id, Err(e))) => {
                    // lease reclaim recovers the row if it was left claimed
                    tracing::error!(post_id, "publish run aborted on database error: {}", e);
                    stats.errored += 1;
                }
                Err(e) => {
                    tracing::error!("publish task panicked: {}", e);
                    stats.errored += 1;
                }
            }
        }
    }

    stats
}

/// How one claimed post's run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Published,
    /// Returned to pending; a later cycle resumes it
    Parked,
    Failed,
    Cancelled,
}

/// Pipeline phase, derived from the persisted row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelinePhase {
    CreateContainer,
    AwaitContainer { container_id: String },
    Publish { container_id: String },
}

pub fn phase_for(post: &ScheduledPost) -> PipelinePhase {
    match &post.media_container_id {
        None => PipelinePhase::CreateContainer,
        Some(container_id) => {
            let finished = post.media_container_status.as_deref()
                == Some(ContainerStatusCode::Finished.as_str());
            if finished {
                PipelinePhase::Publish {
                    container_id: container_id.clone(),
                }
            } else {
                PipelinePhase::AwaitContainer {
                    container_id: container_id.clone(),
                }
            }
        }
    }
}

/// What one step of the pipeline observed
#[derive(Debug)]
pub enum StepOutcome {
    ContainerCreated(String),
    /// Container still processing; the payload is the observed status code
    ContainerPending(String),
    ContainerReady,
    /// The platform reported the container itself as failed
    ContainerFailed(RawError),
    MediaPublished(String),
    /// A remote call failed (platform error envelope or transport)
    RequestFailed(RawError),
}

/// Next move for the post
#[derive(Debug)]
pub enum Transition {
    /// Persist the container id and move on to polling
    ContainerAccepted(String),
    /// Record the observed status and wait; does not touch the retry counter
    HoldForPoll(String),
    /// Container finished; move on to publishing
    ProceedToPublish,
    /// Attempt failed, retry the same phase after the delay
    Retry { verdict: ErrorVerdict, delay: Duration },
    /// Attempt failed for good
    Fail { verdict: ErrorVerdict },
    /// Terminal success
    Complete(String),
}

/// Pure transition function of the publish state machine.
///
/// `attempts` is the post's failure count including the failure being
/// handled; it is only consulted for failure outcomes.
pub fn transition(outcome: StepOutcome, attempts: i32, policy: &BackoffPolicy) -> Transition {
    match outcome {
        StepOutcome::ContainerCreated(container_id) => Transition::ContainerAccepted(container_id),
        StepOutcome::ContainerPending(status) => Transition::HoldForPoll(status),
        StepOutcome::ContainerReady => Transition::ProceedToPublish,
        StepOutcome::MediaPublished(media_id) => Transition::Complete(media_id),
        StepOutcome::ContainerFailed(raw) | StepOutcome::RequestFailed(raw) => {
            let verdict = classify_raw(&raw);
            match policy.decide(attempts, &verdict) {
                RetryDecision::GiveUp => Transition::Fail { verdict },
                RetryDecision::RetryAfter(delay) => Transition::Retry { verdict, delay },
            }
        }
    }
}

/// Outcome of persisting a failed attempt
enum SettledFailure {
    /// Short backoff, worth waiting out within this run
    RetryInline(Duration),
    Parked,
    Failed,
    Cancelled,
}

impl SettledFailure {
    fn into_run_outcome(self) -> RunOutcome {
        match self {
            // inline retries are handled by the caller; mapping them here
            // parks conservatively
            SettledFailure::RetryInline(_) | SettledFailure::Parked => RunOutcome::Parked,
            SettledFailure::Failed => RunOutcome::Failed,
            SettledFailure::Cancelled => RunOutcome::Cancelled,
        }
    }
}

/// Persist a failed attempt and let the state machine decide its fate
async fn settle_failure(
    ctx: &PublisherContext,
    post_id: i64,
    raw: RawError,
    container_error: bool,
) -> Result<SettledFailure, sqlx::Error> {
    let diagnostic = raw.to_string();

    if container_error {
        queries::record_container_status(&ctx.pool, post_id, ContainerStatusCode::Error.as_str())
            .await?;
    }

    let Some(attempts) = queries::record_failure(&ctx.pool, post_id, &diagnostic).await? else {
        return Ok(SettledFailure::Cancelled);
    };

    match transition(StepOutcome::RequestFailed(raw), attempts, &ctx.policy) {
        Transition::Fail { verdict } => {
            queries::mark_failed(&ctx.pool, post_id).await?;
            tracing::warn!(
                post_id,
                attempts,
                code = verdict.original_code,
                solution = verdict.solution,
                "post failed permanently: {} ({}) - {}",
                verdict.title,
                verdict.message,
                diagnostic
            );
            Ok(SettledFailure::Failed)
        }
        Transition::Retry { delay, .. } => {
            if delay <= Duration::from_secs(MAX_INLINE_RETRY_SECONDS) {
                tracing::warn!(
                    post_id,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, retrying in-run: {}",
                    diagnostic
                );
                Ok(SettledFailure::RetryInline(delay))
            } else {
                queries::park_post(&ctx.pool, post_id).await?;
                tracing::warn!(
                    post_id,
                    attempts,
                    delay_secs = delay.as_secs(),
                    "attempt failed, parked for retry: {}",
                    diagnostic
                );
                Ok(SettledFailure::Parked)
            }
        }
        // failure outcomes only ever produce Retry or Fail
        _ => {
            queries::park_post(&ctx.pool, post_id).await?;
            Ok(SettledFailure::Parked)
        }
    }
}

/// Drive one claimed post as far as it will go in this run
async fn run_claimed_post(
    ctx: &PublisherContext,
    mut post: ScheduledPost,
) -> Result<RunOutcome, sqlx::Error> {
    let creds = match users::get_publish_credentials(&ctx.pool, post.user_id).await? {
        Some(creds) => creds,
        None => {
            let raw = RawError {
                code: 190,
                subcode: None,
                message: format!("no Instagram account connected for user {}", post.user_id),
                user_title: None,
                user_message: None,
                fbtrace_id: None,
            };
            let settled = settle_failure(ctx, post.id, raw, false).await?;
            return Ok(settled.into_run_outcome());
        }
    };

    // Expired credential: fail without spending a remote call. Refresh is
    // out of band; until it happens every attempt would bounce with 190.
    if creds.token_expired() {
        let settled = settle_failure(ctx, post.id, RawError::token_expired(), false).await?;
        return Ok(settled.into_run_outcome());
    }

    let mut polls_remaining = IN_RUN_POLL_LIMIT;

    loop {
        if queries::is_cancelled(&ctx.pool, post.id).await? {
            tracing::info!(post_id = post.id, "post cancelled, discarding in-flight attempt");
            return Ok(RunOutcome::Cancelled);
        }

        let phase = phase_for(&post);
        let outcome = execute_phase(ctx, &creds, &post, phase).await;

        match outcome {
            StepOutcome::ContainerFailed(raw) => {
                match settle_failure(ctx, post.id, raw, true).await? {
                    SettledFailure::RetryInline(delay) => tokio::time::sleep(delay).await,
                    settled => return Ok(settled.into_run_outcome()),
                }
            }
            StepOutcome::RequestFailed(raw) => {
                match settle_failure(ctx, post.id, raw, false).await? {
                    SettledFailure::RetryInline(delay) => tokio::time::sleep(delay).await,
                    settled => return Ok(settled.into_run_outcome()),
                }
            }
            other => match transition(other, post.retry_attempts, &ctx.policy) {
                Transition::ContainerAccepted(container_id) => {
                    if !queries::set_container(&ctx.pool, post.id, &container_id).await? {
                        return Ok(RunOutcome::Cancelled);
                    }
                    tracing::info!(
                        post_id = post.id,
                        container_id = %container_id,
                        "media container created"
                    );
                    post.media_container_id = Some(container_id);
                }
                Transition::HoldForPoll(container_status) => {
                    if !queries::record_container_status(&ctx.pool, post.id, &container_status)
                        .await?
                    {
                        return Ok(RunOutcome::Cancelled);
                    }
                    post.media_container_status = Some(container_status);
                    if polls_remaining == 0 {
                        queries::park_post(&ctx.pool, post.id).await?;
                        return Ok(RunOutcome::Parked);
                    }
                    polls_remaining -= 1;
                    tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECONDS)).await;
                }
                Transition::ProceedToPublish => {
                    let finished = ContainerStatusCode::Finished.as_str();
                    if !queries::record_container_status(&ctx.pool, post.id, finished).await? {
                        return Ok(RunOutcome::Cancelled);
                    }
                    post.media_container_status = Some(finished.to_string());
                }
                Transition::Complete(media_id) => {
                    if !queries::mark_published(&ctx.pool, post.id).await? {
                        return Ok(RunOutcome::Cancelled);
                    }
                    tracing::info!(post_id = post.id, media_id = %media_id, "post published");
                    return Ok(RunOutcome::Published);
                }
                Transition::Retry { .. } | Transition::Fail { .. } => {
                    // failure outcomes never reach this match arm
                    queries::park_post(&ctx.pool, post.id).await?;
                    return Ok(RunOutcome::Parked);
                }
            },
        }
    }
}

/// Execute the remote call for the post's current phase
async fn execute_phase(
    ctx: &PublisherContext,
    creds: &users::PublishCredentials,
    post: &ScheduledPost,
    phase: PipelinePhase,
) -> StepOutcome {
    match phase {
        PipelinePhase::CreateContainer => {
            let request = match container_request_for(post) {
                Ok(request) => request,
                Err(raw) => return StepOutcome::RequestFailed(raw),
            };
            match ctx
                .instagram
                .create_container(&creds.access_token, &creds.ig_user_id, &request)
                .await
            {
                Ok(container_id) => StepOutcome::ContainerCreated(container_id),
                Err(raw) => StepOutcome::RequestFailed(raw),
            }
        }
        PipelinePhase::AwaitContainer { container_id } => {
            match ctx
                .instagram
                .container_status(&creds.access_token, &container_id)
                .await
            {
                Ok(status) => match status.status_code {
                    ContainerStatusCode::Finished => StepOutcome::ContainerReady,
                    ContainerStatusCode::Error => {
                        StepOutcome::ContainerFailed(RawError::media_processing(status.status))
                    }
                    // unknown statuses are treated as still-processing; the
                    // lease and attempt ceiling bound how long that can last
                    ContainerStatusCode::NotStarted
                    | ContainerStatusCode::InProgress
                    | ContainerStatusCode::Other => {
                        StepOutcome::ContainerPending(status.status_code.as_str().to_string())
                    }
                },
                Err(raw) => StepOutcome::RequestFailed(raw),
            }
        }
        PipelinePhase::Publish { container_id } => {
            match ctx
                .instagram
                .publish_container(&creds.access_token, &creds.ig_user_id, &container_id)
                .await
            {
                Ok(media_id) => StepOutcome::MediaPublished(media_id),
                Err(raw) => StepOutcome::RequestFailed(raw),
            }
        }
    }
}

/// Build the container request from the post record. An unparseable
/// carousel payload is a permanent content error, not a crash.
fn container_request_for(post: &ScheduledPost) -> Result<ContainerRequest, RawError> {
    let media = match post.media_type {
        MediaType::Image => MediaPayload::Image {
            url: post.media_url.clone(),
        },
        MediaType::Video => MediaPayload::Video {
            url: post.media_url.clone(),
        },
        MediaType::Carousel => {
            let items = post.carousel_items().ok_or_else(|| RawError {
                code: 100,
                subcode: None,
                message: "carousel payload is not a valid list of children".to_string(),
                user_title: None,
                user_message: None,
                fbtrace_id: None,
            })?;
            MediaPayload::Carousel {
                children: items
                    .into_iter()
                    .map(|item| CarouselChild {
                        url: item.media_url,
                        is_video: item.media_type == MediaType::Video,
                    })
                    .collect(),
            }
        }
    };

    Ok(ContainerRequest {
        media,
        caption: post.caption.clone(),
        location_id: post.location_id.clone(),
        user_tags: post.user_tags.clone(),
    })
}

fn publish_concurrency() -> usize {
    env::var("PUBLISH_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_CONCURRENCY)
}

fn publish_cron_seconds() -> u64 {
    env::var("PUBLISH_CRON_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0 && *v <= 59)
        .unwrap_or(DEFAULT_CRON_SECONDS)
}

fn publish_lease_seconds() -> i64 {
    env::var("PUBLISH_LEASE_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_LEASE_SECONDS)
}

fn publish_max_attempts() -> i32 {
    env::var("PUBLISH_MAX_ATTEMPTS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_ATTEMPTS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::posts::PostStatus;
    use crate::services::instagram_errors::ErrorCategory;
    use chrono::Utc;

    fn post() -> ScheduledPost {
        ScheduledPost {
            id: 7,
            user_id: 1,
            media_url: "https://cdn.example.com/a.jpg".to_string(),
            media_type: MediaType::Image,
            caption: "hello".to_string(),
            location_id: None,
            user_tags: None,
            scheduled_at: Utc::now(),
            status: PostStatus::Processing,
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

    fn platform_error(code: i64, subcode: Option<i64>) -> RawError {
        RawError {
            code,
            subcode,
            message: "boom".to_string(),
            user_title: None,
            user_message: None,
            fbtrace_id: None,
        }
    }

    #[test]
    fn phase_follows_the_persisted_row() {
        let mut p = post();
        assert_eq!(phase_for(&p), PipelinePhase::CreateContainer);

        p.media_container_id = Some("c1".to_string());
        assert_eq!(
            phase_for(&p),
            PipelinePhase::AwaitContainer {
                container_id: "c1".to_string()
            }
        );

        p.media_container_status = Some("IN_PROGRESS".to_string());
        assert_eq!(
            phase_for(&p),
            PipelinePhase::AwaitContainer {
                container_id: "c1".to_string()
            }
        );

        p.media_container_status = Some("FINISHED".to_string());
        assert_eq!(
            phase_for(&p),
            PipelinePhase::Publish {
                container_id: "c1".to_string()
            }
        );
    }

    #[test]
    fn created_container_advances_to_polling() {
        let policy = BackoffPolicy::default();
        match transition(StepOutcome::ContainerCreated("c9".to_string()), 0, &policy) {
            Transition::ContainerAccepted(id) => assert_eq!(id, "c9"),
            other => panic!("unexpected transition: {:?}", other),
        }
    }

    #[test]
    fn in_progress_poll_holds_without_consuming_attempts() {
        let policy = BackoffPolicy::default();
        // even at the attempt ceiling a pending poll is not a failure
        for attempts in [0, policy.max_attempts, policy.max_attempts + 3] {
            match transition(
                StepOutcome::ContainerPending("IN_PROGRESS".to_string()),
                attempts,
                &policy,
            ) {
                Transition::HoldForPoll(status) => assert_eq!(status, "IN_PROGRESS"),
                other => panic!("unexpected transition: {:?}", other),
            }
        }
    }

    #[test]
    fn finished_container_proceeds_to_publish() {
        let policy = BackoffPolicy::default();
        assert!(matches!(
            transition(StepOutcome::ContainerReady, 0, &policy),
            Transition::ProceedToPublish
        ));
    }

    #[test]
    fn published_media_completes() {
        let policy = BackoffPolicy::default();
        match transition(
            StepOutcome::MediaPublished("mid_1".to_string()),
            0,
            &policy,
        ) {
            Transition::Complete(id) => assert_eq!(id, "mid_1"),
            other => panic!("unexpected transition: {:?}", other),
        }
    }

    #[test]
    fn spam_block_fails_on_first_attempt() {
        let policy = BackoffPolicy::default();
        match transition(
            StepOutcome::RequestFailed(platform_error(4, Some(2_207_051))),
            1,
            &policy,
        ) {
            Transition::Fail { verdict } => {
                assert_eq!(verdict.category, ErrorCategory::PermanentPolicy);
            }
            other => panic!("unexpected transition: {:?}", other),
        }
    }

    #[test]
    fn platform_server_error_retries_until_the_ceiling() {
        let policy = BackoffPolicy::default();
        let mut last_delay = Duration::ZERO;

        for attempt in 1..policy.max_attempts {
            match transition(
                StepOutcome::RequestFailed(platform_error(-1, Some(2_207_001))),
                attempt,
                &policy,
            ) {
                Transition::Retry { verdict, delay } => {
                    assert!(verdict.is_transient);
                    // geometric growth dominates the +/-10% jitter
                    if attempt > 1 {
                        assert!(delay > last_delay);
                    }
                    last_delay = delay;
                }
                other => panic!("expected retry at attempt {}: {:?}", attempt, other),
            }
        }

        assert!(matches!(
            transition(
                StepOutcome::RequestFailed(platform_error(-1, Some(2_207_001))),
                policy.max_attempts,
                &policy,
            ),
            Transition::Fail { .. }
        ));
    }

    #[test]
    fn expired_token_fails_with_an_auth_verdict() {
        let policy = BackoffPolicy::default();
        match transition(
            StepOutcome::RequestFailed(RawError::token_expired()),
            1,
            &policy,
        ) {
            Transition::Fail { verdict } => {
                assert_eq!(verdict.category, ErrorCategory::Auth);
                assert_eq!(verdict.original_code, 190);
            }
            other => panic!("unexpected transition: {:?}", other),
        }
    }

    #[test]
    fn container_error_is_a_retriable_processing_failure() {
        let policy = BackoffPolicy::default();
        match transition(
            StepOutcome::ContainerFailed(RawError::media_processing(
                "ERROR: transcode failed".to_string(),
            )),
            1,
            &policy,
        ) {
            Transition::Retry { verdict, .. } => {
                assert_eq!(verdict.category, ErrorCategory::TransientPlatform);
                assert_eq!(verdict.original_subcode, Some(2_207_001));
            }
            other => panic!("unexpected transition: {:?}", other),
        }
    }

    #[test]
    fn carousel_request_maps_children() {
        let mut p = post();
        p.media_type = MediaType::Carousel;
        p.media_url = r#"[
            {"media_url": "https://cdn.example.com/a.jpg", "media_type": "image"},
            {"media_url": "https://cdn.example.com/b.mp4", "media_type": "video"}
        ]"#
        .to_string();

        let request = container_request_for(&p).unwrap();
        match request.media {
            MediaPayload::Carousel { children } => {
                assert_eq!(children.len(), 2);
                assert!(!children[0].is_video);
                assert!(children[1].is_video);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn broken_carousel_payload_is_a_permanent_content_error() {
        let mut p = post();
        p.media_type = MediaType::Carousel;
        p.media_url = "https://cdn.example.com/not-a-list.jpg".to_string();

        let raw = container_request_for(&p).unwrap_err();
        let verdict = classify_raw(&raw);
        assert_eq!(verdict.category, ErrorCategory::PermanentContent);
        assert!(!verdict.is_transient);
    }
}

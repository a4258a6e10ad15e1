//! Error classification for the Instagram publishing pipeline
//!
//! Maps the platform's `(code, error_subcode)` pairs to a normalized
//! [`ErrorVerdict`]. The platform reuses top-level codes across failure
//! families and disambiguates with subcodes, so lookup is two-tier: the
//! composite `(code, subcode)` key first, then the bare code, then a
//! generic transient verdict. Unknown codes default to transient rather
//! than permanent - the pipeline would rather burn its bounded retries
//! than silently drop a post over a code it has never seen.
//!
//! Verdicts are data, never exceptions: `classify` cannot fail. Retry
//! decisions read only [`ErrorCategory`]; the display strings ride along
//! for the UI and are never consulted for control flow.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::services::instagram::RawError;

/// Failure family, the only input to retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request never reached the platform (timeout, DNS, reset)
    TransientNetwork,
    /// Platform reported a temporary server/processing condition
    TransientPlatform,
    /// Request budget exhausted; retry with a longer delay
    RateLimit,
    /// Media/caption violates platform constraints; retrying cannot help
    PermanentContent,
    /// Spam block, policy block or publishing quota; no automatic retry
    PermanentPolicy,
    /// Credential invalid or expired; retry only after an out-of-band refresh
    Auth,
    /// Code not in the table
    Unknown,
}

impl ErrorCategory {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorCategory::TransientNetwork
                | ErrorCategory::TransientPlatform
                | ErrorCategory::RateLimit
                | ErrorCategory::Unknown
        )
    }
}

/// Normalized outcome of classifying one platform error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorVerdict {
    pub http_status: u16,
    pub category: ErrorCategory,
    pub is_transient: bool,
    pub title: &'static str,
    pub message: &'static str,
    pub solution: &'static str,
    pub original_code: i64,
    pub original_subcode: Option<i64>,
}

struct Rule {
    code: i64,
    subcode: Option<i64>,
    category: ErrorCategory,
    http_status: u16,
    display: DisplayText,
}

/// Human-readable explanation, separate from the control-flow fields
struct DisplayText {
    title: &'static str,
    message: &'static str,
    solution: &'static str,
}

const fn rule(
    code: i64,
    subcode: Option<i64>,
    category: ErrorCategory,
    http_status: u16,
    title: &'static str,
    message: &'static str,
    solution: &'static str,
) -> Rule {
    Rule {
        code,
        subcode,
        category,
        http_status,
        display: DisplayText {
            title,
            message,
            solution,
        },
    }
}

use ErrorCategory::*;

#[rustfmt::skip]
static RULES: &[Rule] = &[
    // Network / platform transients
    rule(-1, None, TransientNetwork, 503, "Network error",
        "Could not reach Instagram.",
        "Check connectivity; the post is retried automatically."),
    rule(-1, Some(2_207_001), TransientPlatform, 500, "Instagram server error",
        "Instagram hit a temporary problem while processing the media.",
        "No action needed; the post is retried automatically."),
    rule(-1, Some(2_207_003), TransientPlatform, 504, "Media processing timeout",
        "Instagram took too long to process the media.",
        "No action needed; the post is retried automatically."),
    rule(1, None, TransientPlatform, 500, "Unknown API error",
        "Instagram reported an unknown temporary error.",
        "No action needed; the post is retried automatically."),
    rule(2, None, TransientPlatform, 503, "Service unavailable",
        "Instagram is temporarily unavailable.",
        "No action needed; the post is retried automatically."),
    rule(9_007, Some(2_207_027), TransientPlatform, 500, "Media not ready",
        "The media is still being processed by Instagram.",
        "No action needed; publishing continues once processing finishes."),
    rule(36_003, Some(2_207_053), TransientPlatform, 500, "Upload error",
        "An unknown error occurred while Instagram ingested the media.",
        "No action needed; the post is retried automatically."),

    // Rate limits
    rule(4, None, RateLimit, 429, "App request limit reached",
        "The application hit Instagram's request limit.",
        "Publishing resumes automatically once the limit window passes."),
    rule(17, None, RateLimit, 429, "Account request limit reached",
        "This account hit Instagram's request limit.",
        "Publishing resumes automatically once the limit window passes."),
    rule(613, None, RateLimit, 429, "Rate limit exceeded",
        "Too many calls were made in a short period.",
        "Publishing resumes automatically with a longer delay."),
    rule(80_002, None, RateLimit, 429, "Too many posting calls",
        "Too many publishing calls were made for this Instagram account.",
        "Publishing resumes automatically with a longer delay."),

    // Policy blocks
    rule(4, Some(2_207_051), PermanentPolicy, 403, "Action blocked as spam",
        "Instagram restricted this action because it looks like automated spam.",
        "Slow down posting activity; if the block persists, publish from the Instagram app."),
    rule(368, None, PermanentPolicy, 403, "Account temporarily blocked",
        "Instagram temporarily blocked this account for a policy violation.",
        "Resolve the block in the Instagram app before scheduling more posts."),
    rule(9_007, Some(2_207_042), PermanentPolicy, 403, "Daily publishing limit reached",
        "This account reached the maximum number of API-published posts for 24 hours.",
        "Wait 24 hours before publishing more posts."),

    // Credential problems
    rule(190, None, Auth, 401, "Invalid access token",
        "The Instagram access token is invalid.",
        "Reconnect the Instagram account."),
    rule(190, Some(458), Auth, 401, "App disconnected",
        "The connected account removed this app's access.",
        "Reconnect the Instagram account."),
    rule(190, Some(460), Auth, 401, "Password changed",
        "The account password changed and the stored session is no longer valid.",
        "Reconnect the Instagram account."),
    rule(190, Some(463), Auth, 401, "Access token expired",
        "The Instagram access token has expired.",
        "Reconnect the Instagram account."),
    rule(190, Some(467), Auth, 401, "Access token invalidated",
        "The Instagram access token was invalidated.",
        "Reconnect the Instagram account."),
    rule(10, None, Auth, 403, "Permission not granted",
        "The connected account is missing a permission this request needs.",
        "Reconnect the Instagram account and grant publishing permissions."),
    rule(200, None, Auth, 403, "Permissions error",
        "Instagram rejected the request for missing permissions.",
        "Reconnect the Instagram account and grant publishing permissions."),

    // Content rejected by the platform
    rule(100, None, PermanentContent, 400, "Invalid request",
        "Instagram rejected a parameter of this post.",
        "Review the post's media, caption and tags, then reschedule."),
    rule(100, Some(2_207_004), PermanentContent, 400, "Media too large",
        "The media exceeds Instagram's size limits.",
        "Use a smaller file and reschedule the post."),
    rule(100, Some(2_207_009), PermanentContent, 400, "Unsupported aspect ratio",
        "The media's aspect ratio is outside the supported range.",
        "Crop the media to a supported aspect ratio and reschedule the post."),
    rule(100, Some(2_207_010), PermanentContent, 400, "Caption too long",
        "The caption exceeds Instagram's length limit.",
        "Shorten the caption and reschedule the post."),
    rule(352, Some(2_207_026), PermanentContent, 400, "Unsupported video format",
        "The video format is not supported.",
        "Re-encode the video as MP4 or MOV with H.264 and reschedule the post."),
    rule(9_004, Some(2_207_052), PermanentContent, 400, "Media could not be fetched",
        "Instagram could not download the media from its URL.",
        "Make sure the media URL is publicly reachable and reschedule the post."),
    rule(-1, Some(2_207_020), PermanentContent, 400, "Media expired",
        "The uploaded media expired before it could be published.",
        "Schedule the post again."),
];

static GENERIC: Rule = rule(
    0,
    None,
    Unknown,
    500,
    "Unexpected error",
    "Instagram returned an error this system does not recognize.",
    "The post is retried a limited number of times.",
);

static BY_KEY: LazyLock<HashMap<(i64, Option<i64>), &'static Rule>> = LazyLock::new(|| {
    RULES
        .iter()
        .map(|rule| ((rule.code, rule.subcode), rule))
        .collect()
});

/// Classify a platform error code into a normalized verdict. Pure and
/// total: unknown input yields the generic transient verdict.
pub fn classify(code: i64, subcode: Option<i64>) -> ErrorVerdict {
    let rule = subcode
        .and_then(|sub| BY_KEY.get(&(code, Some(sub))))
        .or_else(|| BY_KEY.get(&(code, None)))
        .copied()
        .unwrap_or(&GENERIC);

    ErrorVerdict {
        http_status: rule.http_status,
        category: rule.category,
        is_transient: rule.category.is_transient(),
        title: rule.display.title,
        message: rule.display.message,
        solution: rule.display.solution,
        original_code: code,
        original_subcode: subcode,
    }
}

/// Classify a protocol-level failure
pub fn classify_raw(err: &RawError) -> ErrorVerdict {
    classify(err.code, err.subcode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_is_deterministic() {
        for rule in RULES {
            let first = classify(rule.code, rule.subcode);
            let second = classify(rule.code, rule.subcode);
            assert_eq!(first, second);
            assert_eq!(first.is_transient, rule.category.is_transient());
        }
    }

    #[test]
    fn spam_block_is_permanent_policy() {
        let verdict = classify(4, Some(2_207_051));
        assert_eq!(verdict.category, ErrorCategory::PermanentPolicy);
        assert!(!verdict.is_transient);
        assert_eq!(verdict.http_status, 403);
    }

    #[test]
    fn bare_code_4_is_a_rate_limit() {
        let verdict = classify(4, None);
        assert_eq!(verdict.category, ErrorCategory::RateLimit);
        assert!(verdict.is_transient);
    }

    #[test]
    fn unknown_subcode_falls_back_to_bare_code() {
        let verdict = classify(190, Some(999_999));
        assert_eq!(verdict.category, ErrorCategory::Auth);
        assert_eq!(verdict.title, "Invalid access token");
        assert_eq!(verdict.original_subcode, Some(999_999));
    }

    #[test]
    fn code_without_bare_entry_is_generic_transient() {
        // 9007 only exists as composite keys, so the bare code is unknown
        let verdict = classify(9_007, None);
        assert_eq!(verdict.category, ErrorCategory::Unknown);
        assert!(verdict.is_transient);
    }

    #[test]
    fn unknown_code_is_generic_transient_never_permanent() {
        let verdict = classify(31_337, Some(42));
        assert_eq!(verdict.category, ErrorCategory::Unknown);
        assert!(verdict.is_transient);
        assert_eq!(verdict.http_status, 500);
        assert_eq!(verdict.original_code, 31_337);
    }

    #[test]
    fn network_code_is_transient_with_and_without_subcode() {
        assert_eq!(classify(-1, None).category, ErrorCategory::TransientNetwork);
        assert_eq!(
            classify(-1, Some(2_207_001)).category,
            ErrorCategory::TransientPlatform
        );
    }

    #[test]
    fn expired_token_subcode_is_auth() {
        let verdict = classify(190, Some(463));
        assert_eq!(verdict.category, ErrorCategory::Auth);
        assert_eq!(verdict.title, "Access token expired");
    }

    #[test]
    fn classify_raw_uses_code_and_subcode() {
        let raw = RawError::token_expired();
        let verdict = classify_raw(&raw);
        assert_eq!(verdict.category, ErrorCategory::Auth);
        assert_eq!(verdict.original_code, 190);
    }
}

//! Application constants

/// Default Graph API base URL (override with GRAPH_API_BASE_URL)
pub const GRAPH_API_BASE_URL: &str = "https://graph.facebook.com/v21.0";

/// Instagram caption length limit
pub const MAX_CAPTION_LENGTH: usize = 2_200;

/// Minimum number of children in a carousel post
pub const MIN_CAROUSEL_ITEMS: usize = 2;

/// Maximum number of children in a carousel post
pub const MAX_CAROUSEL_ITEMS: usize = 10;

/// Default page size for paginated list endpoints
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Maximum page size for paginated list endpoints
pub const MAX_PAGE_SIZE: i64 = 100;

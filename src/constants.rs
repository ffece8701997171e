//! Application constants

/// Default page size for paginated list endpoints
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Maximum page size for paginated list endpoints
pub const MAX_PAGE_SIZE: i64 = 100;

/// Dashboard summary cache lifetime in seconds
pub const DASHBOARD_CACHE_TTL_SECS: u64 = 60;

/// Search results cache lifetime in seconds
pub const SEARCH_CACHE_TTL_SECS: u64 = 30;

/// Maximum number of results a search returns
pub const MAX_SEARCH_RESULTS: i64 = 50;

/// Tokens expiring within this window are refreshed before use
pub const TOKEN_REFRESH_SKEW_SECS: i64 = 60;

/// OAuth states older than this are rejected at callback time
pub const OAUTH_STATE_MAX_AGE_MINUTES: i64 = 10;

/// Accepted clock drift for Stripe webhook signatures
pub const STRIPE_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Request body limit (webhooks and JSON bodies are small)
pub const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Per-request timeout
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

//! Mock infrastructure for testing external services
//!
//! - Upstream API on wiremock (JSON responses, errors, delays)
//! - Hand-driven SSE upstream (timed chunks, abort detection)
//! - Redis (real server when available, skipped otherwise)

pub mod redis;

pub use self::redis::*;
pub use self::sse::*;
pub use self::upstream::*;

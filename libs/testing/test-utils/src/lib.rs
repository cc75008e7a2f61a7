//! Shared test utilities
//!
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDatabase`: PostgreSQL container with a caller-provided schema (feature: "postgres")
//! - `unique_name`: collision-free keys for tests sharing one backend
//!
//! Container-backed tests need Docker and are marked `#[ignore]` by the crates
//! using them:
//!
//! ```rust,ignore
//! use test_utils::TestRedis;
//!
//! #[tokio::test]
//! #[ignore = "requires Docker"]
//! async fn my_redis_test() {
//!     let redis = TestRedis::new().await;
//!     let conn = redis.connection_manager().await;
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "postgres")]
pub use postgres::TestDatabase;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// `"{prefix}:{uuid}"`, unique per call.
pub fn unique_name(prefix: &str) -> String {
    format!("{}:{}", prefix, Uuid::new_v4().simple())
}

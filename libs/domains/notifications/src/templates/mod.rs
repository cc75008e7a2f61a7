//! Template storage and scoped resolution.
//!
//! Templates live in a per-service namespace. Lookups are exact and
//! case-sensitive inside one namespace, with no fallback to `"default"`.

mod entity;
mod memory;
mod postgres;
mod resolver;

pub use memory::InMemoryTemplateStore;
pub use postgres::PgTemplateStore;
pub use resolver::{CachedTemplateResolver, TemplateLookup, TemplateResolver};

use crate::error::NotificationResult;
use crate::models::Template;
use async_trait::async_trait;

/// Durable mapping `(service, name) -> content`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Exact lookup inside `service`.
    async fn get(&self, service: &str, name: &str) -> NotificationResult<Option<Template>>;

    /// Create or replace `name` inside `service`, creating the service record
    /// when it does not exist yet.
    async fn put(&self, service: &str, name: &str, content: &str) -> NotificationResult<Template>;
}

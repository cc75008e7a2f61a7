use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::TemplateStore;
use crate::error::NotificationResult;
use crate::models::Template;

/// Read-only `(name, service)` lookup used by the dispatch processor.
#[async_trait]
pub trait TemplateLookup: Send + Sync {
    async fn resolve(&self, name: &str, service: &str) -> NotificationResult<Option<Template>>;
}

/// Straight pass-through to a [`TemplateStore`].
#[derive(Clone)]
pub struct TemplateResolver {
    store: Arc<dyn TemplateStore>,
}

impl TemplateResolver {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store }
    }

    /// Wrap this resolver in a TTL cache.
    pub fn cached(self, ttl: Duration) -> CachedTemplateResolver {
        CachedTemplateResolver::new(self, ttl)
    }
}

#[async_trait]
impl TemplateLookup for TemplateResolver {
    async fn resolve(&self, name: &str, service: &str) -> NotificationResult<Option<Template>> {
        self.store.get(service, name).await
    }
}

/// Read-through cache over a [`TemplateResolver`].
///
/// Hits are served for `ttl` after they were loaded. Misses are never cached,
/// so a template stored after a failed lookup is visible on the next one.
pub struct CachedTemplateResolver {
    inner: TemplateResolver,
    ttl: Duration,
    entries: RwLock<HashMap<(String, String), (Template, Instant)>>,
}

impl CachedTemplateResolver {
    pub fn new(inner: TemplateResolver, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop every cached entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl TemplateLookup for CachedTemplateResolver {
    async fn resolve(&self, name: &str, service: &str) -> NotificationResult<Option<Template>> {
        let key = (service.to_string(), name.to_string());

        if let Some((template, loaded_at)) = self.entries.read().await.get(&key)
            && loaded_at.elapsed() < self.ttl
        {
            debug!(service, template = name, "Template cache hit");
            return Ok(Some(template.clone()));
        }

        let resolved = self.inner.resolve(name, service).await?;

        let mut entries = self.entries.write().await;
        match &resolved {
            Some(template) => {
                entries.insert(key, (template.clone(), Instant::now()));
            }
            None => {
                entries.remove(&key);
            }
        }

        Ok(resolved)
    }
}

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::TemplateStore;
use crate::error::NotificationResult;
use crate::models::{Service, Template};

#[derive(Default)]
struct Inner {
    services: HashMap<String, Service>,
    templates: HashMap<(String, String), Template>,
}

/// Process-local template store for tests and local development.
#[derive(Default)]
pub struct InMemoryTemplateStore {
    inner: RwLock<Inner>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn service(&self, name: &str) -> Option<Service> {
        self.inner.read().await.services.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.templates.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get(&self, service: &str, name: &str) -> NotificationResult<Option<Template>> {
        let inner = self.inner.read().await;
        Ok(inner
            .templates
            .get(&(service.to_string(), name.to_string()))
            .cloned())
    }

    async fn put(&self, service: &str, name: &str, content: &str) -> NotificationResult<Template> {
        let mut inner = self.inner.write().await;

        inner
            .services
            .entry(service.to_string())
            .or_insert_with(|| Service {
                id: Uuid::now_v7(),
                name: service.to_string(),
                api_key: None,
            });

        let template = inner
            .templates
            .entry((service.to_string(), name.to_string()))
            .and_modify(|t| t.content = content.to_string())
            .or_insert_with(|| Template {
                id: Uuid::now_v7(),
                name: name.to_string(),
                content: content.to_string(),
                service: service.to_string(),
            })
            .clone();

        tracing::debug!(service, template = name, "Stored template");
        Ok(template)
    }
}

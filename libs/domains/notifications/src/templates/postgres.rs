use async_trait::async_trait;
use core_config::database::DatabaseConfig;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    JoinType, QueryFilter, QuerySelect, RelationTrait, TransactionTrait,
};
use std::time::Duration;
use uuid::Uuid;

use super::TemplateStore;
use super::entity::{service, template};
use crate::error::NotificationResult;
use crate::models::{Service, Template};

/// Template store backed by the `services` and `templates` tables.
///
/// The schema is owned by the deployment; this store only reads and upserts rows.
#[derive(Clone)]
pub struct PgTemplateStore {
    db: DatabaseConnection,
}

impl PgTemplateStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Open a pooled connection sized by `config`.
    ///
    /// ```ignore
    /// let store = PgTemplateStore::connect(&DatabaseConfig::from_env()?).await?;
    /// ```
    pub async fn connect(config: &DatabaseConfig) -> NotificationResult<Self> {
        let mut options = ConnectOptions::new(config.url.clone());
        options
            .max_connections(config.max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(8))
            .acquire_timeout(Duration::from_secs(8))
            .idle_timeout(Duration::from_secs(300))
            .sqlx_logging(false);

        let db = Database::connect(options).await?;
        tracing::info!(max_connections = config.max_connections, "Connected to template database");
        Ok(Self::new(db))
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Look up a service by name.
    pub async fn find_service(&self, name: &str) -> NotificationResult<Option<Service>> {
        let model = service::Entity::find()
            .filter(service::Column::Name.eq(name))
            .one(&self.db)
            .await?;
        Ok(model.map(Into::into))
    }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn get(&self, service_name: &str, name: &str) -> NotificationResult<Option<Template>> {
        let model = template::Entity::find()
            .join(JoinType::InnerJoin, template::Relation::Service.def())
            .filter(template::Column::Name.eq(name))
            .filter(service::Column::Name.eq(service_name))
            .one(&self.db)
            .await?;

        Ok(model.map(|m| m.into_template(service_name)))
    }

    async fn put(&self, service_name: &str, name: &str, content: &str) -> NotificationResult<Template> {
        let txn = self.db.begin().await?;

        let owner = match service::Entity::find()
            .filter(service::Column::Name.eq(service_name))
            .one(&txn)
            .await?
        {
            Some(existing) => existing,
            None => {
                let created = service::ActiveModel {
                    id: Set(Uuid::now_v7()),
                    name: Set(service_name.to_string()),
                    api_key: Set(None),
                }
                .insert(&txn)
                .await?;
                tracing::info!(service = service_name, service_id = %created.id, "Created service");
                created
            }
        };

        let existing = template::Entity::find()
            .filter(template::Column::ServiceId.eq(owner.id))
            .filter(template::Column::Name.eq(name))
            .one(&txn)
            .await?;

        let stored = match existing {
            Some(model) => {
                let mut active: template::ActiveModel = model.into();
                active.content = Set(content.to_string());
                active.update(&txn).await?
            }
            None => {
                template::ActiveModel {
                    id: Set(Uuid::now_v7()),
                    name: Set(name.to_string()),
                    content: Set(content.to_string()),
                    service_id: Set(owner.id),
                }
                .insert(&txn)
                .await?
            }
        };

        txn.commit().await?;

        tracing::info!(service = service_name, template = name, template_id = %stored.id, "Stored template");
        Ok(stored.into_template(service_name))
    }
}

//! Sea-ORM entities for the `services` and `templates` tables.

pub mod service {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "services")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub name: String,
        pub api_key: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::template::Entity")]
        Template,
    }

    impl Related<super::template::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Template.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for crate::models::Service {
        fn from(model: Model) -> Self {
            Self {
                id: model.id,
                name: model.name,
                api_key: model.api_key,
            }
        }
    }
}

pub mod template {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "templates")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub name: String,
        #[sea_orm(column_type = "Text")]
        pub content: String,
        pub service_id: Uuid,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::service::Entity",
            from = "Column::ServiceId",
            to = "super::service::Column::Id"
        )]
        Service,
    }

    impl Related<super::service::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Service.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}

    impl Model {
        /// Domain view, labelled with the owning service's name.
        pub fn into_template(self, service: &str) -> crate::models::Template {
            crate::models::Template {
                id: self.id,
                name: self.name,
                content: self.content,
                service: service.to_string(),
            }
        }
    }
}

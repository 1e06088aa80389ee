use std::sync::Arc;

use sqlx::sqlite::SqliteJournalMode;

use crate::catalog::{data_engine::DataEngine, schema_engine::SchemaEngine};
use crate::repository::{interface::Repository, sqlite::SqliteRepository};

#[cfg(feature = "catalog-postgres")]
use crate::repository::postgres::PostgresRepository;

use super::schema::{self, TablesmithConfig};

/// Everything a frontend needs: the loaded config plus the two engines
/// sharing one repository.
#[derive(Clone)]
pub struct AppContext {
    pub config: TablesmithConfig,
    pub schema: SchemaEngine,
    pub data: DataEngine,
}

async fn build_repository(config: &TablesmithConfig) -> Arc<dyn Repository> {
    match &config.catalog {
        #[cfg(feature = "catalog-postgres")]
        schema::Catalog::Postgres(schema::Postgres { dsn, schema }) => Arc::new(
            PostgresRepository::try_new(dsn.to_string(), schema.to_string())
                .await
                .expect("Error setting up the database"),
        ),
        schema::Catalog::Sqlite(schema::Sqlite { dsn }) => Arc::new(
            SqliteRepository::try_new(dsn.to_string(), SqliteJournalMode::Wal)
                .await
                .expect("Error setting up the database"),
        ),
    }
}

pub async fn build_context(config: TablesmithConfig) -> AppContext {
    let repository = build_repository(&config).await;
    let schema = SchemaEngine::new(repository.clone());
    let data = DataEngine::new(repository, schema.clone());

    AppContext {
        config,
        schema,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema_engine::CollectionDraft;
    use crate::config::schema::load_config_from_string;

    #[tokio::test]
    async fn test_config_to_context() {
        let config = load_config_from_string(
            r#"
[catalog]
type = "sqlite"
dsn = "sqlite::memory:"
"#,
        )
        .unwrap();

        let context = build_context(config).await;

        // Run an operation against the context to test it works
        let collection = context
            .schema
            .create_collection(&CollectionDraft {
                name: "notes".to_string(),
                id_generation: Default::default(),
            })
            .await
            .unwrap();
        assert_eq!(
            context.schema.list_collections().await.unwrap(),
            vec![collection]
        );
    }
}

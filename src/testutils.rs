use std::sync::Arc;

use sqlx::sqlite::SqliteJournalMode;

use crate::catalog::{data_engine::DataEngine, schema_engine::SchemaEngine};
use crate::config::context::AppContext;
use crate::config::schema::load_config_from_string;
use crate::repository::sqlite::SqliteRepository;

const TEST_CONFIG: &str = r#"
[catalog]
type = "sqlite"
dsn = "sqlite::memory:"
"#;

pub async fn in_memory_engines() -> (SchemaEngine, DataEngine) {
    let repository = Arc::new(
        SqliteRepository::try_new("sqlite::memory:".to_string(), SqliteJournalMode::Wal)
            .await
            .unwrap(),
    );
    let schema = SchemaEngine::new(repository.clone());
    let data = DataEngine::new(repository, schema.clone());
    (schema, data)
}

pub async fn in_memory_context() -> AppContext {
    let config = load_config_from_string(TEST_CONFIG).unwrap();
    crate::config::context::build_context(config).await
}

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{
    migrate::{MigrateDatabase, Migrator},
    postgres::{PgPoolOptions, PgRow},
    Executor, PgPool, Postgres, QueryBuilder, Row,
};
use uuid::Uuid;

use crate::{
    data_types::{CollectionId, FieldId},
    schema::{
        quote_ident, FieldType, IdGeneration, Item, ItemId, ScalarValue,
    },
};

use crate::implement_repository;

use super::{
    default::{add_column_ddl, foreign_key_ddl, unique_index_ddl, SqlDialect},
    interface::{
        CollectionRecord, Error, FieldEnumValueRow, FieldRecord, FieldSpec,
        ForeignKeySpec, RelationKeyRow, RelationRecord, RelationSpec, Repository,
        Result,
    },
};

#[derive(Debug)]
pub struct PostgresRepository {
    pub executor: PgPool,
    pub schema_name: String,
}

impl PostgresRepository {
    pub const MIGRATOR: Migrator = sqlx::migrate!("migrations/postgres");
    pub const DIALECT: SqlDialect = SqlDialect {
        text_type: "TEXT",
        bigint_type: "BIGINT",
        boolean_type: "BOOLEAN",
        uuid_type: "UUID",
        date_type: "DATE",
        timestamp_type: "TIMESTAMPTZ",
        sequence_pk_column: "id BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY",
        uuid_pk_column: "id UUID PRIMARY KEY DEFAULT gen_random_uuid()",
        supports_add_foreign_key: true,
        not_null_on_add_column: true,
    };

    pub async fn try_new(
        dsn: String,
        schema_name: String,
    ) -> std::result::Result<Self, sqlx::Error> {
        if !Postgres::database_exists(&dsn).await? {
            let _ = Postgres::create_database(&dsn).await;
        }

        let repo = PostgresRepository::connect(dsn, schema_name.clone()).await?;

        repo.executor
            .execute(format!("CREATE SCHEMA IF NOT EXISTS {schema_name};").as_str())
            .await?;

        // Setup the schema
        repo.setup().await;
        Ok(repo)
    }

    pub async fn connect(
        dsn: String,
        schema_name: String,
    ) -> std::result::Result<Self, sqlx::Error> {
        let schema_name_2 = schema_name.clone();

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(16)
            .idle_timeout(Duration::from_millis(30000))
            .test_before_acquire(true)
            .after_connect(move |c, _m| {
                let schema_name = schema_name.to_owned();
                Box::pin(async move {
                    let query = format!("SET search_path TO {schema_name},public;");
                    c.execute(sqlx::query(&query)).await?;
                    Ok(())
                })
            })
            .connect(&dsn)
            .await?;

        Ok(Self {
            executor: pool,
            schema_name: schema_name_2,
        })
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.postgresql.org/docs/current/errcodes-appendix.html
            if let Some(code) = d.code() {
                if code == "23505" {
                    return Error::UniqueConstraintViolation(error);
                } else if code == "23503" {
                    return Error::FKConstraintViolation(error);
                }
            }
        }
        Error::SqlxError(error)
    }

    fn push_scalar(builder: &mut QueryBuilder<'_, Postgres>, value: &ScalarValue) {
        match value {
            ScalarValue::Text(v) => builder.push_bind(v.clone()),
            ScalarValue::Integer(v) => builder.push_bind(*v),
            ScalarValue::Boolean(v) => builder.push_bind(*v),
            ScalarValue::Uuid(v) => builder.push_bind(*v),
            ScalarValue::Date(v) => builder.push_bind(*v),
            ScalarValue::Timestamp(v) => builder.push_bind(*v),
        };
    }

    fn push_item_id(builder: &mut QueryBuilder<'_, Postgres>, id: &ItemId) {
        match id {
            ItemId::Sequence(v) => builder.push_bind(*v),
            ItemId::Uuid(v) => builder.push_bind(*v),
        };
    }

    fn read_item_id(
        row: &PgRow,
        id_generation: IdGeneration,
    ) -> std::result::Result<ItemId, sqlx::Error> {
        match id_generation {
            IdGeneration::Sequence => Ok(ItemId::Sequence(row.try_get("id")?)),
            IdGeneration::Uuid => Ok(ItemId::Uuid(row.try_get::<Uuid, _>("id")?)),
        }
    }

    fn read_scalar(
        row: &PgRow,
        column: &str,
        field_type: FieldType,
    ) -> std::result::Result<Option<ScalarValue>, sqlx::Error> {
        Ok(match field_type {
            FieldType::Text => row
                .try_get::<Option<String>, _>(column)?
                .map(ScalarValue::Text),
            FieldType::Integer => row
                .try_get::<Option<i64>, _>(column)?
                .map(ScalarValue::Integer),
            FieldType::Boolean => row
                .try_get::<Option<bool>, _>(column)?
                .map(ScalarValue::Boolean),
            FieldType::Uuid => row
                .try_get::<Option<Uuid>, _>(column)?
                .map(ScalarValue::Uuid),
            FieldType::Date => row
                .try_get::<Option<chrono::NaiveDate>, _>(column)?
                .map(ScalarValue::Date),
            FieldType::Timestamp => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(column)?
                .map(ScalarValue::Timestamp),
        })
    }

    fn read_row(
        row: &PgRow,
        id_generation: IdGeneration,
        columns: &[(String, FieldType)],
    ) -> std::result::Result<Item, sqlx::Error> {
        let mut item = Item::with_capacity(columns.len() + 1);
        item.push(
            "id",
            Some(Self::read_item_id(row, id_generation)?.to_scalar()),
        );
        for (name, field_type) in columns {
            item.push(name.clone(), Self::read_scalar(row, name, *field_type)?);
        }
        Ok(item)
    }
}

implement_repository!(PostgresRepository);

pub mod testutils {
    use rand::Rng;

    use super::PostgresRepository;

    pub fn get_random_schema() -> String {
        // Generate a random schema (taken from IOx)
        let mut rng = rand::thread_rng();
        (&mut rng)
            .sample_iter(rand::distributions::Alphanumeric)
            .filter(|c| c.is_ascii_alphabetic())
            .take(20)
            .map(char::from)
            .collect::<String>()
    }

    pub async fn make_repository(dsn: &str) -> PostgresRepository {
        let schema_name = get_random_schema();

        PostgresRepository::try_new(dsn.to_string(), schema_name)
            .await
            .expect("Error setting up the database")
    }
}

#[cfg(test)]
mod tests {
    use std::{env, sync::Arc};

    use super::super::interface::tests::run_generic_repository_tests;
    use super::testutils::make_repository;

    #[tokio::test]
    async fn test_postgres_repository() {
        // Requires a live server, so only runs when a DSN is provided
        let Ok(dsn) = env::var("DATABASE_URL") else {
            return;
        };
        let repository = Arc::new(make_repository(&dsn).await);

        run_generic_repository_tests(repository).await;
    }
}

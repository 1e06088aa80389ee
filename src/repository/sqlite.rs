use std::{fmt::Debug, str::FromStr};

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, QueryBuilder, Row, Sqlite,
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
pub struct SqliteRepository {
    pub executor: Pool<Sqlite>,
}

impl SqliteRepository {
    pub const MIGRATOR: Migrator = sqlx::migrate!("migrations/sqlite");
    pub const DIALECT: SqlDialect = SqlDialect {
        text_type: "TEXT",
        bigint_type: "BIGINT",
        boolean_type: "BOOLEAN",
        // UUIDs, dates and timestamps are stored as canonical text; SQLite
        // has no native types for them and text keeps equality comparisons
        // deterministic
        uuid_type: "TEXT",
        date_type: "TEXT",
        timestamp_type: "TEXT",
        sequence_pk_column: "id INTEGER PRIMARY KEY AUTOINCREMENT",
        // Version-4 UUID built out of randomblob(); SQLite has no uuid function
        uuid_pk_column: "id TEXT PRIMARY KEY DEFAULT (lower(\
            hex(randomblob(4)) || '-' || hex(randomblob(2)) || '-4' || \
            substr(hex(randomblob(2)), 2) || '-' || \
            substr('89ab', abs(random()) % 4 + 1, 1) || \
            substr(hex(randomblob(2)), 2) || '-' || hex(randomblob(6))))",
        supports_add_foreign_key: false,
        not_null_on_add_column: false,
    };

    pub async fn try_new(
        dsn: String,
        journal_mode: SqliteJournalMode,
    ) -> std::result::Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&dsn)?
            .create_if_missing(true)
            .journal_mode(journal_mode);

        // Every connection to an in-memory DSN gets its own database, so
        // those pools are pinned to a single connection
        let mut pool_options = SqlitePoolOptions::new();
        if dsn.contains(":memory:") {
            pool_options = pool_options.max_connections(1);
        }

        let pool = pool_options.connect_with(options).await?;
        let repo = Self { executor: pool };
        repo.setup().await;
        Ok(repo)
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.sqlite.org/rescode.html
            let message = d.message();

            // For some reason, sqlx doesn't return the proper errcode for FK violations,
            // even though it's calling sqlite3_extended_errcode which is meant to return full codes.
            // Unique constraint violations do return the correct code though.
            if message.contains("FOREIGN KEY constraint failed") {
                return Error::FKConstraintViolation(error);
            }
            if message.contains("UNIQUE constraint failed") {
                return Error::UniqueConstraintViolation(error);
            }
        }
        Error::SqlxError(error)
    }

    fn push_scalar(builder: &mut QueryBuilder<'_, Sqlite>, value: &ScalarValue) {
        match value {
            ScalarValue::Text(v) => builder.push_bind(v.clone()),
            ScalarValue::Integer(v) => builder.push_bind(*v),
            ScalarValue::Boolean(v) => builder.push_bind(*v),
            // Stored as text, see DIALECT
            other => builder.push_bind(other.canonical_string()),
        };
    }

    fn push_item_id(builder: &mut QueryBuilder<'_, Sqlite>, id: &ItemId) {
        match id {
            ItemId::Sequence(v) => builder.push_bind(*v),
            ItemId::Uuid(v) => builder.push_bind(v.to_string()),
        };
    }

    fn read_item_id(
        row: &SqliteRow,
        id_generation: IdGeneration,
    ) -> std::result::Result<ItemId, sqlx::Error> {
        match id_generation {
            IdGeneration::Sequence => Ok(ItemId::Sequence(row.try_get("id")?)),
            IdGeneration::Uuid => {
                let raw: String = row.try_get("id")?;
                let uuid = Uuid::from_str(&raw)
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
                Ok(ItemId::Uuid(uuid))
            }
        }
    }

    fn read_scalar(
        row: &SqliteRow,
        column: &str,
        field_type: FieldType,
    ) -> std::result::Result<Option<ScalarValue>, sqlx::Error> {
        Ok(match field_type {
            FieldType::Integer => row
                .try_get::<Option<i64>, _>(column)?
                .map(ScalarValue::Integer),
            FieldType::Boolean => row
                .try_get::<Option<bool>, _>(column)?
                .map(ScalarValue::Boolean),
            _ => match row.try_get::<Option<String>, _>(column)? {
                Some(raw) => Some(
                    ScalarValue::parse_literal(field_type, &raw)
                        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                ),
                None => None,
            },
        })
    }

    fn read_row(
        row: &SqliteRow,
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

implement_repository!(SqliteRepository);

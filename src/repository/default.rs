/// Default implementation for a Repository that factors out common
/// query patterns / SQL queries between Postgres and SQLite.
///
/// Usage:
///
/// The struct has to have certain fields, since this macro relies on them:
///
/// ```ignore
/// pub struct MyRepository {
///     pub executor: sqlx::Pool<sqlx::SqlxDatabaseType>
/// }
///
/// impl MyRepository {
///     pub const MIGRATOR: sqlx::Migrator = sqlx::migrate!("my/migrations");
///     pub const DIALECT: SqlDialect = SqlDialect { ... };
///     pub fn interpret_error(error: sqlx::Error) -> Error {
///         // Interpret the database-specific error code and turn some sqlx errors
///         // into the Error enum values like UniqueConstraintViolation/FKConstraintViolation
///         // ...
///     }
///     // plus push_scalar / push_item_id / read_item_id / read_row helpers
///     // that bind and decode values using the backend's native types
/// }
///
/// implement_repository!(SqliteRepository)
/// ```
///
/// Gigajank alert: why are we doing this? The code between PG and SQLite is extremely similar.
/// But, I couldn't find a better way to factor it out in order to reduce duplication.
/// Here's what I tried:
///
///   - Use a generic `Pool<Any>`. This causes a weird borrow checker error when using a
///     `QueryBuilder` (https://github.com/launchbadge/sqlx/issues/1978)
///   - Make the implementation generic over any DB (that implements sqlx::Database). In that
///     case, we need to add a bunch of `where` clauses to the implementation giving constraints
///     on the argument, the query and the result types (see https://stackoverflow.com/a/70573732).
///     And, when we do that, we hit the borrow checker error again from #1.
///   - Add macros with default implementations for everything in the Repository trait and use them
///     instead of putting the whole implementation in a macro. This conflicts with the #[async_trait]
///     macro and breaks it (see https://stackoverflow.com/q/68573578).
///
/// In any case, this means we have to remove compile-time query checking (even if we duplicate the code
/// completely), see https://github.com/launchbadge/sqlx/issues/121 and
/// https://github.com/launchbadge/sqlx/issues/916.
use crate::repository::interface::{FieldSpec, ForeignKeySpec};
use crate::schema::{quote_ident, quote_literal, FieldType, IdGeneration};

/// Physical SQL vocabulary that differs between SQLite and PG.
pub struct SqlDialect {
    pub text_type: &'static str,
    pub bigint_type: &'static str,
    pub boolean_type: &'static str,
    pub uuid_type: &'static str,
    pub date_type: &'static str,
    pub timestamp_type: &'static str,
    pub sequence_pk_column: &'static str,
    pub uuid_pk_column: &'static str,
    /// SQLite can't ALTER TABLE ... ADD CONSTRAINT, so to-one relations stay
    /// metadata-only there.
    pub supports_add_foreign_key: bool,
    /// SQLite refuses ADD COLUMN ... NOT NULL without a default; payload
    /// validation is the authoritative nullability check anyway.
    pub not_null_on_add_column: bool,
}

impl SqlDialect {
    pub fn column_type(&self, field_type: FieldType) -> &'static str {
        match field_type {
            FieldType::Text => self.text_type,
            FieldType::Integer => self.bigint_type,
            FieldType::Boolean => self.boolean_type,
            FieldType::Uuid => self.uuid_type,
            FieldType::Date => self.date_type,
            FieldType::Timestamp => self.timestamp_type,
        }
    }

    pub fn pk_column(&self, id_generation: IdGeneration) -> &'static str {
        match id_generation {
            IdGeneration::Sequence => self.sequence_pk_column,
            IdGeneration::Uuid => self.uuid_pk_column,
        }
    }
}

/// ALTER TABLE statement adding one field's column, with its default and
/// (when the field is enum-constrained) a named CHECK constraint.
pub fn add_column_ddl(table: &str, field: &FieldSpec, dialect: &SqlDialect) -> String {
    let mut ddl = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table),
        quote_ident(&field.name),
        dialect.column_type(field.r#type)
    );

    if !field.nullable && dialect.not_null_on_add_column {
        ddl.push_str(" NOT NULL");
    }

    if let Some(default) = &field.default {
        ddl.push_str(&format!(" DEFAULT {}", default.to_sql_literal()));
    }

    if !field.enum_values.is_empty() {
        // Integer/boolean enum members go in raw, everything else as a
        // quoted literal (values are pre-validated by the schema engine)
        let members = field
            .enum_values
            .iter()
            .map(|value| match field.r#type {
                FieldType::Integer | FieldType::Boolean => value.clone(),
                _ => quote_literal(value),
            })
            .collect::<Vec<_>>()
            .join(", ");

        ddl.push_str(&format!(
            " CONSTRAINT {} CHECK ({} IN ({}))",
            quote_ident(&format!("chk_{}_{}_enum", table, field.name)),
            quote_ident(&field.name),
            members
        ));
    }

    ddl
}

/// Exclusivity is enforced through a unique index rather than a column
/// constraint, since SQLite disallows UNIQUE on ADD COLUMN.
pub fn unique_index_ddl(table: &str, column: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX {} ON {} ({})",
        quote_ident(&format!("uq_{table}_{column}")),
        quote_ident(table),
        quote_ident(column)
    )
}

pub fn foreign_key_ddl(foreign_key: &ForeignKeySpec, relation_id: i64) -> String {
    let columns = |names: &[String]| {
        names
            .iter()
            .map(|name| quote_ident(name))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_ident(&foreign_key.source_table),
        quote_ident(&format!("fk_{}_{}", foreign_key.source_table, relation_id)),
        columns(&foreign_key.source_columns),
        quote_ident(&foreign_key.target_table),
        columns(&foreign_key.target_columns)
    )
}

#[macro_export]
macro_rules! implement_repository {
    ($repo: ident) => {
#[async_trait]
impl Repository for $repo {
    async fn setup(&self) {
        $repo::MIGRATOR
            .run(&self.executor)
            .await
            .expect("error running migrations");
    }

    async fn create_collection(
        &self,
        name: &str,
        id_generation: IdGeneration,
    ) -> Result<CollectionRecord, Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        let collection: CollectionRecord = sqlx::query_as(
            r#"INSERT INTO collection (name, id_generation) VALUES ($1, $2)
            RETURNING id, name, id_generation, created_at"#,
        )
        .bind(name)
        .bind(id_generation.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        let ddl = format!(
            "CREATE TABLE {} ({})",
            quote_ident(name),
            $repo::DIALECT.pk_column(id_generation)
        );
        sqlx::query(&ddl)
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(collection)
    }

    async fn list_collections(&self) -> Result<Vec<CollectionRecord>, Error> {
        let collections = sqlx::query_as(
            "SELECT id, name, id_generation, created_at FROM collection ORDER BY id",
        )
        .fetch(&self.executor)
        .try_collect()
        .await
        .map_err($repo::interpret_error)?;

        Ok(collections)
    }

    async fn get_collection(
        &self,
        collection_id: CollectionId,
    ) -> Result<CollectionRecord, Error> {
        let collection = sqlx::query_as(
            "SELECT id, name, id_generation, created_at FROM collection WHERE id = $1",
        )
        .bind(collection_id)
        .fetch_one(&self.executor)
        .await
        .map_err($repo::interpret_error)?;

        Ok(collection)
    }

    async fn add_field(
        &self,
        collection: &CollectionRecord,
        field: &FieldSpec,
    ) -> Result<FieldRecord, Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        let mut record: FieldRecord = sqlx::query_as(
            r#"INSERT INTO field (collection_id, name, type, nullable, is_unique, default_value)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, collection_id, name, type, nullable, is_unique, default_value, created_at"#,
        )
        .bind(collection.id)
        .bind(field.name.clone())
        .bind(field.r#type.to_string())
        .bind(field.nullable)
        .bind(field.unique)
        .bind(field.default.as_ref().map(|v| v.canonical_string()))
        .fetch_one(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        for (ordinal, value) in field.enum_values.iter().enumerate() {
            sqlx::query(
                "INSERT INTO field_enum_value (field_id, ordinal, value) VALUES ($1, $2, $3)",
            )
            .bind(record.id)
            .bind(ordinal as i64)
            .bind(value.clone())
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;
        }

        let ddl = add_column_ddl(&collection.name, field, &$repo::DIALECT);
        sqlx::query(&ddl)
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;

        if field.unique {
            let ddl = unique_index_ddl(&collection.name, &field.name);
            sqlx::query(&ddl)
                .execute(&mut *tx)
                .await
                .map_err($repo::interpret_error)?;
        }

        tx.commit().await.map_err($repo::interpret_error)?;

        record.enum_values = field.enum_values.clone();
        Ok(record)
    }

    async fn get_fields(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<FieldRecord>, Error> {
        // Declaration order is catalog insertion order
        let mut fields: Vec<FieldRecord> = sqlx::query_as(
            r#"SELECT id, collection_id, name, type, nullable, is_unique, default_value, created_at
            FROM field WHERE collection_id = $1 ORDER BY id"#,
        )
        .bind(collection_id)
        .fetch(&self.executor)
        .try_collect()
        .await
        .map_err($repo::interpret_error)?;

        let enum_values: Vec<FieldEnumValueRow> = sqlx::query_as(
            r#"SELECT field_enum_value.field_id, field_enum_value.value
            FROM field_enum_value
            JOIN field ON field_enum_value.field_id = field.id
            WHERE field.collection_id = $1
            ORDER BY field_enum_value.field_id, field_enum_value.ordinal"#,
        )
        .bind(collection_id)
        .fetch(&self.executor)
        .try_collect()
        .await
        .map_err($repo::interpret_error)?;

        for row in enum_values {
            if let Some(field) = fields.iter_mut().find(|f| f.id == row.field_id) {
                field.enum_values.push(row.value);
            }
        }

        Ok(fields)
    }

    async fn get_field(&self, field_id: FieldId) -> Result<FieldRecord, Error> {
        let mut field: FieldRecord = sqlx::query_as(
            r#"SELECT id, collection_id, name, type, nullable, is_unique, default_value, created_at
            FROM field WHERE id = $1"#,
        )
        .bind(field_id)
        .fetch_one(&self.executor)
        .await
        .map_err($repo::interpret_error)?;

        let enum_values: Vec<FieldEnumValueRow> = sqlx::query_as(
            "SELECT field_id, value FROM field_enum_value WHERE field_id = $1 ORDER BY ordinal",
        )
        .bind(field_id)
        .fetch(&self.executor)
        .try_collect()
        .await
        .map_err($repo::interpret_error)?;

        field.enum_values = enum_values.into_iter().map(|row| row.value).collect();
        Ok(field)
    }

    async fn add_relation(
        &self,
        relation: &RelationSpec,
        foreign_key: Option<&ForeignKeySpec>,
    ) -> Result<RelationRecord, Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        let mut record: RelationRecord = sqlx::query_as(
            r#"INSERT INTO relation (source_collection_id, target_collection_id, type)
            VALUES ($1, $2, $3)
            RETURNING id, source_collection_id, target_collection_id, type, created_at"#,
        )
        .bind(relation.source_collection_id)
        .bind(relation.target_collection_id)
        .bind(relation.r#type.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        for (ordinal, (source_field_id, target_field_id)) in
            relation.key_pairs.iter().enumerate()
        {
            sqlx::query(
                r#"INSERT INTO relation_key (relation_id, ordinal, source_field_id, target_field_id)
                VALUES ($1, $2, $3, $4)"#,
            )
            .bind(record.id)
            .bind(ordinal as i64)
            .bind(*source_field_id)
            .bind(*target_field_id)
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;
        }

        if let Some(foreign_key) = foreign_key {
            if $repo::DIALECT.supports_add_foreign_key {
                let ddl = foreign_key_ddl(foreign_key, record.id);
                sqlx::query(&ddl)
                    .execute(&mut *tx)
                    .await
                    .map_err($repo::interpret_error)?;
            } else {
                tracing::warn!(
                    "Backend can't add foreign keys to existing tables; \
                    relation {} on {} stays metadata-only",
                    record.id,
                    foreign_key.source_table
                );
            }
        }

        tx.commit().await.map_err($repo::interpret_error)?;

        record.key_pairs = relation.key_pairs.clone();
        Ok(record)
    }

    async fn list_relations(&self) -> Result<Vec<RelationRecord>, Error> {
        let mut relations: Vec<RelationRecord> = sqlx::query_as(
            r#"SELECT id, source_collection_id, target_collection_id, type, created_at
            FROM relation ORDER BY id"#,
        )
        .fetch(&self.executor)
        .try_collect()
        .await
        .map_err($repo::interpret_error)?;

        let keys: Vec<RelationKeyRow> = sqlx::query_as(
            r#"SELECT relation_id, source_field_id, target_field_id
            FROM relation_key ORDER BY relation_id, ordinal"#,
        )
        .fetch(&self.executor)
        .try_collect()
        .await
        .map_err($repo::interpret_error)?;

        for row in keys {
            if let Some(relation) =
                relations.iter_mut().find(|r| r.id == row.relation_id)
            {
                relation
                    .key_pairs
                    .push((row.source_field_id, row.target_field_id));
            }
        }

        Ok(relations)
    }

    async fn insert_row(
        &self,
        table: &str,
        id_generation: IdGeneration,
        values: &[(String, ScalarValue)],
    ) -> Result<ItemId, Error> {
        let row = if values.is_empty() {
            let query = format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING id",
                quote_ident(table)
            );
            sqlx::query(&query)
                .fetch_one(&self.executor)
                .await
                .map_err($repo::interpret_error)?
        } else {
            let mut builder: QueryBuilder<_> =
                QueryBuilder::new(format!("INSERT INTO {} (", quote_ident(table)));
            for (i, (name, _)) in values.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                builder.push(quote_ident(name));
            }
            builder.push(") VALUES (");
            for (i, (_, value)) in values.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                $repo::push_scalar(&mut builder, value);
            }
            builder.push(") RETURNING id");

            builder
                .build()
                .fetch_one(&self.executor)
                .await
                .map_err($repo::interpret_error)?
        };

        $repo::read_item_id(&row, id_generation).map_err($repo::interpret_error)
    }

    async fn get_row(
        &self,
        table: &str,
        id_generation: IdGeneration,
        columns: &[(String, FieldType)],
        id: &ItemId,
    ) -> Result<Option<Item>, Error> {
        let mut builder: QueryBuilder<_> = QueryBuilder::new("SELECT id");
        for (name, _) in columns {
            builder.push(", ");
            builder.push(quote_ident(name));
        }
        builder.push(format!(" FROM {} WHERE id = ", quote_ident(table)));
        $repo::push_item_id(&mut builder, id);

        let row = builder
            .build()
            .fetch_optional(&self.executor)
            .await
            .map_err($repo::interpret_error)?;

        match row {
            Some(row) => Ok(Some(
                $repo::read_row(&row, id_generation, columns)
                    .map_err($repo::interpret_error)?,
            )),
            None => Ok(None),
        }
    }

    async fn update_row(
        &self,
        table: &str,
        id: &ItemId,
        values: &[(String, Option<ScalarValue>)],
    ) -> Result<u64, Error> {
        let mut builder: QueryBuilder<_> =
            QueryBuilder::new(format!("UPDATE {} SET ", quote_ident(table)));
        for (i, (name, value)) in values.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(quote_ident(name));
            builder.push(" = ");
            match value {
                Some(value) => $repo::push_scalar(&mut builder, value),
                None => {
                    builder.push("NULL");
                }
            }
        }
        builder.push(" WHERE id = ");
        $repo::push_item_id(&mut builder, id);

        let result = builder
            .build()
            .execute(&self.executor)
            .await
            .map_err($repo::interpret_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_row(&self, table: &str, id: &ItemId) -> Result<u64, Error> {
        let mut builder: QueryBuilder<_> =
            QueryBuilder::new(format!("DELETE FROM {} WHERE id = ", quote_ident(table)));
        $repo::push_item_id(&mut builder, id);

        let result = builder
            .build()
            .execute(&self.executor)
            .await
            .map_err($repo::interpret_error)?;

        Ok(result.rows_affected())
    }

    async fn search_rows(
        &self,
        table: &str,
        id_generation: IdGeneration,
        columns: &[(String, FieldType)],
        criteria: &[(String, ScalarValue)],
    ) -> Result<Vec<Item>, Error> {
        let mut builder: QueryBuilder<_> = QueryBuilder::new("SELECT id");
        for (name, _) in columns {
            builder.push(", ");
            builder.push(quote_ident(name));
        }
        builder.push(format!(" FROM {}", quote_ident(table)));
        for (i, (name, value)) in criteria.iter().enumerate() {
            builder.push(if i == 0 { " WHERE " } else { " AND " });
            builder.push(quote_ident(name));
            builder.push(" = ");
            $repo::push_scalar(&mut builder, value);
        }
        builder.push(" ORDER BY id");

        let rows = builder
            .build()
            .fetch_all(&self.executor)
            .await
            .map_err($repo::interpret_error)?;

        rows.iter()
            .map(|row| $repo::read_row(row, id_generation, columns))
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err($repo::interpret_error)
    }

    async fn count_field_values(
        &self,
        table: &str,
        column: &str,
        value: &ScalarValue,
        exclude_id: Option<&ItemId>,
    ) -> Result<i64, Error> {
        let mut builder: QueryBuilder<_> = QueryBuilder::new(format!(
            "SELECT count(*) AS cnt FROM {} WHERE ",
            quote_ident(table)
        ));
        builder.push(quote_ident(column));
        builder.push(" = ");
        $repo::push_scalar(&mut builder, value);
        if let Some(id) = exclude_id {
            builder.push(" AND id <> ");
            $repo::push_item_id(&mut builder, id);
        }

        let row = builder
            .build()
            .fetch_one(&self.executor)
            .await
            .map_err($repo::interpret_error)?;

        let count: i64 = row.try_get("cnt").map_err($repo::interpret_error)?;
        Ok(count)
    }
}

};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ScalarValue;

    const TEST_DIALECT: SqlDialect = SqlDialect {
        text_type: "TEXT",
        bigint_type: "BIGINT",
        boolean_type: "BOOLEAN",
        uuid_type: "UUID",
        date_type: "DATE",
        timestamp_type: "TIMESTAMPTZ",
        sequence_pk_column: "id BIGINT PRIMARY KEY",
        uuid_pk_column: "id UUID PRIMARY KEY",
        supports_add_foreign_key: true,
        not_null_on_add_column: true,
    };

    #[test]
    fn test_add_column_ddl_plain() {
        let field = FieldSpec {
            name: "title".to_string(),
            r#type: FieldType::Text,
            nullable: false,
            unique: false,
            default: None,
            enum_values: vec![],
        };
        assert_eq!(
            add_column_ddl("notes", &field, &TEST_DIALECT),
            r#"ALTER TABLE "notes" ADD COLUMN "title" TEXT NOT NULL"#
        );
    }

    #[test]
    fn test_add_column_ddl_default_and_enum() {
        let field = FieldSpec {
            name: "status".to_string(),
            r#type: FieldType::Text,
            nullable: true,
            unique: false,
            default: Some(ScalarValue::Text("NEW".to_string())),
            enum_values: vec!["NEW".to_string(), "DONE".to_string()],
        };
        assert_eq!(
            add_column_ddl("notes", &field, &TEST_DIALECT),
            r#"ALTER TABLE "notes" ADD COLUMN "status" TEXT DEFAULT 'NEW' CONSTRAINT "chk_notes_status_enum" CHECK ("status" IN ('NEW', 'DONE'))"#
        );
    }

    #[test]
    fn test_add_column_ddl_integer_enum() {
        let field = FieldSpec {
            name: "priority".to_string(),
            r#type: FieldType::Integer,
            nullable: true,
            unique: false,
            default: None,
            enum_values: vec!["1".to_string(), "2".to_string(), "3".to_string()],
        };
        assert_eq!(
            add_column_ddl("notes", &field, &TEST_DIALECT),
            r#"ALTER TABLE "notes" ADD COLUMN "priority" BIGINT CONSTRAINT "chk_notes_priority_enum" CHECK ("priority" IN (1, 2, 3))"#
        );
    }

    #[test]
    fn test_no_not_null_when_unsupported() {
        let dialect = SqlDialect {
            not_null_on_add_column: false,
            ..TEST_DIALECT
        };
        let field = FieldSpec {
            name: "title".to_string(),
            r#type: FieldType::Text,
            nullable: false,
            unique: false,
            default: None,
            enum_values: vec![],
        };
        assert_eq!(
            add_column_ddl("notes", &field, &dialect),
            r#"ALTER TABLE "notes" ADD COLUMN "title" TEXT"#
        );
    }

    #[test]
    fn test_unique_index_ddl() {
        assert_eq!(
            unique_index_ddl("notes", "slug"),
            r#"CREATE UNIQUE INDEX "uq_notes_slug" ON "notes" ("slug")"#
        );
    }

    #[test]
    fn test_foreign_key_ddl() {
        let foreign_key = ForeignKeySpec {
            source_table: "notes".to_string(),
            target_table: "folders".to_string(),
            source_columns: vec!["folder_ref".to_string()],
            target_columns: vec!["code".to_string()],
        };
        assert_eq!(
            foreign_key_ddl(&foreign_key, 3),
            r#"ALTER TABLE "notes" ADD CONSTRAINT "fk_notes_3" FOREIGN KEY ("folder_ref") REFERENCES "folders" ("code")"#
        );
    }
}

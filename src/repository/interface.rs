use std::fmt::Debug;

use async_trait::async_trait;

use crate::{
    data_types::{CollectionId, FieldId, RelationId, Timestamp},
    schema::{FieldType, IdGeneration, Item, ItemId, RelationKind, ScalarValue},
};

#[derive(sqlx::FromRow, Clone, Debug, PartialEq, Eq)]
pub struct CollectionRecord {
    pub id: CollectionId,
    pub name: String,
    pub id_generation: String,
    pub created_at: Timestamp,
}

#[derive(sqlx::FromRow, Clone, Debug, PartialEq, Eq)]
pub struct FieldRecord {
    pub id: FieldId,
    pub collection_id: CollectionId,
    pub name: String,
    pub r#type: String,
    pub nullable: bool,
    pub is_unique: bool,
    pub default_value: Option<String>,
    pub created_at: Timestamp,
    // Merged in from field_enum_value after the main fetch
    #[sqlx(skip)]
    pub enum_values: Vec<String>,
}

#[derive(sqlx::FromRow, Clone, Debug, PartialEq, Eq)]
pub struct RelationRecord {
    pub id: RelationId,
    pub source_collection_id: CollectionId,
    pub target_collection_id: CollectionId,
    pub r#type: String,
    pub created_at: Timestamp,
    // Merged in from relation_key after the main fetch
    #[sqlx(skip)]
    pub key_pairs: Vec<(FieldId, FieldId)>,
}

#[derive(sqlx::FromRow, Debug)]
pub struct FieldEnumValueRow {
    pub field_id: FieldId,
    pub value: String,
}

#[derive(sqlx::FromRow, Debug)]
pub struct RelationKeyRow {
    pub relation_id: RelationId,
    pub source_field_id: FieldId,
    pub target_field_id: FieldId,
}

/// A new field, already validated by the schema engine. The repository turns
/// this into one catalog row (plus enum value rows) and one ALTER TABLE.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: String,
    pub r#type: FieldType,
    pub nullable: bool,
    pub unique: bool,
    pub default: Option<ScalarValue>,
    pub enum_values: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct RelationSpec {
    pub source_collection_id: CollectionId,
    pub target_collection_id: CollectionId,
    pub r#type: RelationKind,
    pub key_pairs: Vec<(FieldId, FieldId)>,
}

/// Resolved table/column names for a physical foreign key, attached to the
/// source table when the backend supports it.
#[derive(Clone, Debug)]
pub struct ForeignKeySpec {
    pub source_table: String,
    pub target_table: String,
    pub source_columns: Vec<String>,
    pub target_columns: Vec<String>,
}

/// Wrapper for conversion of database-specific error codes into actual errors
#[derive(Debug)]
pub enum Error {
    UniqueConstraintViolation(sqlx::Error),
    FKConstraintViolation(sqlx::Error),

    // All other errors
    SqlxError(sqlx::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[async_trait]
pub trait Repository: Send + Sync + Debug {
    async fn setup(&self);

    async fn create_collection(
        &self,
        name: &str,
        id_generation: IdGeneration,
    ) -> Result<CollectionRecord, Error>;

    async fn list_collections(&self) -> Result<Vec<CollectionRecord>, Error>;

    async fn get_collection(
        &self,
        collection_id: CollectionId,
    ) -> Result<CollectionRecord, Error>;

    async fn add_field(
        &self,
        collection: &CollectionRecord,
        field: &FieldSpec,
    ) -> Result<FieldRecord, Error>;

    async fn get_fields(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<FieldRecord>, Error>;

    async fn get_field(&self, field_id: FieldId) -> Result<FieldRecord, Error>;

    async fn add_relation(
        &self,
        relation: &RelationSpec,
        foreign_key: Option<&ForeignKeySpec>,
    ) -> Result<RelationRecord, Error>;

    async fn list_relations(&self) -> Result<Vec<RelationRecord>, Error>;

    async fn insert_row(
        &self,
        table: &str,
        id_generation: IdGeneration,
        values: &[(String, ScalarValue)],
    ) -> Result<ItemId, Error>;

    async fn get_row(
        &self,
        table: &str,
        id_generation: IdGeneration,
        columns: &[(String, FieldType)],
        id: &ItemId,
    ) -> Result<Option<Item>, Error>;

    async fn update_row(
        &self,
        table: &str,
        id: &ItemId,
        values: &[(String, Option<ScalarValue>)],
    ) -> Result<u64, Error>;

    async fn delete_row(&self, table: &str, id: &ItemId) -> Result<u64, Error>;

    async fn search_rows(
        &self,
        table: &str,
        id_generation: IdGeneration,
        columns: &[(String, FieldType)],
        criteria: &[(String, ScalarValue)],
    ) -> Result<Vec<Item>, Error>;

    /// Number of rows where `column` equals `value`, optionally ignoring one
    /// row (the row being updated).
    async fn count_field_values(
        &self,
        table: &str,
        column: &str,
        value: &ScalarValue,
        exclude_id: Option<&ItemId>,
    ) -> Result<i64, Error>;
}

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;

    use super::*;

    fn text_field(name: &str, nullable: bool) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            r#type: FieldType::Text,
            nullable,
            unique: false,
            default: None,
            enum_values: vec![],
        }
    }

    pub async fn run_generic_repository_tests(repository: Arc<dyn Repository>) {
        test_list_collections_empty(repository.clone()).await;
        let collection = test_create_collections(repository.clone()).await;
        let fields = test_add_fields(repository.clone(), &collection).await;
        test_relations(repository.clone(), &collection).await;
        test_row_crud(repository.clone(), &collection, &fields).await;
        test_uuid_collection(repository.clone()).await;
        test_error_propagation(repository).await;
    }

    async fn test_list_collections_empty(repository: Arc<dyn Repository>) {
        assert_eq!(
            repository
                .list_collections()
                .await
                .expect("error listing collections"),
            Vec::<CollectionRecord>::new()
        );
    }

    async fn test_create_collections(
        repository: Arc<dyn Repository>,
    ) -> CollectionRecord {
        let notes = repository
            .create_collection("notes", IdGeneration::Sequence)
            .await
            .expect("error creating collection");
        assert_eq!(notes.name, "notes");
        assert_eq!(notes.id_generation, "SEQUENCE");

        let folders = repository
            .create_collection("folders", IdGeneration::Sequence)
            .await
            .unwrap();

        let all = repository.list_collections().await.unwrap();
        assert_eq!(
            all.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["notes", "folders"]
        );

        assert_eq!(
            repository.get_collection(notes.id).await.unwrap().name,
            "notes"
        );
        assert_eq!(folders.name, "folders");

        // Collection names are exclusive
        assert!(matches!(
            repository
                .create_collection("notes", IdGeneration::Sequence)
                .await
                .unwrap_err(),
            Error::UniqueConstraintViolation(_)
        ));

        notes
    }

    async fn test_add_fields(
        repository: Arc<dyn Repository>,
        collection: &CollectionRecord,
    ) -> Vec<FieldRecord> {
        let title = repository
            .add_field(collection, &text_field("title", false))
            .await
            .expect("error adding field");
        assert_eq!(title.name, "title");
        assert_eq!(title.r#type, "TEXT");
        assert!(!title.nullable);
        assert!(title.enum_values.is_empty());

        let status = repository
            .add_field(
                collection,
                &FieldSpec {
                    name: "status".to_string(),
                    r#type: FieldType::Text,
                    nullable: true,
                    unique: false,
                    default: Some(ScalarValue::Text("NEW".to_string())),
                    enum_values: vec!["NEW".to_string(), "DONE".to_string()],
                },
            )
            .await
            .unwrap();
        assert_eq!(status.default_value, Some("NEW".to_string()));
        assert_eq!(status.enum_values, vec!["NEW", "DONE"]);

        repository
            .add_field(
                collection,
                &FieldSpec {
                    name: "rank".to_string(),
                    r#type: FieldType::Integer,
                    nullable: true,
                    unique: true,
                    default: None,
                    enum_values: vec![],
                },
            )
            .await
            .unwrap();

        let fields = repository.get_fields(collection.id).await.unwrap();
        assert_eq!(
            fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            vec!["title", "status", "rank"]
        );
        assert_eq!(fields[1].enum_values, vec!["NEW", "DONE"]);
        assert!(fields[2].is_unique);

        assert_eq!(repository.get_field(status.id).await.unwrap(), fields[1]);

        // Field names are exclusive within a collection
        assert!(matches!(
            repository
                .add_field(collection, &text_field("title", true))
                .await
                .unwrap_err(),
            Error::UniqueConstraintViolation(_)
        ));

        fields
    }

    async fn test_relations(
        repository: Arc<dyn Repository>,
        notes: &CollectionRecord,
    ) {
        let folders = repository.list_collections().await.unwrap()[1].clone();
        let folder_code = repository
            .add_field(
                &folders,
                &FieldSpec {
                    name: "code".to_string(),
                    r#type: FieldType::Integer,
                    nullable: true,
                    unique: true,
                    default: None,
                    enum_values: vec![],
                },
            )
            .await
            .unwrap();
        let folder_ref = repository
            .add_field(
                notes,
                &FieldSpec {
                    name: "folder_ref".to_string(),
                    r#type: FieldType::Integer,
                    nullable: true,
                    unique: false,
                    default: None,
                    enum_values: vec![],
                },
            )
            .await
            .unwrap();

        let relation = repository
            .add_relation(
                &RelationSpec {
                    source_collection_id: notes.id,
                    target_collection_id: folders.id,
                    r#type: RelationKind::ManyToOne,
                    key_pairs: vec![(folder_ref.id, folder_code.id)],
                },
                None,
            )
            .await
            .expect("error adding relation");
        assert_eq!(relation.r#type, "MANY_TO_ONE");
        assert_eq!(relation.key_pairs, vec![(folder_ref.id, folder_code.id)]);

        let all = repository.list_relations().await.unwrap();
        assert_eq!(all, vec![relation]);
    }

    async fn test_row_crud(
        repository: Arc<dyn Repository>,
        collection: &CollectionRecord,
        fields: &[FieldRecord],
    ) {
        let columns: Vec<(String, FieldType)> = fields
            .iter()
            .map(|f| (f.name.clone(), f.r#type.parse().unwrap()))
            .collect();

        let first = repository
            .insert_row(
                &collection.name,
                IdGeneration::Sequence,
                &[
                    ("title".to_string(), ScalarValue::Text("first".to_string())),
                    ("status".to_string(), ScalarValue::Text("NEW".to_string())),
                ],
            )
            .await
            .expect("error inserting row");
        assert!(matches!(first, ItemId::Sequence(_)));

        let second = repository
            .insert_row(
                &collection.name,
                IdGeneration::Sequence,
                &[
                    (
                        "title".to_string(),
                        ScalarValue::Text("second".to_string()),
                    ),
                    ("status".to_string(), ScalarValue::Text("NEW".to_string())),
                    ("rank".to_string(), ScalarValue::Integer(5)),
                ],
            )
            .await
            .unwrap();

        let item = repository
            .get_row(&collection.name, IdGeneration::Sequence, &columns, &first)
            .await
            .unwrap()
            .expect("row should exist");
        assert_eq!(item.get("id"), Some(&Some(first.to_scalar())));
        assert_eq!(
            item.get("title"),
            Some(&Some(ScalarValue::Text("first".to_string())))
        );
        assert_eq!(item.get("rank"), Some(&None));

        // Missing row
        assert!(repository
            .get_row(
                &collection.name,
                IdGeneration::Sequence,
                &columns,
                &ItemId::Sequence(-1)
            )
            .await
            .unwrap()
            .is_none());

        // Equality search and counting
        let found = repository
            .search_rows(
                &collection.name,
                IdGeneration::Sequence,
                &columns,
                &[("status".to_string(), ScalarValue::Text("NEW".to_string()))],
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].get("id"), Some(&Some(first.to_scalar())));

        let everything = repository
            .search_rows(&collection.name, IdGeneration::Sequence, &columns, &[])
            .await
            .unwrap();
        assert_eq!(everything.len(), 2);

        assert_eq!(
            repository
                .count_field_values(
                    &collection.name,
                    "rank",
                    &ScalarValue::Integer(5),
                    None
                )
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            repository
                .count_field_values(
                    &collection.name,
                    "rank",
                    &ScalarValue::Integer(5),
                    Some(&second)
                )
                .await
                .unwrap(),
            0
        );

        // Partial update, including setting a column back to NULL
        let updated = repository
            .update_row(
                &collection.name,
                &first,
                &[
                    ("rank".to_string(), Some(ScalarValue::Integer(7))),
                    ("status".to_string(), None),
                ],
            )
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let item = repository
            .get_row(&collection.name, IdGeneration::Sequence, &columns, &first)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.get("rank"), Some(&Some(ScalarValue::Integer(7))));
        assert_eq!(item.get("status"), Some(&None));

        assert_eq!(
            repository
                .update_row(
                    &collection.name,
                    &ItemId::Sequence(-1),
                    &[("rank".to_string(), Some(ScalarValue::Integer(1)))]
                )
                .await
                .unwrap(),
            0
        );

        // The unique index on rank is live
        assert!(matches!(
            repository
                .insert_row(
                    &collection.name,
                    IdGeneration::Sequence,
                    &[
                        ("title".to_string(), ScalarValue::Text("third".to_string())),
                        ("rank".to_string(), ScalarValue::Integer(7)),
                    ],
                )
                .await
                .unwrap_err(),
            Error::UniqueConstraintViolation(_)
        ));

        assert_eq!(
            repository.delete_row(&collection.name, &second).await.unwrap(),
            1
        );
        assert_eq!(
            repository.delete_row(&collection.name, &second).await.unwrap(),
            0
        );
    }

    async fn test_uuid_collection(repository: Arc<dyn Repository>) {
        let assets = repository
            .create_collection("assets", IdGeneration::Uuid)
            .await
            .unwrap();
        assert_eq!(assets.id_generation, "UUID");

        let id = repository
            .insert_row(&assets.name, IdGeneration::Uuid, &[])
            .await
            .unwrap();
        assert!(matches!(id, ItemId::Uuid(_)));

        let item = repository
            .get_row(&assets.name, IdGeneration::Uuid, &[], &id)
            .await
            .unwrap()
            .expect("row should exist");
        assert_eq!(item.get("id"), Some(&Some(id.to_scalar())));
    }

    async fn test_error_propagation(repository: Arc<dyn Repository>) {
        // Nonexistent collection/field IDs
        assert!(matches!(
            repository.get_collection(-1).await.unwrap_err(),
            Error::SqlxError(sqlx::Error::RowNotFound)
        ));
        assert!(matches!(
            repository.get_field(-1).await.unwrap_err(),
            Error::SqlxError(sqlx::Error::RowNotFound)
        ));

        // Adding a field against a stale collection record (FK violation)
        let stale = CollectionRecord {
            id: -1,
            name: "ghost".to_string(),
            id_generation: "SEQUENCE".to_string(),
            created_at: 0,
        };
        assert!(matches!(
            repository
                .add_field(&stale, &text_field("anything", true))
                .await
                .unwrap_err(),
            Error::FKConstraintViolation(_)
        ));
    }
}

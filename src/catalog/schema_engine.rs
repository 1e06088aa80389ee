use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::catalog::{CatalogError, CatalogResult};
use crate::data_types::{
    CollectionId, CollectionMetadata, FieldId, FieldMetadata, RelationMetadata,
};
use crate::repository::interface::{
    CollectionRecord, Error as RepositoryError, FieldRecord, FieldSpec,
    ForeignKeySpec, RelationRecord, RelationSpec, Repository,
};
use crate::schema::{
    valid_identifier, FieldType, IdGeneration, RelationKind, ScalarValue,
    RESERVED_TABLE_NAMES,
};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDraft {
    pub name: String,
    #[serde(default)]
    pub id_generation: IdGeneration,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDraft {
    pub name: String,
    pub r#type: FieldType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub enum_values: Vec<String>,
}

fn default_nullable() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDraft {
    pub source_collection_id: CollectionId,
    pub target_collection_id: CollectionId,
    pub r#type: RelationKind,
    pub source_field_ids: Vec<FieldId>,
    pub target_field_ids: Vec<FieldId>,
}

/// Manages the shape of collections: their catalog entries and the physical
/// tables, columns and constraints backing them.
#[derive(Clone)]
pub struct SchemaEngine {
    repository: Arc<dyn Repository>,
}

impl SchemaEngine {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    pub async fn create_collection(
        &self,
        draft: &CollectionDraft,
    ) -> CatalogResult<CollectionMetadata> {
        validate_collection_name(&draft.name)?;

        // The catalog's UNIQUE constraint is the exclusivity check; no
        // read-before-write
        let record = self
            .repository
            .create_collection(&draft.name, draft.id_generation)
            .await
            .map_err(|err| match err {
                RepositoryError::UniqueConstraintViolation(_) => {
                    CatalogError::CollectionAlreadyExists {
                        name: draft.name.clone(),
                    }
                }
                other => other.into(),
            })?;

        info!(
            collection = %record.name,
            id = record.id,
            "Created collection"
        );
        collection_to_metadata(record)
    }

    pub async fn list_collections(&self) -> CatalogResult<Vec<CollectionMetadata>> {
        self.repository
            .list_collections()
            .await
            .map_err(CatalogError::from)?
            .into_iter()
            .map(collection_to_metadata)
            .collect()
    }

    pub async fn collection(
        &self,
        collection_id: CollectionId,
    ) -> CatalogResult<CollectionMetadata> {
        collection_to_metadata(self.collection_record(collection_id).await?)
    }

    pub async fn fields(
        &self,
        collection_id: CollectionId,
    ) -> CatalogResult<Vec<FieldMetadata>> {
        // Resolve the collection first so a bogus id is a 404, not an
        // empty list
        self.collection_record(collection_id).await?;

        self.repository
            .get_fields(collection_id)
            .await
            .map_err(CatalogError::from)?
            .into_iter()
            .map(field_to_metadata)
            .collect()
    }

    pub async fn add_field(
        &self,
        collection_id: CollectionId,
        draft: &FieldDraft,
    ) -> CatalogResult<FieldMetadata> {
        let collection = self.collection_record(collection_id).await?;

        if !valid_identifier(&draft.name) || draft.name == "id" {
            return Err(CatalogError::InvalidIdentifier {
                name: draft.name.clone(),
            });
        }

        for value in &draft.enum_values {
            validate_literal(&draft.name, draft.r#type, value)?;
        }

        let default = match &draft.default_value {
            Some(literal) => {
                let value = validate_literal(&draft.name, draft.r#type, literal)?;
                if !draft.enum_values.is_empty()
                    && !draft.enum_values.contains(literal)
                {
                    return Err(CatalogError::NotInEnum {
                        field: draft.name.clone(),
                        allowed: draft.enum_values.clone(),
                    });
                }
                Some(value)
            }
            None => None,
        };

        let spec = FieldSpec {
            name: draft.name.clone(),
            r#type: draft.r#type,
            nullable: draft.nullable,
            unique: draft.unique,
            default,
            enum_values: draft.enum_values.clone(),
        };

        let record = self
            .repository
            .add_field(&collection, &spec)
            .await
            .map_err(|err| match err {
                RepositoryError::UniqueConstraintViolation(_) => {
                    CatalogError::FieldAlreadyExists {
                        name: draft.name.clone(),
                        collection: collection.name.clone(),
                    }
                }
                RepositoryError::FKConstraintViolation(_) => {
                    CatalogError::CollectionNotFound { id: collection_id }
                }
                other => other.into(),
            })?;

        info!(
            collection = %collection.name,
            field = %record.name,
            r#type = %record.r#type,
            "Added field"
        );
        field_to_metadata(record)
    }

    pub async fn add_relation(
        &self,
        draft: &RelationDraft,
    ) -> CatalogResult<RelationMetadata> {
        if draft.source_field_ids.is_empty()
            || draft.source_field_ids.len() != draft.target_field_ids.len()
        {
            return Err(CatalogError::MalformedRelationKey);
        }

        let source = self.collection_record(draft.source_collection_id).await?;
        let target = self.collection_record(draft.target_collection_id).await?;

        let source_fields = self
            .owned_fields(&draft.source_field_ids, &source)
            .await?;
        let target_fields = self
            .owned_fields(&draft.target_field_ids, &target)
            .await?;

        let spec = RelationSpec {
            source_collection_id: source.id,
            target_collection_id: target.id,
            r#type: draft.r#type,
            key_pairs: draft
                .source_field_ids
                .iter()
                .copied()
                .zip(draft.target_field_ids.iter().copied())
                .collect(),
        };

        // Only the to-one side can carry a physical foreign key
        let foreign_key = if draft.r#type.is_to_one() {
            Some(ForeignKeySpec {
                source_table: source.name.clone(),
                target_table: target.name.clone(),
                source_columns: source_fields.iter().map(|f| f.name.clone()).collect(),
                target_columns: target_fields.iter().map(|f| f.name.clone()).collect(),
            })
        } else {
            None
        };

        let record = self
            .repository
            .add_relation(&spec, foreign_key.as_ref())
            .await
            .map_err(CatalogError::from)?;

        info!(
            source = %source.name,
            target = %target.name,
            r#type = %record.r#type,
            "Added relation"
        );
        relation_to_metadata(record)
    }

    pub async fn list_relations(&self) -> CatalogResult<Vec<RelationMetadata>> {
        self.repository
            .list_relations()
            .await
            .map_err(CatalogError::from)?
            .into_iter()
            .map(relation_to_metadata)
            .collect()
    }

    async fn collection_record(
        &self,
        collection_id: CollectionId,
    ) -> CatalogResult<CollectionRecord> {
        self.repository
            .get_collection(collection_id)
            .await
            .map_err(|err| match err {
                RepositoryError::SqlxError(sqlx::Error::RowNotFound) => {
                    CatalogError::CollectionNotFound { id: collection_id }
                }
                other => other.into(),
            })
    }

    async fn owned_fields(
        &self,
        field_ids: &[FieldId],
        collection: &CollectionRecord,
    ) -> CatalogResult<Vec<FieldRecord>> {
        let mut fields = Vec::with_capacity(field_ids.len());
        for field_id in field_ids {
            let field = self
                .repository
                .get_field(*field_id)
                .await
                .map_err(|err| match err {
                    RepositoryError::SqlxError(sqlx::Error::RowNotFound) => {
                        CatalogError::FieldNotFound { id: *field_id }
                    }
                    other => other.into(),
                })?;
            if field.collection_id != collection.id {
                return Err(CatalogError::ForeignField {
                    field: field.name,
                    collection: collection.name.clone(),
                });
            }
            fields.push(field);
        }
        Ok(fields)
    }
}

fn validate_collection_name(name: &str) -> CatalogResult<()> {
    if !valid_identifier(name) || RESERVED_TABLE_NAMES.contains(&name) {
        return Err(CatalogError::InvalidIdentifier {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn validate_literal(
    field: &str,
    field_type: FieldType,
    literal: &str,
) -> CatalogResult<ScalarValue> {
    ScalarValue::parse_literal(field_type, literal).map_err(|err| {
        CatalogError::InvalidValue {
            field: field.to_string(),
            reason: err.to_string(),
        }
    })
}

fn collection_to_metadata(
    record: CollectionRecord,
) -> CatalogResult<CollectionMetadata> {
    Ok(CollectionMetadata {
        id: record.id,
        name: record.name,
        id_generation: parse_catalog_enum(&record.id_generation)?,
        created_at: record.created_at,
    })
}

fn field_to_metadata(record: FieldRecord) -> CatalogResult<FieldMetadata> {
    Ok(FieldMetadata {
        id: record.id,
        collection_id: record.collection_id,
        name: record.name,
        r#type: parse_catalog_enum(&record.r#type)?,
        nullable: record.nullable,
        unique: record.is_unique,
        default_value: record.default_value,
        enum_values: record.enum_values,
        created_at: record.created_at,
    })
}

fn relation_to_metadata(record: RelationRecord) -> CatalogResult<RelationMetadata> {
    let (source_field_ids, target_field_ids): (Vec<FieldId>, Vec<FieldId>) =
        record.key_pairs.iter().copied().unzip();
    Ok(RelationMetadata {
        id: record.id,
        source_collection_id: record.source_collection_id,
        target_collection_id: record.target_collection_id,
        r#type: parse_catalog_enum(&record.r#type)?,
        source_field_ids,
        target_field_ids,
        created_at: record.created_at,
    })
}

fn parse_catalog_enum<T: FromStr<Err = strum::ParseError>>(
    raw: &str,
) -> CatalogResult<T> {
    raw.parse().map_err(|err: strum::ParseError| {
        CatalogError::MetadataDeserialization {
            reason: format!("{err}: {raw:?}"),
        }
    })
}

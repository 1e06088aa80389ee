use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::catalog::{schema_engine::SchemaEngine, CatalogError, CatalogResult};
use crate::data_types::{CollectionId, CollectionMetadata, FieldMetadata};
use crate::repository::interface::{Error as RepositoryError, Repository};
use crate::schema::{FieldType, Item, ItemId, ScalarValue};

/// Generic CRUD over the physical tables, driven entirely by the catalog
/// metadata: payloads are coerced and validated against the declared fields
/// before any statement is built.
#[derive(Clone)]
pub struct DataEngine {
    repository: Arc<dyn Repository>,
    schema: SchemaEngine,
}

impl DataEngine {
    pub fn new(repository: Arc<dyn Repository>, schema: SchemaEngine) -> Self {
        Self { repository, schema }
    }

    pub async fn create_item(
        &self,
        collection_id: CollectionId,
        payload: &Map<String, Value>,
    ) -> CatalogResult<Item> {
        let collection = self.schema.collection(collection_id).await?;
        let fields = self.schema.fields(collection_id).await?;
        reject_undeclared_keys(payload, &fields)?;

        // Walk fields in declaration order, merging supplied values with
        // defaults; the first violation wins
        let mut values = Vec::with_capacity(fields.len());
        for field in &fields {
            let value = match payload.get(&field.name) {
                Some(json) => coerce(field, json)?,
                None => default_value(field)?,
            };
            self.validate(&collection, field, &value, None).await?;
            if let Some(value) = value {
                values.push((field.name.clone(), value));
            }
        }

        let id = self
            .repository
            .insert_row(&collection.name, collection.id_generation, &values)
            .await
            .map_err(|err| interpret_write_error(err, &collection))?;

        debug!(collection = %collection.name, id = %id, "Created item");
        // The row was just inserted, so a miss here is a store inconsistency
        self.fetch_item(&collection, &fields, &id)
            .await?
            .ok_or(CatalogError::SqlxError(sqlx::Error::RowNotFound))
    }

    /// Returns `None` when no row matches; absence isn't an error at this
    /// layer.
    pub async fn find_item(
        &self,
        collection_id: CollectionId,
        id: &ItemId,
    ) -> CatalogResult<Option<Item>> {
        let collection = self.schema.collection(collection_id).await?;
        let fields = self.schema.fields(collection_id).await?;
        self.fetch_item(&collection, &fields, id).await
    }

    /// Partially updates the supplied fields. Returns the refreshed item, or
    /// `None` (a no-op) when no row matches `id`.
    pub async fn update_item(
        &self,
        collection_id: CollectionId,
        id: &ItemId,
        payload: &Map<String, Value>,
    ) -> CatalogResult<Option<Item>> {
        let collection = self.schema.collection(collection_id).await?;
        let fields = self.schema.fields(collection_id).await?;
        reject_undeclared_keys(payload, &fields)?;

        // Only supplied fields change; explicit nulls clear a value. The
        // uniqueness count ignores the row being updated.
        let mut values = Vec::with_capacity(payload.len());
        for field in &fields {
            let Some(json) = payload.get(&field.name) else {
                continue;
            };
            let value = coerce(field, json)?;
            self.validate(&collection, field, &value, Some(id)).await?;
            values.push((field.name.clone(), value));
        }

        if !values.is_empty() {
            let updated = self
                .repository
                .update_row(&collection.name, id, &values)
                .await
                .map_err(|err| interpret_write_error(err, &collection))?;
            if updated == 0 {
                return Ok(None);
            }
            debug!(collection = %collection.name, id = %id, "Updated item");
        }

        self.fetch_item(&collection, &fields, id).await
    }

    /// Deletes the row matching `id`; a no-op when it doesn't exist. Returns
    /// whether a row was actually deleted.
    pub async fn delete_item(
        &self,
        collection_id: CollectionId,
        id: &ItemId,
    ) -> CatalogResult<bool> {
        let collection = self.schema.collection(collection_id).await?;

        let deleted = self
            .repository
            .delete_row(&collection.name, id)
            .await
            .map_err(|err| interpret_write_error(err, &collection))?;
        if deleted > 0 {
            debug!(collection = %collection.name, id = %id, "Deleted item");
        }
        Ok(deleted > 0)
    }

    /// Equality search over textual criteria (e.g. query-string parameters).
    /// Values are parsed according to the field's type; `id` is a valid key.
    pub async fn search(
        &self,
        collection_id: CollectionId,
        criteria: &HashMap<String, String>,
    ) -> CatalogResult<Vec<Item>> {
        let collection = self.schema.collection(collection_id).await?;
        let fields = self.schema.fields(collection_id).await?;

        let mut parsed = Vec::with_capacity(criteria.len());
        for (key, raw) in criteria {
            if key == "id" {
                let id = ItemId::parse(raw).ok_or_else(|| {
                    CatalogError::InvalidValue {
                        field: "id".to_string(),
                        reason: format!("{raw:?} is not a valid id"),
                    }
                })?;
                parsed.push(("id".to_string(), id.to_scalar()));
                continue;
            }

            let field = fields
                .iter()
                .find(|f| &f.name == key)
                .ok_or_else(|| CatalogError::UndeclaredField { field: key.clone() })?;
            let value =
                ScalarValue::parse_literal(field.r#type, raw).map_err(|err| {
                    CatalogError::InvalidValue {
                        field: key.clone(),
                        reason: err.to_string(),
                    }
                })?;
            parsed.push((field.name.clone(), value));
        }

        self.repository
            .search_rows(
                &collection.name,
                collection.id_generation,
                &columns(&fields),
                &parsed,
            )
            .await
            .map_err(CatalogError::from)
    }

    async fn fetch_item(
        &self,
        collection: &CollectionMetadata,
        fields: &[FieldMetadata],
        id: &ItemId,
    ) -> CatalogResult<Option<Item>> {
        self.repository
            .get_row(
                &collection.name,
                collection.id_generation,
                &columns(fields),
                id,
            )
            .await
            .map_err(CatalogError::from)
    }

    async fn validate(
        &self,
        collection: &CollectionMetadata,
        field: &FieldMetadata,
        value: &Option<ScalarValue>,
        exclude_id: Option<&ItemId>,
    ) -> CatalogResult<()> {
        let Some(value) = value else {
            if !field.nullable {
                return Err(CatalogError::NotNullable {
                    field: field.name.clone(),
                });
            }
            return Ok(());
        };

        if !field.enum_values.is_empty()
            && !field.enum_values.contains(&value.canonical_string())
        {
            return Err(CatalogError::NotInEnum {
                field: field.name.clone(),
                allowed: field.enum_values.clone(),
            });
        }

        // Advisory early check; the unique index still backstops races
        if field.unique {
            let taken = self
                .repository
                .count_field_values(&collection.name, &field.name, value, exclude_id)
                .await
                .map_err(CatalogError::from)?;
            if taken > 0 {
                return Err(CatalogError::DuplicateValue {
                    field: field.name.clone(),
                });
            }
        }

        Ok(())
    }
}

fn columns(fields: &[FieldMetadata]) -> Vec<(String, FieldType)> {
    fields
        .iter()
        .map(|field| (field.name.clone(), field.r#type))
        .collect()
}

fn reject_undeclared_keys(
    payload: &Map<String, Value>,
    fields: &[FieldMetadata],
) -> CatalogResult<()> {
    for key in payload.keys() {
        if !fields.iter().any(|field| &field.name == key) {
            return Err(CatalogError::UndeclaredField { field: key.clone() });
        }
    }
    Ok(())
}

fn coerce(field: &FieldMetadata, json: &Value) -> CatalogResult<Option<ScalarValue>> {
    ScalarValue::from_json(field.r#type, json).map_err(|err| {
        CatalogError::InvalidValue {
            field: field.name.clone(),
            reason: err.to_string(),
        }
    })
}

fn default_value(field: &FieldMetadata) -> CatalogResult<Option<ScalarValue>> {
    match &field.default_value {
        Some(literal) => ScalarValue::parse_literal(field.r#type, literal)
            .map(Some)
            .map_err(|err| CatalogError::MetadataDeserialization {
                reason: err.to_string(),
            }),
        None => Ok(None),
    }
}

fn interpret_write_error(
    err: RepositoryError,
    collection: &CollectionMetadata,
) -> CatalogError {
    match err {
        RepositoryError::UniqueConstraintViolation(_) => CatalogError::UniqueViolation {
            collection: collection.name.clone(),
        },
        RepositoryError::FKConstraintViolation(_) => CatalogError::BrokenReference,
        other => other.into(),
    }
}

use serde::Serialize;

use crate::schema::{FieldType, IdGeneration, RelationKind};

pub type CollectionId = i64;
pub type FieldId = i64;
pub type RelationId = i64;
pub type Timestamp = i64;

/// A collection as exposed to callers: one runtime-defined entity type backed
/// by a physical table of the same name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMetadata {
    pub id: CollectionId,
    pub name: String,
    pub id_generation: IdGeneration,
    pub created_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    pub id: FieldId,
    pub collection_id: CollectionId,
    pub name: String,
    pub r#type: FieldType,
    pub nullable: bool,
    pub unique: bool,
    /// Canonical textual rendering of the default, if any.
    pub default_value: Option<String>,
    /// Permitted values in declaration order; empty means unconstrained.
    pub enum_values: Vec<String>,
    pub created_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationMetadata {
    pub id: RelationId,
    pub source_collection_id: CollectionId,
    pub target_collection_id: CollectionId,
    pub r#type: RelationKind,
    /// Paired source/target field ids, in key order.
    pub source_field_ids: Vec<FieldId>,
    pub target_field_ids: Vec<FieldId>,
    pub created_at: Timestamp,
}

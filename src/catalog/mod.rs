use crate::data_types::{CollectionId, FieldId};
use crate::repository::interface::Error as RepositoryError;

pub mod data_engine;
pub mod schema_engine;

/// Coarse failure class, used by the HTTP frontend for status-code mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    Validation,
    NotFound,
    Store,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    // Conflicts
    #[error("Collection {name:?} already exists")]
    CollectionAlreadyExists { name: String },

    #[error("Field {name:?} already exists in collection {collection:?}")]
    FieldAlreadyExists { name: String, collection: String },

    #[error("Value for field {field:?} is already taken")]
    DuplicateValue { field: String },

    // A concurrent writer beat us to a unique value between validation and
    // the actual insert
    #[error("Unique constraint violated on collection {collection:?}")]
    UniqueViolation { collection: String },

    // Missing things
    #[error("Collection with id {id} doesn't exist")]
    CollectionNotFound { id: CollectionId },

    #[error("Field with id {id} doesn't exist")]
    FieldNotFound { id: FieldId },

    #[error("Item {id:?} doesn't exist")]
    ItemNotFound { id: String },

    // Validation failures
    #[error("{name:?} is not a valid identifier")]
    InvalidIdentifier { name: String },

    #[error("Field {field:?} can't be null")]
    NotNullable { field: String },

    #[error("Value for field {field:?} must be one of {allowed:?}")]
    NotInEnum { field: String, allowed: Vec<String> },

    #[error("Invalid value for field {field:?}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Field {field:?} isn't declared on this collection")]
    UndeclaredField { field: String },

    #[error("Relation key field lists must pair up and can't be empty")]
    MalformedRelationKey,

    #[error("Field {field:?} doesn't belong to collection {collection:?}")]
    ForeignField { field: String, collection: String },

    // A physical FK rejected the write (the referenced row doesn't exist)
    #[error("Value references a missing row in a related collection")]
    BrokenReference,

    // Catalog rows that no longer parse (e.g. hand-edited store)
    #[error("Error deserializing metadata: {reason}")]
    MetadataDeserialization { reason: String },

    #[error("Internal SQL error: {0:?}")]
    SqlxError(sqlx::Error),
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::CollectionAlreadyExists { .. }
            | CatalogError::FieldAlreadyExists { .. }
            | CatalogError::DuplicateValue { .. }
            | CatalogError::UniqueViolation { .. } => ErrorKind::Conflict,

            CatalogError::CollectionNotFound { .. }
            | CatalogError::FieldNotFound { .. }
            | CatalogError::ItemNotFound { .. } => ErrorKind::NotFound,

            CatalogError::InvalidIdentifier { .. }
            | CatalogError::NotNullable { .. }
            | CatalogError::NotInEnum { .. }
            | CatalogError::InvalidValue { .. }
            | CatalogError::UndeclaredField { .. }
            | CatalogError::MalformedRelationKey
            | CatalogError::ForeignField { .. }
            | CatalogError::BrokenReference => ErrorKind::Validation,

            CatalogError::MetadataDeserialization { .. }
            | CatalogError::SqlxError(_) => ErrorKind::Store,
        }
    }
}

/// Fallback conversion: anything the call site doesn't give a more precise
/// meaning to surfaces as an internal SQL error.
impl From<RepositoryError> for CatalogError {
    fn from(err: RepositoryError) -> Self {
        CatalogError::SqlxError(match err {
            RepositoryError::UniqueConstraintViolation(e)
            | RepositoryError::FKConstraintViolation(e)
            | RepositoryError::SqlxError(e) => e,
        })
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

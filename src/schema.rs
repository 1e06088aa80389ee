use chrono::{DateTime, NaiveDate, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Abstract field types supported by collections. Each maps to exactly one
/// physical column type per backend (see `repository::default::SqlDialect`).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Text,
    Integer,
    Boolean,
    Uuid,
    Date,
    Timestamp,
}

/// Primary-key generation strategy, fixed at collection creation.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdGeneration {
    #[default]
    Sequence,
    Uuid,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl RelationKind {
    /// The to-one side owns the physical foreign key; the other kinds are
    /// recorded as metadata only.
    pub fn is_to_one(&self) -> bool {
        matches!(self, RelationKind::OneToOne | RelationKind::ManyToOne)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("expected a {expected} value, got {got}")]
pub struct ScalarTypeError {
    pub expected: FieldType,
    pub got: String,
}

/// A single typed value flowing between payloads, validation and the store.
/// Keeping this closed over the six field types keeps the data engine's
/// validation and the per-backend bindings exhaustive.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    Uuid(Uuid),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl ScalarValue {
    /// Canonical textual rendering, used for enum membership checks and for
    /// storing default values in the catalog.
    pub fn canonical_string(&self) -> String {
        match self {
            ScalarValue::Text(v) => v.clone(),
            ScalarValue::Integer(v) => v.to_string(),
            ScalarValue::Boolean(v) => v.to_string(),
            ScalarValue::Uuid(v) => v.to_string(),
            ScalarValue::Date(v) => v.format("%Y-%m-%d").to_string(),
            ScalarValue::Timestamp(v) => v.to_rfc3339(),
        }
    }

    /// Renders the value as a SQL literal for DDL (column defaults, CHECK
    /// constraints). Never used for DML; row values always go through bind
    /// parameters.
    pub fn to_sql_literal(&self) -> String {
        match self {
            ScalarValue::Integer(v) => v.to_string(),
            ScalarValue::Boolean(true) => "TRUE".to_string(),
            ScalarValue::Boolean(false) => "FALSE".to_string(),
            _ => quote_literal(&self.canonical_string()),
        }
    }

    /// Parses a textual literal (catalog default value, query-string
    /// criterion) into a scalar of the given type.
    pub fn parse_literal(
        field_type: FieldType,
        literal: &str,
    ) -> Result<Self, ScalarTypeError> {
        let mismatch = || ScalarTypeError {
            expected: field_type,
            got: literal.to_string(),
        };

        Ok(match field_type {
            FieldType::Text => ScalarValue::Text(literal.to_string()),
            FieldType::Integer => {
                ScalarValue::Integer(literal.parse().map_err(|_| mismatch())?)
            }
            FieldType::Boolean => {
                ScalarValue::Boolean(literal.parse().map_err(|_| mismatch())?)
            }
            FieldType::Uuid => {
                ScalarValue::Uuid(Uuid::from_str(literal).map_err(|_| mismatch())?)
            }
            FieldType::Date => ScalarValue::Date(
                NaiveDate::parse_from_str(literal, "%Y-%m-%d").map_err(|_| mismatch())?,
            ),
            FieldType::Timestamp => ScalarValue::Timestamp(
                DateTime::parse_from_rfc3339(literal)
                    .map_err(|_| mismatch())?
                    .with_timezone(&Utc),
            ),
        })
    }

    /// Coerces a JSON payload value into a scalar of the given type.
    /// JSON null maps to an absent value.
    pub fn from_json(
        field_type: FieldType,
        value: &serde_json::Value,
    ) -> Result<Option<Self>, ScalarTypeError> {
        let mismatch = || ScalarTypeError {
            expected: field_type,
            got: value.to_string(),
        };

        Ok(Some(match (field_type, value) {
            (_, serde_json::Value::Null) => return Ok(None),
            (FieldType::Text, serde_json::Value::String(v)) => {
                ScalarValue::Text(v.clone())
            }
            (FieldType::Integer, serde_json::Value::Number(v)) => {
                ScalarValue::Integer(v.as_i64().ok_or_else(mismatch)?)
            }
            (FieldType::Boolean, serde_json::Value::Bool(v)) => ScalarValue::Boolean(*v),
            (
                FieldType::Uuid | FieldType::Date | FieldType::Timestamp,
                serde_json::Value::String(v),
            ) => Self::parse_literal(field_type, v)?,
            _ => return Err(mismatch()),
        }))
    }
}

impl Serialize for ScalarValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ScalarValue::Text(v) => serializer.serialize_str(v),
            ScalarValue::Integer(v) => serializer.serialize_i64(*v),
            ScalarValue::Boolean(v) => serializer.serialize_bool(*v),
            _ => serializer.serialize_str(&self.canonical_string()),
        }
    }
}

/// A generated primary key: a sequence number or a store-generated UUID,
/// depending on the owning collection's `IdGeneration`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemId {
    Sequence(i64),
    Uuid(Uuid),
}

impl ItemId {
    /// Parses a path-segment representation. Numeric ids win over UUIDs;
    /// the two representations never overlap.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Ok(id) = raw.parse::<i64>() {
            return Some(ItemId::Sequence(id));
        }
        Uuid::from_str(raw).ok().map(ItemId::Uuid)
    }

    pub fn to_scalar(&self) -> ScalarValue {
        match self {
            ItemId::Sequence(id) => ScalarValue::Integer(*id),
            ItemId::Uuid(id) => ScalarValue::Uuid(*id),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Sequence(id) => write!(f, "{id}"),
            ItemId::Uuid(id) => write!(f, "{id}"),
        }
    }
}

/// One row of a collection's physical table: an ordered field-name → value
/// mapping, `id` first, then fields in declaration order. Absent values are
/// explicit NULLs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Item {
    entries: Vec<(String, Option<ScalarValue>)>,
}

impl Item {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Option<ScalarValue>) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Option<ScalarValue>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Option<ScalarValue>)> {
        self.entries.iter()
    }
}

impl Serialize for Item {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Table names that collide with the catalog itself and can never be used
/// for collections.
pub const RESERVED_TABLE_NAMES: &[&str] = &[
    "collection",
    "field",
    "field_enum_value",
    "relation",
    "relation_key",
    "_sqlx_migrations",
];

const MAX_IDENTIFIER_LEN: usize = 63;

/// Collection and field names end up interpolated into DDL/DML, so they are
/// restricted to a safe identifier set before any statement is built.
pub fn valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Double-quotes an identifier for interpolation into a statement. Callers
/// are expected to have run `valid_identifier` already; quoting here is the
/// second line of defence.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quotes a string as a SQL literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

//! Field declarations and the field type table.

use crate::db::ProgramRef;
use crate::schema::Relation;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

pub const FIELD_ID: &str = "id";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_UPDATED_AT: &str = "updated_at";
pub const FIELD_DELETED_AT: &str = "deleted_at";

/// Declared type of a field. Unknown names decode to `Invalid` instead of failing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FieldType {
    #[default]
    Invalid,
    Bool,
    Time,
    Json,
    Uuid,
    Bytes,
    Enum,
    String,
    Text,
    Int8,
    Int16,
    Int32,
    Int,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint,
    Uint64,
    Float32,
    Float64,
    Relation,
    File,
}

const FIELD_TYPE_NAMES: &[(FieldType, &str)] = &[
    (FieldType::Invalid, "invalid"),
    (FieldType::Bool, "bool"),
    (FieldType::Time, "time"),
    (FieldType::Json, "json"),
    (FieldType::Uuid, "uuid"),
    (FieldType::Bytes, "bytes"),
    (FieldType::Enum, "enum"),
    (FieldType::String, "string"),
    (FieldType::Text, "text"),
    (FieldType::Int8, "int8"),
    (FieldType::Int16, "int16"),
    (FieldType::Int32, "int32"),
    (FieldType::Int, "int"),
    (FieldType::Int64, "int64"),
    (FieldType::Uint8, "uint8"),
    (FieldType::Uint16, "uint16"),
    (FieldType::Uint32, "uint32"),
    (FieldType::Uint, "uint"),
    (FieldType::Uint64, "uint64"),
    (FieldType::Float32, "float32"),
    (FieldType::Float64, "float64"),
    (FieldType::Relation, "relation"),
    (FieldType::File, "file"),
];

impl FieldType {
    pub fn from_name(name: &str) -> FieldType {
        FIELD_TYPE_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(t, _)| *t)
            .unwrap_or(FieldType::Invalid)
    }

    pub fn name(&self) -> &'static str {
        FIELD_TYPE_NAMES
            .iter()
            .find(|(t, _)| t == self)
            .map(|(_, n)| *n)
            .unwrap_or("invalid")
    }

    pub fn is_valid(&self) -> bool {
        *self != FieldType::Invalid
    }

    /// Relation and file fields hold a relation block instead of an atomic column.
    pub fn is_relation(&self) -> bool {
        matches!(self, FieldType::Relation | FieldType::File)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Int8
                | FieldType::Int16
                | FieldType::Int32
                | FieldType::Int
                | FieldType::Int64
                | FieldType::Uint8
                | FieldType::Uint16
                | FieldType::Uint32
                | FieldType::Uint
                | FieldType::Uint64
                | FieldType::Float32
                | FieldType::Float64
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Text | FieldType::Enum)
    }

    /// Cast appended to a bound placeholder so text/JSON params bind to typed columns.
    pub fn pg_cast(&self) -> Option<&'static str> {
        match self {
            FieldType::Time => Some("timestamptz"),
            FieldType::Uuid => Some("uuid"),
            FieldType::Json => Some("jsonb"),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(FieldType::from_name(&s))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldEnum {
    pub value: String,
    pub label: String,
}

/// Storage passthrough options.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDb {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub type_: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub is_system_field: bool,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enums: Vec<FieldEnum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<Relation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<FieldDb>,
    /// Set on uint64 columns synthesized (or merged) for a relation's foreign key.
    #[serde(skip)]
    pub is_fk: bool,
    #[serde(skip)]
    pub getter_program: Option<ProgramRef>,
    #[serde(skip)]
    pub setter_program: Option<ProgramRef>,
}

impl Field {
    pub fn new(name: impl Into<String>, type_: FieldType) -> Self {
        let name = name.into();
        Field {
            label: name.clone(),
            name,
            type_,
            ..Default::default()
        }
    }

    pub fn is_relation(&self) -> bool {
        self.type_.is_relation()
    }

    /// Only non-relation fields map to a physical column.
    pub fn has_column(&self) -> bool {
        !self.is_relation()
    }

    pub(crate) fn system(name: &str, type_: FieldType, optional: bool) -> Self {
        Field {
            unique: name == FIELD_ID,
            optional,
            sortable: true,
            filterable: true,
            is_system_field: true,
            is_locked: true,
            ..Field::new(name, type_)
        }
    }

    pub(crate) fn foreign_key(name: &str, optional: bool, unique: bool) -> Self {
        Field {
            optional,
            unique,
            sortable: true,
            filterable: true,
            is_system_field: true,
            is_locked: true,
            is_fk: true,
            ..Field::new(name, FieldType::Uint64)
        }
    }
}

//! Schema: one entity type's fields and storage namespace.

use crate::error::SchemaError;
use crate::schema::field::{
    Field, FieldType, FIELD_CREATED_AT, FIELD_DELETED_AT, FIELD_ID, FIELD_UPDATED_AT,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub label_field: String,
    #[serde(default)]
    pub disable_timestamp: bool,
    #[serde(default)]
    pub is_system_schema: bool,
    #[serde(default)]
    pub is_junction_schema: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Physical column names in declaration order, derived by `init`.
    #[serde(skip)]
    pub db_columns: Vec<String>,
    #[serde(skip)]
    pub(crate) initialized: bool,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        let name = name.into();
        Schema {
            namespace: name.clone(),
            name,
            fields,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Schema, SchemaError> {
        serde_json::from_str(json).map_err(|e| SchemaError::Load(e.to_string()))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Prepends the synthetic `id` field and appends timestamp fields. Runs once; later calls are no-ops.
    pub fn init(&mut self) -> Result<(), SchemaError> {
        if self.initialized {
            return Ok(());
        }
        if self.namespace.is_empty() {
            self.namespace = self.name.clone();
        }

        if !self.is_junction_schema {
            self.fields.retain(|f| f.name != FIELD_ID);
            self.fields.insert(0, Field::system(FIELD_ID, FieldType::Uint64, false));
        }

        if !self.disable_timestamp {
            for (name, optional) in [
                (FIELD_CREATED_AT, true),
                (FIELD_UPDATED_AT, true),
                (FIELD_DELETED_AT, true),
            ] {
                if self.field(name).is_none() {
                    self.fields.push(Field::system(name, FieldType::Time, optional));
                }
            }
        }

        for f in self.fields.iter_mut() {
            if f.label.is_empty() {
                f.label = f.name.clone();
            }
        }

        self.refresh_columns();
        self.initialized = true;
        Ok(())
    }

    pub(crate) fn refresh_columns(&mut self) {
        self.db_columns = self
            .fields
            .iter()
            .filter(|f| f.has_column())
            .map(|f| f.name.clone())
            .collect();
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.db_columns.iter().any(|c| c == name)
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_relation())
    }

    pub fn has_timestamps(&self) -> bool {
        !self.disable_timestamp && !self.is_junction_schema
    }

    /// Inserts a derived FK field right before `created_at`, or at the end when timestamps are disabled.
    pub(crate) fn insert_fk_field(&mut self, field: Field) {
        match self.fields.iter().position(|f| f.name == FIELD_CREATED_AT) {
            Some(pos) => self.fields.insert(pos, field),
            None => self.fields.push(field),
        }
    }
}

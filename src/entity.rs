//! Entity: an insertion-ordered document for one row and its loaded relations.

use crate::error::AppError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys keep insertion order so JSON output follows column order.
/// Relation payloads are stored as nested objects (to-one) or arrays of objects (to-many).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(IndexMap<String, Value>);

impl Entity {
    pub fn new() -> Self {
        Entity(IndexMap::new())
    }

    pub fn with_id(id: u64) -> Self {
        let mut e = Entity::new();
        e.set("id", id);
        e
    }

    pub fn from_json(json: &str) -> Result<Self, AppError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Accepts only JSON objects.
    pub fn from_value(value: Value) -> Result<Self, AppError> {
        match value {
            Value::Object(map) => Ok(Entity(map.into_iter().collect())),
            other => Err(AppError::Validation(format!("entity must be a JSON object, got {}", other))),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set_entity(&mut self, key: impl Into<String>, entity: Entity) -> &mut Self {
        self.0.insert(key.into(), entity.into_value());
        self
    }

    pub fn set_entities(&mut self, key: impl Into<String>, entities: Vec<Entity>) -> &mut Self {
        self.0.insert(
            key.into(),
            Value::Array(entities.into_iter().map(Entity::into_value).collect()),
        );
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    /// Removes a key, keeping the order of the remaining keys.
    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Numeric `id`, accepting numbers and numeric strings. Zero and absent ids are `None`.
    pub fn id(&self) -> Option<u64> {
        self.get("id").and_then(value_as_u64).filter(|id| *id != 0)
    }

    pub fn get_entity(&self, key: &str) -> Option<Entity> {
        match self.get(key) {
            Some(Value::Object(map)) => Some(Entity(map.clone().into_iter().collect())),
            _ => None,
        }
    }

    pub fn get_entities(&self, key: &str) -> Option<Vec<Entity>> {
        match self.get(key) {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| match v {
                        Value::Object(map) => Some(Entity(map.clone().into_iter().collect())),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0.into_iter().collect::<Map<String, Value>>())
    }

    pub fn to_json(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<IndexMap<String, Value>> for Entity {
    fn from(map: IndexMap<String, Value>) -> Self {
        Entity(map)
    }
}

impl IntoIterator for Entity {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(String, Value)> for Entity {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Entity(iter.into_iter().collect())
    }
}

pub(crate) fn value_as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

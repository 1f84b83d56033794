//! Relation metadata: kind, ownership, foreign-key placement, back-reference naming.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RelationType {
    #[default]
    Invalid,
    O2O,
    O2M,
    M2M,
}

const RELATION_TYPE_NAMES: &[(RelationType, &str)] = &[
    (RelationType::Invalid, "invalid"),
    (RelationType::O2O, "o2o"),
    (RelationType::O2M, "o2m"),
    (RelationType::M2M, "m2m"),
];

impl RelationType {
    pub fn from_name(name: &str) -> RelationType {
        RELATION_TYPE_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(t, _)| *t)
            .unwrap_or(RelationType::Invalid)
    }

    pub fn name(&self) -> &'static str {
        RELATION_TYPE_NAMES
            .iter()
            .find(|(t, _)| t == self)
            .map(|(_, n)| *n)
            .unwrap_or("invalid")
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for RelationType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for RelationType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(RelationType::from_name(&s))
    }
}

/// Join columns of a relation, seen from the declaring schema.
///
/// - FK held here: `current_column` is `<field>_id` on this table, `target_column` is the target's `id`.
/// - FK held by the target: `current_column` is `id`, `target_column` is the target's FK column.
/// - many-to-many: both columns live on the junction table; `current_column` holds this schema's ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FkColumns {
    pub current_column: String,
    pub target_column: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Relation {
    #[serde(skip)]
    pub schema_name: String,
    #[serde(skip)]
    pub field_name: String,
    #[serde(rename = "schema")]
    pub target_schema_name: String,
    #[serde(rename = "field", default)]
    pub target_field_name: String,
    #[serde(rename = "type")]
    pub type_: RelationType,
    #[serde(default)]
    pub owner: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fk_columns: Option<FkColumns>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub junction_table: String,
    /// Arena index of the mirrored relation, set by `Builder::init`.
    #[serde(skip)]
    pub back_ref: Option<usize>,
}

impl Relation {
    pub fn new(target_schema: &str, target_field: &str, type_: RelationType) -> Self {
        Relation {
            target_schema_name: target_schema.to_string(),
            target_field_name: target_field.to_string(),
            type_,
            ..Default::default()
        }
    }

    pub fn owner(mut self, owner: bool) -> Self {
        self.owner = owner;
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// `schemaA.fieldA-schemaB.fieldB`
    pub fn name(&self) -> String {
        format!(
            "{}.{}-{}.{}",
            self.schema_name, self.field_name, self.target_schema_name, self.target_field_name
        )
    }

    /// `schemaB.fieldB-schemaA.fieldA`
    pub fn back_ref_name(&self) -> String {
        format!(
            "{}.{}-{}.{}",
            self.target_schema_name, self.target_field_name, self.schema_name, self.field_name
        )
    }

    pub fn is_same_type(&self) -> bool {
        self.schema_name == self.target_schema_name
    }

    pub fn is_bidi(&self) -> bool {
        self.is_same_type() && self.field_name == self.target_field_name
    }

    pub fn is_m2m(&self) -> bool {
        self.type_ == RelationType::M2M
    }

    /// Whether this side's table stores the foreign-key column.
    pub fn has_fks(&self) -> bool {
        let non_owner_o2o_two_types =
            !self.is_same_type() && self.type_ == RelationType::O2O && !self.owner;
        let non_owner_o2o_same_type_not_bidi =
            self.is_same_type() && self.type_ == RelationType::O2O && !self.owner && !self.is_bidi();
        let o2o_bidi = self.type_ == RelationType::O2O && self.is_bidi();
        let non_owner_o2m = self.type_ == RelationType::O2M && !self.owner;

        non_owner_o2o_two_types || non_owner_o2o_same_type_not_bidi || o2o_bidi || non_owner_o2m
    }

    /// Whether the related side is a collection.
    pub fn is_to_many(&self) -> bool {
        match self.type_ {
            RelationType::M2M => true,
            RelationType::O2M => self.owner,
            _ => false,
        }
    }

    /// Name of the FK column this side would hold.
    pub fn fk_field_name(&self) -> String {
        format!("{}_id", self.field_name)
    }

    pub fn current_column(&self) -> &str {
        self.fk_columns.as_ref().map(|c| c.current_column.as_str()).unwrap_or("id")
    }

    pub fn target_column(&self) -> &str {
        self.fk_columns.as_ref().map(|c| c.target_column.as_str()).unwrap_or("id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(schema: &str, field: &str, target: &str, target_field: &str, t: RelationType, owner: bool) -> Relation {
        Relation {
            schema_name: schema.into(),
            field_name: field.into(),
            ..Relation::new(target, target_field, t).owner(owner)
        }
    }

    #[test]
    fn back_ref_name_mirrors_name() {
        let r = rel("post", "category", "category", "posts", RelationType::O2M, false);
        assert_eq!(r.name(), "post.category-category.posts");
        assert_eq!(r.back_ref_name(), "category.posts-post.category");
    }

    #[test]
    fn fk_placement_rules() {
        assert!(rel("post", "category", "category", "posts", RelationType::O2M, false).has_fks());
        assert!(!rel("category", "posts", "post", "category", RelationType::O2M, true).has_fks());
        assert!(rel("card", "owner", "user", "card", RelationType::O2O, false).has_fks());
        assert!(!rel("user", "card", "card", "owner", RelationType::O2O, true).has_fks());
        assert!(rel("node", "prev", "node", "next", RelationType::O2O, false).has_fks());
        assert!(!rel("node", "next", "node", "prev", RelationType::O2O, true).has_fks());
        assert!(rel("user", "spouse", "user", "spouse", RelationType::O2O, true).has_fks());
        assert!(!rel("user", "groups", "group", "users", RelationType::M2M, false).has_fks());
    }

    #[test]
    fn unknown_relation_type_is_invalid() {
        let r: Relation = serde_json::from_str(r#"{"schema":"a","field":"b","type":"x2y"}"#).unwrap();
        assert_eq!(r.type_, RelationType::Invalid);
    }
}

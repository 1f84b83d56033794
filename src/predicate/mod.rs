//! Predicate tree: leaf comparisons, and/or composition, relation-path scoping.

mod filter;

pub use filter::{parse_filter, parse_filter_str};

use crate::error::AppError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Operator {
    #[default]
    Invalid,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    Contains,
    NotContains,
    ContainsFold,
    NotContainsFold,
    In,
    NotIn,
    Null,
}

const OPERATOR_NAMES: &[(Operator, &str)] = &[
    (Operator::Invalid, "invalid"),
    (Operator::Eq, "$eq"),
    (Operator::Neq, "$neq"),
    (Operator::Gt, "$gt"),
    (Operator::Gte, "$gte"),
    (Operator::Lt, "$lt"),
    (Operator::Lte, "$lte"),
    (Operator::Like, "$like"),
    (Operator::NotLike, "$notlike"),
    (Operator::Contains, "$contains"),
    (Operator::NotContains, "$notcontains"),
    (Operator::ContainsFold, "$containsfold"),
    (Operator::NotContainsFold, "$notcontainsfold"),
    (Operator::In, "$in"),
    (Operator::NotIn, "$nin"),
    (Operator::Null, "$null"),
];

impl Operator {
    pub fn from_name(name: &str) -> Operator {
        OPERATOR_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(op, _)| *op)
            .unwrap_or(Operator::Invalid)
    }

    pub fn name(&self) -> &'static str {
        OPERATOR_NAMES
            .iter()
            .find(|(op, _)| op == self)
            .map(|(_, n)| *n)
            .unwrap_or("invalid")
    }

    /// Checks the value shape an operator needs: arrays for `$in`/`$nin`, strings for the
    /// like/contains family, booleans for `$null`.
    pub fn check_value(&self, schema: &str, field: &str, value: &Value) -> Result<(), AppError> {
        let expected = match self {
            Operator::In | Operator::NotIn if !value.is_array() => "array",
            Operator::Like
            | Operator::NotLike
            | Operator::Contains
            | Operator::NotContains
            | Operator::ContainsFold
            | Operator::NotContainsFold
                if !value.is_string() =>
            {
                "string"
            }
            Operator::Null if !value.is_boolean() => "boolean",
            _ => return Ok(()),
        };
        Err(AppError::Filter(format!(
            "invalid value for {}.{} {}: expected {}, got {} ({})",
            schema,
            field,
            self,
            expected,
            value,
            json_type_name(value)
        )))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Operator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Operator::from_name(&s))
    }
}

pub(crate) fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Either a leaf (`field` + `operator` + `value`) or a composite (`and` / `or`), never both.
/// A non-empty `relation_path` scopes the whole node to neighbors reached through those relation fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field: String,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relation_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub and: Vec<Predicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub or: Vec<Predicate>,
}

macro_rules! leaf_ctor {
    ($(#[$doc:meta])* $name:ident, $op:expr) => {
        $(#[$doc])*
        pub fn $name(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
            Predicate::leaf(field, $op, value)
        }
    };
}

impl Predicate {
    pub fn leaf(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Predicate {
        Predicate {
            field: field.into(),
            operator,
            value: value.into(),
            ..Default::default()
        }
    }

    leaf_ctor!(eq, Operator::Eq);
    leaf_ctor!(neq, Operator::Neq);
    leaf_ctor!(gt, Operator::Gt);
    leaf_ctor!(gte, Operator::Gte);
    leaf_ctor!(lt, Operator::Lt);
    leaf_ctor!(lte, Operator::Lte);
    leaf_ctor!(like, Operator::Like);
    leaf_ctor!(not_like, Operator::NotLike);
    leaf_ctor!(contains, Operator::Contains);
    leaf_ctor!(not_contains, Operator::NotContains);
    leaf_ctor!(
        /// Case-insensitive substring match.
        contains_fold,
        Operator::ContainsFold
    );
    leaf_ctor!(not_contains_fold, Operator::NotContainsFold);

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: Vec<V>) -> Predicate {
        Predicate::leaf(
            field,
            Operator::In,
            Value::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn not_in<V: Into<Value>>(field: impl Into<String>, values: Vec<V>) -> Predicate {
        Predicate::leaf(
            field,
            Operator::NotIn,
            Value::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// `IS NULL` when `is_null` is true, `IS NOT NULL` otherwise.
    pub fn null(field: impl Into<String>, is_null: bool) -> Predicate {
        Predicate::leaf(field, Operator::Null, is_null)
    }

    pub fn and(predicates: Vec<Predicate>) -> Predicate {
        Predicate {
            and: predicates,
            ..Default::default()
        }
    }

    pub fn or(predicates: Vec<Predicate>) -> Predicate {
        Predicate {
            or: predicates,
            ..Default::default()
        }
    }

    pub fn with_relation_path(mut self, path: Vec<String>) -> Predicate {
        self.relation_path = path;
        self
    }

    pub fn is_composite(&self) -> bool {
        !self.and.is_empty() || !self.or.is_empty()
    }

    /// One predicate stays as is; several are grouped under an AND.
    pub(crate) fn group(mut predicates: Vec<Predicate>) -> Predicate {
        if predicates.len() == 1 {
            predicates.remove(0)
        } else {
            Predicate::and(predicates)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clone_is_deep() {
        let original = Predicate::and(vec![
            Predicate::eq("name", "a"),
            Predicate::or(vec![Predicate::gt("age", 1)]),
        ]);
        let mut cloned = original.clone();
        cloned.and.push(Predicate::lt("age", 10));
        cloned.and[1].or.clear();

        assert_eq!(original.and.len(), 2);
        assert_eq!(original.and[1].or.len(), 1);
        assert_ne!(original, cloned);
    }

    #[test]
    fn operator_names_round_trip_and_unknown_is_invalid() {
        for (op, name) in OPERATOR_NAMES {
            assert_eq!(Operator::from_name(name), *op);
        }
        assert_eq!(Operator::from_name("$between"), Operator::Invalid);
        let p: Predicate = serde_json::from_value(json!({"field": "a", "operator": "$regex"})).unwrap();
        assert_eq!(p.operator, Operator::Invalid);
    }

    #[test]
    fn check_value_reports_type() {
        let err = Operator::In.check_value("user", "age", &json!(5)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for user.age $in: expected array, got 5 (number)"
        );
        assert!(Operator::Null.check_value("user", "bio", &json!(true)).is_ok());
        assert!(Operator::Like.check_value("user", "bio", &json!(1)).is_err());
    }
}

//! Filter object → predicate list.
//!
//! ```json
//! {"name": {"$neq": "test", "$like": "test%"}, "age": {"$gt": 5}, "posts.title": "x", "$or": [{...}, {...}]}
//! ```
//!
//! Top-level entries are implicitly ANDed by the caller; several operators on one field are grouped under AND.

use crate::error::AppError;
use crate::predicate::{Operator, Predicate};
use crate::schema::{Builder, Field, Schema};
use serde_json::{Map, Value};

pub fn parse_filter_str(builder: &Builder, schema: &str, filter: &str) -> Result<Vec<Predicate>, AppError> {
    let value: Value = serde_json::from_str(filter)
        .map_err(|e| AppError::Filter(format!("invalid filter json: {}", e)))?;
    parse_filter(builder, schema, &value)
}

pub fn parse_filter(builder: &Builder, schema: &str, filter: &Value) -> Result<Vec<Predicate>, AppError> {
    let schema = builder.schema(schema)?;
    match filter {
        Value::Object(obj) => parse_object(builder, schema, obj),
        Value::Null => Ok(Vec::new()),
        other => Err(AppError::Filter(format!("filter must be an object, got {}", other))),
    }
}

fn parse_object(builder: &Builder, schema: &Schema, obj: &Map<String, Value>) -> Result<Vec<Predicate>, AppError> {
    let mut predicates = Vec::with_capacity(obj.len());
    for (key, value) in obj {
        match key.as_str() {
            "$and" | "$or" => {
                let groups = parse_group(builder, schema, key, value)?;
                // nothing to compose: `[]` or `[{}]` adds no constraint
                if groups.is_empty() {
                    continue;
                }
                predicates.push(if key == "$and" {
                    Predicate::and(groups)
                } else {
                    Predicate::or(groups)
                });
            }
            k if k.contains('.') => predicates.push(parse_relation_path(builder, schema, k, value)?),
            k => {
                let field = lookup(schema, k)?;
                if field.is_relation() {
                    return Err(AppError::Filter(format!(
                        "field `{}.{}` is a relation, filter on `{}.<field>` instead",
                        schema.name, k, k
                    )));
                }
                predicates.push(Predicate::group(parse_field_value(schema, field, value)?));
            }
        }
    }
    Ok(predicates)
}

/// Each array element is one filter object; its own predicates are ANDed.
fn parse_group(builder: &Builder, schema: &Schema, key: &str, value: &Value) -> Result<Vec<Predicate>, AppError> {
    let Value::Array(items) = value else {
        return Err(AppError::Filter(format!("{} must be an array, got {}", key, value)));
    };
    let mut groups = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(obj) = item else {
            return Err(AppError::Filter(format!("{} items must be objects, got {}", key, item)));
        };
        let inner = parse_object(builder, schema, obj)?;
        if !inner.is_empty() {
            groups.push(Predicate::group(inner));
        }
    }
    Ok(groups)
}

/// `a.b.c`: walk `a` and `b` as relation fields, apply the value to `c` on the last schema.
fn parse_relation_path(builder: &Builder, schema: &Schema, key: &str, value: &Value) -> Result<Predicate, AppError> {
    let segments: Vec<&str> = key.split('.').collect();
    let invalid = || AppError::Filter(format!("invalid relation filter path `{}`", key));
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
        return Err(invalid());
    }
    let Some((leaf, path)) = segments.split_last() else {
        return Err(invalid());
    };

    let mut current = schema;
    for seg in path {
        let field = lookup(current, seg)?;
        if !field.is_relation() {
            return Err(AppError::Filter(format!(
                "field `{}.{}` in path `{}` is not a relation",
                current.name, seg, key
            )));
        }
        let relation = builder.relation_of(&current.name, seg).ok_or_else(|| {
            AppError::Filter(format!("relation `{}.{}` not found", current.name, seg))
        })?;
        current = builder.schema(&relation.target_schema_name)?;
    }

    let field = lookup(current, leaf)?;
    if field.is_relation() {
        return Err(AppError::Filter(format!(
            "field `{}.{}` in path `{}` must be a column",
            current.name, leaf, key
        )));
    }
    let predicates = parse_field_value(current, field, value)?;
    Ok(Predicate::group(predicates).with_relation_path(path.iter().map(|s| s.to_string()).collect()))
}

fn lookup<'s>(schema: &'s Schema, name: &str) -> Result<&'s Field, AppError> {
    schema
        .field(name)
        .ok_or_else(|| AppError::Filter(format!("field `{}.{}` not found", schema.name, name)))
}

/// A primitive means `$eq`; an object maps operators to values.
fn parse_field_value(schema: &Schema, field: &Field, value: &Value) -> Result<Vec<Predicate>, AppError> {
    match value {
        Value::Object(ops) => {
            if ops.is_empty() {
                return Err(AppError::Filter(format!(
                    "empty operator object for field `{}.{}`",
                    schema.name, field.name
                )));
            }
            let mut predicates = Vec::with_capacity(ops.len());
            for (name, v) in ops {
                let op = Operator::from_name(name);
                if op == Operator::Invalid {
                    return Err(AppError::Filter(format!(
                        "unsupported operator `{}` on field `{}.{}`",
                        name, schema.name, field.name
                    )));
                }
                op.check_value(&schema.name, &field.name, v)?;
                predicates.push(Predicate::leaf(&field.name, op, v.clone()));
            }
            Ok(predicates)
        }
        Value::Array(_) => Err(AppError::Filter(format!(
            "array value for field `{}.{}` requires $in or $nin",
            schema.name, field.name
        ))),
        Value::Null => Ok(vec![Predicate::null(&field.name, true)]),
        primitive => Ok(vec![Predicate::eq(&field.name, primitive.clone())]),
    }
}

//! Getter/setter programs: compiled field expressions run against an entity.

use crate::entity::Entity;
use crate::error::AppError;
use crate::schema::Schema;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub struct ProgramArgs<'a> {
    pub schema: &'a str,
    pub field: &'a str,
    /// Current value of the field, `None` when the entity does not carry it.
    pub value: Option<&'a Value>,
    pub entity: &'a Entity,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgramOutput {
    pub value: Value,
    /// The field is removed from the entity.
    pub undefined: bool,
}

impl ProgramOutput {
    pub fn value(value: impl Into<Value>) -> Self {
        ProgramOutput {
            value: value.into(),
            undefined: false,
        }
    }

    pub fn undefined() -> Self {
        ProgramOutput {
            value: Value::Null,
            undefined: true,
        }
    }
}

#[async_trait]
pub trait Program: Send + Sync {
    async fn run(&self, args: ProgramArgs<'_>) -> Result<ProgramOutput, AppError>;
}

/// Turns a `getter`/`setter` source string into a runnable program.
pub trait ProgramCompiler {
    fn compile(&self, source: &str) -> Result<Arc<dyn Program>, AppError>;
}

#[derive(Clone)]
pub struct ProgramRef(Arc<dyn Program>);

impl ProgramRef {
    pub fn new(program: Arc<dyn Program>) -> Self {
        ProgramRef(program)
    }

    pub async fn run(&self, args: ProgramArgs<'_>) -> Result<ProgramOutput, AppError> {
        self.0.run(args).await
    }
}

impl fmt::Debug for ProgramRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgramRef(..)")
    }
}

fn apply(entity: &mut Entity, field: &str, out: ProgramOutput) {
    if out.undefined {
        entity.delete(field);
    } else {
        entity.set(field, out.value);
    }
}

/// Runs every getter of `schema` once on `entity`.
pub async fn apply_getters(schema: &Schema, entity: &mut Entity) -> Result<(), AppError> {
    for field in &schema.fields {
        let Some(program) = &field.getter_program else {
            continue;
        };
        let out = program
            .run(ProgramArgs {
                schema: &schema.name,
                field: &field.name,
                value: entity.get(&field.name),
                entity,
            })
            .await
            .map_err(|e| e.context(format!("getter {}.{}", schema.name, field.name)))?;
        apply(entity, &field.name, out);
    }
    Ok(())
}

const SET_BLOCK: &str = "$set";

/// Runs setters on `entity`. With `only_present` (updates), fields the entity does not carry are
/// skipped, and a field assigned inside a `$set` block is rewritten in that block.
pub async fn apply_setters(schema: &Schema, entity: &mut Entity, only_present: bool) -> Result<(), AppError> {
    for field in &schema.fields {
        let Some(program) = &field.setter_program else {
            continue;
        };
        let context = || format!("setter {}.{}", schema.name, field.name);
        if !only_present || entity.contains(&field.name) {
            let out = program
                .run(ProgramArgs {
                    schema: &schema.name,
                    field: &field.name,
                    value: entity.get(&field.name),
                    entity,
                })
                .await
                .map_err(|e| e.context(context()))?;
            apply(entity, &field.name, out);
        }
        if !only_present {
            continue;
        }
        let Some(value) = entity.get(SET_BLOCK).and_then(|block| block.get(field.name.as_str())) else {
            continue;
        };
        let out = program
            .run(ProgramArgs {
                schema: &schema.name,
                field: &field.name,
                value: Some(value),
                entity,
            })
            .await
            .map_err(|e| e.context(context()))?;
        if let Some(Value::Object(block)) = entity.get_mut(SET_BLOCK) {
            if out.undefined {
                block.shift_remove(field.name.as_str());
            } else {
                block.insert(field.name.clone(), out.value);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType};

    struct Upper;

    #[async_trait]
    impl Program for Upper {
        async fn run(&self, args: ProgramArgs<'_>) -> Result<ProgramOutput, AppError> {
            Ok(match args.value.and_then(Value::as_str) {
                Some(s) => ProgramOutput::value(s.to_uppercase()),
                None => ProgramOutput::undefined(),
            })
        }
    }

    fn schema() -> Schema {
        Schema::new(
            "user",
            vec![Field {
                getter_program: Some(ProgramRef::new(Arc::new(Upper))),
                setter_program: Some(ProgramRef::new(Arc::new(Upper))),
                ..Field::new("name", FieldType::String)
            }],
        )
    }

    #[tokio::test]
    async fn getter_rewrites_or_removes_field() {
        let s = schema();
        let mut e = Entity::new();
        e.set("name", "ada");
        apply_getters(&s, &mut e).await.unwrap();
        assert_eq!(e.get("name"), Some(&Value::from("ADA")));

        let mut e = Entity::new();
        e.set("name", 1);
        apply_getters(&s, &mut e).await.unwrap();
        assert!(!e.contains("name"));
    }

    #[tokio::test]
    async fn setter_skips_absent_fields_on_update() {
        let s = schema();
        let mut e = Entity::new();
        apply_setters(&s, &mut e, true).await.unwrap();
        assert!(e.is_empty());
    }

    #[tokio::test]
    async fn setter_rewrites_values_inside_set_block() {
        let s = schema();
        let mut e = Entity::from_value(serde_json::json!({"$set": {"name": "ada"}, "$add": {"name": "x"}})).unwrap();
        apply_setters(&s, &mut e, true).await.unwrap();
        assert_eq!(e.get("$set"), Some(&serde_json::json!({"name": "ADA"})));
        assert_eq!(e.get("$add"), Some(&serde_json::json!({"name": "x"})));
        assert!(!e.contains("name"));

        let mut e = Entity::from_value(serde_json::json!({"$set": {"name": 7}})).unwrap();
        apply_setters(&s, &mut e, true).await.unwrap();
        assert_eq!(e.get("$set"), Some(&serde_json::json!({})));
    }
}

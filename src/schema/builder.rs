//! Schema registry: holds every schema, derives relations, junction schemas and FK fields.

use crate::db::{ProgramCompiler, ProgramRef};
use crate::error::{AppError, SchemaError};
use crate::schema::field::{Field, FIELD_ID};
use crate::schema::relation::{FkColumns, Relation, RelationType};
use crate::schema::{validate, Schema};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Built once, then shared read-only. Reloading means building a new `Builder` and swapping it in.
#[derive(Clone, Debug, Default)]
pub struct Builder {
    schemas: IndexMap<String, Schema>,
    relations: Vec<Relation>,
    relation_by_name: HashMap<String, usize>,
    relation_by_field: HashMap<(String, String), usize>,
    initialized: bool,
}

impl Builder {
    pub fn new() -> Self {
        Builder::default()
    }

    /// Adds all schemas and runs `init`.
    pub fn from_schemas(schemas: Vec<Schema>) -> Result<Self, SchemaError> {
        let mut builder = Builder::new();
        for s in schemas {
            builder.add_schema(s)?;
        }
        builder.init()?;
        Ok(builder)
    }

    pub fn add_schema(&mut self, schema: Schema) -> Result<(), SchemaError> {
        if let Some(existing) = self.schemas.get(&schema.name) {
            if existing.is_system_schema || schema.is_system_schema {
                return Err(SchemaError::DuplicateSystemSchema(schema.name));
            }
            return Err(SchemaError::DuplicateSchema(schema.name));
        }
        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn schema(&self, name: &str) -> Result<&Schema, SchemaError> {
        self.schemas
            .get(name)
            .ok_or_else(|| SchemaError::NotFound(name.to_string()))
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Looks a relation up by its `schemaA.fieldA-schemaB.fieldB` name.
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relation_by_name.get(name).map(|&i| &self.relations[i])
    }

    /// The derived relation declared by `schema.field`.
    pub fn relation_of(&self, schema: &str, field: &str) -> Option<&Relation> {
        self.relation_by_field
            .get(&(schema.to_string(), field.to_string()))
            .map(|&i| &self.relations[i])
    }

    pub fn back_ref(&self, relation: &Relation) -> Option<&Relation> {
        relation.back_ref.map(|i| &self.relations[i])
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Derives relations, then FK fields. Must be called exactly once; repeated calls are no-ops.
    pub fn init(&mut self) -> Result<(), SchemaError> {
        if self.initialized {
            return Ok(());
        }
        for schema in self.schemas.values_mut() {
            validate(schema)?;
            schema.init()?;
        }
        self.create_relations()?;
        self.resolve_back_refs()?;
        self.create_fk_fields()?;
        self.write_back_relations();
        self.initialized = true;
        tracing::debug!(
            schemas = self.schemas.len(),
            relations = self.relations.len(),
            "schema registry initialized"
        );
        Ok(())
    }

    fn create_relations(&mut self) -> Result<(), SchemaError> {
        let declared: Vec<(String, String, Relation)> = self
            .schemas
            .values()
            .flat_map(|s| {
                s.relation_fields().filter_map(move |f| {
                    f.relation.clone().map(|r| (s.name.clone(), f.name.clone(), r))
                })
            })
            .collect();

        self.relations.clear();
        self.relation_by_name.clear();
        self.relation_by_field.clear();

        for (schema_name, field_name, mut r) in declared {
            r.schema_name = schema_name.clone();
            r.field_name = field_name.clone();
            if !self.schemas.contains_key(&r.target_schema_name) {
                return Err(SchemaError::RelationNodeNotFound {
                    schema: schema_name,
                    field: field_name,
                    target: r.target_schema_name,
                });
            }
            if r.is_m2m() {
                let (junction, _) = self.create_m2m_junction_schema(&schema_name, &r)?;
                r.junction_table = junction.namespace.clone();
                r.fk_columns = Some(junction_columns(&schema_name, &r));
            }
            let idx = self.relations.len();
            self.relation_by_name.insert(r.name(), idx);
            self.relation_by_field.insert((schema_name, field_name), idx);
            self.relations.push(r);
        }
        Ok(())
    }

    /// Returns the junction schema for a many-to-many relation, creating and registering it on first use.
    ///
    /// The first FK is named after the relation field (the schema itself for bidirectional relations),
    /// the second after the target field; the table is both names sorted and joined with `_`.
    pub fn create_m2m_junction_schema(
        &mut self,
        current_schema: &str,
        relation: &Relation,
    ) -> Result<(Schema, bool), SchemaError> {
        if !self.schemas.contains_key(&relation.target_schema_name) {
            return Err(SchemaError::RelationNodeNotFound {
                schema: current_schema.to_string(),
                field: relation.field_name.clone(),
                target: relation.target_schema_name.clone(),
            });
        }
        let fk1 = if relation.is_bidi() {
            current_schema.to_string()
        } else {
            relation.field_name.clone()
        };
        let fk2 = relation.target_field_name.clone();
        let mut names = [fk1, fk2];
        names.sort();
        let table = names.join("_");

        if let Some(existing) = self.schemas.values().find(|s| s.namespace == table) {
            if !existing.is_junction_schema {
                return Err(SchemaError::DuplicateSchema(table));
            }
            return Ok((existing.clone(), true));
        }

        let mut junction = Schema {
            is_junction_schema: true,
            disable_timestamp: true,
            is_system_schema: true,
            ..Schema::new(
                table.clone(),
                names
                    .iter()
                    .map(|n| Field::foreign_key(n, false, false))
                    .collect(),
            )
        };
        junction.init()?;
        self.schemas.insert(table, junction.clone());
        Ok((junction, false))
    }

    /// Runs after every relation of every schema is collected: a back-ref may be declared on a later schema.
    fn resolve_back_refs(&mut self) -> Result<(), SchemaError> {
        for i in 0..self.relations.len() {
            let r = &self.relations[i];
            let back_ref_name = r.back_ref_name();
            let Some(&j) = self.relation_by_name.get(&back_ref_name) else {
                return Err(SchemaError::InvalidBackRef {
                    name: r.name(),
                    back_ref: back_ref_name,
                });
            };
            let back = &self.relations[j];
            if back.type_ != r.type_ {
                return Err(SchemaError::Invalid {
                    schema: r.schema_name.clone(),
                    message: format!(
                        "relation {} is {} but its back-ref {} is {}",
                        r.name(),
                        r.type_,
                        back.name(),
                        back.type_
                    ),
                });
            }
            if !r.is_m2m() && !r.is_bidi() && r.owner == back.owner {
                return Err(SchemaError::Invalid {
                    schema: r.schema_name.clone(),
                    message: format!(
                        "relation {} and its back-ref must have exactly one owner",
                        r.name()
                    ),
                });
            }
            self.relations[i].back_ref = Some(j);
        }
        Ok(())
    }

    fn create_fk_fields(&mut self) -> Result<(), SchemaError> {
        for i in 0..self.relations.len() {
            if self.relations[i].is_m2m() {
                continue;
            }
            let r = self.relations[i].clone();
            if r.has_fks() {
                let fk_name = r.fk_field_name();
                let schema = self
                    .schemas
                    .get_mut(&r.schema_name)
                    .ok_or_else(|| SchemaError::NotFound(r.schema_name.clone()))?;
                match schema.field_mut(&fk_name) {
                    Some(existing) if existing.is_relation() => {
                        return Err(SchemaError::Invalid {
                            schema: r.schema_name.clone(),
                            message: format!("field {} clashes with the FK of {}", fk_name, r.name()),
                        });
                    }
                    Some(existing) => {
                        existing.type_ = crate::schema::FieldType::Uint64;
                        existing.is_fk = true;
                    }
                    None => schema.insert_fk_field(Field::foreign_key(
                        &fk_name,
                        r.optional,
                        r.type_ == RelationType::O2O,
                    )),
                }
                schema.refresh_columns();
                self.relations[i].fk_columns = Some(FkColumns {
                    current_column: fk_name,
                    target_column: FIELD_ID.to_string(),
                });
            } else {
                let back_fk = r
                    .back_ref
                    .map(|j| self.relations[j].fk_field_name())
                    .unwrap_or_default();
                self.relations[i].fk_columns = Some(FkColumns {
                    current_column: FIELD_ID.to_string(),
                    target_column: back_fk,
                });
            }
        }
        Ok(())
    }

    fn write_back_relations(&mut self) {
        for r in &self.relations {
            if let Some(field) = self
                .schemas
                .get_mut(&r.schema_name)
                .and_then(|s| s.field_mut(&r.field_name))
            {
                field.relation = Some(r.clone());
            }
        }
    }

    /// Compiles getter/setter sources into programs attached to their fields.
    pub fn compile_programs(&mut self, compiler: &dyn ProgramCompiler) -> Result<(), AppError> {
        for schema in self.schemas.values_mut() {
            let schema_name = schema.name.clone();
            for field in schema.fields.iter_mut() {
                if let Some(src) = field.getter.as_deref() {
                    let program = compiler
                        .compile(src)
                        .map_err(|e| e.context(format!("getter {}.{}", schema_name, field.name)))?;
                    field.getter_program = Some(ProgramRef::new(program));
                }
                if let Some(src) = field.setter.as_deref() {
                    let program = compiler
                        .compile(src)
                        .map_err(|e| e.context(format!("setter {}.{}", schema_name, field.name)))?;
                    field.setter_program = Some(ProgramRef::new(program));
                }
            }
        }
        Ok(())
    }
}

/// Junction columns as (holds current ids, holds target ids). Bidirectional relations swap to the schema-named column.
fn junction_columns(current_schema: &str, r: &Relation) -> FkColumns {
    if r.is_bidi() {
        FkColumns {
            current_column: current_schema.to_string(),
            target_column: r.field_name.clone(),
        }
    } else {
        FkColumns {
            current_column: r.target_field_name.clone(),
            target_column: r.field_name.clone(),
        }
    }
}

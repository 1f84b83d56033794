//! Physical table specs derived from the registry, and the DDL that applies them.
//!
//! Order follows PostgreSQL dependencies: renames, then tables, then foreign keys.

use crate::error::AppError;
use crate::schema::{Builder, Field, FieldType, Schema, FIELD_CREATED_AT, FIELD_ID, FIELD_UPDATED_AT};
use crate::sql::quoted;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub unique: bool,
    pub default: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
    pub on_delete: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenameSet {
    /// (from, to)
    pub tables: Vec<(String, String)>,
    /// (table, from, to)
    pub columns: Vec<(String, String, String)>,
}

impl RenameSet {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }
}

fn sql_type(field: &Field) -> String {
    if field.name == FIELD_ID && !field.is_fk {
        return "BIGSERIAL".into();
    }
    match field.type_ {
        FieldType::Bool => "BOOLEAN".into(),
        FieldType::Time => "TIMESTAMPTZ".into(),
        FieldType::Json => "JSONB".into(),
        FieldType::Uuid => "UUID".into(),
        FieldType::Bytes => "BYTEA".into(),
        FieldType::Enum | FieldType::Text => "TEXT".into(),
        FieldType::String => format!("VARCHAR({})", field.size.unwrap_or(255)),
        FieldType::Int8 | FieldType::Int16 | FieldType::Uint8 => "SMALLINT".into(),
        FieldType::Int32 | FieldType::Uint16 => "INTEGER".into(),
        FieldType::Float32 => "REAL".into(),
        FieldType::Float64 => "DOUBLE PRECISION".into(),
        _ => "BIGINT".into(),
    }
}

fn default_literal(field: &Field) -> Option<String> {
    if field.name == FIELD_CREATED_AT || field.name == FIELD_UPDATED_AT {
        return Some("NOW()".into());
    }
    match field.default.as_ref()? {
        Value::Null => None,
        Value::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        Value::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.into()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(format!("'{}'", other.to_string().replace('\'', "''"))),
    }
}

fn table_spec(builder: &Builder, schema: &Schema) -> TableSpec {
    let columns = schema
        .fields
        .iter()
        .filter(|f| f.has_column())
        .map(|f| ColumnSpec {
            name: f.name.clone(),
            sql_type: sql_type(f),
            nullable: f.optional,
            unique: f.unique && f.name != FIELD_ID,
            default: default_literal(f),
        })
        .collect();

    let mut foreign_keys = Vec::new();
    let primary_key = if schema.is_junction_schema {
        for r in builder.relations().iter().filter(|r| r.is_m2m() && r.junction_table == schema.namespace) {
            for (column, target) in [
                (r.current_column(), &r.schema_name),
                (r.target_column(), &r.target_schema_name),
            ] {
                let Ok(target) = builder.schema(target) else { continue };
                if foreign_keys.iter().any(|fk: &ForeignKeyRef| fk.column == column) {
                    continue;
                }
                foreign_keys.push(ForeignKeyRef {
                    column: column.to_string(),
                    ref_table: target.namespace.clone(),
                    ref_column: FIELD_ID.into(),
                    on_delete: "CASCADE",
                });
            }
        }
        schema.db_columns.clone()
    } else {
        for f in schema.relation_fields() {
            let Some(r) = builder.relation_of(&schema.name, &f.name) else { continue };
            if r.is_m2m() || !r.has_fks() {
                continue;
            }
            let Ok(target) = builder.schema(&r.target_schema_name) else { continue };
            foreign_keys.push(ForeignKeyRef {
                column: r.current_column().to_string(),
                ref_table: target.namespace.clone(),
                ref_column: FIELD_ID.into(),
                on_delete: if r.optional { "SET NULL" } else { "CASCADE" },
            });
        }
        vec![FIELD_ID.to_string()]
    };

    TableSpec {
        name: schema.namespace.clone(),
        columns,
        primary_key,
        foreign_keys,
    }
}

/// One spec per schema, junction schemas included.
pub fn table_specs(builder: &Builder) -> Vec<TableSpec> {
    builder.schemas().map(|s| table_spec(builder, s)).collect()
}

/// Renames declared through `renamed_from` on schemas and fields.
pub fn renames(builder: &Builder) -> RenameSet {
    let mut set = RenameSet::default();
    for s in builder.schemas() {
        if let Some(from) = s.renamed_from.as_ref().filter(|from| **from != s.namespace) {
            set.tables.push((from.clone(), s.namespace.clone()));
        }
        for f in s.fields.iter().filter(|f| f.has_column()) {
            if let Some(from) = f.renamed_from.as_ref().filter(|from| **from != f.name) {
                set.columns.push((s.namespace.clone(), from.clone(), f.name.clone()));
            }
        }
    }
    set
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DdlPlan {
    pub renames: Vec<String>,
    pub tables: Vec<String>,
    pub constraints: Vec<String>,
}

pub fn ddl_statements(tables: &[TableSpec], renames: &RenameSet) -> DdlPlan {
    let mut plan = DdlPlan::default();
    for (from, to) in &renames.tables {
        plan.renames
            .push(format!("ALTER TABLE {} RENAME TO {}", quoted(from), quoted(to)));
    }
    for (table, from, to) in &renames.columns {
        plan.renames.push(format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quoted(table),
            quoted(from),
            quoted(to)
        ));
    }

    for t in tables {
        let mut defs: Vec<String> = t
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quoted(&c.name), c.sql_type);
                if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                if c.unique {
                    def.push_str(" UNIQUE");
                }
                if let Some(d) = &c.default {
                    def.push_str(" DEFAULT ");
                    def.push_str(d);
                }
                def
            })
            .collect();
        let pk: Vec<String> = t.primary_key.iter().map(|c| quoted(c)).collect();
        defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        plan.tables.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            quoted(&t.name),
            defs.join(",\n  ")
        ));

        for fk in &t.foreign_keys {
            plan.constraints.push(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                quoted(&t.name),
                quoted(&format!("fk_{}_{}", t.name, fk.column)),
                quoted(&fk.column),
                quoted(&fk.ref_table),
                quoted(&fk.ref_column),
                fk.on_delete
            ));
        }
    }
    plan
}

/// Applies table specs and renames. Success or failure only; no partial-apply contract.
#[async_trait]
pub trait Migrator: Send + Sync {
    async fn apply(&self, tables: &[TableSpec], renames: &RenameSet) -> Result<(), AppError>;
}

pub struct PgMigrator {
    pool: PgPool,
}

impl PgMigrator {
    pub fn new(pool: PgPool) -> Self {
        PgMigrator { pool }
    }
}

#[async_trait]
impl Migrator for PgMigrator {
    async fn apply(&self, tables: &[TableSpec], renames: &RenameSet) -> Result<(), AppError> {
        let plan = ddl_statements(tables, renames);
        // renames and constraints are not idempotent: a second run finds them already applied
        for sql in &plan.renames {
            if let Err(e) = sqlx::query(sql).execute(&self.pool).await {
                tracing::debug!(sql = %sql, error = %e, "rename skipped");
            }
        }
        for sql in &plan.tables {
            tracing::info!(sql = %sql, "ddl");
            sqlx::query(sql).execute(&self.pool).await?;
        }
        for sql in &plan.constraints {
            if let Err(e) = sqlx::query(sql).execute(&self.pool).await {
                tracing::debug!(sql = %sql, error = %e, "constraint skipped");
            }
        }
        Ok(())
    }
}

/// Derives specs and renames from the registry and hands them to the migrator.
pub async fn migrate(builder: &Builder, migrator: &dyn Migrator) -> Result<(), AppError> {
    migrator.apply(&table_specs(builder), &renames(builder)).await
}

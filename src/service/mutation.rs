//! Create / update / delete compilation and execution.
//!
//! Update payloads carry four reserved blocks next to plain field assignments:
//! `$set` (replace), `$add` (increment or attach), `$clear` (null or detach) and `$expr`
//! (raw SQL expression). Relation changes land either on this table's FK column or on the
//! target / junction table, depending on which side holds the foreign key.

use crate::db::{apply_setters, Executor, Transaction};
use crate::entity::{value_as_u64, Entity};
use crate::error::{AppError, ResultExt};
use crate::predicate::{parse_filter, Predicate};
use crate::schema::{Builder, Field, Relation, RelationType, Schema, FIELD_CREATED_AT, FIELD_ID, FIELD_UPDATED_AT};
use crate::service::tx::finish;
use crate::service::Model;
use crate::sql::{self, Assignment, ColumnValue};
use serde_json::Value;
use std::sync::Arc;

const BLOCK_SET: &str = "$set";
const BLOCK_ADD: &str = "$add";
const BLOCK_CLEAR: &str = "$clear";
const BLOCK_EXPR: &str = "$expr";

#[derive(Clone, Debug, PartialEq)]
pub enum EdgeOp {
    /// Attach the referenced targets.
    Add(Vec<u64>),
    /// Detach all targets, or only the referenced ones.
    Clear(Option<Vec<u64>>),
}

/// An edge change that is applied to the target or junction table, after the row itself is written.
#[derive(Clone, Debug)]
pub struct EdgeMutation {
    pub relation: Relation,
    pub op: EdgeOp,
}

#[derive(Clone, Debug, Default)]
pub struct MutationSpec {
    pub assignments: Vec<Assignment>,
    pub edges: Vec<EdgeMutation>,
}

impl MutationSpec {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.edges.is_empty()
    }

    fn assigns(&self, column: &str) -> bool {
        self.assignments.iter().any(|a| a.column == column)
    }
}

/// Ids of referenced entities: an object with `id`, a bare id, or an array of either.
fn refs(value: &Value) -> Result<Vec<u64>, AppError> {
    let one = |v: &Value| -> Result<u64, AppError> {
        let id = match v {
            Value::Object(map) => map.get(FIELD_ID).and_then(value_as_u64),
            other => value_as_u64(other),
        };
        id.filter(|id| *id != 0)
            .ok_or_else(|| AppError::Validation("relation entity has no ID".into()))
    };
    match value {
        Value::Array(items) => items.iter().map(one).collect(),
        Value::Null => Ok(Vec::new()),
        v => Ok(vec![one(v)?]),
    }
}

/// The single target id of a to-one reference held in this table's FK column.
fn single_ref(relation: &Relation, value: &Value) -> Result<Option<u64>, AppError> {
    let ids = refs(value)?;
    if ids.len() > 1 {
        return Err(AppError::Validation(format!(
            "relation {} holds a single entity, got {}",
            relation.name(),
            ids.len()
        )));
    }
    Ok(ids.into_iter().next())
}

fn lookup<'s>(builder: &'s Builder, schema: &'s Schema, name: &str) -> Result<(&'s Field, Option<&'s Relation>), AppError> {
    let field = schema
        .field(name)
        .ok_or_else(|| AppError::Validation(format!("field `{}.{}` not found", schema.name, name)))?;
    if field.is_relation() {
        let relation = builder.relation_of(&schema.name, name).ok_or_else(|| {
            AppError::Validation(format!("relation `{}.{}` not found", schema.name, name))
        })?;
        return Ok((field, Some(relation)));
    }
    Ok((field, None))
}

pub fn compile_create(builder: &Builder, schema: &Schema, entity: &Entity) -> Result<MutationSpec, AppError> {
    if schema.is_junction_schema {
        return Err(AppError::Validation(format!(
            "junction schema {} is written through its relations",
            schema.name
        )));
    }
    if entity.id().is_some() {
        return Err(AppError::Validation("cannot create entity with existing ID".into()));
    }
    let mut spec = MutationSpec::default();
    for (key, value) in entity.iter() {
        if key == FIELD_ID {
            continue;
        }
        let (field, relation) = lookup(builder, schema, key)?;
        match relation {
            Some(r) if !r.is_m2m() && r.has_fks() => {
                if let Some(id) = single_ref(r, value).context(key.clone())? {
                    spec.assignments
                        .push(Assignment::new(r.current_column(), ColumnValue::Bind(Value::from(id))));
                }
            }
            Some(r) => {
                let ids = refs(value).context(key.clone())?;
                if !ids.is_empty() {
                    spec.edges.push(EdgeMutation {
                        relation: r.clone(),
                        op: EdgeOp::Add(ids),
                    });
                }
            }
            None => spec
                .assignments
                .push(Assignment::new(&field.name, ColumnValue::Bind(value.clone()))),
        }
    }
    if schema.has_timestamps() {
        for ts in [FIELD_CREATED_AT, FIELD_UPDATED_AT] {
            if !spec.assigns(ts) {
                spec.assignments.push(Assignment::new(ts, ColumnValue::Now));
            }
        }
    }
    Ok(spec)
}

/// Compiles an update payload. Column order: plain sets, then `$add`, `$clear`, `$expr`, then `updated_at`.
/// `updated_at` is stamped only when some column of this table changes.
pub fn compile_update(builder: &Builder, schema: &Schema, entity: &Entity) -> Result<MutationSpec, AppError> {
    let mut sets = MutationSpec::default();
    let mut adds = MutationSpec::default();
    let mut clears = MutationSpec::default();
    let mut exprs = MutationSpec::default();

    for (key, value) in entity.iter() {
        match key.as_str() {
            BLOCK_SET | BLOCK_ADD | BLOCK_CLEAR | BLOCK_EXPR => {
                let Value::Object(block) = value else {
                    return Err(AppError::Validation(format!("{} must be an object, got {}", key, value)));
                };
                for (name, v) in block {
                    let ctx = format!("{}.{}", key, name);
                    match key.as_str() {
                        BLOCK_SET => compile_set(builder, schema, name, v, &mut sets),
                        BLOCK_ADD => compile_add(builder, schema, name, v, &mut adds),
                        BLOCK_CLEAR => compile_clear(builder, schema, name, v, &mut clears),
                        _ => compile_expr(schema, name, v, &mut exprs),
                    }
                    .context(ctx)?;
                }
            }
            name => compile_set(builder, schema, name, value, &mut sets).context(name.to_string())?,
        }
    }

    let mut spec = MutationSpec::default();
    for part in [sets, adds, clears, exprs] {
        spec.assignments.extend(part.assignments);
        spec.edges.extend(part.edges);
    }
    // junction and target-table edits leave this row's columns alone
    if !spec.assignments.is_empty() && schema.has_timestamps() && !spec.assigns(FIELD_UPDATED_AT) {
        spec.assignments.push(Assignment::new(FIELD_UPDATED_AT, ColumnValue::Now));
    }
    Ok(spec)
}

fn compile_set(builder: &Builder, schema: &Schema, name: &str, value: &Value, spec: &mut MutationSpec) -> Result<(), AppError> {
    if name == FIELD_ID {
        return Err(AppError::Validation("id cannot be updated".into()));
    }
    let (field, relation) = lookup(builder, schema, name)?;
    match relation {
        Some(r) if !r.is_m2m() && r.has_fks() => {
            let v = match single_ref(r, value)? {
                Some(id) => ColumnValue::Bind(Value::from(id)),
                None => ColumnValue::Null,
            };
            spec.assignments.push(Assignment::new(r.current_column(), v));
        }
        Some(r) => {
            spec.edges.push(EdgeMutation {
                relation: r.clone(),
                op: EdgeOp::Clear(None),
            });
            let ids = refs(value)?;
            if !ids.is_empty() {
                spec.edges.push(EdgeMutation {
                    relation: r.clone(),
                    op: EdgeOp::Add(ids),
                });
            }
        }
        None => spec
            .assignments
            .push(Assignment::new(&field.name, ColumnValue::Bind(value.clone()))),
    }
    Ok(())
}

fn compile_add(builder: &Builder, schema: &Schema, name: &str, value: &Value, spec: &mut MutationSpec) -> Result<(), AppError> {
    let (field, relation) = lookup(builder, schema, name)?;
    match relation {
        // a to-one slot can only be replaced
        Some(r) if !r.is_m2m() && (r.has_fks() || r.type_ == RelationType::O2O) => {
            compile_set(builder, schema, name, value, spec)
        }
        Some(r) => {
            let ids = refs(value)?;
            if !ids.is_empty() {
                spec.edges.push(EdgeMutation {
                    relation: r.clone(),
                    op: EdgeOp::Add(ids),
                });
            }
            Ok(())
        }
        None => {
            if !field.type_.is_numeric() {
                return Err(AppError::Validation(format!(
                    "field `{}.{}` is {}, only numeric fields can be incremented",
                    schema.name, name, field.type_
                )));
            }
            if !value.is_number() {
                return Err(AppError::Validation(format!("expected a number, got {}", value)));
            }
            spec.assignments
                .push(Assignment::new(&field.name, ColumnValue::Add(value.clone())));
            Ok(())
        }
    }
}

fn compile_clear(builder: &Builder, schema: &Schema, name: &str, value: &Value, spec: &mut MutationSpec) -> Result<(), AppError> {
    let (field, relation) = lookup(builder, schema, name)?;
    let all = match value {
        Value::Bool(false) => return Ok(()),
        Value::Bool(true) => true,
        _ => false,
    };
    match relation {
        Some(r) if !r.is_m2m() && r.has_fks() => {
            if !all {
                refs(value)?;
            }
            spec.assignments.push(Assignment::new(r.current_column(), ColumnValue::Null));
        }
        Some(r) => {
            let op = if all {
                EdgeOp::Clear(None)
            } else {
                EdgeOp::Clear(Some(refs(value)?))
            };
            spec.edges.push(EdgeMutation {
                relation: r.clone(),
                op,
            });
        }
        None => {
            if !all {
                return Err(AppError::Validation(format!("expected true, got {}", value)));
            }
            spec.assignments.push(Assignment::new(&field.name, ColumnValue::Null));
        }
    }
    Ok(())
}

fn compile_expr(schema: &Schema, name: &str, value: &Value, spec: &mut MutationSpec) -> Result<(), AppError> {
    if !schema.has_column(name) {
        return Err(AppError::Validation(format!("field `{}.{}` is not a column", schema.name, name)));
    }
    let Value::String(expr) = value else {
        return Err(AppError::Validation(format!("expected an SQL expression string, got {}", value)));
    };
    spec.assignments.push(Assignment::new(name, ColumnValue::Expr(expr.clone())));
    Ok(())
}

/// Writes one edge change for the given parent rows.
async fn apply_edge(executor: &dyn Executor, builder: &Builder, edge: &EdgeMutation, parents: &[u64]) -> Result<(), AppError> {
    let nothing = match &edge.op {
        EdgeOp::Add(targets) | EdgeOp::Clear(Some(targets)) => targets.is_empty(),
        EdgeOp::Clear(None) => false,
    };
    if parents.is_empty() || nothing {
        return Ok(());
    }
    let r = &edge.relation;
    if r.is_m2m() {
        let bidi = r.is_bidi();
        let q = match &edge.op {
            EdgeOp::Clear(targets) => sql::delete_junction(
                &r.junction_table,
                r.current_column(),
                r.target_column(),
                parents,
                targets.as_deref(),
                bidi,
            ),
            EdgeOp::Add(targets) => {
                let mut pairs: Vec<(u64, u64)> = Vec::new();
                for p in parents {
                    for t in targets {
                        pairs.push((*p, *t));
                        if bidi && p != t {
                            pairs.push((*t, *p));
                        }
                    }
                }
                sql::insert_junction(&r.junction_table, r.current_column(), r.target_column(), &pairs)
            }
        };
        executor.exec(&q).await?;
        return Ok(());
    }

    let target = builder.schema(&r.target_schema_name)?;
    let fk = r.target_column();
    let q = match &edge.op {
        EdgeOp::Clear(targets) => sql::update_fk_in(&target.namespace, fk, None, fk, parents, targets.as_deref()),
        EdgeOp::Add(targets) => {
            let [parent] = parents else {
                return Err(AppError::Validation(format!(
                    "cannot attach {} to {} rows: each target holds a single parent",
                    r.field_name,
                    parents.len()
                )));
            };
            sql::update_fk_in(&target.namespace, fk, Some(*parent), FIELD_ID, targets, None)
        }
    };
    executor.exec(&q).await?;
    Ok(())
}

/// The executor to write through: a fresh transaction when several statements must apply together
/// and the caller is not already inside one.
async fn scoped_executor(
    executor: &Arc<dyn Executor>,
    needs_tx: bool,
) -> Result<(Arc<dyn Executor>, Option<Arc<dyn Transaction>>), AppError> {
    if !needs_tx || executor.is_tx() {
        return Ok((executor.clone(), None));
    }
    let tx = executor.begin().await?;
    Ok((tx.clone().executor(), Some(tx)))
}

async fn settle<T>(tx: Option<Arc<dyn Transaction>>, result: Result<T, AppError>) -> Result<T, AppError> {
    match tx {
        Some(tx) => finish(tx, result).await,
        None => result,
    }
}

pub(crate) async fn create(model: &Model, mut entity: Entity) -> Result<u64, AppError> {
    let client = model.client();
    let schema = model.schema();
    let builder = model.builder();
    client.hooks().pre_create(schema, &mut entity)?;
    apply_setters(schema, &mut entity, false).await?;
    let spec = compile_create(builder, schema, &entity)?;

    let (exec, tx) = scoped_executor(client.executor(), !spec.edges.is_empty()).await?;
    let result = async {
        let q = sql::insert(schema, &spec.assignments);
        let rows = exec.query(&q).await?;
        let id = rows
            .first()
            .and_then(Entity::id)
            .ok_or_else(|| AppError::Consistency(format!("insert into {} returned no id", schema.name)))?;
        for edge in &spec.edges {
            apply_edge(exec.as_ref(), builder, edge, &[id])
                .await
                .context(edge.relation.field_name.clone())?;
        }
        Ok::<_, AppError>(id)
    }
    .await;
    let id = settle(tx, result).await?;

    client.hooks().post_create(schema, &entity, id)?;
    Ok(id)
}

/// Update or delete rows of one schema matched by predicates.
#[derive(Clone, Debug)]
pub struct Mutation {
    model: Model,
    predicates: Vec<Predicate>,
}

impl Mutation {
    pub(crate) fn new(model: Model) -> Self {
        Mutation {
            model,
            predicates: Vec::new(),
        }
    }

    pub fn where_(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    pub fn filter(mut self, filter: &Value) -> Result<Self, AppError> {
        let predicates = parse_filter(self.model.builder(), &self.model.schema().name, filter)?;
        self.predicates.extend(predicates);
        Ok(self)
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub async fn update_json(&self, json: &str) -> Result<u64, AppError> {
        self.update(Entity::from_json(json)?).await
    }

    /// Returns the row count reported by the primary UPDATE. Edge-table writes do not change it.
    pub async fn update(&self, mut entity: Entity) -> Result<u64, AppError> {
        let client = self.model.client();
        let schema = self.model.schema();
        let builder = self.model.builder();
        let predicates = &self.predicates;
        client.hooks().pre_update(schema, predicates, &mut entity)?;
        apply_setters(schema, &mut entity, true).await?;
        let spec = compile_update(builder, schema, &entity)?;
        if spec.is_empty() {
            return Ok(0);
        }

        let (exec, tx) = scoped_executor(client.executor(), !spec.edges.is_empty()).await?;
        let result = async {
            if spec.edges.is_empty() {
                let q = sql::update(builder, schema, &spec.assignments, predicates)?;
                return exec.exec(&q).await;
            }
            let q = sql::select_ids(builder, schema, predicates)?;
            let ids: Vec<u64> = exec.query(&q).await?.iter().filter_map(Entity::id).collect();
            if ids.is_empty() {
                return Ok(0);
            }
            let affected = if spec.assignments.is_empty() {
                ids.len() as u64
            } else {
                let by_id = [Predicate::is_in(FIELD_ID, ids.clone())];
                let q = sql::update(builder, schema, &spec.assignments, &by_id)?;
                exec.exec(&q).await?
            };
            for edge in &spec.edges {
                apply_edge(exec.as_ref(), builder, edge, &ids)
                    .await
                    .context(edge.relation.field_name.clone())?;
            }
            Ok::<_, AppError>(affected)
        }
        .await;
        let affected = settle(tx, result).await?;

        client.hooks().post_update(schema, predicates, &entity, affected)?;
        Ok(affected)
    }

    pub async fn delete(&self) -> Result<u64, AppError> {
        let client = self.model.client();
        let schema = self.model.schema();
        client.hooks().pre_delete(schema, &self.predicates)?;
        let q = sql::delete(self.model.builder(), schema, &self.predicates)?;
        let affected = client.executor().exec(&q).await?;
        client.hooks().post_delete(schema, &self.predicates, affected)?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use serde_json::json;

    fn registry() -> Builder {
        let rel = |name: &str, r: Relation| Field {
            relation: Some(r),
            ..Field::new(name, FieldType::Relation)
        };
        Builder::from_schemas(vec![
            Schema::new(
                "user",
                vec![
                    Field::new("name", FieldType::String),
                    Field::new("age", FieldType::Uint),
                    Field::new("deleted", FieldType::Bool),
                    rel("posts", Relation::new("post", "author", RelationType::O2M).owner(true)),
                    rel("groups", Relation::new("group", "users", RelationType::M2M)),
                ],
            ),
            Schema::new(
                "post",
                vec![
                    Field::new("title", FieldType::String),
                    rel("author", Relation::new("user", "posts", RelationType::O2M).optional(true)),
                ],
            ),
            Schema::new(
                "group",
                vec![rel("users", Relation::new("user", "groups", RelationType::M2M))],
            ),
        ])
        .unwrap()
    }

    fn columns(spec: &MutationSpec) -> Vec<(&str, &ColumnValue)> {
        spec.assignments.iter().map(|a| (a.column.as_str(), &a.value)).collect()
    }

    #[test]
    fn update_orders_sets_before_adds_before_timestamp() {
        let b = registry();
        let e = Entity::from_value(json!({"$add": {"age": 3}, "deleted": true})).unwrap();
        let spec = compile_update(&b, b.schema("user").unwrap(), &e).unwrap();
        assert_eq!(
            columns(&spec),
            vec![
                ("deleted", &ColumnValue::Bind(json!(true))),
                ("age", &ColumnValue::Add(json!(3))),
                ("updated_at", &ColumnValue::Now),
            ]
        );
    }

    #[test]
    fn set_on_owner_side_is_clear_then_add() {
        let b = registry();
        let e = Entity::from_value(json!({"$set": {"posts": [{"id": 4}, 5]}})).unwrap();
        let spec = compile_update(&b, b.schema("user").unwrap(), &e).unwrap();
        let ops: Vec<_> = spec.edges.iter().map(|e| e.op.clone()).collect();
        assert_eq!(ops, vec![EdgeOp::Clear(None), EdgeOp::Add(vec![4, 5])]);
        assert!(spec.assignments.is_empty());
    }

    #[test]
    fn edge_only_update_leaves_timestamp_alone() {
        let b = registry();
        let user = b.schema("user").unwrap();
        let spec = compile_update(&b, user, &Entity::from_value(json!({"$add": {"groups": [2]}})).unwrap()).unwrap();
        assert!(spec.assignments.is_empty());
        assert_eq!(spec.edges[0].op, EdgeOp::Add(vec![2]));

        let spec = compile_update(&b, user, &Entity::from_value(json!({"$add": {"groups": [2]}, "age": 4})).unwrap()).unwrap();
        assert_eq!(
            columns(&spec),
            vec![("age", &ColumnValue::Bind(json!(4))), ("updated_at", &ColumnValue::Now)]
        );
    }

    #[test]
    fn fk_side_relations_write_the_fk_column() {
        let b = registry();
        let post = b.schema("post").unwrap();
        let spec = compile_update(&b, post, &Entity::from_value(json!({"author": {"id": 9}})).unwrap()).unwrap();
        assert_eq!(columns(&spec)[0], ("author_id", &ColumnValue::Bind(json!(9))));

        let spec = compile_update(&b, post, &Entity::from_value(json!({"$clear": {"author": true}})).unwrap()).unwrap();
        assert_eq!(columns(&spec)[0], ("author_id", &ColumnValue::Null));
    }

    #[test]
    fn clear_m2m_subset_and_expr() {
        let b = registry();
        let e = Entity::from_value(json!({"$clear": {"groups": [{"id": 2}]}, "$expr": {"name": "LOWER(\"name\")"}})).unwrap();
        let spec = compile_update(&b, b.schema("user").unwrap(), &e).unwrap();
        assert_eq!(spec.edges[0].op, EdgeOp::Clear(Some(vec![2])));
        assert_eq!(columns(&spec)[0], ("name", &ColumnValue::Expr("LOWER(\"name\")".into())));
    }

    #[test]
    fn block_errors_name_the_field() {
        let b = registry();
        let user = b.schema("user").unwrap();
        let err = compile_update(&b, user, &Entity::from_value(json!({"$add": {"name": 1}})).unwrap()).unwrap_err();
        assert!(err.to_string().starts_with("$add.name: "), "{}", err);
        let err = compile_update(&b, user, &Entity::from_value(json!({"groups": [{"name": "x"}]})).unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "groups: validation: relation entity has no ID");
    }

    #[test]
    fn create_rejects_existing_id_and_stamps_timestamps() {
        let b = registry();
        let user = b.schema("user").unwrap();
        let err = compile_create(&b, user, &Entity::with_id(3)).unwrap_err();
        assert_eq!(err.to_string(), "validation: cannot create entity with existing ID");

        let e = Entity::from_value(json!({"name": "a", "groups": [1, 2]})).unwrap();
        let spec = compile_create(&b, user, &e).unwrap();
        assert_eq!(
            columns(&spec),
            vec![
                ("name", &ColumnValue::Bind(json!("a"))),
                ("created_at", &ColumnValue::Now),
                ("updated_at", &ColumnValue::Now),
            ]
        );
        assert_eq!(spec.edges[0].op, EdgeOp::Add(vec![1, 2]));
    }

    #[test]
    fn empty_update_compiles_to_nothing() {
        let b = registry();
        let spec = compile_update(&b, b.schema("user").unwrap(), &Entity::new()).unwrap();
        assert!(spec.is_empty());
    }
}

//! Eager loading of relation edges onto already-fetched parent entities.
//!
//! One batched query per edge: parents are never queried row by row.

use crate::db::Executor;
use crate::entity::{value_as_u64, Entity};
use crate::error::AppError;
use crate::schema::{Builder, Relation, Schema, FIELD_ID};
use crate::sql::{self, PARENT_ID_COLUMN};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Requested target columns plus whatever the join needs.
fn target_columns(target: &Schema, requested: &[String], join_column: Option<&str>) -> Vec<String> {
    if requested.is_empty() {
        return target.db_columns.clone();
    }
    let mut cols = requested.to_vec();
    if !cols.iter().any(|c| c == FIELD_ID) {
        cols.insert(0, FIELD_ID.to_string());
    }
    if let Some(j) = join_column {
        if !cols.iter().any(|c| c == j) {
            cols.push(j.to_string());
        }
    }
    cols
}

fn parent_ids(schema: &str, entities: &[Entity]) -> Result<Vec<u64>, AppError> {
    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(entities.len());
    for e in entities {
        let id = e.id().ok_or_else(|| {
            AppError::Consistency(format!("{} row without id: {}", schema, e.get(FIELD_ID).unwrap_or(&Value::Null)))
        })?;
        if seen.insert(id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn row_id(e: &Entity) -> String {
    e.get(FIELD_ID).map(|v| v.to_string()).unwrap_or_else(|| "?".into())
}

/// Parents hold the FK: collect distinct FK values, fetch the targets by id, fan them back out.
pub(crate) async fn load_non_owner_edges(
    executor: &dyn Executor,
    builder: &Builder,
    relation: &Relation,
    columns: &[String],
    entities: &mut [Entity],
) -> Result<(), AppError> {
    let target = builder.schema(&relation.target_schema_name)?;
    let fk = relation.current_column();

    let mut fks: Vec<Option<u64>> = Vec::with_capacity(entities.len());
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for e in entities.iter() {
        let v = match e.get(fk) {
            None | Some(Value::Null) => None,
            Some(v) => Some(value_as_u64(v).ok_or_else(|| {
                AppError::Consistency(format!(
                    "{}.{}: cannot parse foreign key {} of row {}",
                    relation.schema_name,
                    fk,
                    v,
                    row_id(e)
                ))
            })?),
        }
        .filter(|id| *id != 0);
        if let Some(id) = v {
            if seen.insert(id) {
                ids.push(id);
            }
        }
        fks.push(v);
    }

    let mut by_id: HashMap<u64, Entity> = HashMap::new();
    if !ids.is_empty() {
        let cols = target_columns(target, columns, None);
        let q = sql::select_by_column_in(target, &cols, FIELD_ID, &ids);
        for n in executor.query(&q).await? {
            if let Some(id) = n.id() {
                by_id.insert(id, n);
            }
        }
    }

    for (e, fk) in entities.iter_mut().zip(fks) {
        match fk.and_then(|id| by_id.get(&id)) {
            Some(n) => e.set_entity(relation.field_name.clone(), n.clone()),
            None => e.set(relation.field_name.clone(), Value::Null),
        };
    }
    Ok(())
}

/// Targets hold the FK back to the parent: fetch by `fk IN (parent ids)` and group per parent.
pub(crate) async fn load_owner_edges(
    executor: &dyn Executor,
    builder: &Builder,
    relation: &Relation,
    columns: &[String],
    entities: &mut [Entity],
) -> Result<(), AppError> {
    let target = builder.schema(&relation.target_schema_name)?;
    let fk = relation.target_column();
    let ids = parent_ids(&relation.schema_name, entities)?;

    let mut grouped: HashMap<u64, Vec<Entity>> = HashMap::new();
    if !ids.is_empty() {
        let cols = target_columns(target, columns, Some(fk));
        let q = sql::select_by_column_in(target, &cols, fk, &ids);
        let parents: HashSet<u64> = ids.iter().copied().collect();
        for n in executor.query(&q).await? {
            let owner = n.get(fk).and_then(value_as_u64).filter(|id| parents.contains(id));
            let Some(owner) = owner else {
                return Err(AppError::Consistency(format!(
                    "no FK node for {}.{} = {} (row {})",
                    target.name,
                    fk,
                    n.get(fk).unwrap_or(&Value::Null),
                    row_id(&n)
                )));
            };
            grouped.entry(owner).or_default().push(n);
        }
    }

    let to_many = relation.is_to_many();
    for e in entities.iter_mut() {
        let neighbors = e.id().and_then(|id| grouped.get(&id)).cloned().unwrap_or_default();
        if to_many {
            e.set_entities(relation.field_name.clone(), neighbors);
        } else {
            match neighbors.into_iter().next() {
                Some(n) => e.set_entity(relation.field_name.clone(), n),
                None => e.set(relation.field_name.clone(), Value::Null),
            };
        }
    }
    Ok(())
}

/// Targets reached through the junction table. Every parent gets an array, empty when it has no neighbors.
pub(crate) async fn load_edges_m2m(
    executor: &dyn Executor,
    builder: &Builder,
    relation: &Relation,
    columns: &[String],
    entities: &mut [Entity],
) -> Result<(), AppError> {
    let target = builder.schema(&relation.target_schema_name)?;
    let ids = parent_ids(&relation.schema_name, entities)?;

    let mut grouped: IndexMap<u64, Vec<Entity>> = IndexMap::new();
    if !ids.is_empty() {
        let cols = target_columns(target, columns, None);
        let q = sql::select_m2m(
            target,
            &relation.junction_table,
            relation.current_column(),
            relation.target_column(),
            &cols,
            &ids,
        );
        let mut seen: HashSet<(u64, u64)> = HashSet::new();
        for mut n in executor.query(&q).await? {
            let raw = n.delete(PARENT_ID_COLUMN).unwrap_or(Value::Null);
            let parent = value_as_u64(&raw).ok_or_else(|| {
                AppError::Consistency(format!(
                    "{}.{}: cannot parse junction id {} of row {}",
                    relation.junction_table,
                    relation.current_column(),
                    raw,
                    row_id(&n)
                ))
            })?;
            let neighbor = n.id().unwrap_or_default();
            if seen.insert((parent, neighbor)) {
                grouped.entry(parent).or_default().push(n);
            }
        }
    }

    for e in entities.iter_mut() {
        let neighbors = e
            .id()
            .and_then(|id| grouped.get(&id))
            .cloned()
            .unwrap_or_default();
        e.set_entities(relation.field_name.clone(), neighbors);
    }
    Ok(())
}

//! Query builder over one schema: predicates, projection, ordering, paging, edge loading.

use crate::db::apply_getters;
use crate::entity::{value_as_u64, Entity};
use crate::error::AppError;
use crate::predicate::{parse_filter, Predicate};
use crate::schema::{Builder, Relation, Schema, FIELD_ID};
use crate::service::edges;
use crate::service::Model;
use crate::sql::{self, OrderBy};
use indexmap::IndexMap;
use serde_json::Value;

/// Everything a query carries into execution; pre-query hooks may rewrite it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOption {
    pub schema: String,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Plain columns, edge names, or `edge.column` projections. Empty selects every column and no edges.
    pub columns: Vec<String>,
    /// `"col"` ascending, `"-col"` descending.
    pub order: Vec<String>,
    pub predicates: Vec<Predicate>,
}

/// A relation edge to load and the target columns to fetch (empty: all).
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct EdgeSelect {
    pub field: String,
    pub columns: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Query {
    model: Model,
    option: QueryOption,
}

impl Query {
    pub(crate) fn new(model: Model) -> Self {
        let option = QueryOption {
            schema: model.schema().name.clone(),
            ..Default::default()
        };
        Query { model, option }
    }

    pub fn option(&self) -> &QueryOption {
        &self.option
    }

    /// Adds predicates; all top-level predicates are ANDed.
    pub fn where_(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.option.predicates.extend(predicates);
        self
    }

    /// Parses a filter object and adds its predicates.
    pub fn filter(mut self, filter: &Value) -> Result<Self, AppError> {
        let predicates = parse_filter(self.model.builder(), &self.option.schema, filter)?;
        self.option.predicates.extend(predicates);
        Ok(self)
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.option.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.option.offset = Some(offset);
        self
    }

    pub fn order<S: Into<String>>(mut self, order: impl IntoIterator<Item = S>) -> Self {
        self.option.order.extend(order.into_iter().map(Into::into));
        self
    }

    pub fn select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.option.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub async fn get(&self) -> Result<Vec<Entity>, AppError> {
        let client = self.model.client();
        let builder = self.model.builder();
        let schema = self.model.schema();
        let hooks = client.hooks();

        let mut opt = self.option.clone();
        hooks.pre_query(&mut opt)?;

        let order = parse_order(schema, &opt.order)?;
        let (columns, edge_selects) = classify_columns(builder, schema, &opt.columns)?;
        let q = sql::select(
            builder,
            schema,
            &columns,
            &opt.predicates,
            &order,
            opt.limit,
            opt.offset,
        )?;
        let executor = client.executor();
        let mut entities = executor.query(&q).await?;

        if !entities.is_empty() {
            for edge in &edge_selects {
                let relation = builder.relation_of(&schema.name, &edge.field).ok_or_else(|| {
                    AppError::Filter(format!("relation `{}.{}` not found", schema.name, edge.field))
                })?;
                load_edge(executor.as_ref(), builder, relation, &edge.columns, &mut entities)
                    .await
                    .map_err(|e| e.context(format!("edge {}.{}", schema.name, edge.field)))?;
            }
        }

        for e in entities.iter_mut() {
            apply_getters(schema, e).await?;
        }
        hooks.post_query(&opt, &mut entities)?;
        Ok(entities)
    }

    /// First matching entity; `NotFound` when nothing matches.
    pub async fn first(&self) -> Result<Entity, AppError> {
        let mut q = self.clone();
        q.option.limit = Some(1);
        q.get()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(self.option.schema.clone()))
    }

    /// The single matching entity. Zero rows is `NotFound`, more than one is `NotSingular`.
    pub async fn only(&self) -> Result<Entity, AppError> {
        let mut q = self.clone();
        q.option.limit = Some(2);
        let mut entities = q.get().await?;
        match entities.len() {
            0 => Err(AppError::NotFound(self.option.schema.clone())),
            1 => Ok(entities.remove(0)),
            _ => Err(AppError::NotSingular("more than one entity found".into())),
        }
    }

    pub async fn count(&self) -> Result<u64, AppError> {
        let client = self.model.client();
        let mut opt = self.option.clone();
        client.hooks().pre_query(&mut opt)?;
        let q = sql::count(self.model.builder(), self.model.schema(), &opt.predicates)?;
        let rows = client.executor().query(&q).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(value_as_u64)
            .unwrap_or(0))
    }
}

async fn load_edge(
    executor: &dyn crate::db::Executor,
    builder: &Builder,
    relation: &Relation,
    columns: &[String],
    entities: &mut [Entity],
) -> Result<(), AppError> {
    if relation.is_m2m() {
        edges::load_edges_m2m(executor, builder, relation, columns, entities).await
    } else if relation.has_fks() {
        edges::load_non_owner_edges(executor, builder, relation, columns, entities).await
    } else {
        edges::load_owner_edges(executor, builder, relation, columns, entities).await
    }
}

fn parse_order(schema: &Schema, tokens: &[String]) -> Result<Vec<OrderBy>, AppError> {
    tokens
        .iter()
        .map(|t| {
            let o = OrderBy::parse(t);
            match schema.field(&o.column) {
                Some(f) if f.has_column() && f.sortable => Ok(o),
                Some(_) => Err(AppError::Filter(format!(
                    "field `{}.{}` is not sortable",
                    schema.name, o.column
                ))),
                None => Err(AppError::Filter(format!(
                    "field `{}.{}` not found",
                    schema.name, o.column
                ))),
            }
        })
        .collect()
}

/// Splits requested columns into base-table columns and edges.
///
/// When edges are requested the base select always carries `id` and the FK column of every
/// edge whose foreign key lives on this table, so edges can be joined afterwards.
pub(crate) fn classify_columns(
    builder: &Builder,
    schema: &Schema,
    requested: &[String],
) -> Result<(Vec<String>, Vec<EdgeSelect>), AppError> {
    if requested.is_empty() {
        return Ok((schema.db_columns.clone(), Vec::new()));
    }
    let not_found =
        |s: &Schema, name: &str| AppError::Filter(format!("field `{}.{}` not found", s.name, name));

    let mut columns: Vec<String> = Vec::new();
    let mut edge_map: IndexMap<String, Vec<String>> = IndexMap::new();
    for c in requested {
        match c.split_once('.') {
            Some((edge, sub)) => {
                if sub.contains('.') {
                    return Err(AppError::Filter(format!(
                        "nested edge projection `{}` is not supported",
                        c
                    )));
                }
                let field = schema.field(edge).ok_or_else(|| not_found(schema, edge))?;
                if !field.is_relation() {
                    return Err(AppError::Filter(format!(
                        "field `{}.{}` is not a relation",
                        schema.name, edge
                    )));
                }
                let relation = builder
                    .relation_of(&schema.name, edge)
                    .ok_or_else(|| not_found(schema, edge))?;
                let target = builder.schema(&relation.target_schema_name)?;
                if !target.has_column(sub) {
                    return Err(not_found(target, sub));
                }
                let cols = edge_map.entry(edge.to_string()).or_default();
                if !cols.iter().any(|x| x == sub) {
                    cols.push(sub.to_string());
                }
            }
            None => {
                let field = schema.field(c).ok_or_else(|| not_found(schema, c))?;
                if field.is_relation() {
                    edge_map.entry(c.clone()).or_default();
                } else if !columns.contains(c) {
                    columns.push(c.clone());
                }
            }
        }
    }

    if !edge_map.is_empty() {
        if !columns.iter().any(|c| c == FIELD_ID) {
            columns.insert(0, FIELD_ID.to_string());
        }
        for edge in edge_map.keys() {
            if let Some(r) = builder.relation_of(&schema.name, edge) {
                if !r.is_m2m() && r.has_fks() {
                    let fk = r.current_column().to_string();
                    if !columns.contains(&fk) {
                        columns.push(fk);
                    }
                }
            }
        }
    }

    let edges = edge_map
        .into_iter()
        .map(|(field, columns)| EdgeSelect { field, columns })
        .collect();
    Ok((columns, edges))
}

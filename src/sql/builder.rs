//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from schemas and predicate trees.

use crate::error::AppError;
use crate::predicate::Predicate;
use crate::schema::{Builder, Schema};
use crate::sql::compile_predicates;
use serde_json::Value;

/// Column name under which many-to-many loads return the owning parent's id.
pub const PARENT_ID_COLUMN: &str = "__parent_id";

/// Quote identifier for PostgreSQL (safe: only from schema declarations).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// `"table"."column"`
pub fn column_ref(table: &str, column: &str) -> String {
    format!("{}.{}", quoted(table), quoted(column))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf::default()
    }

    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        QueryBuf {
            sql: sql.into(),
            params,
        }
    }

    pub(crate) fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Pushes a param and returns its placeholder, cast when the column type needs it.
    pub(crate) fn placeholder(&mut self, v: Value, cast: Option<&str>) -> String {
        let n = self.push_param(v);
        match cast {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }

    pub(crate) fn in_list(&mut self, ids: &[u64]) -> String {
        ids.iter()
            .map(|id| self.placeholder(Value::from(*id), None))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Right-hand side of one `SET` / `VALUES` entry.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnValue {
    Bind(Value),
    /// `col = COALESCE(col, 0) + $n`
    Add(Value),
    Null,
    /// Raw server-side expression, e.g. `LOWER("name")`.
    Expr(String),
    Now,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: ColumnValue,
}

impl Assignment {
    pub fn new(column: impl Into<String>, value: ColumnValue) -> Self {
        Assignment {
            column: column.into(),
            value,
        }
    }

    fn render(&self, schema: &Schema, q: &mut QueryBuf) -> String {
        let cast = schema.field(&self.column).and_then(|f| f.type_.pg_cast());
        match &self.value {
            ColumnValue::Bind(Value::Null) | ColumnValue::Null => "NULL".to_string(),
            ColumnValue::Bind(v) => q.placeholder(v.clone(), cast),
            ColumnValue::Add(v) => {
                let ph = q.placeholder(v.clone(), None);
                format!("COALESCE({}, 0) + {}", quoted(&self.column), ph)
            }
            ColumnValue::Expr(expr) => expr.clone(),
            ColumnValue::Now => "NOW()".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub desc: bool,
}

impl OrderBy {
    /// `"-name"` sorts descending, `"name"` ascending.
    pub fn parse(token: &str) -> OrderBy {
        match token.strip_prefix('-') {
            Some(column) => OrderBy {
                column: column.to_string(),
                desc: true,
            },
            None => OrderBy {
                column: token.to_string(),
                desc: false,
            },
        }
    }
}

fn where_clause(
    builder: &Builder,
    schema: &Schema,
    predicates: &[Predicate],
    q: &mut QueryBuf,
) -> Result<String, AppError> {
    Ok(compile_predicates(builder, schema, predicates, q)?
        .map(|w| format!(" WHERE {}", w))
        .unwrap_or_default())
}

fn select_column_list(table: &str, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| column_ref(table, c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// SELECT columns with predicates, ORDER BY (primary key when none given), optional LIMIT/OFFSET.
pub fn select(
    builder: &Builder,
    schema: &Schema,
    columns: &[String],
    predicates: &[Predicate],
    order: &[OrderBy],
    limit: Option<u32>,
    offset: Option<u32>,
) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let table = &schema.namespace;
    let where_sql = where_clause(builder, schema, predicates, &mut q)?;
    let order_clause = if order.is_empty() {
        format!(" ORDER BY {}", column_ref(table, "id"))
    } else {
        let parts: Vec<String> = order
            .iter()
            .map(|o| {
                format!(
                    "{} {}",
                    column_ref(table, &o.column),
                    if o.desc { "DESC" } else { "ASC" }
                )
            })
            .collect();
        format!(" ORDER BY {}", parts.join(", "))
    };
    let limit_clause = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        select_column_list(table, columns),
        quoted(table),
        where_sql,
        order_clause,
        limit_clause,
        offset_clause
    );
    Ok(q)
}

pub fn count(builder: &Builder, schema: &Schema, predicates: &[Predicate]) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(builder, schema, predicates, &mut q)?;
    q.sql = format!(
        "SELECT COUNT(*) AS \"count\" FROM {}{}",
        quoted(&schema.namespace),
        where_sql
    );
    Ok(q)
}

/// Ids of the rows matched by `predicates`; used before edge mutations.
pub fn select_ids(builder: &Builder, schema: &Schema, predicates: &[Predicate]) -> Result<QueryBuf, AppError> {
    select(builder, schema, &["id".to_string()], predicates, &[], None, None)
}

/// SELECT columns FROM table WHERE column IN ($1, $2, ...) ORDER BY id. Used for batch-fetching related rows.
pub fn select_by_column_in(schema: &Schema, columns: &[String], column: &str, ids: &[u64]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = &schema.namespace;
    let placeholders = q.in_list(ids);
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} IN ({}) ORDER BY {}",
        select_column_list(table, columns),
        quoted(table),
        column_ref(table, column),
        placeholders,
        column_ref(table, "id")
    );
    q
}

/// Target rows joined through a junction table, tagged with the parent id in `__parent_id`.
pub fn select_m2m(
    target: &Schema,
    junction_table: &str,
    current_column: &str,
    target_column: &str,
    columns: &[String],
    parent_ids: &[u64],
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = &target.namespace;
    let placeholders = q.in_list(parent_ids);
    q.sql = format!(
        "SELECT {} AS {}, {} FROM {} JOIN {} ON {} = {} WHERE {} IN ({}) ORDER BY {}",
        column_ref(junction_table, current_column),
        quoted(PARENT_ID_COLUMN),
        select_column_list(table, columns),
        quoted(table),
        quoted(junction_table),
        column_ref(table, "id"),
        column_ref(junction_table, target_column),
        column_ref(junction_table, current_column),
        placeholders,
        column_ref(table, "id")
    );
    q
}

/// INSERT ... RETURNING "id".
pub fn insert(schema: &Schema, assignments: &[Assignment]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = quoted(&schema.namespace);
    if assignments.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, quoted("id"));
        return q;
    }
    let cols: Vec<String> = assignments.iter().map(|a| quoted(&a.column)).collect();
    let values: Vec<String> = assignments.iter().map(|a| a.render(schema, &mut q)).collect();
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        table,
        cols.join(", "),
        values.join(", "),
        quoted("id")
    );
    q
}

/// UPDATE with assignments rendered in the order given, WHERE from predicates.
pub fn update(
    builder: &Builder,
    schema: &Schema,
    assignments: &[Assignment],
    predicates: &[Predicate],
) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let sets: Vec<String> = assignments
        .iter()
        .map(|a| format!("{} = {}", quoted(&a.column), a.render(schema, &mut q)))
        .collect();
    let where_sql = where_clause(builder, schema, predicates, &mut q)?;
    q.sql = format!(
        "UPDATE {} SET {}{}",
        quoted(&schema.namespace),
        sets.join(", "),
        where_sql
    );
    Ok(q)
}

pub fn delete(builder: &Builder, schema: &Schema, predicates: &[Predicate]) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(builder, schema, predicates, &mut q)?;
    q.sql = format!("DELETE FROM {}{}", quoted(&schema.namespace), where_sql);
    Ok(q)
}

/// `UPDATE table SET fk = $1|NULL WHERE where_column IN (...) [AND id IN (...)]`.
pub fn update_fk_in(
    table: &str,
    fk: &str,
    value: Option<u64>,
    where_column: &str,
    ids: &[u64],
    and_id_in: Option<&[u64]>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let rhs = match value {
        Some(v) => q.placeholder(Value::from(v), None),
        None => "NULL".to_string(),
    };
    let mut where_sql = format!("{} IN ({})", column_ref(table, where_column), q.in_list(ids));
    if let Some(extra) = and_id_in {
        where_sql.push_str(&format!(" AND {} IN ({})", column_ref(table, "id"), q.in_list(extra)));
    }
    q.sql = format!(
        "UPDATE {} SET {} = {} WHERE {}",
        quoted(table),
        quoted(fk),
        rhs,
        where_sql
    );
    q
}

/// Junction rows as (current id, target id) pairs; duplicates are ignored.
pub fn insert_junction(table: &str, current_column: &str, target_column: &str, pairs: &[(u64, u64)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let rows: Vec<String> = pairs
        .iter()
        .map(|(c, t)| {
            let a = q.placeholder(Value::from(*c), None);
            let b = q.placeholder(Value::from(*t), None);
            format!("({}, {})", a, b)
        })
        .collect();
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES {} ON CONFLICT DO NOTHING",
        quoted(table),
        quoted(current_column),
        quoted(target_column),
        rows.join(", ")
    );
    q
}

/// Removes junction rows of `parents`, optionally only those pointing at `targets`.
/// Bidirectional relations store both directions, so both are matched.
pub fn delete_junction(
    table: &str,
    current_column: &str,
    target_column: &str,
    parents: &[u64],
    targets: Option<&[u64]>,
    bidi: bool,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let side = |q: &mut QueryBuf, from: &str, to: &str| -> String {
        let mut cond = format!("{} IN ({})", column_ref(table, from), q.in_list(parents));
        if let Some(t) = targets {
            cond = format!("({} AND {} IN ({}))", cond, column_ref(table, to), q.in_list(t));
        }
        cond
    };
    let mut where_sql = side(&mut q, current_column, target_column);
    if bidi {
        let reverse = side(&mut q, target_column, current_column);
        where_sql = format!("{} OR {}", where_sql, reverse);
    }
    q.sql = format!("DELETE FROM {} WHERE {}", quoted(table), where_sql);
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType};
    use serde_json::json;

    fn registry() -> Builder {
        let user = Schema {
            namespace: "users".into(),
            ..Schema::new(
                "user",
                vec![
                    Field::new("name", FieldType::String),
                    Field::new("age", FieldType::Uint),
                    Field::new("deleted", FieldType::Bool),
                    Field::new("token", FieldType::Uuid),
                ],
            )
        };
        Builder::from_schemas(vec![user]).unwrap()
    }

    #[test]
    fn update_orders_sets_adds_then_timestamp() {
        let b = registry();
        let s = b.schema("user").unwrap();
        let q = update(
            &b,
            s,
            &[
                Assignment::new("deleted", ColumnValue::Bind(json!(true))),
                Assignment::new("age", ColumnValue::Add(json!(3))),
                Assignment::new("updated_at", ColumnValue::Now),
            ],
            &[Predicate::eq("id", 1), Predicate::eq("deleted", false)],
        )
        .unwrap();
        assert_eq!(
            q.sql,
            "UPDATE \"users\" SET \"deleted\" = $1, \"age\" = COALESCE(\"age\", 0) + $2, \"updated_at\" = NOW() \
             WHERE \"users\".\"id\" = $3 AND NOT \"users\".\"deleted\""
        );
        assert_eq!(q.params, vec![json!(true), json!(3), json!(1)]);
    }

    #[test]
    fn delete_groups_composites_in_parens() {
        let b = registry();
        let s = b.schema("user").unwrap();
        let q = delete(
            &b,
            s,
            &[
                Predicate::and(vec![Predicate::gt("id", 1), Predicate::lt("id", 10)]),
                Predicate::like("name", "%test%"),
            ],
        )
        .unwrap();
        assert_eq!(
            q.sql,
            "DELETE FROM \"users\" WHERE (\"users\".\"id\" > $1 AND \"users\".\"id\" < $2) AND \"users\".\"name\" LIKE $3"
        );
        assert_eq!(q.params, vec![json!(1), json!(10), json!("%test%")]);
    }

    #[test]
    fn insert_casts_typed_columns_and_inlines_null() {
        let b = registry();
        let s = b.schema("user").unwrap();
        let q = insert(
            s,
            &[
                Assignment::new("name", ColumnValue::Bind(json!("a"))),
                Assignment::new("token", ColumnValue::Bind(json!("8b7b1e52-6a4c-4a8e-9a57-5d0a3c3b1f10"))),
                Assignment::new("age", ColumnValue::Bind(Value::Null)),
                Assignment::new("created_at", ColumnValue::Now),
            ],
        );
        assert_eq!(
            q.sql,
            "INSERT INTO \"users\" (\"name\", \"token\", \"age\", \"created_at\") VALUES ($1, $2::uuid, NULL, NOW()) RETURNING \"id\""
        );
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn select_defaults_to_primary_key_order() {
        let b = registry();
        let s = b.schema("user").unwrap();
        let q = select(
            &b,
            s,
            &["id".to_string(), "name".to_string()],
            &[Predicate::gte("age", 18)],
            &[],
            Some(10),
            Some(20),
        )
        .unwrap();
        assert_eq!(
            q.sql,
            "SELECT \"users\".\"id\", \"users\".\"name\" FROM \"users\" WHERE \"users\".\"age\" >= $1 \
             ORDER BY \"users\".\"id\" LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn delete_junction_matches_both_directions_when_bidi() {
        let q = delete_junction("friends_user", "user", "friends", &[1], Some(&[2, 3]), true);
        assert_eq!(
            q.sql,
            "DELETE FROM \"friends_user\" WHERE (\"friends_user\".\"user\" IN ($1) AND \"friends_user\".\"friends\" IN ($2, $3)) \
             OR (\"friends_user\".\"friends\" IN ($4) AND \"friends_user\".\"user\" IN ($5, $6))"
        );
        assert_eq!(q.params, vec![json!(1), json!(2), json!(3), json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn order_tokens() {
        assert_eq!(OrderBy::parse("-name"), OrderBy { column: "name".into(), desc: true });
        assert_eq!(OrderBy::parse("age"), OrderBy { column: "age".into(), desc: false });
    }
}

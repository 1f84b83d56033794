//! Predicate tree → SQL WHERE fragment.
//!
//! Columns are qualified with the table name at the top level and with `t1`, `t2`, ... inside
//! relation sub-selects. A predicate with a relation path becomes a correlated `EXISTS`.

use crate::error::AppError;
use crate::predicate::{Operator, Predicate};
use crate::schema::{Builder, Field, FieldType, Schema};
use crate::sql::builder::{column_ref, quoted, QueryBuf};
use serde_json::Value;

/// Compiles top-level predicates joined with AND. `None` when there is nothing to filter on.
pub fn compile_predicates(
    builder: &Builder,
    schema: &Schema,
    predicates: &[Predicate],
    q: &mut QueryBuf,
) -> Result<Option<String>, AppError> {
    if predicates.is_empty() {
        return Ok(None);
    }
    let mut compiler = PredicateCompiler {
        builder,
        q,
        aliases: 0,
    };
    let table = schema.namespace.clone();
    compiler
        .compile_list(schema, &table, predicates, " AND ")
        .map(Some)
}

struct PredicateCompiler<'a> {
    builder: &'a Builder,
    q: &'a mut QueryBuf,
    aliases: u32,
}

impl PredicateCompiler<'_> {
    fn compile_list(
        &mut self,
        schema: &Schema,
        alias: &str,
        predicates: &[Predicate],
        joiner: &str,
    ) -> Result<String, AppError> {
        let wrap = predicates.len() > 1;
        let mut parts = Vec::with_capacity(predicates.len());
        for p in predicates {
            let sql = self.compile(schema, alias, p)?;
            parts.push(if wrap && p.is_composite() && p.relation_path.is_empty() {
                format!("({})", sql)
            } else {
                sql
            });
        }
        Ok(parts.join(joiner))
    }

    fn compile(&mut self, schema: &Schema, alias: &str, p: &Predicate) -> Result<String, AppError> {
        if !p.relation_path.is_empty() {
            let inner = Predicate {
                relation_path: Vec::new(),
                ..p.clone()
            };
            return self.compile_path(schema, alias, &p.relation_path, &inner);
        }
        match (p.and.is_empty(), p.or.is_empty()) {
            (true, true) => self.compile_leaf(schema, alias, p),
            (false, true) => self.compile_list(schema, alias, &p.and, " AND "),
            (true, false) => self.compile_list(schema, alias, &p.or, " OR "),
            (false, false) => {
                let and = self.compile_list(schema, alias, &p.and, " AND ")?;
                let or = self.compile_list(schema, alias, &p.or, " OR ")?;
                Ok(format!("({}) AND ({})", and, or))
            }
        }
    }

    /// One `EXISTS` per path segment, nested; the leaf predicate lands on the innermost table.
    fn compile_path(
        &mut self,
        schema: &Schema,
        alias: &str,
        path: &[String],
        inner: &Predicate,
    ) -> Result<String, AppError> {
        let Some((segment, rest)) = path.split_first() else {
            let sql = self.compile(schema, alias, inner)?;
            return Ok(if inner.is_composite() {
                format!("({})", sql)
            } else {
                sql
            });
        };
        let relation = self.builder.relation_of(&schema.name, segment).ok_or_else(|| {
            AppError::Filter(format!("relation `{}.{}` not found", schema.name, segment))
        })?;
        let target = self.builder.schema(&relation.target_schema_name)?;
        self.aliases += 1;
        let t = format!("t{}", self.aliases);

        let (from, join) = if relation.is_m2m() {
            let j = format!("j{}", self.aliases);
            (
                format!(
                    "{} AS {} JOIN {} AS {} ON {} = {}",
                    quoted(&relation.junction_table),
                    quoted(&j),
                    quoted(&target.namespace),
                    quoted(&t),
                    column_ref(&t, "id"),
                    column_ref(&j, relation.target_column())
                ),
                format!(
                    "{} = {}",
                    column_ref(&j, relation.current_column()),
                    column_ref(alias, "id")
                ),
            )
        } else if relation.has_fks() {
            (
                format!("{} AS {}", quoted(&target.namespace), quoted(&t)),
                format!(
                    "{} = {}",
                    column_ref(&t, "id"),
                    column_ref(alias, relation.current_column())
                ),
            )
        } else {
            (
                format!("{} AS {}", quoted(&target.namespace), quoted(&t)),
                format!(
                    "{} = {}",
                    column_ref(&t, relation.target_column()),
                    column_ref(alias, "id")
                ),
            )
        };

        let nested = self.compile_path(target, &t, rest, inner)?;
        Ok(format!(
            "EXISTS (SELECT 1 FROM {} WHERE {} AND {})",
            from, join, nested
        ))
    }

    fn compile_leaf(&mut self, schema: &Schema, alias: &str, p: &Predicate) -> Result<String, AppError> {
        let field = column_field(schema, &p.field)?;
        p.operator.check_value(&schema.name, &field.name, &p.value)?;
        let col = column_ref(alias, &field.name);
        let cast = field.type_.pg_cast();
        let is_bool = field.type_ == FieldType::Bool;

        let sql = match (p.operator, &p.value) {
            (Operator::Eq, Value::Null) => format!("{} IS NULL", col),
            (Operator::Neq, Value::Null) => format!("{} IS NOT NULL", col),
            (Operator::Eq, Value::Bool(b)) | (Operator::Neq, Value::Bool(b)) if is_bool => {
                if *b == (p.operator == Operator::Eq) {
                    col
                } else {
                    format!("NOT {}", col)
                }
            }
            (Operator::Eq, v) => self.binary(&col, "=", v, cast),
            (Operator::Neq, v) => self.binary(&col, "<>", v, cast),
            (Operator::Gt, v) => self.binary(&col, ">", v, cast),
            (Operator::Gte, v) => self.binary(&col, ">=", v, cast),
            (Operator::Lt, v) => self.binary(&col, "<", v, cast),
            (Operator::Lte, v) => self.binary(&col, "<=", v, cast),
            (Operator::Like, v) => self.binary(&col, "LIKE", v, None),
            (Operator::NotLike, v) => self.binary(&col, "NOT LIKE", v, None),
            (Operator::Contains, v) => self.binary(&col, "LIKE", &contains_pattern(v), None),
            (Operator::NotContains, v) => self.binary(&col, "NOT LIKE", &contains_pattern(v), None),
            (Operator::ContainsFold, v) => self.binary(&col, "ILIKE", &contains_pattern(v), None),
            (Operator::NotContainsFold, v) => {
                self.binary(&col, "NOT ILIKE", &contains_pattern(v), None)
            }
            (Operator::In, Value::Array(items)) | (Operator::NotIn, Value::Array(items)) => {
                let negate = p.operator == Operator::NotIn;
                if items.is_empty() {
                    return Ok(if negate { "TRUE" } else { "FALSE" }.to_string());
                }
                let list: Vec<String> = items
                    .iter()
                    .map(|v| self.q.placeholder(v.clone(), cast))
                    .collect();
                format!(
                    "{} {} ({})",
                    col,
                    if negate { "NOT IN" } else { "IN" },
                    list.join(", ")
                )
            }
            (Operator::Null, Value::Bool(true)) => format!("{} IS NULL", col),
            (Operator::Null, _) => format!("{} IS NOT NULL", col),
            (op, _) => {
                return Err(AppError::Filter(format!(
                    "unsupported operator `{}` on field `{}.{}`",
                    op, schema.name, field.name
                )))
            }
        };
        Ok(sql)
    }

    fn binary(&mut self, col: &str, op: &str, v: &Value, cast: Option<&str>) -> String {
        let ph = self.q.placeholder(v.clone(), cast);
        format!("{} {} {}", col, op, ph)
    }
}

fn column_field<'s>(schema: &'s Schema, name: &str) -> Result<&'s Field, AppError> {
    let field = schema
        .field(name)
        .ok_or_else(|| AppError::Filter(format!("field `{}.{}` not found", schema.name, name)))?;
    if !schema.has_column(&field.name) {
        return Err(AppError::Filter(format!(
            "field `{}.{}` is not a column",
            schema.name, name
        )));
    }
    Ok(field)
}

/// `%v%` with LIKE wildcards in `v` escaped.
fn contains_pattern(v: &Value) -> Value {
    let s = v.as_str().unwrap_or_default();
    let escaped = s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    Value::String(format!("%{}%", escaped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Relation, RelationType};
    use serde_json::json;

    fn relation_field(name: &str, rel: Relation) -> Field {
        Field {
            relation: Some(rel),
            ..Field::new(name, FieldType::Relation)
        }
    }

    fn registry() -> Builder {
        let user = Schema::new(
            "user",
            vec![
                Field::new("name", FieldType::String),
                Field::new("active", FieldType::Bool),
                relation_field("posts", Relation::new("post", "author", RelationType::O2M).owner(true)),
                relation_field("groups", Relation::new("group", "users", RelationType::M2M)),
            ],
        );
        let post = Schema::new(
            "post",
            vec![
                Field::new("title", FieldType::String),
                relation_field("author", Relation::new("user", "posts", RelationType::O2M).optional(true)),
            ],
        );
        let group = Schema::new(
            "group",
            vec![
                Field::new("name", FieldType::String),
                relation_field("users", Relation::new("user", "groups", RelationType::M2M)),
            ],
        );
        Builder::from_schemas(vec![user, post, group]).unwrap()
    }

    fn compile(b: &Builder, schema: &str, preds: &[Predicate]) -> (String, Vec<Value>) {
        let mut q = QueryBuf::new();
        let sql = compile_predicates(b, b.schema(schema).unwrap(), preds, &mut q)
            .unwrap()
            .unwrap_or_default();
        (sql, q.params)
    }

    #[test]
    fn leaves() {
        let b = registry();
        let (sql, params) = compile(
            &b,
            "user",
            &[
                Predicate::eq("name", Value::Null),
                Predicate::eq("active", true),
                Predicate::is_in("id", vec![1, 2]),
                Predicate::not_in("id", Vec::<u64>::new()),
                Predicate::contains_fold("name", "50%"),
                Predicate::null("created_at", false),
            ],
        );
        assert_eq!(
            sql,
            "\"user\".\"name\" IS NULL AND \"user\".\"active\" AND \"user\".\"id\" IN ($1, $2) AND TRUE \
             AND \"user\".\"name\" ILIKE $3 AND \"user\".\"created_at\" IS NOT NULL"
        );
        assert_eq!(params, vec![json!(1), json!(2), json!("%50\\%%")]);
    }

    #[test]
    fn or_inside_and_is_parenthesized() {
        let b = registry();
        let (sql, _) = compile(
            &b,
            "user",
            &[
                Predicate::or(vec![Predicate::eq("name", "a"), Predicate::eq("name", "b")]),
                Predicate::neq("active", true),
            ],
        );
        assert_eq!(
            sql,
            "(\"user\".\"name\" = $1 OR \"user\".\"name\" = $2) AND NOT \"user\".\"active\""
        );
    }

    #[test]
    fn owner_path_joins_on_target_fk() {
        let b = registry();
        let (sql, params) = compile(
            &b,
            "user",
            &[Predicate::eq("title", "x").with_relation_path(vec!["posts".into()])],
        );
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"post\" AS \"t1\" WHERE \"t1\".\"author_id\" = \"user\".\"id\" AND \"t1\".\"title\" = $1)"
        );
        assert_eq!(params, vec![json!("x")]);
    }

    #[test]
    fn nested_path_through_fk_and_junction() {
        let b = registry();
        let (sql, _) = compile(
            &b,
            "post",
            &[Predicate::eq("name", "admins").with_relation_path(vec!["author".into(), "groups".into()])],
        );
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"user\" AS \"t1\" WHERE \"t1\".\"id\" = \"post\".\"author_id\" AND \
             EXISTS (SELECT 1 FROM \"groups_users\" AS \"j2\" JOIN \"group\" AS \"t2\" ON \"t2\".\"id\" = \"j2\".\"groups\" \
             WHERE \"j2\".\"users\" = \"t1\".\"id\" AND \"t2\".\"name\" = $1))"
        );
    }

    #[test]
    fn unknown_field_is_reported() {
        let b = registry();
        let mut q = QueryBuf::new();
        let err = compile_predicates(&b, b.schema("user").unwrap(), &[Predicate::eq("nope", 1)], &mut q)
            .unwrap_err();
        assert_eq!(err.to_string(), "field `user.nope` not found");
    }
}

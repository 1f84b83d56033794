mod common;

use common::client;
use pretty_assertions::assert_eq;
use relschema::{with_tx, AppError, Entity, Hooks, Predicate};
use serde_json::json;

#[tokio::test]
async fn update_orders_sets_before_adds_before_timestamp() {
    let (client, mock) = client();
    let affected = client
        .model("user")
        .unwrap()
        .mutation()
        .where_([Predicate::eq("id", 1), Predicate::eq("deleted", false)])
        .update_json(r#"{"$add": {"age": 3}, "deleted": true}"#)
        .await
        .unwrap();

    assert_eq!(affected, 1);
    let stmts = mock.statements();
    assert_eq!(stmts.len(), 1);
    assert_eq!(
        stmts[0].sql,
        r#"UPDATE "user" SET "deleted" = $1, "age" = COALESCE("age", 0) + $2, "updated_at" = NOW() WHERE "user"."id" = $3 AND NOT "user"."deleted""#
    );
    assert_eq!(stmts[0].params, vec![json!(true), json!(3), json!(1)]);
    assert!(mock.events().is_empty());
}

#[tokio::test]
async fn delete_groups_composite_predicates() {
    let (client, mock) = client();
    mock.push_affected(8);
    let affected = client
        .model("user")
        .unwrap()
        .mutation()
        .where_([
            Predicate::and(vec![Predicate::gt("id", 1), Predicate::lt("id", 10)]),
            Predicate::like("name", "%test%"),
        ])
        .delete()
        .await
        .unwrap();

    assert_eq!(affected, 8);
    let stmts = mock.statements();
    assert_eq!(
        stmts[0].sql,
        r#"DELETE FROM "user" WHERE ("user"."id" > $1 AND "user"."id" < $2) AND "user"."name" LIKE $3"#
    );
    assert_eq!(stmts[0].params, vec![json!(1), json!(10), json!("%test%")]);
}

#[tokio::test]
async fn create_with_m2m_edges_runs_in_one_transaction() {
    let (client, mock) = client();
    mock.push_rows(vec![json!({"id": 1})]);

    let id = client
        .model("user")
        .unwrap()
        .create_from_json(r#"{"name": "ann", "groups": [{"id": 3}]}"#)
        .await
        .unwrap();

    assert_eq!(id, 1);
    assert_eq!(mock.events(), ["begin", "commit"]);
    assert_eq!(mock.in_tx_flags(), [true, true]);
    let stmts = mock.statements();
    assert_eq!(
        stmts[0].sql,
        r#"INSERT INTO "user" ("name", "created_at", "updated_at") VALUES ($1, NOW(), NOW()) RETURNING "id""#
    );
    assert_eq!(
        stmts[1].sql,
        r#"INSERT INTO "groups_users" ("users", "groups") VALUES ($1, $2) ON CONFLICT DO NOTHING"#
    );
    assert_eq!(stmts[1].params, vec![json!(1), json!(3)]);
}

#[tokio::test]
async fn create_without_edges_skips_the_transaction() {
    let (client, mock) = client();
    mock.push_rows(vec![json!({"id": 4})]);
    let mut post = Entity::new();
    post.set("title", "hello").set("author", json!({"id": 9}));

    let id = client.model("post").unwrap().create(post).await.unwrap();
    assert_eq!(id, 4);
    assert!(mock.events().is_empty());
    assert_eq!(
        mock.sql(),
        [r#"INSERT INTO "post" ("title", "author_id", "created_at", "updated_at") VALUES ($1, $2, NOW(), NOW()) RETURNING "id""#]
    );
    assert_eq!(mock.statements()[0].params, vec![json!("hello"), json!(9)]);
}

#[tokio::test]
async fn invalid_reference_fails_before_any_statement() {
    let (client, mock) = client();
    let err = client
        .model("user")
        .unwrap()
        .create_from_json(r#"{"name": "x", "groups": [{"name": "g"}]}"#)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "groups: validation: relation entity has no ID");
    assert!(mock.sql().is_empty());
    assert!(mock.events().is_empty());
}

#[tokio::test]
async fn set_on_owner_side_clears_then_attaches() {
    let (client, mock) = client();
    mock.push_rows(vec![json!({"id": 1})]);

    client
        .model("user")
        .unwrap()
        .mutation()
        .where_([Predicate::eq("id", 1)])
        .update_json(r#"{"$set": {"posts": [{"id": 5}, {"id": 6}]}}"#)
        .await
        .unwrap();

    assert_eq!(
        mock.sql(),
        [
            r#"SELECT "user"."id" FROM "user" WHERE "user"."id" = $1 ORDER BY "user"."id""#,
            r#"UPDATE "post" SET "author_id" = NULL WHERE "post"."author_id" IN ($1)"#,
            r#"UPDATE "post" SET "author_id" = $1 WHERE "post"."id" IN ($2, $3)"#,
        ]
    );
    assert_eq!(mock.statements()[2].params, vec![json!(1), json!(5), json!(6)]);
    assert_eq!(mock.events(), ["begin", "commit"]);
}

#[tokio::test]
async fn junction_only_update_does_not_touch_the_parent_row() {
    let (client, mock) = client();
    mock.push_rows(vec![json!({"id": 1})]);

    let affected = client
        .model("user")
        .unwrap()
        .mutation()
        .filter(&json!({"id": 1}))
        .unwrap()
        .update_json(r#"{"$add": {"groups": [2]}}"#)
        .await
        .unwrap();

    assert_eq!(affected, 1);
    assert_eq!(
        mock.sql(),
        [
            r#"SELECT "user"."id" FROM "user" WHERE "user"."id" = $1 ORDER BY "user"."id""#,
            r#"INSERT INTO "groups_users" ("users", "groups") VALUES ($1, $2) ON CONFLICT DO NOTHING"#,
        ]
    );
    assert!(mock.sql().iter().all(|s| !s.starts_with(r#"UPDATE "user""#)));
}

#[tokio::test]
async fn fk_on_this_table_updates_in_place() {
    let (client, mock) = client();
    client
        .model("post")
        .unwrap()
        .mutation()
        .where_([Predicate::eq("id", 2)])
        .update_json(r#"{"author": {"id": 7}}"#)
        .await
        .unwrap();

    assert_eq!(
        mock.sql(),
        [r#"UPDATE "post" SET "author_id" = $1, "updated_at" = NOW() WHERE "post"."id" = $2"#]
    );
    assert!(mock.events().is_empty());
}

#[tokio::test]
async fn bidirectional_edges_are_written_both_ways() {
    let (client, mock) = client();
    mock.push_rows(vec![json!({"id": 1})]);
    client
        .model("user")
        .unwrap()
        .create_from_json(r#"{"name": "a", "friends": [2]}"#)
        .await
        .unwrap();

    let stmts = mock.statements();
    assert_eq!(
        stmts[1].sql,
        r#"INSERT INTO "friends_user" ("user", "friends") VALUES ($1, $2), ($3, $4) ON CONFLICT DO NOTHING"#
    );
    assert_eq!(stmts[1].params, vec![json!(1), json!(2), json!(2), json!(1)]);

    mock.push_rows(vec![json!({"id": 1})]);
    client
        .model("user")
        .unwrap()
        .mutation()
        .where_([Predicate::eq("id", 1)])
        .update_json(r#"{"$clear": {"friends": [2]}}"#)
        .await
        .unwrap();

    let last = mock.statements().pop().unwrap();
    assert_eq!(
        last.sql,
        r#"DELETE FROM "friends_user" WHERE ("friends_user"."user" IN ($1) AND "friends_user"."friends" IN ($2)) OR ("friends_user"."friends" IN ($3) AND "friends_user"."user" IN ($4))"#
    );
    assert_eq!(last.params, vec![json!(1), json!(2), json!(1), json!(2)]);
}

#[tokio::test]
async fn failed_edge_write_rolls_back() {
    let (client, mock) = client();
    mock.push_rows(vec![json!({"id": 1})]);
    mock.fail_on(r#"INSERT INTO "groups_users""#);

    let err = client
        .model("user")
        .unwrap()
        .create_from_json(r#"{"name": "ann", "groups": [3]}"#)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "groups: transaction: boom");
    assert_eq!(mock.events(), ["begin", "rollback"]);
}

#[tokio::test]
async fn no_matching_rows_skips_edge_writes() {
    let (client, mock) = client();
    let affected = client
        .model("user")
        .unwrap()
        .mutation()
        .where_([Predicate::eq("name", "nobody")])
        .update_json(r#"{"$add": {"groups": [3]}}"#)
        .await
        .unwrap();

    assert_eq!(affected, 0);
    assert_eq!(mock.sql().len(), 1);
    assert_eq!(mock.events(), ["begin", "commit"]);
}

#[tokio::test]
async fn empty_update_is_a_no_op() {
    let (client, mock) = client();
    let n = client.model("user").unwrap().mutation().update(Entity::new()).await.unwrap();
    assert_eq!(n, 0);
    assert!(mock.sql().is_empty());
}

#[tokio::test]
async fn mutation_hooks_guard_and_observe() {
    let mut hooks = Hooks::new();
    hooks
        .on_pre_update(|schema, _, entity| {
            if schema.name == "user" && entity.contains("name") {
                return Err(AppError::Validation("name is immutable".into()));
            }
            Ok(())
        })
        .on_pre_delete(|_, predicates| {
            if predicates.is_empty() {
                return Err(AppError::Validation("refusing to delete every row".into()));
            }
            Ok(())
        });
    let (client, mock) = client();
    let users = client.with_hooks(hooks).model("user").unwrap();

    let err = users
        .mutation()
        .where_([Predicate::eq("id", 1)])
        .update_json(r#"{"name": "bob"}"#)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "pre update hook: validation: name is immutable");

    let err = users.mutation().delete().await.unwrap_err();
    assert_eq!(err.to_string(), "pre delete hook: validation: refusing to delete every row");
    assert!(mock.sql().is_empty());
}

#[tokio::test]
async fn mutations_inside_with_tx_share_the_outer_transaction() {
    let (client, mock) = client();
    mock.push_rows(vec![json!({"id": 1})]);

    with_tx(&client, |tx| async move {
        tx.model("user")?
            .create_from_json(r#"{"name": "ann", "groups": [3]}"#)
            .await?;
        let posts = tx.model("post")?.mutation().where_([Predicate::eq("id", 2)]);
        posts.delete().await
    })
    .await
    .unwrap();

    assert_eq!(mock.events(), ["begin", "commit"]);
    assert!(mock.in_tx_flags().iter().all(|t| *t));
    assert_eq!(mock.sql().len(), 3);
}

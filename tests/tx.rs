mod common;

use common::client;
use pretty_assertions::assert_eq;
use relschema::{with_tx, AppError};
use serde_json::json;

#[tokio::test]
async fn commits_on_success() {
    let (client, mock) = client();
    let n = with_tx(&client, |tx| async move {
        assert!(tx.is_tx());
        tx.exec("UPDATE \"user\" SET \"deleted\" = $1", vec![json!(true)]).await
    })
    .await
    .unwrap();

    assert_eq!(n, 1);
    assert_eq!(mock.events(), ["begin", "commit"]);
    assert_eq!(mock.in_tx_flags(), [true]);
    assert!(!client.is_tx());
}

#[tokio::test]
async fn rolls_back_on_error() {
    let (client, mock) = client();
    let err = with_tx(&client, |_tx| async move {
        Err::<(), _>(AppError::Validation("nope".into()))
    })
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "validation: nope");
    assert_eq!(mock.events(), ["begin", "rollback"]);
}

#[tokio::test]
async fn rollback_failure_is_joined() {
    let (client, mock) = client();
    mock.state.lock().unwrap().fail_rollback = true;
    let err = with_tx(&client, |_tx| async move {
        Err::<(), _>(AppError::Validation("nope".into()))
    })
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::Rollback { .. }));
    assert_eq!(err.to_string(), "validation: nope: rollback: transaction: rollback failed");
}

#[tokio::test]
async fn commit_failure_is_wrapped() {
    let (client, mock) = client();
    mock.state.lock().unwrap().fail_commit = true;
    let err = with_tx(&client, |_tx| async move { Ok(()) }).await.unwrap_err();
    assert_eq!(err.to_string(), "commit: transaction: commit failed");
}

#[tokio::test]
async fn nested_transactions_are_rejected() {
    let (client, mock) = client();
    let err = with_tx(&client, |tx| async move {
        tx.executor().begin().await.map(|_| ())
    })
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "transaction: cannot start a transaction within a transaction");
    assert_eq!(mock.events(), ["begin", "rollback"]);
}

#[tokio::test]
async fn raw_exec_runs_exec_hooks() {
    let mut hooks = relschema::Hooks::new();
    hooks.on_pre_exec(|q| {
        if q.sql.starts_with("DROP") {
            return Err(AppError::Validation("denied".into()));
        }
        Ok(())
    });
    let (client, mock) = client();
    let client = client.with_hooks(hooks);

    let err = client.exec("DROP TABLE \"user\"", Vec::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "pre exec hook: validation: denied");
    assert!(mock.sql().is_empty());

    mock.push_rows(vec![json!({"n": 1})]);
    let rows = client.query("SELECT 1 AS \"n\"", Vec::new()).await.unwrap();
    assert_eq!(rows[0].get("n"), Some(&json!(1)));
}

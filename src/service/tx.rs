//! Transaction wrapper: commit on success, roll back on error. Never retried.

use crate::client::Client;
use crate::db::Transaction;
use crate::error::AppError;
use std::future::Future;
use std::sync::Arc;

/// Runs `f` with a client bound to a new transaction.
///
/// A rollback failure is joined into the returned error; a commit failure is wrapped as `commit: ...`.
pub async fn with_tx<T, F, Fut>(client: &Client, f: F) -> Result<T, AppError>
where
    F: FnOnce(Client) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let (tx_client, tx) = client.tx().await?;
    let result = f(tx_client).await;
    finish(tx, result).await
}

pub(crate) async fn finish<T>(tx: Arc<dyn Transaction>, result: Result<T, AppError>) -> Result<T, AppError> {
    match result {
        Ok(v) => {
            tx.commit().await.map_err(|e| e.context("commit"))?;
            Ok(v)
        }
        Err(err) => match tx.rollback().await {
            Ok(()) => Err(err),
            Err(rerr) => Err(AppError::Rollback {
                source: Box::new(err),
                rollback: Box::new(rerr),
            }),
        },
    }
}

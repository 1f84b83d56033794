//! PostgreSQL executor over a `sqlx` pool, and a transaction-scoped executor.

use crate::db::{Executor, Transaction};
use crate::entity::Entity;
use crate::error::AppError;
use crate::sql::{bind_params, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Postgres, Row};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Debug)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        PgExecutor { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Executor for PgExecutor {
    async fn query(&self, q: &QueryBuf) -> Result<Vec<Entity>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_entity).collect())
    }

    async fn exec(&self, q: &QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "exec");
        let done = bind_params(sqlx::query(&q.sql), &q.params)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn begin(&self) -> Result<Arc<dyn Transaction>, AppError> {
        let tx = self.pool.begin().await?;
        tracing::debug!("transaction begin");
        Ok(Arc::new(PgTransaction {
            inner: Mutex::new(Some(tx)),
        }))
    }
}

/// Holds the open transaction until commit or rollback takes it.
pub struct PgTransaction {
    inner: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

fn finished() -> AppError {
    AppError::Tx("transaction already finished".into())
}

#[async_trait]
impl Executor for PgTransaction {
    async fn query(&self, q: &QueryBuf) -> Result<Vec<Entity>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let rows = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows.iter().map(row_to_entity).collect())
    }

    async fn exec(&self, q: &QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "exec (tx)");
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let done = bind_params(sqlx::query(&q.sql), &q.params)
            .execute(&mut **tx)
            .await?;
        Ok(done.rows_affected())
    }

    async fn begin(&self) -> Result<Arc<dyn Transaction>, AppError> {
        Err(AppError::Tx("cannot start a transaction within a transaction".into()))
    }

    fn is_tx(&self) -> bool {
        true
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(&self) -> Result<(), AppError> {
        let tx = self.inner.lock().await.take().ok_or_else(finished)?;
        tx.commit().await?;
        tracing::debug!("transaction commit");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), AppError> {
        let tx = self.inner.lock().await.take().ok_or_else(finished)?;
        tx.rollback().await?;
        tracing::debug!("transaction rollback");
        Ok(())
    }

    fn executor(self: Arc<Self>) -> Arc<dyn Executor> {
        self
    }
}

fn row_to_entity(row: &PgRow) -> Entity {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), cell_to_value(row, col.name())))
        .collect()
}

/// Decodes by trying the column's likely Rust types in turn; NULL and undecodable cells become `null`.
fn cell_to_value(row: &PgRow, name: &str) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::from(n);
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::from(n);
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::from(n);
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    if let Ok(Some(b)) = row.try_get::<Option<Vec<u8>>, _>(name) {
        return Value::Array(b.into_iter().map(Value::from).collect());
    }
    Value::Null
}

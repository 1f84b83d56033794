//! Storage capability consumed by the engine, plus hooks and getter/setter programs.

mod hooks;
mod postgres;
mod program;

pub use hooks::Hooks;
pub use postgres::{PgExecutor, PgTransaction};
pub use program::{apply_getters, apply_setters, Program, ProgramArgs, ProgramCompiler, ProgramOutput, ProgramRef};

use crate::entity::Entity;
use crate::error::AppError;
use crate::sql::QueryBuf;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs statements against one logical connection: a pool or an open transaction.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Rows returned by the statement, one entity per row with keys in column order.
    async fn query(&self, q: &QueryBuf) -> Result<Vec<Entity>, AppError>;

    /// Rows affected.
    async fn exec(&self, q: &QueryBuf) -> Result<u64, AppError>;

    async fn begin(&self) -> Result<Arc<dyn Transaction>, AppError>;

    fn is_tx(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(&self) -> Result<(), AppError>;

    async fn rollback(&self) -> Result<(), AppError>;

    /// Statements issued through the returned executor run inside this transaction.
    fn executor(self: Arc<Self>) -> Arc<dyn Executor>;
}

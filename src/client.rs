//! Entry point: executor + registry snapshot + hooks.

use crate::config::DbConfig;
use crate::db::{Executor, Hooks, PgExecutor, Transaction};
use crate::entity::Entity;
use crate::error::AppError;
use crate::schema::Builder;
use crate::service::Model;
use crate::sql::QueryBuf;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Cheap to clone. Clones share the executor, hooks and registry slot.
#[derive(Clone)]
pub struct Client {
    executor: Arc<dyn Executor>,
    /// Replaced wholesale by `reload`; never edited in place.
    builder: Arc<RwLock<Arc<Builder>>>,
    hooks: Arc<Hooks>,
}

impl Client {
    /// Initializes the registry if the caller has not.
    pub fn new(executor: Arc<dyn Executor>, mut builder: Builder) -> Result<Self, AppError> {
        builder.init()?;
        Ok(Client {
            executor,
            builder: Arc::new(RwLock::new(Arc::new(builder))),
            hooks: Arc::new(Hooks::default()),
        })
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub async fn connect(config: &DbConfig, builder: Builder) -> Result<Self, AppError> {
        let pool = config.connect().await?;
        Client::new(Arc::new(PgExecutor::new(pool)), builder)
    }

    /// Loads schemas from `config.schema_dir` and connects.
    pub async fn open(config: &DbConfig) -> Result<Self, AppError> {
        let builder = Builder::from_dir(&config.schema_dir).await?;
        Client::connect(config, builder).await
    }

    /// Current registry snapshot. Operations keep the snapshot they started with.
    pub fn builder(&self) -> Arc<Builder> {
        match self.builder.read() {
            Ok(b) => b.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swaps in a freshly built registry.
    pub fn reload(&self, mut builder: Builder) -> Result<(), AppError> {
        builder.init()?;
        let next = Arc::new(builder);
        match self.builder.write() {
            Ok(mut slot) => *slot = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        tracing::info!("schema registry reloaded");
        Ok(())
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn is_tx(&self) -> bool {
        self.executor.is_tx()
    }

    pub fn model(&self, schema: &str) -> Result<Model, AppError> {
        Model::new(self.clone(), self.builder(), schema)
    }

    /// A client bound to a new transaction, pinned to the current registry snapshot.
    pub async fn tx(&self) -> Result<(Client, Arc<dyn Transaction>), AppError> {
        let tx = self.executor.begin().await?;
        let client = Client {
            executor: tx.clone().executor(),
            builder: Arc::new(RwLock::new(self.builder())),
            hooks: self.hooks.clone(),
        };
        Ok((client, tx))
    }

    /// Raw statement with bound args; returns rows affected.
    pub async fn exec(&self, sql: &str, args: Vec<Value>) -> Result<u64, AppError> {
        let q = QueryBuf::raw(sql, args);
        self.hooks.pre_exec(&q)?;
        let affected = self.executor.exec(&q).await?;
        self.hooks.post_exec(&q, affected)?;
        Ok(affected)
    }

    /// Raw query with bound args.
    pub async fn query(&self, sql: &str, args: Vec<Value>) -> Result<Vec<Entity>, AppError> {
        let q = QueryBuf::raw(sql, args);
        self.hooks.pre_exec(&q)?;
        let rows = self.executor.query(&q).await?;
        self.hooks.post_exec(&q, rows.len() as u64)?;
        Ok(rows)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("is_tx", &self.executor.is_tx())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

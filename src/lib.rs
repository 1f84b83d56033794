//! relschema: runtime-declared schemas with a relation-aware query and mutation engine on PostgreSQL.
//!
//! Schemas are declared as JSON (or built in code), registered in a [`Builder`] that derives
//! relations, junction tables and foreign keys, and queried through a [`Client`].

pub mod client;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod migration;
pub mod predicate;
pub mod schema;
pub mod service;
pub mod sql;

pub use client::Client;
pub use config::DbConfig;
pub use db::{Executor, Hooks, PgExecutor, Program, ProgramCompiler, Transaction};
pub use entity::Entity;
pub use error::{AppError, ResultExt, SchemaError};
pub use migration::{migrate, Migrator, PgMigrator};
pub use predicate::{parse_filter, parse_filter_str, Operator, Predicate};
pub use schema::{Builder, Field, FieldType, Relation, RelationType, Schema};
pub use service::{with_tx, Model, Mutation, Query, QueryOption};

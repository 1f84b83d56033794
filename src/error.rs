//! Typed errors for schema building and engine operations.

use thiserror::Error;

/// Registry construction errors. Fatal: no query can run against a registry that failed to build.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("relation node not found: {schema}.{field} -> {target}")]
    RelationNodeNotFound {
        schema: String,
        field: String,
        target: String,
    },
    #[error("back-ref relation not valid: {name} (expected {back_ref})")]
    InvalidBackRef { name: String, back_ref: String },
    #[error("duplicate schema: {0}")]
    DuplicateSchema(String),
    #[error("duplicate system schema: {0}")]
    DuplicateSystemSchema(String),
    #[error("schema not found: {0}")]
    NotFound(String),
    #[error("invalid identifier: {kind} '{name}'")]
    InvalidIdentifier { kind: &'static str, name: String },
    #[error("schema {schema}: {message}")]
    Invalid { schema: String, message: String },
    #[error("schema load: {0}")]
    Load(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    NotSingular(String),
    #[error("{0}")]
    Filter(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("inconsistent data: {0}")]
    Consistency(String),
    #[error("{stage} hook: {source}")]
    Hook {
        stage: &'static str,
        #[source]
        source: Box<AppError>,
    },
    #[error("program: {0}")]
    Program(String),
    #[error("transaction: {0}")]
    Tx(String),
    /// The operation failed and so did the rollback that followed.
    #[error("{source}: rollback: {rollback}")]
    Rollback {
        #[source]
        source: Box<AppError>,
        rollback: Box<AppError>,
    },
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// True when this error (or anything it wraps) means "no rows matched".
    pub fn is_not_found(&self) -> bool {
        match self {
            AppError::NotFound(_) => true,
            AppError::Db(sqlx::Error::RowNotFound) => true,
            AppError::Hook { source, .. }
            | AppError::Context { source, .. }
            | AppError::Rollback { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True for the "more than one entity found" error returned by `Only`.
    pub fn is_not_singular(&self) -> bool {
        match self {
            AppError::NotSingular(_) => true,
            AppError::Hook { source, .. } | AppError::Context { source, .. } => source.is_not_singular(),
            _ => false,
        }
    }

    /// Prefix the error with a layer label, e.g. `"$add.age"`.
    pub fn context(self, context: impl Into<String>) -> AppError {
        AppError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub(crate) fn hook(stage: &'static str, err: AppError) -> AppError {
        AppError::Hook {
            stage,
            source: Box::new(err),
        }
    }
}

/// Extension for attaching a context prefix to any `Result<_, AppError>`.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| e.context(context))
    }
}

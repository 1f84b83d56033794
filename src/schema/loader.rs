//! Load schema declarations from JSON strings or a directory of `*.json` files.

use crate::error::SchemaError;
use crate::schema::{Builder, Schema};
use std::path::Path;

impl Builder {
    /// Parses one schema per JSON document, then initializes the registry.
    pub fn from_json<S: AsRef<str>>(documents: &[S]) -> Result<Builder, SchemaError> {
        let schemas = documents
            .iter()
            .map(|d| Schema::from_json(d.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Builder::from_schemas(schemas)
    }

    /// Reads every `*.json` file in `dir` (sorted by file name) as a schema declaration.
    pub async fn from_dir(dir: impl AsRef<Path>) -> Result<Builder, SchemaError> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| SchemaError::Load(format!("{}: {}", dir.display(), e)))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SchemaError::Load(format!("{}: {}", dir.display(), e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut schemas = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| SchemaError::Load(format!("{}: {}", path.display(), e)))?;
            let schema = Schema::from_json(&raw)
                .map_err(|e| SchemaError::Load(format!("{}: {}", path.display(), e)))?;
            schemas.push(schema);
        }
        tracing::debug!(dir = %dir.display(), count = schemas.len(), "loaded schema files");
        Builder::from_schemas(schemas)
    }
}

//! Loads the schemas under `demos/schemas`, migrates them, then writes and reads a few rows.
//!
//! `RELSCHEMA_SCHEMA_DIR=demos/schemas DATABASE_URL=postgres://... cargo run --example quickstart`

use relschema::{migrate, with_tx, Builder, Client, DbConfig, PgExecutor, PgMigrator};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("relschema=info".parse()?))
        .init();

    let config = DbConfig::from_env();
    let pool = config.connect().await?;
    let builder = Builder::from_dir(&config.schema_dir).await?;
    migrate(&builder, &PgMigrator::new(pool.clone())).await?;
    let client = Client::new(Arc::new(PgExecutor::new(pool)), builder)?;

    let user_id = with_tx(&client, |tx| async move {
        let group_id = tx
            .model("group")?
            .create_from_json(r#"{"name": "admins"}"#)
            .await?;
        let user_id = tx
            .model("user")?
            .create_from_json(&json!({"name": "ann", "age": 30, "groups": [group_id]}).to_string())
            .await?;
        tx.model("post")?
            .create_from_json(&json!({"title": "hello", "author": {"id": user_id}}).to_string())
            .await?;
        Ok(user_id)
    })
    .await?;

    let users = client
        .model("user")?
        .query()
        .filter(&json!({"groups.name": "admins", "age": {"$gte": 18}}))?
        .select(["name", "posts.title", "groups"])
        .order(["-name"])
        .get()
        .await?;
    for u in &users {
        tracing::info!(user = %u.to_json()?, "loaded");
    }

    client
        .model("user")?
        .mutation()
        .filter(&json!({"id": user_id}))?
        .update_json(r#"{"$add": {"age": 1}, "$clear": {"groups": true}}"#)
        .await?;
    let count = client.model("post")?.query().filter(&json!({"author.name": "ann"}))?.count().await?;
    tracing::info!(count, "posts by ann");
    Ok(())
}

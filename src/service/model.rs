use crate::client::Client;
use crate::entity::Entity;
use crate::error::AppError;
use crate::schema::{Builder, Schema};
use crate::service::mutation::{self, Mutation};
use crate::service::Query;
use std::sync::Arc;

/// One schema bound to a client and the registry snapshot it was opened against.
#[derive(Clone, Debug)]
pub struct Model {
    client: Client,
    builder: Arc<Builder>,
    schema: Schema,
}

impl Model {
    pub(crate) fn new(client: Client, builder: Arc<Builder>, name: &str) -> Result<Self, AppError> {
        let schema = builder.schema(name)?.clone();
        Ok(Model {
            client,
            builder,
            schema,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn query(&self) -> Query {
        Query::new(self.clone())
    }

    pub fn mutation(&self) -> Mutation {
        Mutation::new(self.clone())
    }

    /// Inserts the entity and returns its new id.
    pub async fn create(&self, entity: Entity) -> Result<u64, AppError> {
        mutation::create(self, entity).await
    }

    pub async fn create_from_json(&self, json: &str) -> Result<u64, AppError> {
        self.create(Entity::from_json(json)?).await
    }
}

//! Query, edge loading, mutations and transactions over a `Client`.

mod edges;
mod model;
mod mutation;
mod query;
mod tx;

pub use model::Model;
pub use mutation::{compile_create, compile_update, EdgeMutation, EdgeOp, Mutation, MutationSpec};
pub use query::{Query, QueryOption};
pub use tx::with_tx;

//! Schema declarations and the relation-deriving registry.

mod builder;
mod definition;
mod field;
mod loader;
mod relation;
mod validator;

pub use builder::Builder;
pub use definition::Schema;
pub use field::*;
pub use relation::{FkColumns, Relation, RelationType};
pub use validator::{is_identifier, validate};

//! Safe SQL builder: identifiers from schema declarations only, values as parameters.

mod builder;
pub mod params;
mod predicate;

pub use builder::*;
pub use params::*;
pub use predicate::compile_predicates;

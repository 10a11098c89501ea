mod glob;
pub mod keyspace;

pub use glob::glob_match;
pub use keyspace::{DEFAULT_DATABASES, Keyspace, Value};

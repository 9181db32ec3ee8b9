//! PostgreSQL connection pooling for the template catalog backend.

pub mod pool;

pub use pool::{PostgresPool, PostgresPoolError};

//! Infrastructure layer modules
//!
//! Shared plumbing used by the domain and dispatch layers:
//! - `config`: Layered settings
//! - `error`: Crate-level error type
//! - `metrics`: Prometheus registry and helpers
//! - `postgres`: PostgreSQL pool for the template catalog
//! - `redis`: Shared Redis connection and reconnection backoff

pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
pub mod redis;

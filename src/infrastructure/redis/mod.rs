//! Redis connectivity shared by the broker backend.
//!
//! - `RedisPool`: one multiplexed connection shared across units of work
//! - `ExponentialBackoff`: delays for poll-loop reconnection attempts

mod backoff;
pub mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use pool::{PoolError, RedisPool};

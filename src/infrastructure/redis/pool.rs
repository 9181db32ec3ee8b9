//! Shared Redis connection for broker operations.

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),
}

/// One multiplexed connection shared by every unit of work.
///
/// The connection is established lazily and dropped on I/O errors so the
/// next call reconnects. Blocking reads (`XREADGROUP BLOCK`) should use
/// `dedicated_connection` so they do not stall pipelined commands.
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisPool {
    pub fn new(config: &RedisConfig) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
        })
    }

    /// Get the shared connection, connecting on first use.
    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let mut guard = self.connection.write().await;

        // Another task may have connected while we waited
        if let Some(ref c) = *guard {
            return Ok(c.clone());
        }

        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to Redis");
                PoolError::Redis(e)
            })?;

        *guard = Some(conn.clone());
        tracing::info!("Redis connection established");
        Ok(conn)
    }

    /// A fresh connection not shared with other callers.
    pub async fn dedicated_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        Ok(self.client.get_multiplexed_tokio_connection().await?)
    }

    /// Run a command on the shared connection, dropping it on I/O failure.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut guard = self.connection.write().await;
                    *guard = None;
                }
                Err(PoolError::Redis(e))
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        let config = RedisConfig {
            url: "not a url".to_string(),
        };
        assert!(matches!(RedisPool::new(&config), Err(PoolError::Redis(_))));
    }

    #[test]
    fn test_valid_url_does_not_connect_eagerly() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
        };
        assert!(RedisPool::new(&config).is_ok());
    }
}

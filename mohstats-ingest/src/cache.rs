use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Pipeline, RedisError, Value};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Every cache round trip gets this deadline so a stalled cache can't wedge
/// a batch worker or block shutdown.
pub const CACHE_OP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache command failed")]
    Redis(#[from] RedisError),

    #[error("cache command timed out")]
    Timeout,
}

/// Thin handle over a shared redis connection. Clones share the underlying
/// multiplexed connection, so one `Cache` is passed around freely.
#[derive(Clone)]
pub struct Cache {
    manager: ConnectionManager,
}

impl Cache {
    pub async fn connect(url: &str) -> Result<Cache, RedisError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Cache { manager })
    }

    async fn deadline<T>(
        fut: impl Future<Output = Result<T, RedisError>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(CACHE_OP_TIMEOUT, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Timeout),
        }
    }

    /// Executes a multi-command pipeline: one round trip, one reply value
    /// per non-ignored command, in command order.
    pub async fn execute_pipeline(&self, pipe: &Pipeline) -> Result<Vec<Value>, CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(pipe.query_async::<_, Vec<Value>>(&mut conn)).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.get(key)).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.set(key, value)).await
    }

    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.del(key)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.exists(key)).await
    }

    pub async fn incr(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.incr(key, by)).await
    }

    pub async fn incr_float(&self, key: &str, by: f64) -> Result<f64, CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.incr(key, by)).await
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.hget(key, field)).await
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.hset(key, field, value)).await
    }

    pub async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.hdel(key, field)).await
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.hgetall(key)).await
    }

    pub async fn sadd(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.sadd(key, member)).await
    }

    pub async fn srem(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.srem(key, member)).await
    }

    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.sismember(key, member)).await
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        Self::deadline(conn.publish(channel, payload)).await
    }
}

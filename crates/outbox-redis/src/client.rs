//! Redis client over a reconnecting connection manager

use crate::Result;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, FromRedisValue, ScriptInvocation};

/// Cloneable Redis handle; clones share one multiplexed connection that
/// reconnects on its own after a failure
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
}

impl RedisClient {
    /// Connect to `redis://` or `rediss://` (TLS)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager {
        &mut self.conn
    }

    /// PING - liveness probe used right after connecting
    pub async fn ping(&mut self) -> Result<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn).await?;
        Ok(())
    }

    /// EVALSHA a prepared script, loading it on NOSCRIPT
    ///
    /// The whole script runs atomically on the server.
    pub async fn eval_script<T: FromRedisValue>(
        &mut self,
        invocation: &ScriptInvocation<'_>,
    ) -> Result<T> {
        invocation.invoke_async(&mut self.conn).await
    }

    /// DEL - remove keys, returning how many existed
    pub async fn del_keys(&mut self, keys: &[String]) -> Result<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.conn.del(keys).await
    }
}

//! Redis cache module
//!
//! This module provides functionality for connecting to Redis and performing
//! the key and set operations the session registry relies on. Every call takes
//! a multiplexed connection, so a `RedisPool` is cheap to clone and share.

use crate::error::StoreResult;
use redis::{AsyncCommands, Client, Script};
use std::sync::LazyLock;
use tracing::info;

/// KEYS: old key, set, new key. ARGV: old member, value, new member, ttl.
static REPLACE_WITH_MEMBERSHIP: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call('DEL', KEYS[1]) == 0 then
            return 0
        end
        redis.call('SREM', KEYS[2], ARGV[1])
        redis.call('SET', KEYS[3], ARGV[2], 'EX', ARGV[4])
        redis.call('SADD', KEYS[2], ARGV[3])
        redis.call('EXPIRE', KEYS[2], ARGV[4])
        return 1
        "#,
    )
});

/// KEYS: set. ARGV: prefix turning a member into its key.
static DELETE_SET_AND_MEMBERS: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local removed = 0
        for _, member in ipairs(redis.call('SMEMBERS', KEYS[1])) do
            removed = removed + redis.call('DEL', ARGV[1] .. member)
        end
        redis.call('DEL', KEYS[1])
        return removed
        "#,
    )
});

/// Configuration for Redis connection
#[derive(Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig").field("url", &"<redacted>").finish()
    }
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> StoreResult<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        Ok(RedisConfig { url })
    }
}

/// Redis connection pool
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
}

impl RedisPool {
    /// Initialize a new Redis connection pool
    pub async fn new(config: &RedisConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Redis client initialized");
        Ok(RedisPool { client })
    }

    async fn get_connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Set a key-value pair in Redis with optional TTL
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> StoreResult<()> {
        let mut conn = self.get_connection().await?;

        if let Some(ttl) = ttl_seconds {
            let _: () = conn.set_ex(key, value, ttl).await?;
        } else {
            let _: () = conn.set(key, value).await?;
        }

        Ok(())
    }

    /// Get a value from Redis by key
    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    /// Check whether a key exists
    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.get_connection().await?;
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    /// Delete a key from Redis, returning whether this call removed it
    ///
    /// `DEL` is atomic on the server, so when several clients race to delete
    /// the same key exactly one of them observes `true`.
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.get_connection().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    /// List the members of a set
    pub async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    /// Set a key with a TTL and record it as a member of a set, in one transaction
    ///
    /// The set's TTL is refreshed to the same value.
    pub async fn set_with_membership(
        &self,
        key: &str,
        value: &str,
        set_key: &str,
        member: &str,
        ttl_seconds: u64,
    ) -> StoreResult<()> {
        let mut conn = self.get_connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .set_ex(key, value, ttl_seconds)
            .ignore()
            .sadd(set_key, member)
            .ignore()
            .expire(set_key, ttl_seconds as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Delete a key and drop its set membership in one transaction
    ///
    /// Returns whether this call removed the key.
    pub async fn delete_with_membership(
        &self,
        key: &str,
        set_key: &str,
        member: &str,
    ) -> StoreResult<bool> {
        let mut conn = self.get_connection().await?;
        let (removed,): (u64,) = redis::pipe()
            .atomic()
            .del(key)
            .srem(set_key, member)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    /// Swap `old_key` for `new_key` inside `set_key`, only if `old_key` still exists
    ///
    /// Runs as one script, so of two callers replacing the same key exactly
    /// one succeeds and the loser writes nothing.
    #[allow(clippy::too_many_arguments)]
    pub async fn replace_with_membership(
        &self,
        old_key: &str,
        old_member: &str,
        new_key: &str,
        new_member: &str,
        value: &str,
        set_key: &str,
        ttl_seconds: u64,
    ) -> StoreResult<bool> {
        let mut conn = self.get_connection().await?;
        let replaced: u64 = REPLACE_WITH_MEMBERSHIP
            .key(old_key)
            .key(set_key)
            .key(new_key)
            .arg(old_member)
            .arg(value)
            .arg(new_member)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await?;
        Ok(replaced == 1)
    }

    /// Delete a set and every `member_prefix + member` key it lists, atomically
    ///
    /// Returns how many member keys existed.
    pub async fn delete_set_and_members(
        &self,
        set_key: &str,
        member_prefix: &str,
    ) -> StoreResult<u64> {
        let mut conn = self.get_connection().await?;
        let removed: u64 = DELETE_SET_AND_MEMBERS
            .key(set_key)
            .arg(member_prefix)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> StoreResult<bool> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

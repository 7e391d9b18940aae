use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redis::{AsyncCommands, Client as RedisClient};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const IDENTITY_PREFIX: &str = "identity:";

/// Bearer token -> local user id, so repeat requests skip token
/// verification and the user lookup.
///
/// Keys are a digest of the token; raw tokens never reach redis. Every
/// operation is best effort: a redis failure is logged and treated as a
/// miss.
#[derive(Clone)]
pub struct IdentityCache {
    redis: Arc<RedisClient>,
    ttl: Option<Duration>,
}

pub fn identity_key(token: &str) -> String {
    format!("{}{:x}", IDENTITY_PREFIX, Sha256::digest(token.as_bytes()))
}

fn entry_ttl(ttl: Option<Duration>, expires_at: Option<i64>, now: i64) -> Option<Duration> {
    let ttl = ttl?;
    match expires_at {
        None => Some(ttl),
        Some(exp) => {
            let remaining = exp.checked_sub(now).filter(|s| *s > 0)?;
            Some(ttl.min(Duration::from_secs(remaining as u64)))
        }
    }
}

impl IdentityCache {
    pub fn new(redis: Arc<RedisClient>, ttl: Option<Duration>) -> Self {
        Self { redis, ttl }
    }

    pub fn enabled(&self) -> bool {
        self.ttl.is_some()
    }

    pub async fn get(&self, token: &str) -> Option<Uuid> {
        if !self.enabled() {
            return None;
        }
        match self.try_get(token).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!("identity cache read failed: {}", e);
                None
            }
        }
    }

    /// Caches until the configured TTL or the token's own expiry, whichever
    /// comes first. Tokens that are already expired are not cached.
    pub async fn put(&self, token: &str, user_id: Uuid, expires_at: Option<i64>) {
        let Some(ttl) = entry_ttl(self.ttl, expires_at, Utc::now().timestamp()) else {
            return;
        };
        if let Err(e) = self.try_put(token, user_id, ttl).await {
            tracing::warn!("identity cache write failed: {}", e);
        }
    }

    async fn try_get(&self, token: &str) -> Result<Option<Uuid>, redis::RedisError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(identity_key(token)).await?;
        Ok(cached.and_then(|raw| Uuid::parse_str(&raw).ok()))
    }

    async fn try_put(
        &self,
        token: &str,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let _: () = conn
            .set_ex(identity_key(token), user_id.to_string(), ttl.as_secs())
            .await?;
        Ok(())
    }
}

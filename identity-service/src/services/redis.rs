use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::Challenge;

/// One-time challenge storage. `take` must be atomic: of any number of
/// concurrent callers for the same key, at most one gets the value.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Store `challenge` under its key, replacing any earlier one.
    async fn put(&self, challenge: &Challenge, ttl_seconds: i64) -> Result<(), anyhow::Error>;
    /// Remove and return the challenge under `key`.
    async fn take(&self, key: &str) -> Result<Option<Challenge>, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisChallengeStore {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisChallengeStore {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl ChallengeStore for RedisChallengeStore {
    async fn put(&self, challenge: &Challenge, ttl_seconds: i64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let value = serde_json::to_string(challenge)?;

        redis::cmd("SET")
            .arg(challenge.key())
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to store challenge: {}", e))
    }

    async fn take(&self, key: &str) -> Result<Option<Challenge>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to take challenge: {}", e))?;

        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| anyhow::anyhow!("Stored challenge is corrupt: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-process challenge store for tests and local runs. Expiry is enforced by
/// the caller through `Challenge::expiry_utc`.
pub struct MockChallengeStore {
    pub challenges: Mutex<HashMap<String, Challenge>>,
}

impl Default for MockChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChallengeStore {
    pub fn new() -> Self {
        Self {
            challenges: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ChallengeStore for MockChallengeStore {
    async fn put(&self, challenge: &Challenge, _ttl_seconds: i64) -> Result<(), anyhow::Error> {
        self.challenges
            .lock()
            .map_err(|_| anyhow::anyhow!("challenge store lock poisoned"))?
            .insert(challenge.key(), challenge.clone());
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Challenge>, anyhow::Error> {
        Ok(self
            .challenges
            .lock()
            .map_err(|_| anyhow::anyhow!("challenge store lock poisoned"))?
            .remove(key))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

use crate::core::{DbError, Result};
use crate::state::{
    CacheStateHandler, MemoryStateHandler, PubSubStateHandler, StateHandler, StateServices,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where checksums are recorded and how other processes learn about them
    pub state: StateConfig,

    /// Run each definition change inside a backend atomic scope when the
    /// backend supports transactional structural changes
    pub atomic_ddl: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state: StateConfig::Memory,
            atomic_ddl: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the state backend
    pub fn state(mut self, state: StateConfig) -> Self {
        self.state = state;
        self
    }

    /// Enable or disable atomic structural scopes
    pub fn atomic_ddl(mut self, enabled: bool) -> Self {
        self.atomic_ddl = enabled;
        self
    }

    /// Parse and validate a JSON document
    ///
    /// ```ignore
    /// let config = EngineConfig::from_json_str(
    ///     r#"{"state": {"backend": "pub_sub", "channel": "schema"}}"#
    /// )?;
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.state.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StateConfig {
    Memory,
    Cache(CacheConfig),
    PubSub(PubSubConfig),
}

impl StateConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Memory => Ok(()),
            Self::Cache(cache) => cache.validate(),
            Self::PubSub(pubsub) => pubsub.validate(),
        }
    }

    /// Builds the configured handler on top of `services`. The cache and
    /// pub/sub backends need their service to be present.
    pub async fn build(&self, services: &StateServices) -> Result<Arc<dyn StateHandler>> {
        self.validate()?;
        match self {
            Self::Memory => Ok(Arc::new(MemoryStateHandler::new())),
            Self::Cache(config) => {
                let cache = services.cache.clone().ok_or_else(|| {
                    DbError::Configuration("cache state backend needs a cache service".into())
                })?;
                Ok(Arc::new(CacheStateHandler::new(
                    cache,
                    config.key_prefix.clone(),
                    config.ttl(),
                )))
            }
            Self::PubSub(config) => {
                let broker = services.broker.clone().ok_or_else(|| {
                    DbError::Configuration("pub/sub state backend needs a broker".into())
                })?;
                let handler = PubSubStateHandler::connect(broker, config.clone()).await?;
                Ok(Arc::new(handler))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries kept by the fallback in-process cache
    pub capacity: usize,

    /// Entry lifetime, 0 keeps entries until evicted
    pub ttl_ms: u64,

    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl_ms: 300_000, // 5 minutes
            key_prefix: "rustmutant:checksum:".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_ms > 0).then(|| Duration::from_millis(self.ttl_ms))
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(DbError::Configuration("cache capacity must be > 0".into()));
        }
        if self.key_prefix.is_empty() {
            return Err(DbError::Configuration("cache key_prefix cannot be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    pub channel: String,

    /// Bound on a single publish or subscribe call
    pub socket_timeout_ms: u64,

    /// How long connecting waits for the first live subscription
    pub ready_timeout_ms: u64,

    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            channel: "rustmutant.state".to_string(),
            socket_timeout_ms: 5_000,
            ready_timeout_ms: 5_000,
            retry_base_ms: 100,
            retry_max_ms: 5_000,
        }
    }
}

impl PubSubConfig {
    pub fn channel(mut self, channel: &str) -> Self {
        self.channel = channel.to_string();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            return Err(DbError::Configuration("pub/sub channel cannot be empty".into()));
        }
        if self.socket_timeout_ms == 0 || self.ready_timeout_ms == 0 {
            return Err(DbError::Configuration("pub/sub timeouts must be > 0".into()));
        }
        if self.retry_max_ms < self.retry_base_ms {
            return Err(DbError::Configuration(
                "retry_max_ms cannot be lower than retry_base_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.state, StateConfig::Memory);
        assert!(config.atomic_ddl);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json() {
        let config = EngineConfig::from_json_str(
            r#"{"state": {"backend": "pub_sub", "channel": "schema", "retry_base_ms": 10}}"#,
        )
        .unwrap();
        match config.state {
            StateConfig::PubSub(pubsub) => {
                assert_eq!(pubsub.channel, "schema");
                assert_eq!(pubsub.retry_base_ms, 10);
                assert_eq!(pubsub.socket_timeout_ms, 5_000);
            }
            other => panic!("unexpected state backend {:?}", other),
        }

        let cache = EngineConfig::from_json_str(r#"{"state": {"backend": "cache"}, "atomic_ddl": false}"#)
            .unwrap();
        assert_eq!(cache.state, StateConfig::Cache(CacheConfig::default()));
        assert!(!cache.atomic_ddl);
    }

    #[test]
    fn test_validation() {
        let zero = EngineConfig::new().state(StateConfig::Cache(CacheConfig {
            capacity: 0,
            ..CacheConfig::default()
        }));
        assert!(zero.validate().unwrap_err().is_configuration());

        let json = r#"{"state": {"backend": "pub_sub", "channel": " "}}"#;
        assert!(EngineConfig::from_json_str(json).unwrap_err().is_configuration());
        assert!(EngineConfig::from_json_str("{not json").is_err());
    }

    #[tokio::test]
    async fn test_cache_needs_service() {
        let state = StateConfig::Cache(CacheConfig::default());
        let err = state.build(&StateServices::new()).await.err().unwrap();
        assert!(err.is_configuration());

        let cache: Arc<dyn crate::state::SharedCache> =
            Arc::new(crate::state::LruSharedCache::new(8).unwrap());
        let handler = state
            .build(&StateServices::new().with_cache(cache))
            .await
            .unwrap();
        assert_eq!(handler.backend(), "cache");
    }

    #[tokio::test]
    async fn test_pubsub_needs_broker() {
        let state = StateConfig::PubSub(PubSubConfig::default());
        let err = state.build(&StateServices::new()).await.err().unwrap();
        assert!(err.is_configuration());
    }
}

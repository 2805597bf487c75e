//! Checksum state propagation.
//!
//! Every process records the checksum of each definition it has built. The
//! three handlers differ only in who else gets to see those records: nobody
//! ([`MemoryStateHandler`]), processes sharing a cache service
//! ([`CacheStateHandler`]) or every subscriber of a broadcast channel
//! ([`PubSubStateHandler`]). A missing entry always means "assume stale".

mod cache;
mod handle;
mod pubsub;

pub use cache::{CacheStateHandler, LruSharedCache, SharedCache};
pub use handle::{current, install, install_from_config, StateServices};
pub use pubsub::{
    Broker, InMemoryBroker, PubSubStateHandler, StateMessage, Subscription,
};

use crate::core::Result;
use crate::definition::DefinitionId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait StateHandler: Send + Sync {
    async fn get_checksum(&self, id: DefinitionId) -> Result<Option<String>>;
    async fn set_checksum(&self, id: DefinitionId, checksum: &str) -> Result<()>;
    async fn clear_checksum(&self, id: DefinitionId) -> Result<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Process-local checksums. Invisible to other processes.
#[derive(Debug, Default)]
pub struct MemoryStateHandler {
    checksums: Mutex<HashMap<DefinitionId, String>>,
}

impl MemoryStateHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateHandler for MemoryStateHandler {
    async fn get_checksum(&self, id: DefinitionId) -> Result<Option<String>> {
        Ok(self.checksums.lock()?.get(&id).cloned())
    }

    async fn set_checksum(&self, id: DefinitionId, checksum: &str) -> Result<()> {
        self.checksums.lock()?.insert(id, checksum.to_string());
        Ok(())
    }

    async fn clear_checksum(&self, id: DefinitionId) -> Result<()> {
        self.checksums.lock()?.remove(&id);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

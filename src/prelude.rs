//! Everything an application needs to define types and work with records.

pub use crate::config::{CacheConfig, EngineConfig, PubSubConfig, StateConfig};
pub use crate::construct::{Record, RuntimeType};
pub use crate::core::{DataType, DbError, Result, Value};
pub use crate::definition::{
    AttributeDraft, AttributePatch, BaseRef, ChoiceDraft, DefinitionId, TypeDraft, TypePatch,
};
pub use crate::engine::SchemaEngine;
pub use crate::models::{Mixin, ModelRegistry, StaticModel};
pub use crate::proxy::{TypeProxy, TypeReference};
pub use crate::storage::{InMemoryStorage, RowStore, StorageBackend};

// ============================================================================
// Rustmutant Library
// ============================================================================

pub mod core;
pub mod storage;
pub mod definition;
pub mod kinds;
pub mod models;
pub mod shape;
pub mod construct;
pub mod state;
pub mod sync;
pub mod proxy;
pub mod cache;
pub mod engine;
pub mod fixtures;
pub mod config;
pub mod prelude;

// Re-export main types for convenience
pub use core::{DataType, DbError, Result, Value};
pub use engine::{SchemaEngine, SchemaEngineBuilder};
pub use config::{CacheConfig, EngineConfig, PubSubConfig, StateConfig};
pub use construct::{Record, RuntimeType};
pub use proxy::{TypeProxy, TypeReference};

#![allow(dead_code)]

use rustmutant::definition::{AttributeDraft, DefinitionStore, TypeDraft};
use rustmutant::models::ModelRegistry;
use rustmutant::state::{MemoryStateHandler, StateHandler};
use rustmutant::storage::{BackendCapabilities, DdlEntry, InMemoryStorage};
use rustmutant::{EngineConfig, SchemaEngine};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub engine: Arc<SchemaEngine>,
    pub storage: Arc<InMemoryStorage>,
}

impl Harness {
    /// Structural statements only, transaction markers dropped.
    pub fn ddl(&self) -> Vec<DdlEntry> {
        self.storage
            .journal()
            .into_iter()
            .filter(DdlEntry::is_structural)
            .collect()
    }
}

pub async fn harness() -> Harness {
    harness_with(InMemoryStorage::new(), ModelRegistry::new()).await
}

pub async fn harness_without_uniques() -> Harness {
    let storage = InMemoryStorage::with_capabilities(BackendCapabilities {
        supports_unique: false,
        ..BackendCapabilities::default()
    });
    harness_with(storage, ModelRegistry::new()).await
}

pub async fn harness_with(storage: InMemoryStorage, models: ModelRegistry) -> Harness {
    let storage = Arc::new(storage);
    let engine = SchemaEngine::builder()
        .storage(storage.clone())
        .models(models)
        .state(Arc::new(MemoryStateHandler::new()))
        .build()
        .await
        .unwrap();
    Harness {
        engine: Arc::new(engine),
        storage,
    }
}

/// Engine over an existing definition store and storage, e.g. a second
/// process attached to the same database.
pub async fn attach(
    store: Arc<DefinitionStore>,
    storage: Arc<InMemoryStorage>,
    state: Arc<dyn StateHandler>,
) -> Arc<SchemaEngine> {
    let engine = SchemaEngine::builder()
        .store(store)
        .storage(storage)
        .state(state)
        .config(EngineConfig::default())
        .build()
        .await
        .unwrap();
    Arc::new(engine)
}

pub fn name_attribute() -> AttributeDraft {
    AttributeDraft::new("name", "char")
        .option("max_length", 50)
        .not_null()
}

/// `shop.Widget` with a required `name`.
pub fn widget() -> TypeDraft {
    TypeDraft::new("shop", "Widget").attribute(name_attribute())
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

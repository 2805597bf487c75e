//! Schema engine: the single entry point for changing definitions and for
//! looking up the runtime types built from them.
//!
//! A definition save runs, in order: validation of every affected type,
//! checksum recording, the structural plan (pre phase, store write, post
//! phase) and finally installation of the rebuilt runtime types. Nothing
//! becomes visible to lookups before its storage has been migrated.

use crate::cache::TypeCache;
use crate::config::EngineConfig;
use crate::construct::{Record, RuntimeType, TypeBuilder};
use crate::core::{DbError, Result};
use crate::definition::validate::{validate_deletion, validate_type};
use crate::definition::{
    AttributeDraft, AttributeId, AttributePatch, BaseId, BaseRef, ChoiceDraft, ChoiceId,
    DefinitionId, DefinitionSet, DefinitionStore, OrderingId, TypeDraft, TypePatch, UniquenessId,
};
use crate::kinds::KindRegistry;
use crate::models::ModelRegistry;
use crate::proxy::{TypeProxy, TypeReference, TypeResolver};
use crate::shape::{Shape, ShapeContext, checksum};
use crate::state::{self, StateHandler};
use crate::storage::{InMemoryStorage, StorageBackend};
use crate::sync::{self, MigrationPlan, Operation};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Instrument, Level, event, info_span};

/// Which type a definition change is about.
enum Target {
    Type(DefinitionId),
    Deleted(DefinitionId),
}

/// One affected type within a save.
struct Step {
    id: DefinitionId,
    checksum: Option<String>,
    rebuilt: Option<RuntimeType>,
    plan: MigrationPlan,
}

pub struct SchemaEngine {
    store: Arc<DefinitionStore>,
    storage: Arc<dyn StorageBackend>,
    kinds: Arc<KindRegistry>,
    models: Arc<ModelRegistry>,
    state: Arc<dyn StateHandler>,
    cache: TypeCache,
    /// Serializes type construction and installation.
    build_lock: Mutex<()>,
    config: EngineConfig,
}

pub struct SchemaEngineBuilder {
    store: Option<Arc<DefinitionStore>>,
    storage: Option<Arc<dyn StorageBackend>>,
    kinds: Option<Arc<KindRegistry>>,
    models: Option<Arc<ModelRegistry>>,
    state: Option<Arc<dyn StateHandler>>,
    config: EngineConfig,
}

impl SchemaEngineBuilder {
    pub fn store(mut self, store: Arc<DefinitionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn kinds(mut self, kinds: KindRegistry) -> Self {
        self.kinds = Some(Arc::new(kinds));
        self
    }

    pub fn models(mut self, models: ModelRegistry) -> Self {
        self.models = Some(Arc::new(models));
        self
    }

    /// Uses `handler` instead of the process-wide one.
    pub fn state(mut self, handler: Arc<dyn StateHandler>) -> Self {
        self.state = Some(handler);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Without an explicit handler the engine uses the process-wide one,
    /// selected at startup with [`state::install_from_config`].
    pub async fn build(self) -> Result<SchemaEngine> {
        self.config.validate()?;
        let state = match self.state {
            Some(state) => state,
            None => state::current()?,
        };
        event!(Level::INFO, backend = state.backend(), "schema engine ready");

        Ok(SchemaEngine {
            store: self.store.unwrap_or_default(),
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(InMemoryStorage::new())),
            kinds: self
                .kinds
                .unwrap_or_else(|| Arc::new(KindRegistry::with_builtins())),
            models: self.models.unwrap_or_default(),
            state,
            cache: TypeCache::new(),
            build_lock: Mutex::new(()),
            config: self.config,
        })
    }
}

impl SchemaEngine {
    pub fn builder() -> SchemaEngineBuilder {
        SchemaEngineBuilder {
            store: None,
            storage: None,
            kinds: None,
            models: None,
            state: None,
            config: EngineConfig::default(),
        }
    }

    pub fn definitions(&self) -> &Arc<DefinitionStore> {
        &self.store
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn state(&self) -> &Arc<dyn StateHandler> {
        &self.state
    }

    pub fn cache(&self) -> &TypeCache {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn context<'a>(&'a self, set: &'a DefinitionSet) -> ShapeContext<'a> {
        ShapeContext::new(set, &self.kinds, &self.models)
    }

    // ========================================================================
    // Definition changes
    // ========================================================================

    pub async fn create_type(&self, draft: TypeDraft) -> Result<DefinitionId> {
        self.save("create_type", |set| {
            let id = set.insert_type(draft)?;
            Ok((id, Target::Type(id)))
        })
        .await
    }

    pub async fn update_type(&self, id: DefinitionId, patch: TypePatch) -> Result<()> {
        self.save("update_type", |set| {
            set.update_type(id, patch)?;
            Ok(((), Target::Type(id)))
        })
        .await
    }

    /// Drops the type and its storage. Refused while other types depend on it.
    pub async fn delete_type(&self, id: DefinitionId) -> Result<()> {
        self.save("delete_type", |set| {
            validate_deletion(set, id)?;
            set.remove_type(id)?;
            Ok(((), Target::Deleted(id)))
        })
        .await
    }

    pub async fn add_attribute(&self, owner: DefinitionId, draft: AttributeDraft) -> Result<AttributeId> {
        self.save("add_attribute", |set| {
            let id = set.insert_attribute(owner, draft)?;
            Ok((id, Target::Type(owner)))
        })
        .await
    }

    pub async fn update_attribute(&self, id: AttributeId, patch: AttributePatch) -> Result<()> {
        self.save("update_attribute", |set| {
            let owner = set.attribute(id)?.owner;
            set.update_attribute(id, patch)?;
            Ok(((), Target::Type(owner)))
        })
        .await
    }

    pub async fn delete_attribute(&self, id: AttributeId) -> Result<()> {
        self.save("delete_attribute", |set| {
            let removed = set.remove_attribute(id)?;
            Ok(((), Target::Type(removed.owner)))
        })
        .await
    }

    pub async fn add_choice(&self, attribute: AttributeId, draft: ChoiceDraft) -> Result<ChoiceId> {
        self.save("add_choice", |set| {
            let owner = set.attribute(attribute)?.owner;
            let id = set.insert_choice(attribute, draft)?;
            Ok((id, Target::Type(owner)))
        })
        .await
    }

    pub async fn delete_choice(&self, id: ChoiceId) -> Result<()> {
        self.save("delete_choice", |set| {
            let removed = set.remove_choice(id)?;
            let owner = set.attribute(removed.attribute)?.owner;
            Ok(((), Target::Type(owner)))
        })
        .await
    }

    pub async fn add_base(&self, owner: DefinitionId, base: BaseRef, position: Option<i64>) -> Result<BaseId> {
        self.save("add_base", |set| {
            let id = set.insert_base(owner, base, position)?;
            Ok((id, Target::Type(owner)))
        })
        .await
    }

    pub async fn move_base(&self, id: BaseId, position: i64) -> Result<()> {
        self.save("move_base", |set| {
            let owner = set.base(id)?.owner;
            set.move_base(id, position)?;
            Ok(((), Target::Type(owner)))
        })
        .await
    }

    pub async fn delete_base(&self, id: BaseId) -> Result<()> {
        self.save("delete_base", |set| {
            let removed = set.remove_base(id)?;
            Ok(((), Target::Type(removed.owner)))
        })
        .await
    }

    pub async fn add_ordering(&self, owner: DefinitionId, lookup: &str, descending: bool) -> Result<OrderingId> {
        let lookup = lookup.to_string();
        self.save("add_ordering", move |set| {
            let id = set.insert_ordering(owner, lookup, descending)?;
            Ok((id, Target::Type(owner)))
        })
        .await
    }

    pub async fn delete_ordering(&self, id: OrderingId) -> Result<()> {
        self.save("delete_ordering", |set| {
            let removed = set.remove_ordering(id)?;
            Ok(((), Target::Type(removed.owner)))
        })
        .await
    }

    pub async fn add_uniqueness(&self, owner: DefinitionId, attributes: Vec<AttributeId>) -> Result<UniquenessId> {
        self.save("add_uniqueness", |set| {
            for attribute in &attributes {
                set.attribute(*attribute)?;
            }
            let id = set.insert_uniqueness(owner, attributes)?;
            Ok((id, Target::Type(owner)))
        })
        .await
    }

    pub async fn add_uniqueness_member(&self, id: UniquenessId, attribute: AttributeId) -> Result<()> {
        self.save("add_uniqueness_member", |set| {
            let owner = set.uniqueness(id)?.owner;
            set.add_uniqueness_member(id, attribute)?;
            Ok(((), Target::Type(owner)))
        })
        .await
    }

    pub async fn remove_uniqueness_member(&self, id: UniquenessId, attribute: AttributeId) -> Result<()> {
        self.save("remove_uniqueness_member", |set| {
            let owner = set.uniqueness(id)?.owner;
            set.remove_uniqueness_member(id, attribute)?;
            Ok(((), Target::Type(owner)))
        })
        .await
    }

    pub async fn clear_uniqueness(&self, id: UniquenessId) -> Result<()> {
        self.save("clear_uniqueness", |set| {
            let owner = set.uniqueness(id)?.owner;
            set.clear_uniqueness(id)?;
            Ok(((), Target::Type(owner)))
        })
        .await
    }

    pub async fn delete_uniqueness(&self, id: UniquenessId) -> Result<()> {
        self.save("delete_uniqueness", |set| {
            let removed = set.remove_uniqueness(id)?;
            Ok(((), Target::Type(removed.owner)))
        })
        .await
    }

    async fn save<T, F>(&self, action: &'static str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut DefinitionSet) -> Result<(T, Target)> + Send,
        T: Send,
    {
        let span = info_span!("definition.save", action);
        self.run_save(mutate).instrument(span).await
    }

    async fn run_save<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut DefinitionSet) -> Result<(T, Target)> + Send,
        T: Send,
    {
        let _writer = self.store.lock_writes().await;
        let _build = self.build_lock.lock().await;

        let before = self.store.snapshot().await;
        let mut after = before.clone();
        let (output, target) = mutate(&mut after)?;

        let steps = self.prepare(&before, &after, &target).await?;
        let changed: Vec<DefinitionId> = steps
            .iter()
            .filter(|s| s.checksum.is_some() || s.rebuilt.is_none())
            .map(|s| s.id)
            .collect();
        if changed.is_empty() {
            self.store.replace(after).await;
            event!(Level::DEBUG, "definition saved, no structural change");
            return Ok(output);
        }

        for step in &steps {
            if changed.contains(&step.id) {
                self.record_checksum(step.id, step.checksum.as_deref()).await;
            }
        }

        let pre: Vec<Operation> = steps.iter().flat_map(|s| s.plan.pre.iter().cloned()).collect();
        let post: Vec<Operation> = steps.iter().flat_map(|s| s.plan.post.iter().cloned()).collect();
        if let Err(err) = self.migrate(&pre, after, &post).await {
            event!(Level::ERROR, error = %err, "definition save rolled back");
            self.store.replace(before).await;
            for id in &changed {
                self.record_checksum(*id, None).await;
            }
            return Err(err);
        }

        for step in steps {
            match step.rebuilt {
                Some(ty) if step.checksum.is_some() => self.cache.install(Arc::new(ty)).await,
                Some(_) => {}
                None => {
                    self.cache.invalidate(step.id).await;
                }
            }
        }
        event!(Level::INFO, pre = pre.len(), post = post.len(), "definition saved");
        Ok(output)
    }

    /// Validates every affected type and plans its migration. `checksum` is
    /// only set on steps whose shape actually changed.
    async fn prepare(&self, before: &DefinitionSet, after: &DefinitionSet, target: &Target) -> Result<Vec<Step>> {
        let old_ctx = self.context(before);
        let new_ctx = self.context(after);

        let affected = match target {
            Target::Type(id) => after.dependency_closure(*id)?,
            Target::Deleted(id) => vec![*id],
        };

        let mut steps = Vec::with_capacity(affected.len());
        for id in affected {
            let new_shape = match after.get_type(id) {
                Some(_) => Some(validate_type(&new_ctx, id)?),
                None => None,
            };
            let old_shape = match before.get_type(id) {
                Some(_) => Some(old_ctx.shape(id)?),
                None => None,
            };

            let old_checksum = old_shape.as_ref().map(checksum).transpose()?;
            let new_checksum = new_shape.as_ref().map(checksum).transpose()?;
            let unchanged = old_checksum == new_checksum;

            let old_layout = match &old_shape {
                Some(shape) => self.materialized_layout(shape).await,
                None => None,
            };
            let plan = if unchanged {
                MigrationPlan::default()
            } else {
                sync::plan(old_layout.as_ref(), new_shape.as_ref().map(Shape::layout).as_ref())
            };

            let rebuilt = match (new_shape, &new_checksum) {
                (Some(shape), Some(sum)) => {
                    Some(TypeBuilder::new(new_ctx).construct_shape(shape, sum.clone())?)
                }
                _ => None,
            };
            event!(
                Level::DEBUG,
                definition = %id,
                changed = !unchanged,
                operations = plan.len(),
                "definition planned"
            );
            steps.push(Step {
                id,
                checksum: if unchanged { None } else { new_checksum },
                rebuilt,
                plan,
            });
        }
        Ok(steps)
    }

    /// Layout of a shape's storage, or `None` when nothing was ever created.
    async fn materialized_layout(&self, shape: &Shape) -> Option<crate::shape::Layout> {
        let layout = shape.layout();
        if layout.managed || self.storage.table_exists(&layout.table).await {
            Some(layout)
        } else {
            None
        }
    }

    async fn migrate(&self, pre: &[Operation], after: DefinitionSet, post: &[Operation]) -> Result<()> {
        self.atomically(self.run_phases(pre, after, post)).await.map(|_| ())
    }

    /// Runs `work` inside a storage transaction when the backend supports
    /// transactional DDL and the config asks for it.
    async fn atomically<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let atomic = self.config.atomic_ddl && self.storage.capabilities().transactional_ddl;
        if atomic {
            self.storage.begin_atomic().await?;
        }

        match work.await {
            Ok(output) if atomic => {
                self.storage.commit_atomic().await?;
                Ok(output)
            }
            Ok(output) => Ok(output),
            Err(err) => {
                if atomic {
                    if let Err(rollback) = self.storage.rollback_atomic().await {
                        event!(Level::ERROR, error = %rollback, "structural rollback failed");
                    }
                }
                Err(err)
            }
        }
    }

    async fn run_phases(&self, pre: &[Operation], after: DefinitionSet, post: &[Operation]) -> Result<usize> {
        let mut applied = sync::apply(&*self.storage, pre).await?;
        self.store.replace(after).await;
        applied += sync::apply(&*self.storage, post).await?;
        Ok(applied)
    }

    /// Best effort: a failed broadcast only delays other processes.
    async fn record_checksum(&self, id: DefinitionId, checksum: Option<&str>) {
        let result = match checksum {
            Some(sum) => self.state.set_checksum(id, sum).await,
            None => self.state.clear_checksum(id).await,
        };
        if let Err(err) = result {
            event!(
                Level::WARN,
                definition = %id,
                backend = self.state.backend(),
                error = %err,
                "checksum propagation failed"
            );
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Current checksum of a definition, computed from the store.
    pub async fn checksum(&self, id: DefinitionId) -> Result<String> {
        let set = self.store.snapshot().await;
        self.context(&set).checksum(id)
    }

    /// The runtime type for `id`, rebuilt when the recorded checksum differs
    /// from the cached type's.
    pub async fn get_type(&self, id: DefinitionId) -> Result<Arc<RuntimeType>> {
        if let Some(cached) = self.cache.get(id).await {
            if self.recorded_checksum(id).await.as_deref() == Some(cached.checksum()) {
                return Ok(cached);
            }
        }

        let _build = self.build_lock.lock().await;
        let set = self.store.snapshot().await;
        let ctx = self.context(&set);
        let shape = match ctx.shape(id) {
            Ok(shape) => shape,
            Err(err @ DbError::DefinitionNotFound(_)) => {
                self.cache.invalidate(id).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let sum = checksum(&shape)?;
        let recorded = self.recorded_checksum(id).await;

        let ty = match self.cache.get(id).await {
            Some(cached) if cached.checksum() == sum => cached,
            _ => {
                let span = info_span!("type.construct", definition = %id);
                let built = span.in_scope(|| TypeBuilder::new(ctx).construct_shape(shape, sum.clone()))?;
                let built = Arc::new(built);
                self.cache.install(Arc::clone(&built)).await;
                built
            }
        };
        if recorded.is_none() {
            self.record_checksum(id, Some(&sum)).await;
        }
        Ok(ty)
    }

    pub async fn get_type_by_name(&self, app_label: &str, object_name: &str) -> Result<Arc<RuntimeType>> {
        let id = self
            .store
            .read(|set| set.find_type(app_label, object_name).map(|t| t.id))
            .await
            .ok_or_else(|| DbError::DefinitionNotFound(format!("{}.{}", app_label, object_name)))?;
        self.get_type(id).await
    }

    async fn recorded_checksum(&self, id: DefinitionId) -> Option<String> {
        match self.state.get_checksum(id).await {
            Ok(sum) => sum,
            Err(err) => {
                event!(Level::WARN, definition = %id, error = %err, "checksum lookup failed, assuming stale");
                None
            }
        }
    }

    pub async fn proxy(self: &Arc<Self>, id: DefinitionId) -> Result<TypeProxy> {
        let ty = self.get_type(id).await?;
        let resolver: Arc<dyn TypeResolver> = Arc::clone(self) as Arc<dyn TypeResolver>;
        Ok(TypeProxy::new(ty, resolver))
    }

    pub async fn proxy_from_reference(self: &Arc<Self>, reference: TypeReference) -> Result<TypeProxy> {
        self.proxy(reference.id).await
    }

    /// Moves a record onto the current type of its definition.
    pub async fn rebind(&self, record: &Record) -> Result<Record> {
        let id = record.runtime_type().definition();
        let ty = match self.get_type(id).await {
            Ok(ty) => ty,
            Err(DbError::DefinitionNotFound(_)) => {
                return Err(DbError::Obsolete(format!(
                    "definition {} of '{}' was deleted",
                    id,
                    record.runtime_type().type_name()
                )));
            }
            Err(err) => return Err(err),
        };
        record.rebound(ty)
    }

    // ========================================================================
    // Materialization
    // ========================================================================

    /// Creates the type's storage when it does not exist yet and returns its
    /// runtime type. Safe to call any number of times.
    pub async fn ensure_materialized(&self, id: DefinitionId) -> Result<Arc<RuntimeType>> {
        {
            // same order as a definition save, released before the lookup
            let _writer = self.store.lock_writes().await;
            let _build = self.build_lock.lock().await;

            let set = self.store.snapshot().await;
            let shape = validate_type(&self.context(&set), id)?;
            if self.materialized_layout(&shape).await.is_none() {
                let plan = sync::plan(None, Some(&shape.layout()));
                let applied = self
                    .atomically(sync::apply(&*self.storage, &plan.post))
                    .await
                    .inspect_err(|err| {
                        event!(Level::ERROR, definition = %id, error = %err, "materialization rolled back")
                    })?;
                event!(Level::INFO, definition = %id, operations = applied, "type materialized");
            }
        }
        self.get_type(id).await
    }

    /// Materializes every defined type, dependencies first.
    pub async fn ensure_all_materialized(&self) -> Result<Vec<Arc<RuntimeType>>> {
        let order = self
            .store
            .read(|set| {
                let ids: BTreeSet<DefinitionId> = set.type_ids().into_iter().collect();
                set.topological_order(&ids)
            })
            .await?;
        let mut types = Vec::with_capacity(order.len());
        for id in order {
            types.push(self.ensure_materialized(id).await?);
        }
        Ok(types)
    }
}

#[async_trait]
impl TypeResolver for SchemaEngine {
    async fn is_stale(&self, ty: &RuntimeType) -> Result<bool> {
        if ty.is_obsolete() {
            return Ok(true);
        }
        match self.cache.get(ty.definition()).await {
            Some(cached) if !std::ptr::eq(Arc::as_ptr(&cached), ty) => return Ok(true),
            _ => {}
        }
        Ok(self.recorded_checksum(ty.definition()).await.as_deref() != Some(ty.checksum()))
    }

    async fn resolve_type(&self, id: DefinitionId) -> Result<Arc<RuntimeType>> {
        self.get_type(id).await
    }
}

//! Stable handles on runtime types.
//!
//! A [`TypeProxy`] holds the runtime type it last resolved. Callers go
//! through [`TypeProxy::resolve`], which re-points the proxy when that type
//! became obsolete or its checksum no longer matches the recorded one.

use crate::construct::RuntimeType;
use crate::core::{DbError, Result};
use crate::definition::DefinitionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Source of current runtime types for proxies.
#[async_trait]
pub trait TypeResolver: Send + Sync {
    /// True when `ty` no longer matches the recorded checksum.
    async fn is_stale(&self, ty: &RuntimeType) -> Result<bool>;

    async fn resolve_type(&self, id: DefinitionId) -> Result<Arc<RuntimeType>>;
}

/// What a proxy serializes to: the definition, never the type itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeReference {
    pub kind: ReferenceKind,
    pub id: DefinitionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    TypeDefinition,
}

impl TypeReference {
    pub fn new(id: DefinitionId) -> Self {
        Self {
            kind: ReferenceKind::TypeDefinition,
            id,
        }
    }
}

/// Clears the refresh flag however the refresh ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TypeProxy {
    definition: DefinitionId,
    current: RwLock<Arc<RuntimeType>>,
    resolver: Arc<dyn TypeResolver>,
    refreshing: AtomicBool,
}

impl fmt::Debug for TypeProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeProxy")
            .field("definition", &self.definition)
            .field("refreshing", &self.refreshing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TypeProxy {
    pub fn new(ty: Arc<RuntimeType>, resolver: Arc<dyn TypeResolver>) -> Self {
        Self {
            definition: ty.definition(),
            current: RwLock::new(ty),
            resolver,
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn definition(&self) -> DefinitionId {
        self.definition
    }

    pub fn reference(&self) -> TypeReference {
        TypeReference::new(self.definition)
    }

    /// The type currently pointed at, without any staleness check.
    pub fn peek(&self) -> Result<Arc<RuntimeType>> {
        Ok(Arc::clone(&*self.current.read()?))
    }

    /// The current runtime type, rebuilding the binding when needed.
    ///
    /// A resolve that starts while another one is refreshing returns the
    /// best known type instead of refreshing again. Fails `Obsolete` when
    /// the definition no longer exists.
    pub async fn resolve(&self) -> Result<Arc<RuntimeType>> {
        let held = self.peek()?;
        if !held.is_obsolete() && !self.resolver.is_stale(&held).await? {
            return Ok(held);
        }

        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(definition = %self.definition, "refresh in progress, using known type");
            return Ok(held);
        }
        let _guard = RefreshGuard(&self.refreshing);

        let fresh = match self.resolver.resolve_type(self.definition).await {
            Ok(fresh) => fresh,
            Err(DbError::DefinitionNotFound(_)) => {
                return Err(DbError::Obsolete(format!(
                    "definition {} behind '{}' was deleted",
                    self.definition,
                    held.type_name()
                )));
            }
            Err(err) => return Err(err),
        };
        debug!(
            definition = %self.definition,
            checksum = fresh.checksum(),
            "proxy rebound"
        );
        *self.current.write()? = Arc::clone(&fresh);
        Ok(fresh)
    }

    /// True when `other` is the type this proxy currently resolves to.
    pub async fn is_type(&self, other: &RuntimeType) -> Result<bool> {
        let current = self.resolve().await?;
        Ok(std::ptr::eq(Arc::as_ptr(&current), other))
    }

    /// True when both proxies resolve to the same runtime type.
    pub async fn same_type(&self, other: &TypeProxy) -> Result<bool> {
        let mine = self.resolve().await?;
        let theirs = other.resolve().await?;
        Ok(Arc::ptr_eq(&mine, &theirs))
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }
}


impl Serialize for TypeProxy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.reference().serialize(serializer)
    }
}

use crate::construct::RuntimeType;
use crate::definition::DefinitionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Runtime types by definition, shared across the process.
///
/// Replacing or removing an entry marks the previous type obsolete so every
/// outstanding handle notices on its next use.
#[derive(Debug, Default)]
pub struct TypeCache {
    types: Mutex<HashMap<DefinitionId, Arc<RuntimeType>>>,
}

impl TypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: DefinitionId) -> Option<Arc<RuntimeType>> {
        self.types.lock().await.get(&id).cloned()
    }

    pub async fn install(&self, ty: Arc<RuntimeType>) {
        let previous = self.types.lock().await.insert(ty.definition(), ty);
        if let Some(previous) = previous {
            previous.mark_obsolete();
        }
    }

    pub async fn invalidate(&self, id: DefinitionId) -> Option<Arc<RuntimeType>> {
        let removed = self.types.lock().await.remove(&id);
        if let Some(ty) = &removed {
            ty.mark_obsolete();
        }
        removed
    }

    pub async fn clear(&self) {
        for (_, ty) in self.types.lock().await.drain() {
            ty.mark_obsolete();
        }
    }

    pub async fn ids(&self) -> Vec<DefinitionId> {
        let mut ids: Vec<_> = self.types.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.types.lock().await.len()
    }
}

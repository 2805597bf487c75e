use super::DefinitionSet;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Shared home of the definition rows.
///
/// Readers take cheap snapshots. Writers serialize on [`lock_writes`] so a
/// staged change is computed against the rows it will replace.
///
/// [`lock_writes`]: DefinitionStore::lock_writes
#[derive(Debug, Default)]
pub struct DefinitionStore {
    rows: RwLock<DefinitionSet>,
    writer: Mutex<()>,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_set(set: DefinitionSet) -> Self {
        Self {
            rows: RwLock::new(set),
            writer: Mutex::new(()),
        }
    }

    pub async fn snapshot(&self) -> DefinitionSet {
        self.rows.read().await.clone()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&DefinitionSet) -> R) -> R {
        let rows = self.rows.read().await;
        f(&rows)
    }

    pub async fn replace(&self, set: DefinitionSet) {
        *self.rows.write().await = set;
    }

    pub async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }
}

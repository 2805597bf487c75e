use super::editor::{BackendCapabilities, RowStore, SchemaEditor};
use super::journal::{DdlEntry, JournalRecord};
use super::table::{NamedRow, Table, TableSchema, UniqueConstraint};
use crate::core::{Column, DbError, Result, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Reference backend: tables live in process memory, each behind its own lock.
pub struct InMemoryStorage {
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
    /// Copy of every table taken when an atomic scope opens.
    savepoint: Mutex<Option<HashMap<String, Table>>>,
    journal: StdMutex<Vec<JournalRecord>>,
    capabilities: BackendCapabilities,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_capabilities(BackendCapabilities::default())
    }

    pub fn with_capabilities(capabilities: BackendCapabilities) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            savepoint: Mutex::new(None),
            journal: StdMutex::new(Vec::new()),
            capabilities,
        }
    }

    /// Structural statements applied so far, oldest first.
    pub fn journal(&self) -> Vec<DdlEntry> {
        self.journal
            .lock()
            .map(|j| j.iter().map(|r| r.entry.clone()).collect())
            .unwrap_or_default()
    }

    pub fn clear_journal(&self) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.clear();
        }
    }

    fn log(&self, entry: DdlEntry) {
        debug!(?entry, "ddl");
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(JournalRecord::new(entry));
        }
    }

    /// Shared handle on one table.
    pub async fn get_table(&self, name: &str) -> Result<Arc<RwLock<Table>>> {
        self.tables
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub async fn row_count(&self, table_name: &str) -> Result<usize> {
        let table_handle = self.get_table(table_name).await?;
        let table = table_handle.read().await;
        Ok(table.row_count())
    }

    /// Get all tables (for savepoints)
    pub async fn get_all_tables(&self) -> HashMap<String, Table> {
        let mut tables = HashMap::new();
        for (name, table_handle) in self.tables.read().await.iter() {
            let table = table_handle.read().await;
            tables.insert(name.clone(), table.clone());
        }
        tables
    }

    /// Restore tables from a savepoint
    pub async fn restore_tables(&self, tables: HashMap<String, Table>) {
        let mut guard = self.tables.write().await;
        guard.clear();
        for (name, table) in tables {
            guard.insert(name, Arc::new(RwLock::new(table)));
        }
    }

    async fn with_table_mut<F>(&self, name: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Table) -> Result<()> + Send,
    {
        let handle = self.get_table(name).await?;
        let mut table = handle.write().await;
        apply(&mut table)
    }

    async fn check_references(&self, schema: &TableSchema, values: &NamedRow) -> Result<()> {
        if !self.capabilities.supports_foreign_keys {
            return Ok(());
        }
        for column in schema.schema().columns() {
            let (Some(fk), Some(value)) = (&column.references, values.get(&column.name)) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let target = self.get_table(&fk.table).await?;
            let found = target.read().await.contains_value(&fk.column, value);
            if !found {
                return Err(DbError::ConstraintViolation(format!(
                    "Foreign key violation: {}.{} = {} has no match in {}.{}",
                    schema.name(),
                    column.name,
                    value,
                    fk.table,
                    fk.column
                )));
            }
        }
        Ok(())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaEditor for InMemoryStorage {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    async fn create_table(&self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        let columns = schema
            .schema()
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();

        let mut tables = self.tables.write().await;
        if tables.contains_key(&name) {
            return Err(DbError::TableExists(name));
        }
        let table = Table::new(schema)?;
        tables.insert(name.clone(), Arc::new(RwLock::new(table)));
        drop(tables);

        self.log(DdlEntry::CreateTable { name, columns });
        Ok(())
    }

    async fn rename_table(&self, old: &str, new: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.contains_key(new) {
            return Err(DbError::TableExists(new.to_string()));
        }
        let handle = tables
            .remove(old)
            .ok_or_else(|| DbError::TableNotFound(old.to_string()))?;
        handle.write().await.rename(new);
        tables.insert(new.to_string(), handle);
        for other in tables.values() {
            other.write().await.retarget_references(old, new);
        }
        drop(tables);

        self.log(DdlEntry::RenameTable { from: old.to_string(), to: new.to_string() });
        Ok(())
    }

    async fn delete_table(&self, name: &str) -> Result<()> {
        if self.tables.write().await.remove(name).is_none() {
            return Err(DbError::TableNotFound(name.to_string()));
        }
        self.log(DdlEntry::DeleteTable { name: name.to_string() });
        Ok(())
    }

    async fn add_column(&self, table: &str, column: Column) -> Result<()> {
        let column_name = column.name.clone();
        self.with_table_mut(table, |t| t.add_column(column)).await?;
        self.log(DdlEntry::AddColumn { table: table.to_string(), column: column_name });
        Ok(())
    }

    async fn alter_column(&self, table: &str, name: &str, column: Column) -> Result<()> {
        self.with_table_mut(table, |t| t.alter_column(name, column)).await?;
        self.log(DdlEntry::AlterColumn { table: table.to_string(), column: name.to_string() });
        Ok(())
    }

    async fn rename_column(&self, table: &str, old: &str, new: &str) -> Result<()> {
        self.with_table_mut(table, |t| t.rename_column(old, new)).await?;
        self.log(DdlEntry::RenameColumn {
            table: table.to_string(),
            from: old.to_string(),
            to: new.to_string(),
        });
        Ok(())
    }

    async fn delete_column(&self, table: &str, name: &str) -> Result<()> {
        self.with_table_mut(table, |t| t.delete_column(name)).await?;
        self.log(DdlEntry::DeleteColumn { table: table.to_string(), column: name.to_string() });
        Ok(())
    }

    async fn create_unique(&self, table: &str, name: &str, columns: &[String]) -> Result<()> {
        if !self.capabilities.supports_unique {
            return Err(DbError::UnsupportedOperation("unique constraints".into()));
        }
        let constraint = UniqueConstraint { name: name.to_string(), columns: columns.to_vec() };
        self.with_table_mut(table, |t| t.add_unique(constraint)).await?;
        self.log(DdlEntry::CreateUnique {
            table: table.to_string(),
            name: name.to_string(),
            columns: columns.to_vec(),
        });
        Ok(())
    }

    async fn delete_unique(&self, table: &str, name: &str) -> Result<()> {
        if !self.capabilities.supports_unique {
            return Err(DbError::UnsupportedOperation("unique constraints".into()));
        }
        self.with_table_mut(table, |t| t.delete_unique(name)).await?;
        self.log(DdlEntry::DeleteUnique { table: table.to_string(), name: name.to_string() });
        Ok(())
    }

    async fn begin_atomic(&self) -> Result<()> {
        if !self.capabilities.transactional_ddl {
            return Err(DbError::UnsupportedOperation("transactional DDL".into()));
        }
        let mut savepoint = self.savepoint.lock().await;
        if savepoint.is_some() {
            return Err(DbError::ExecutionError("Atomic scope already open".into()));
        }
        *savepoint = Some(self.get_all_tables().await);
        self.log(DdlEntry::Begin);
        Ok(())
    }

    async fn commit_atomic(&self) -> Result<()> {
        if self.savepoint.lock().await.take().is_none() {
            return Err(DbError::ExecutionError("No atomic scope open".into()));
        }
        self.log(DdlEntry::Commit);
        Ok(())
    }

    async fn rollback_atomic(&self) -> Result<()> {
        let saved = self
            .savepoint
            .lock()
            .await
            .take()
            .ok_or_else(|| DbError::ExecutionError("No atomic scope open".into()))?;
        self.restore_tables(saved).await;
        self.log(DdlEntry::Rollback);
        Ok(())
    }
}

#[async_trait]
impl RowStore for InMemoryStorage {
    async fn insert(&self, table: &str, values: NamedRow) -> Result<Value> {
        let handle = self.get_table(table).await?;
        let schema = handle.read().await.schema().clone();
        self.check_references(&schema, &values).await?;
        let mut t = handle.write().await;
        t.insert(&values)
    }

    async fn update(&self, table: &str, pk: &Value, values: NamedRow) -> Result<bool> {
        let handle = self.get_table(table).await?;
        let schema = handle.read().await.schema().clone();
        self.check_references(&schema, &values).await?;
        let mut t = handle.write().await;
        t.update(pk, &values)
    }

    async fn delete(&self, table: &str, pk: &Value) -> Result<bool> {
        let handle = self.get_table(table).await?;
        let mut t = handle.write().await;
        t.delete(pk)
    }

    async fn fetch(&self, table: &str, pk: &Value) -> Result<Option<NamedRow>> {
        let handle = self.get_table(table).await?;
        let t = handle.read().await;
        t.fetch(pk)
    }

    async fn scan(&self, table: &str) -> Result<Vec<NamedRow>> {
        let handle = self.get_table(table).await?;
        let t = handle.read().await;
        Ok(t.scan())
    }

    async fn describe(&self, table: &str) -> Result<TableSchema> {
        let handle = self.get_table(table).await?;
        let t = handle.read().await;
        Ok(t.schema().clone())
    }

    async fn table_exists(&self, name: &str) -> bool {
        self.tables.read().await.contains_key(name)
    }

    async fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

use super::table::{NamedRow, TableSchema};
use crate::core::{Column, Result, Value};
use async_trait::async_trait;

/// What a backend can do structurally. Unsupported operations are skipped
/// by the synchronizer instead of failing a definition save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Structural changes can be rolled back together with data changes.
    pub transactional_ddl: bool,
    pub supports_unique: bool,
    pub supports_foreign_keys: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            transactional_ddl: true,
            supports_unique: true,
            supports_foreign_keys: true,
        }
    }
}

/// Structural (DDL) capability set consumed by the synchronizer.
#[async_trait]
pub trait SchemaEditor: Send + Sync {
    fn capabilities(&self) -> BackendCapabilities;

    async fn create_table(&self, schema: TableSchema) -> Result<()>;
    async fn rename_table(&self, old: &str, new: &str) -> Result<()>;
    async fn delete_table(&self, name: &str) -> Result<()>;

    async fn add_column(&self, table: &str, column: Column) -> Result<()>;
    async fn alter_column(&self, table: &str, name: &str, column: Column) -> Result<()>;
    async fn rename_column(&self, table: &str, old: &str, new: &str) -> Result<()>;
    async fn delete_column(&self, table: &str, name: &str) -> Result<()>;

    async fn create_unique(&self, table: &str, name: &str, columns: &[String]) -> Result<()>;
    async fn delete_unique(&self, table: &str, name: &str) -> Result<()>;

    /// Opens an atomic scope. Only called when `transactional_ddl` is set.
    async fn begin_atomic(&self) -> Result<()>;
    async fn commit_atomic(&self) -> Result<()>;
    async fn rollback_atomic(&self) -> Result<()>;
}

/// Ordinary CRUD against materialized tables.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Inserts a row and returns its primary key value.
    async fn insert(&self, table: &str, values: NamedRow) -> Result<Value>;
    async fn update(&self, table: &str, pk: &Value, values: NamedRow) -> Result<bool>;
    async fn delete(&self, table: &str, pk: &Value) -> Result<bool>;
    async fn fetch(&self, table: &str, pk: &Value) -> Result<Option<NamedRow>>;
    async fn scan(&self, table: &str) -> Result<Vec<NamedRow>>;

    async fn describe(&self, table: &str) -> Result<TableSchema>;
    async fn table_exists(&self, name: &str) -> bool;
    async fn list_tables(&self) -> Vec<String>;
}

/// A storage backend provides both capability sets.
pub trait StorageBackend: SchemaEditor + RowStore {}

impl<T: SchemaEditor + RowStore> StorageBackend for T {}

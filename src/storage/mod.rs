pub mod editor;
pub mod journal;
pub mod memory;
pub mod table;

pub use editor::{BackendCapabilities, RowStore, SchemaEditor, StorageBackend};
pub use journal::DdlEntry;
pub use memory::InMemoryStorage;
pub use table::{NamedRow, Table, TableSchema, UniqueConstraint};

//! Journal of structural statements applied by a backend.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DdlEntry {
    Begin,
    Commit,
    Rollback,
    CreateTable { name: String, columns: Vec<String> },
    RenameTable { from: String, to: String },
    DeleteTable { name: String },
    AddColumn { table: String, column: String },
    AlterColumn { table: String, column: String },
    RenameColumn { table: String, from: String, to: String },
    DeleteColumn { table: String, column: String },
    CreateUnique { table: String, name: String, columns: Vec<String> },
    DeleteUnique { table: String, name: String },
}

impl DdlEntry {
    /// Entries that change the physical layout (transaction markers excluded).
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Begin | Self::Commit | Self::Rollback)
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Begin | Self::Commit | Self::Rollback => None,
            Self::CreateTable { name, .. } | Self::DeleteTable { name } => Some(name),
            Self::RenameTable { to, .. } => Some(to),
            Self::AddColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::DeleteColumn { table, .. }
            | Self::CreateUnique { table, .. }
            | Self::DeleteUnique { table, .. } => Some(table),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub at_ms: u64,
    pub entry: DdlEntry,
}

impl JournalRecord {
    pub fn new(entry: DdlEntry) -> Self {
        let at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self { at_ms, entry }
    }
}

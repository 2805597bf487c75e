//! Structural synchronizer: diffs two layouts into storage operations and
//! applies them through a [`SchemaEditor`].
//!
//! A plan has two phases. `pre` runs before the definition store changes and
//! only ever removes things (composite constraints about to lose a member,
//! whole tables). `post` runs after the store write and builds the new
//! layout. Removing a constraint member after the fact, or creating a
//! constraint before its members exist, would validate it against the wrong
//! row set.

mod plan;

pub use crate::shape::{Layout, LayoutColumn, LayoutUnique};
pub use plan::plan;

use crate::core::{Column, Result};
use crate::storage::{SchemaEditor, TableSchema};
use serde::Serialize;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateTable { schema: TableSchema },
    RenameTable { from: String, to: String },
    DeleteTable { table: String },
    AddColumn { table: String, column: Column },
    /// `column` carries the column's current name.
    AlterColumn { table: String, column: Column },
    RenameColumn { table: String, from: String, to: String },
    DeleteColumn { table: String, column: String },
    CreateUnique { table: String, name: String, columns: Vec<String> },
    DeleteUnique { table: String, name: String },
}

impl Operation {
    pub fn is_unique_constraint(&self) -> bool {
        matches!(self, Self::CreateUnique { .. } | Self::DeleteUnique { .. })
    }

    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { schema } => schema.name(),
            Self::RenameTable { to, .. } => to,
            Self::DeleteTable { table }
            | Self::AddColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::DeleteColumn { table, .. }
            | Self::CreateUnique { table, .. }
            | Self::DeleteUnique { table, .. } => table,
        }
    }

    fn without_references(self) -> Self {
        let strip = |mut column: Column| {
            column.references = None;
            column
        };
        match self {
            Self::CreateTable { schema } => {
                let columns = schema.schema().columns().iter().cloned().map(strip).collect();
                let mut stripped = TableSchema::new(schema.name(), columns);
                stripped.uniques = schema.uniques;
                Self::CreateTable { schema: stripped }
            }
            Self::AddColumn { table, column } => Self::AddColumn { table, column: strip(column) },
            Self::AlterColumn { table, column } => Self::AlterColumn { table, column: strip(column) },
            other => other,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable { schema } => {
                let columns: Vec<&str> = schema
                    .schema()
                    .columns()
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect();
                write!(f, "CREATE TABLE {} ({})", schema.name(), columns.join(", "))
            }
            Self::RenameTable { from, to } => write!(f, "RENAME TABLE {} TO {}", from, to),
            Self::DeleteTable { table } => write!(f, "DROP TABLE {}", table),
            Self::AddColumn { table, column } => {
                write!(f, "ALTER TABLE {} ADD COLUMN {} {}", table, column.name, column.data_type)
            }
            Self::AlterColumn { table, column } => {
                write!(f, "ALTER TABLE {} ALTER COLUMN {} {}", table, column.name, column.data_type)
            }
            Self::RenameColumn { table, from, to } => {
                write!(f, "ALTER TABLE {} RENAME COLUMN {} TO {}", table, from, to)
            }
            Self::DeleteColumn { table, column } => {
                write!(f, "ALTER TABLE {} DROP COLUMN {}", table, column)
            }
            Self::CreateUnique { table, name, columns } => {
                write!(f, "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})", table, name, columns.join(", "))
            }
            Self::DeleteUnique { table, name } => {
                write!(f, "ALTER TABLE {} DROP CONSTRAINT {}", table, name)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationPlan {
    /// Runs before the definition store is written.
    pub pre: Vec<Operation>,
    /// Runs after the definition store is written.
    pub post: Vec<Operation>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.post.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pre.len() + self.post.len()
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.pre.iter().chain(self.post.iter())
    }

    pub fn extend(&mut self, other: MigrationPlan) {
        self.pre.extend(other.pre);
        self.post.extend(other.post);
    }
}

/// Applies `ops` in order and returns how many reached the backend.
///
/// Unique constraint operations are skipped on backends without them and
/// column references are dropped on backends without foreign keys.
pub async fn apply<E>(editor: &E, ops: &[Operation]) -> Result<usize>
where
    E: SchemaEditor + ?Sized,
{
    let caps = editor.capabilities();
    let mut applied = 0;
    for op in ops {
        if op.is_unique_constraint() && !caps.supports_unique {
            debug!(%op, "skipped: backend has no unique constraints");
            continue;
        }
        let op = if caps.supports_foreign_keys {
            op.clone()
        } else {
            op.clone().without_references()
        };
        debug!(%op, "apply");
        match op {
            Operation::CreateTable { schema } => editor.create_table(schema).await?,
            Operation::RenameTable { from, to } => editor.rename_table(&from, &to).await?,
            Operation::DeleteTable { table } => editor.delete_table(&table).await?,
            Operation::AddColumn { table, column } => editor.add_column(&table, column).await?,
            Operation::AlterColumn { table, column } => {
                let name = column.name.clone();
                editor.alter_column(&table, &name, column).await?
            }
            Operation::RenameColumn { table, from, to } => {
                editor.rename_column(&table, &from, &to).await?
            }
            Operation::DeleteColumn { table, column } => {
                editor.delete_column(&table, &column).await?
            }
            Operation::CreateUnique { table, name, columns } => {
                editor.create_unique(&table, &name, &columns).await?
            }
            Operation::DeleteUnique { table, name } => editor.delete_unique(&table, &name).await?,
        }
        applied += 1;
    }
    Ok(applied)
}

use super::{AttributeKey, Shape};
use crate::core::Column;
use crate::storage::{TableSchema, UniqueConstraint};

/// Physical projection of a shape: the table the synchronizer reconciles.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub table: String,
    /// Storage attached from elsewhere; its lifecycle is never touched.
    pub managed: bool,
    pub columns: Vec<LayoutColumn>,
    pub uniques: Vec<LayoutUnique>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutColumn {
    pub key: AttributeKey,
    pub column: Column,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutUnique {
    pub name: String,
    pub members: Vec<AttributeKey>,
    pub columns: Vec<String>,
}

impl Layout {
    pub fn from_shape(shape: &Shape) -> Self {
        Self {
            table: shape.table.db_table.clone(),
            managed: shape.table.managed,
            columns: shape
                .attributes
                .iter()
                .map(|a| LayoutColumn {
                    key: a.key.clone(),
                    column: a.to_column(),
                })
                .collect(),
            uniques: shape
                .table
                .unique_together
                .iter()
                .map(|u| LayoutUnique {
                    name: u.name.clone(),
                    members: u.members.clone(),
                    columns: u.columns.clone(),
                })
                .collect(),
        }
    }

    pub fn column(&self, key: &AttributeKey) -> Option<&LayoutColumn> {
        self.columns.iter().find(|c| &c.key == key)
    }

    pub fn unique(&self, name: &str) -> Option<&LayoutUnique> {
        self.uniques.iter().find(|u| u.name == name)
    }

    /// Table definition without composite constraints; those are created
    /// separately so backends without them can skip the step.
    pub fn table_schema(&self) -> TableSchema {
        TableSchema::new(
            self.table.clone(),
            self.columns.iter().map(|c| c.column.clone()).collect(),
        )
    }

    pub fn unique_constraints(&self) -> Vec<UniqueConstraint> {
        self.uniques
            .iter()
            .map(|u| UniqueConstraint {
                name: u.name.clone(),
                columns: u.columns.clone(),
            })
            .collect()
    }
}

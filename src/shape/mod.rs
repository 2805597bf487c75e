//! Shapes: the canonical description of everything that determines a type's
//! physical form and runtime behavior.
//!
//! A [`Shape`] is derived from the definition rows by [`ShapeContext`]. Bases
//! are flattened into it, so a change anywhere in a base chain is visible as a
//! different shape on every type built from it. [`checksum`] hashes a shape
//! and [`Layout`] projects it onto physical columns.

mod checksum;
mod derive;
mod layout;

pub use checksum::checksum;
pub use derive::ShapeContext;
pub use layout::{Layout, LayoutColumn, LayoutUnique};

use crate::core::{Column, DataType, ForeignKey};
use crate::definition::{AttributeId, AttributeOptions, ChoiceSet, DefaultValue, DefinitionId};
use serde::{Deserialize, Serialize};

/// Stable identity of an attribute across renames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeKey {
    Explicit(AttributeId),
    /// Copied in from an abstract static base.
    Inherited { base: String, name: String },
    /// One-to-one link onto a storage-bearing base.
    ParentLink(String),
    /// Auto-increment key added when no attribute is the primary key.
    SyntheticKey,
}

/// What a relation attribute points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationTarget {
    Dynamic(DefinitionId),
    Static(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeShape {
    #[serde(skip)]
    pub key: AttributeKey,
    pub name: String,
    pub column: String,
    pub kind: String,
    pub data_type: DataType,
    pub null: bool,
    pub unique: bool,
    pub db_index: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub default: Option<DefaultValue>,
    pub options: AttributeOptions,
    pub references: Option<ForeignKey>,
    pub choices: Option<ChoiceSet>,
    #[serde(skip)]
    pub relation: Option<RelationTarget>,
}

impl AttributeShape {
    pub(crate) fn synthetic_key() -> Self {
        Self {
            key: AttributeKey::SyntheticKey,
            name: "id".to_string(),
            column: "id".to_string(),
            kind: "integer".to_string(),
            data_type: DataType::Integer,
            null: false,
            unique: false,
            db_index: false,
            primary_key: true,
            auto_increment: true,
            default: None,
            options: AttributeOptions::new(),
            references: None,
            choices: None,
            relation: None,
        }
    }

    /// Physical column. Callable defaults stay out of storage.
    pub fn to_column(&self) -> Column {
        Column {
            name: self.column.clone(),
            data_type: self.data_type.clone(),
            nullable: self.null,
            primary_key: self.primary_key,
            unique: self.unique,
            indexed: self.db_index,
            auto_increment: self.auto_increment,
            default: match &self.default {
                Some(DefaultValue::Value(value)) => Some(value.clone()),
                _ => None,
            },
            references: self.references.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseShape {
    Mixin(String),
    Abstract(String),
    Concrete(String),
    /// A dynamic base contributes its checksum, not its identity.
    Dynamic {
        #[serde(skip)]
        id: DefinitionId,
        checksum: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniqueShape {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(skip)]
    pub members: Vec<AttributeKey>,
}

/// Step from one table to a related one while resolving an ordering path.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Column holding the reference in the current table.
    pub column: String,
    pub table: String,
    pub target_column: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderingPath {
    pub joins: Vec<Join>,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderingShape {
    pub lookup: String,
    pub descending: bool,
    #[serde(skip)]
    pub path: OrderingPath,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableOptions {
    pub db_table: String,
    pub managed: bool,
    pub verbose_name: String,
    pub verbose_name_plural: String,
    pub unique_together: Vec<UniqueShape>,
    pub ordering: Vec<OrderingShape>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shape {
    pub definition: DefinitionId,
    /// `app_label.ObjectName`
    pub type_name: String,
    pub table: TableOptions,
    pub bases: Vec<BaseShape>,
    /// Inherited attributes first, then explicit ones in declaration order.
    pub attributes: Vec<AttributeShape>,
}

impl Shape {
    pub fn attribute(&self, name: &str) -> Option<&AttributeShape> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn primary_key(&self) -> Option<&AttributeShape> {
        self.attributes.iter().find(|a| a.primary_key)
    }

    pub fn dynamic_bases(&self) -> impl Iterator<Item = DefinitionId> + '_ {
        self.bases.iter().filter_map(|b| match b {
            BaseShape::Dynamic { id, .. } => Some(*id),
            _ => None,
        })
    }

    pub fn layout(&self) -> Layout {
        Layout::from_shape(self)
    }
}

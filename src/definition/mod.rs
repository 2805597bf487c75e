//! Definition rows: the persisted source of truth for every dynamic type.
//!
//! A [`TypeDefinition`] owns its attributes, bases, orderings and
//! uniqueness sets through the `owner` foreign key on each child row.
//! Deleting the owner cascades to all of them.

pub mod choices;
pub mod draft;
pub mod set;
pub mod store;
pub mod validate;

use crate::core::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use choices::{ChoiceEntry, ChoiceSet};
pub use draft::{AttributeDraft, AttributePatch, ChoiceDraft, TypeDraft, TypePatch};
pub use set::DefinitionSet;
pub use store::DefinitionStore;

macro_rules! define_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub u64);

            impl $name {
                pub fn raw(self) -> u64 {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

define_id!(
    /// Identifier of a [`TypeDefinition`].
    DefinitionId,
    AttributeId,
    ChoiceId,
    BaseId,
    OrderingId,
    UniquenessId,
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub id: DefinitionId,
    pub app_label: String,
    pub object_name: String,
    /// Explicit physical table name; derived from the label and name when absent.
    pub db_table: Option<String>,
    /// Storage lifecycle is owned elsewhere: no table is created, renamed or dropped.
    pub managed: bool,
    pub verbose_name: Option<String>,
    pub verbose_name_plural: Option<String>,
}

impl TypeDefinition {
    /// `app_label.ObjectName`
    pub fn model_key(&self) -> String {
        format!("{}.{}", self.app_label, self.object_name)
    }

    pub fn table_name(&self) -> String {
        self.db_table
            .clone()
            .unwrap_or_else(|| default_table_name(&self.app_label, &self.object_name))
    }
}

pub fn default_table_name(app_label: &str, object_name: &str) -> String {
    format!("{}_{}", app_label, object_name).to_lowercase()
}

/// A default is either a stored value or the name of a registered generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    Value(Value),
    Callable(String),
}

pub type AttributeOptions = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub id: AttributeId,
    pub owner: DefinitionId,
    pub name: String,
    /// Registered kind identifier, e.g. `char` or `foreign_key`.
    pub kind: String,
    pub null: bool,
    pub unique: bool,
    pub db_index: bool,
    pub primary_key: bool,
    pub default: Option<DefaultValue>,
    pub db_column: Option<String>,
    pub options: AttributeOptions,
    pub position: i64,
}

impl AttributeDefinition {
    pub fn column_name(&self) -> &str {
        self.db_column.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub id: ChoiceId,
    pub attribute: AttributeId,
    pub position: i64,
    pub group: Option<String>,
    pub value: Value,
    pub label: String,
}

/// What a base definition points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseRef {
    /// A statically registered type, by `app_label.Name`.
    Static(String),
    Dynamic(DefinitionId),
}

impl fmt::Display for BaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(key) => write!(f, "{}", key),
            Self::Dynamic(id) => write!(f, "dynamic#{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseDefinition {
    pub id: BaseId,
    pub owner: DefinitionId,
    /// Lower positions take precedence.
    pub position: i64,
    pub base: BaseRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingDefinition {
    pub id: OrderingId,
    pub owner: DefinitionId,
    pub position: i64,
    /// Attribute path, `__`-separated across relations.
    pub lookup: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniquenessDefinition {
    pub id: UniquenessId,
    pub owner: DefinitionId,
    pub attributes: BTreeSet<AttributeId>,
}

impl UniquenessDefinition {
    /// Name of the composite constraint backing this set.
    pub fn constraint_name(&self) -> String {
        format!("uniq_{}_{}", self.owner, self.id)
    }
}

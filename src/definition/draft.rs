//! Inputs for creating and editing definition rows.

use super::{AttributeDefinition, AttributeOptions, BaseRef, DefaultValue, DefinitionId};
use crate::core::Value;
use serde::{Deserialize, Serialize};

/// A new type definition, optionally with its initial attributes and bases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDraft {
    pub app_label: String,
    pub object_name: String,
    #[serde(default)]
    pub db_table: Option<String>,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub verbose_name: Option<String>,
    #[serde(default)]
    pub verbose_name_plural: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDraft>,
    #[serde(default)]
    pub bases: Vec<BaseRef>,
}

impl TypeDraft {
    pub fn new(app_label: impl Into<String>, object_name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            object_name: object_name.into(),
            ..Default::default()
        }
    }

    pub fn db_table(mut self, table: impl Into<String>) -> Self {
        self.db_table = Some(table.into());
        self
    }

    pub fn managed(mut self, managed: bool) -> Self {
        self.managed = managed;
        self
    }

    pub fn verbose_name(mut self, name: impl Into<String>) -> Self {
        self.verbose_name = Some(name.into());
        self
    }

    pub fn attribute(mut self, attribute: AttributeDraft) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn base(mut self, base: BaseRef) -> Self {
        self.bases.push(base);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDraft {
    #[serde(default)]
    pub group: Option<String>,
    pub value: Value,
    pub label: String,
}

impl ChoiceDraft {
    pub fn new(value: impl Into<Value>, label: impl Into<String>) -> Self {
        Self {
            group: None,
            value: value.into(),
            label: label.into(),
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDraft {
    pub name: String,
    pub kind: String,
    #[serde(default = "default_null")]
    pub null: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub db_index: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub default: Option<DefaultValue>,
    #[serde(default)]
    pub db_column: Option<String>,
    #[serde(default)]
    pub options: AttributeOptions,
    #[serde(default)]
    pub choices: Vec<ChoiceDraft>,
}

fn default_null() -> bool {
    true
}

impl AttributeDraft {
    /// Attributes are nullable unless stated otherwise.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            null: true,
            unique: false,
            db_index: false,
            primary_key: false,
            default: None,
            db_column: None,
            options: AttributeOptions::new(),
            choices: Vec::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.null = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn db_index(mut self) -> Self {
        self.db_index = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.null = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    pub fn default_callable(mut self, name: impl Into<String>) -> Self {
        self.default = Some(DefaultValue::Callable(name.into()));
        self
    }

    pub fn db_column(mut self, column: impl Into<String>) -> Self {
        self.db_column = Some(column.into());
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Relation kinds: target a dynamic type.
    pub fn to_dynamic(self, target: DefinitionId) -> Self {
        self.option("to", target.raw() as i64)
    }

    /// Relation kinds: target a statically registered type (`app.Model`).
    pub fn to_static(self, target: impl Into<String>) -> Self {
        self.option("to", target.into())
    }

    pub fn choice(mut self, choice: ChoiceDraft) -> Self {
        self.choices.push(choice);
        self
    }
}

/// Rebuilds the draft a stored attribute was created from, minus its choices.
impl From<&AttributeDefinition> for AttributeDraft {
    fn from(attr: &AttributeDefinition) -> Self {
        Self {
            name: attr.name.clone(),
            kind: attr.kind.clone(),
            null: attr.null,
            unique: attr.unique,
            db_index: attr.db_index,
            primary_key: attr.primary_key,
            default: attr.default.clone(),
            db_column: attr.db_column.clone(),
            options: attr.options.clone(),
            choices: Vec::new(),
        }
    }
}

/// Field-wise edit of a type definition; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypePatch {
    pub app_label: Option<String>,
    pub object_name: Option<String>,
    pub db_table: Option<Option<String>>,
    pub managed: Option<bool>,
    pub verbose_name: Option<Option<String>>,
    pub verbose_name_plural: Option<Option<String>>,
}

impl TypePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app_label(mut self, label: impl Into<String>) -> Self {
        self.app_label = Some(label.into());
        self
    }

    pub fn object_name(mut self, name: impl Into<String>) -> Self {
        self.object_name = Some(name.into());
        self
    }

    pub fn db_table(mut self, table: Option<String>) -> Self {
        self.db_table = Some(table);
        self
    }

    pub fn managed(mut self, managed: bool) -> Self {
        self.managed = Some(managed);
        self
    }

    pub fn verbose_name(mut self, name: Option<String>) -> Self {
        self.verbose_name = Some(name);
        self
    }
}

/// Field-wise edit of an attribute definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributePatch {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub null: Option<bool>,
    pub unique: Option<bool>,
    pub db_index: Option<bool>,
    pub primary_key: Option<bool>,
    pub default: Option<Option<DefaultValue>>,
    pub db_column: Option<Option<String>>,
    /// Options to set; a `Value::Null` entry removes the option.
    pub options: AttributeOptions,
}

impl AttributePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn null(mut self, null: bool) -> Self {
        self.null = Some(null);
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = Some(unique);
        self
    }

    pub fn db_index(mut self, db_index: bool) -> Self {
        self.db_index = Some(db_index);
        self
    }

    pub fn primary_key(mut self, primary_key: bool) -> Self {
        self.primary_key = Some(primary_key);
        self
    }

    pub fn default_value(mut self, value: Option<Value>) -> Self {
        self.default = Some(value.map(DefaultValue::Value));
        self
    }

    pub fn db_column(mut self, column: Option<String>) -> Self {
        self.db_column = Some(column);
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

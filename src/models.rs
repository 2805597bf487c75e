//! Statically declared types that dynamic types may extend or reference.

use crate::construct::Record;
use crate::core::{DbError, Result};
use crate::definition::AttributeDraft;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Behavior without storage. Hooks run against a record before it is saved,
/// in base precedence order.
pub trait Mixin: Send + Sync + fmt::Debug {
    fn validate(&self, _record: &Record) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum StaticModel {
    Mixin(Arc<dyn Mixin>),
    /// Template whose fields are copied into every type that extends it.
    Abstract { fields: Vec<AttributeDraft> },
    /// Storage-bearing type; extending it adds a parent link to its table.
    Concrete {
        table: String,
        pk_column: String,
        fields: Vec<AttributeDraft>,
    },
    /// A view over another storage-bearing type. Never usable as a base.
    Proxy { of: String },
}

impl StaticModel {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Mixin(_) => "mixin",
            Self::Abstract { .. } => "abstract",
            Self::Concrete { .. } => "concrete",
            Self::Proxy { .. } => "proxy",
        }
    }
}

/// Static types by `app_label.Name` key.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, StaticModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, model: StaticModel) -> Result<()> {
        let key = key.into();
        match key.split_once('.') {
            Some((app, name)) if !app.is_empty() && !name.is_empty() && !name.contains('.') => {}
            _ => {
                return Err(DbError::Configuration(format!(
                    "Static model key '{}' must look like 'app_label.Name'",
                    key
                )));
            }
        }
        if self.models.contains_key(&key) {
            return Err(DbError::Configuration(format!(
                "Static model '{}' is already registered",
                key
            )));
        }
        self.models.insert(key, model);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&StaticModel> {
        self.models.get(key)
    }

    /// Case-insensitive on the model name, matching how type names collide.
    pub fn contains(&self, app_label: &str, object_name: &str) -> bool {
        self.models.keys().any(|key| {
            key.split_once('.').is_some_and(|(app, name)| {
                app == app_label && name.eq_ignore_ascii_case(object_name)
            })
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.models.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Audited;
    impl Mixin for Audited {}

    #[test]
    fn test_register_and_collide() {
        let mut registry = ModelRegistry::new();
        registry
            .register("core.Audited", StaticModel::Mixin(Arc::new(Audited)))
            .unwrap();
        assert!(registry.contains("core", "audited"));
        assert!(!registry.contains("other", "Audited"));
        assert!(registry
            .register("core.Audited", StaticModel::Abstract { fields: vec![] })
            .is_err());
        assert!(registry.register("nodot", StaticModel::Abstract { fields: vec![] }).is_err());
        assert_eq!(registry.get("core.Audited").map(StaticModel::kind_name), Some("mixin"));
    }
}

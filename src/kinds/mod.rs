//! Attribute kinds: the pluggable column types an attribute definition can use.
//!
//! A kind maps its option set to a physical [`DataType`] and cleans values on
//! their way into a record. Kinds are looked up by identifier at build time,
//! so registering a new kind needs no change anywhere else.

pub mod builtin;

use crate::core::{DataType, DbError, Result, Value};
use crate::definition::AttributeOptions;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub trait AttributeKind: Send + Sync + fmt::Debug {
    /// Identifier stored on attribute definitions, e.g. `char`.
    fn id(&self) -> &str;

    /// Presentation-only grouping, e.g. `Text`.
    fn category(&self) -> &str {
        "General"
    }

    fn description(&self) -> &str {
        ""
    }

    /// Options consumed when building the physical column.
    fn option_names(&self) -> &[&'static str] {
        &[]
    }

    fn data_type(&self, options: &AttributeOptions) -> Result<DataType>;

    /// Converts an assigned value to the kind's stored representation.
    fn to_runtime_value(&self, value: &Value, options: &AttributeOptions) -> Result<Value>;

    /// Rejects options the kind does not understand. Kinds with required
    /// options check them in [`AttributeKind::data_type`].
    fn validate_options(&self, options: &AttributeOptions) -> Result<()> {
        let names = self.option_names();
        match options.keys().find(|key| !names.contains(&key.as_str())) {
            Some(unknown) => Err(DbError::Configuration(format!(
                "Option '{}' is not understood by attribute kind '{}'",
                unknown,
                self.id()
            ))),
            None => Ok(()),
        }
    }

    /// Relation kinds point at another type through their `to` option.
    fn is_relation(&self) -> bool {
        false
    }

    fn implies_unique(&self) -> bool {
        false
    }
}

/// Generator behind a callable default.
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Registry of attribute kinds and callable defaults.
#[derive(Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeMap<String, Arc<dyn AttributeKind>>,
    defaults: BTreeMap<String, DefaultFn>,
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindRegistry")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .field("defaults", &self.defaults.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl KindRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in kind and default.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Registers a kind, replacing any kind with the same identifier.
    pub fn register(&mut self, kind: impl AttributeKind + 'static) {
        self.kinds.insert(kind.id().to_string(), Arc::new(kind));
    }

    pub fn register_default<F>(&mut self, name: impl Into<String>, generator: F)
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.defaults.insert(name.into(), Arc::new(generator));
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn AttributeKind>> {
        self.kinds.get(id).cloned().ok_or_else(|| {
            DbError::Configuration(format!("Attribute kind '{}' is not registered", id))
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.kinds.contains_key(id)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &Arc<dyn AttributeKind>> {
        self.kinds.values()
    }

    pub fn has_default(&self, name: &str) -> bool {
        self.defaults.contains_key(name)
    }

    pub fn default_fn(&self, name: &str) -> Result<DefaultFn> {
        self.defaults.get(name).cloned().ok_or_else(|| {
            DbError::Configuration(format!("Callable default '{}' is not registered", name))
        })
    }

    pub fn call_default(&self, name: &str) -> Result<Value> {
        Ok(self.default_fn(name)?())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = KindRegistry::with_builtins();
        for id in ["char", "text", "integer", "boolean", "date", "foreign_key", "one_to_one"] {
            assert!(registry.contains(id), "missing kind {}", id);
        }
        assert!(registry.get("geometry").unwrap_err().is_configuration());
        assert!(registry.has_default("uuid4"));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let registry = KindRegistry::with_builtins();
        let kind = registry.get("text").unwrap();
        let mut options = AttributeOptions::new();
        options.insert("max_length".into(), Value::Integer(3));
        assert!(kind.validate_options(&options).is_err());
    }

    #[test]
    fn test_custom_default() {
        let mut registry = KindRegistry::new();
        registry.register_default("zero", || Value::Integer(0));
        assert_eq!(registry.call_default("zero").unwrap(), Value::Integer(0));
        assert!(registry.call_default("one").is_err());
    }
}

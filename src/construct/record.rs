use super::RuntimeType;
use crate::core::{DbError, Result, Value};
use crate::storage::{NamedRow, RowStore};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One instance of a runtime type, addressed by attribute name.
#[derive(Debug, Clone)]
pub struct Record {
    ty: Arc<RuntimeType>,
    values: BTreeMap<String, Value>,
    saved: bool,
}

impl Record {
    pub(crate) fn new(ty: Arc<RuntimeType>) -> Self {
        let values = ty
            .fields()
            .iter()
            .map(|f| (f.name.clone(), f.initial_value()))
            .collect();
        Self { ty, values, saved: false }
    }

    /// Wraps a stored row, mapping columns back to attribute names.
    pub(crate) fn from_row(ty: Arc<RuntimeType>, mut row: NamedRow) -> Self {
        let values = ty
            .fields()
            .iter()
            .map(|f| (f.name.clone(), row.remove(&f.column).unwrap_or(Value::Null)))
            .collect();
        Self { ty, values, saved: true }
    }

    pub fn runtime_type(&self) -> &Arc<RuntimeType> {
        &self.ty
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        self.values.get(name).ok_or_else(|| {
            DbError::ColumnNotFound(name.to_string(), self.ty.type_name().to_string())
        })
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let cleaned = self.ty.field(name)?.clean(value.into())?;
        self.values.insert(name.to_string(), cleaned);
        Ok(())
    }

    pub fn pk(&self) -> &Value {
        self.values
            .get(&self.ty.primary_key().name)
            .unwrap_or(&Value::Null)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Values keyed by column, own table only. An unassigned auto key is left
    /// out so the backend can generate it.
    pub fn to_row(&self) -> NamedRow {
        self.ty
            .fields()
            .iter()
            .filter(|f| f.parent.is_none())
            .filter_map(|f| {
                let value = self.values.get(&f.name).cloned().unwrap_or(Value::Null);
                if f.auto_increment && value.is_null() {
                    None
                } else {
                    Some((f.column.clone(), value))
                }
            })
            .collect()
    }

    fn check_required(&self) -> Result<()> {
        for field in self.ty.fields() {
            if field.null || field.auto_increment {
                continue;
            }
            if self.values.get(&field.name).is_none_or(Value::is_null) {
                return Err(DbError::ConstraintViolation(format!(
                    "Field '{}' of '{}' cannot be null",
                    field.name,
                    self.ty.type_name()
                )));
            }
        }
        Ok(())
    }

    /// Inserts or updates the record. Fails once its type is obsolete.
    pub async fn save<S>(&mut self, store: &S) -> Result<()>
    where
        S: RowStore + ?Sized,
    {
        self.ty.ensure_current()?;
        for mixin in self.ty.mixins() {
            mixin.validate(self)?;
        }
        self.check_required()?;
        self.save_parents(store).await?;

        if self.saved {
            let pk = self.pk().clone();
            let updated = store.update(self.ty.table(), &pk, self.to_row()).await?;
            if !updated {
                return Err(DbError::ExecutionError(format!(
                    "'{}' with key {} no longer exists",
                    self.ty.type_name(),
                    pk
                )));
            }
        } else {
            let pk = store.insert(self.ty.table(), self.to_row()).await?;
            let pk_name = self.ty.primary_key().name.clone();
            self.values.insert(pk_name, pk);
            self.saved = true;
        }
        Ok(())
    }

    pub async fn delete<S>(&mut self, store: &S) -> Result<bool>
    where
        S: RowStore + ?Sized,
    {
        self.ty.ensure_current()?;
        if !self.saved {
            return Ok(false);
        }
        let deleted = store.delete(self.ty.table(), self.pk()).await?;
        for binding in self.ty.parents() {
            let link = self.values.get(&binding.link).cloned().unwrap_or(Value::Null);
            if link.is_null() {
                continue;
            }
            if let Some(mut parent) = Box::pin(binding.ty.get(store, &link)).await? {
                Box::pin(parent.delete(store)).await?;
            }
        }
        self.saved = false;
        Ok(deleted)
    }

    /// Writes the inherited values into each base table and points the
    /// parent links at the rows written.
    async fn save_parents<S>(&mut self, store: &S) -> Result<()>
    where
        S: RowStore + ?Sized,
    {
        let ty = Arc::clone(&self.ty);
        for binding in ty.parents() {
            let link = self.values.get(&binding.link).cloned().unwrap_or(Value::Null);
            let existing = if link.is_null() {
                None
            } else {
                Box::pin(binding.ty.get(store, &link)).await?
            };
            let mut parent = existing.unwrap_or_else(|| binding.ty.new_record());

            for field in ty.fields().iter().filter(|f| f.parent == Some(binding.base)) {
                if let Some(value) = self.values.get(&field.name) {
                    parent.values.insert(field.name.clone(), value.clone());
                }
            }
            Box::pin(parent.save(store)).await?;
            self.values.insert(binding.link.clone(), parent.pk().clone());
        }
        Ok(())
    }

    /// Fills inherited fields from the base rows the parent links point at.
    pub(crate) async fn load_parents<S>(&mut self, store: &S) -> Result<()>
    where
        S: RowStore + ?Sized,
    {
        let ty = Arc::clone(&self.ty);
        for binding in ty.parents() {
            let link = self.values.get(&binding.link).cloned().unwrap_or(Value::Null);
            if link.is_null() {
                continue;
            }
            let Some(parent) = Box::pin(binding.ty.get(store, &link)).await? else {
                continue;
            };
            for field in ty.fields().iter().filter(|f| f.parent == Some(binding.base)) {
                let value = parent.values.get(&field.name).cloned().unwrap_or(Value::Null);
                self.values.insert(field.name.clone(), value);
            }
        }
        Ok(())
    }

    /// Reloads values from storage.
    pub async fn refresh<S>(&mut self, store: &S) -> Result<()>
    where
        S: RowStore + ?Sized,
    {
        let pk = self.pk().clone();
        match store.fetch(self.ty.table(), &pk).await? {
            Some(row) => {
                *self = Self::from_row(Arc::clone(&self.ty), row);
                self.load_parents(store).await
            }
            None => Err(DbError::ExecutionError(format!(
                "'{}' with key {} no longer exists",
                self.ty.type_name(),
                pk
            ))),
        }
    }

    /// Moves the record onto a newer runtime type of the same definition.
    /// Values follow attribute identity, so renamed attributes keep theirs.
    pub fn rebound(&self, ty: Arc<RuntimeType>) -> Result<Self> {
        if ty.definition() != self.ty.definition() {
            return Err(DbError::Configuration(format!(
                "Cannot move a '{}' record onto '{}'",
                self.ty.type_name(),
                ty.type_name()
            )));
        }
        let mut values = BTreeMap::new();
        for field in ty.fields() {
            let carried = self
                .ty
                .fields()
                .iter()
                .find(|old| old.key == field.key)
                .and_then(|old| self.values.get(&old.name).cloned());
            let value = match carried {
                Some(value) => value,
                None => field.initial_value(),
            };
            values.insert(field.name.clone(), value);
        }
        Ok(Self { ty, values, saved: self.saved })
    }
}

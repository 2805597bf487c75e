//! Runtime types: the record factories built from shapes.

mod record;

pub use record::Record;

use crate::core::{DataType, DbError, Result, Value};
use crate::definition::{AttributeOptions, BaseRef, ChoiceSet, DefaultValue, DefinitionId};
use crate::kinds::{AttributeKind, DefaultFn};
use crate::models::{Mixin, StaticModel};
use crate::shape::{AttributeKey, OrderingPath, RelationTarget, Shape, ShapeContext, checksum};
use crate::storage::{NamedRow, RowStore};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tracing::debug;

/// Typed accessor for one field of a runtime type.
#[derive(Clone)]
pub struct FieldDescriptor {
    pub key: AttributeKey,
    pub name: String,
    pub column: String,
    pub kind: Arc<dyn AttributeKind>,
    pub data_type: DataType,
    pub null: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub default: Option<DefaultValue>,
    pub options: AttributeOptions,
    pub choices: Option<ChoiceSet>,
    pub relation: Option<RelationTarget>,
    /// Set on fields stored in a dynamic base's table and reached through
    /// its parent link.
    pub parent: Option<DefinitionId>,
    generator: Option<DefaultFn>,
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("kind", &self.kind.id())
            .field("data_type", &self.data_type)
            .field("null", &self.null)
            .field("primary_key", &self.primary_key)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

impl FieldDescriptor {
    /// Value a new record starts with.
    pub fn initial_value(&self) -> Value {
        match (&self.default, &self.generator) {
            (Some(DefaultValue::Value(value)), _) => value.clone(),
            (Some(DefaultValue::Callable(_)), Some(generator)) => generator(),
            _ => Value::Null,
        }
    }

    /// Converts and checks a value assigned to this field.
    pub fn clean(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            if self.null || self.auto_increment {
                return Ok(Value::Null);
            }
            return Err(DbError::ConstraintViolation(format!(
                "Field '{}' cannot be null",
                self.name
            )));
        }

        let value = self.kind.to_runtime_value(&value, &self.options)?;
        if let Some(choices) = &self.choices {
            if !choices.contains(&value) {
                return Err(DbError::ConstraintViolation(format!(
                    "{} is not a valid choice for '{}'",
                    value, self.name
                )));
            }
        }
        if !self.data_type.is_compatible(&value) {
            return Err(DbError::TypeMismatch(format!(
                "Field '{}' expects {}, got {} '{}'",
                self.name,
                self.data_type,
                value.type_name(),
                value
            )));
        }
        Ok(value)
    }
}

/// A dynamic base whose table holds part of every record of the child.
#[derive(Debug)]
pub struct ParentBinding {
    pub base: DefinitionId,
    /// Link field on the child holding the parent row's key.
    pub link: String,
    pub ty: Arc<RuntimeType>,
}

/// A constructed, query-able record type.
///
/// Never changed after construction: a definition change builds a new
/// runtime type and marks this one obsolete.
pub struct RuntimeType {
    shape: Shape,
    checksum: String,
    fields: Vec<FieldDescriptor>,
    pk_index: usize,
    parents: Vec<ParentBinding>,
    mixins: Vec<Arc<dyn Mixin>>,
    dependencies: BTreeSet<DefinitionId>,
    obsolete: AtomicBool,
}

impl fmt::Debug for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeType")
            .field("definition", &self.shape.definition)
            .field("type_name", &self.shape.type_name)
            .field("checksum", &self.checksum)
            .field("obsolete", &self.is_obsolete())
            .finish_non_exhaustive()
    }
}

/// Runtime types compare by identity: a rebuilt type never equals the one
/// it replaced.
impl PartialEq for RuntimeType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl RuntimeType {
    pub fn definition(&self) -> DefinitionId {
        self.shape.definition
    }

    /// `app_label.ObjectName`
    pub fn type_name(&self) -> &str {
        &self.shape.type_name
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn table(&self) -> &str {
        &self.shape.table.db_table
    }

    pub fn verbose_name(&self) -> &str {
        &self.shape.table.verbose_name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Result<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string(), self.type_name().to_string()))
    }

    pub fn primary_key(&self) -> &FieldDescriptor {
        &self.fields[self.pk_index]
    }

    pub fn choices(&self, name: &str) -> Option<&ChoiceSet> {
        self.field(name).ok().and_then(|f| f.choices.as_ref())
    }

    pub fn parents(&self) -> &[ParentBinding] {
        &self.parents
    }

    pub fn mixins(&self) -> &[Arc<dyn Mixin>] {
        &self.mixins
    }

    /// Dynamic types this one was built from.
    pub fn dependencies(&self) -> &BTreeSet<DefinitionId> {
        &self.dependencies
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn mark_obsolete(&self) {
        self.obsolete.store(true, AtomicOrdering::Release);
    }

    pub(crate) fn ensure_current(&self) -> Result<()> {
        if self.is_obsolete() {
            return Err(DbError::Obsolete(format!(
                "'{}' (definition {}) has been rebuilt or deleted",
                self.type_name(),
                self.definition()
            )));
        }
        Ok(())
    }

    /// An unsaved record with defaults applied.
    pub fn new_record(self: &Arc<Self>) -> Record {
        Record::new(Arc::clone(self))
    }

    /// Builds a record from `values` and saves it.
    pub async fn create<S>(self: &Arc<Self>, store: &S, values: Vec<(&str, Value)>) -> Result<Record>
    where
        S: RowStore + ?Sized,
    {
        let mut record = self.new_record();
        for (name, value) in values {
            record.set(name, value)?;
        }
        record.save(store).await?;
        Ok(record)
    }

    pub async fn get<S>(self: &Arc<Self>, store: &S, pk: &Value) -> Result<Option<Record>>
    where
        S: RowStore + ?Sized,
    {
        let Some(row) = store.fetch(self.table(), pk).await? else {
            return Ok(None);
        };
        let mut record = Record::from_row(Arc::clone(self), row);
        record.load_parents(store).await?;
        Ok(Some(record))
    }

    pub async fn count<S>(&self, store: &S) -> Result<usize>
    where
        S: RowStore + ?Sized,
    {
        Ok(store.scan(self.table()).await?.len())
    }

    /// Every stored record, in the type's default ordering.
    pub async fn all<S>(self: &Arc<Self>, store: &S) -> Result<Vec<Record>>
    where
        S: RowStore + ?Sized,
    {
        let rows = store.scan(self.table()).await?;
        let ordering = &self.shape.table.ordering;
        let rows = if ordering.is_empty() {
            rows
        } else {
            self.sorted(store, rows).await?
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = Record::from_row(Arc::clone(self), row);
            record.load_parents(store).await?;
            records.push(record);
        }
        Ok(records)
    }

    async fn sorted<S>(&self, store: &S, rows: Vec<NamedRow>) -> Result<Vec<NamedRow>>
    where
        S: RowStore + ?Sized,
    {
        let ordering = &self.shape.table.ordering;
        let mut related = HashMap::new();
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let mut key = Vec::with_capacity(ordering.len());
            for entry in ordering {
                key.push(follow_path(store, &row, &entry.path, &mut related).await?);
            }
            keyed.push((key, row));
        }
        keyed.sort_by(|(left, _), (right, _)| {
            for (index, entry) in ordering.iter().enumerate() {
                let ord = left[index]
                    .compare(&right[index])
                    .unwrap_or_else(|_| left[index].cmp(&right[index]));
                let ord = if entry.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

/// Reads the value an ordering path ends at, fetching related rows on the way.
async fn follow_path<S>(
    store: &S,
    row: &NamedRow,
    path: &OrderingPath,
    related: &mut HashMap<(String, Value), Option<NamedRow>>,
) -> Result<Value>
where
    S: RowStore + ?Sized,
{
    let mut current = Some(row.clone());
    for join in &path.joins {
        let Some(from) = current else {
            return Ok(Value::Null);
        };
        let reference = from.get(&join.column).cloned().unwrap_or(Value::Null);
        if reference.is_null() {
            return Ok(Value::Null);
        }
        let cache_key = (join.table.clone(), reference);
        current = match related.get(&cache_key) {
            Some(hit) => hit.clone(),
            None => {
                let fetched = store.fetch(&join.table, &cache_key.1).await?;
                related.insert(cache_key, fetched.clone());
                fetched
            }
        };
    }
    Ok(current
        .and_then(|row| row.get(&path.column).cloned())
        .unwrap_or(Value::Null))
}

/// Splices the fields of a dynamic base in after the link that reaches it.
/// The base's own key and links stay behind the link.
fn inherit_fields(
    shape: &Shape,
    fields: &mut Vec<FieldDescriptor>,
    base: DefinitionId,
    parent: Arc<RuntimeType>,
) -> Result<ParentBinding> {
    let link_key = AttributeKey::ParentLink(parent.type_name().to_string());
    let link = fields.iter().position(|f| f.key == link_key).ok_or_else(|| {
        DbError::Configuration(format!(
            "'{}' has no link to its base '{}'",
            shape.type_name,
            parent.type_name()
        ))
    })?;

    let inherited: Vec<FieldDescriptor> = parent
        .fields()
        .iter()
        .filter(|f| !(f.primary_key && f.auto_increment))
        .filter(|f| !matches!(f.key, AttributeKey::ParentLink(_)))
        .map(|f| FieldDescriptor {
            primary_key: false,
            parent: Some(base),
            ..f.clone()
        })
        .collect();
    for field in &inherited {
        if fields.iter().any(|own| own.name == field.name) {
            return Err(DbError::Configuration(format!(
                "'{}' declares '{}', which it also inherits from '{}'",
                shape.type_name,
                field.name,
                parent.type_name()
            )));
        }
    }

    let binding = ParentBinding {
        base,
        link: fields[link].name.clone(),
        ty: parent,
    };
    fields.splice(link + 1..link + 1, inherited);
    Ok(binding)
}

/// Turns shapes into runtime types.
pub struct TypeBuilder<'a> {
    ctx: ShapeContext<'a>,
}

impl<'a> TypeBuilder<'a> {
    pub fn new(ctx: ShapeContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn construct(&self, id: DefinitionId) -> Result<RuntimeType> {
        let shape = self.ctx.shape(id)?;
        let checksum = checksum(&shape)?;
        self.construct_shape(shape, checksum)
    }

    /// Renders a runtime type from an already derived shape.
    pub fn construct_shape(&self, shape: Shape, checksum: String) -> Result<RuntimeType> {
        let mut fields = Vec::with_capacity(shape.attributes.len());
        for attr in &shape.attributes {
            let generator = match &attr.default {
                Some(DefaultValue::Callable(name)) => Some(self.ctx.kinds.default_fn(name)?),
                _ => None,
            };
            fields.push(FieldDescriptor {
                key: attr.key.clone(),
                name: attr.name.clone(),
                column: attr.column.clone(),
                kind: self.ctx.kinds.get(&attr.kind)?,
                data_type: attr.data_type.clone(),
                null: attr.null,
                unique: attr.unique,
                primary_key: attr.primary_key,
                auto_increment: attr.auto_increment,
                default: attr.default.clone(),
                options: attr.options.clone(),
                choices: attr.choices.clone(),
                relation: attr.relation.clone(),
                parent: None,
                generator,
            });
        }

        let mut parents = Vec::new();
        for base in shape.dynamic_bases().collect::<Vec<_>>() {
            let parent = Arc::new(self.construct(base)?);
            parents.push(inherit_fields(&shape, &mut fields, base, parent)?);
        }

        let pk_index = fields.iter().position(|f| f.primary_key).ok_or_else(|| {
            DbError::Configuration(format!("'{}' has no primary key", shape.type_name))
        })?;

        let mut mixins = Vec::new();
        self.collect_mixins(shape.definition, &mut mixins, &mut BTreeSet::new());
        let dependencies = self.ctx.set.dependencies_of(shape.definition);

        debug!(
            definition = %shape.definition,
            type_name = %shape.type_name,
            fields = fields.len(),
            "runtime type constructed"
        );
        Ok(RuntimeType {
            shape,
            checksum,
            fields,
            pk_index,
            parents,
            mixins,
            dependencies,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Mixins in base precedence order, depth first through dynamic bases.
    fn collect_mixins(
        &self,
        id: DefinitionId,
        out: &mut Vec<Arc<dyn Mixin>>,
        seen: &mut BTreeSet<DefinitionId>,
    ) {
        if !seen.insert(id) {
            return;
        }
        for base in self.ctx.set.bases_of(id) {
            match &base.base {
                BaseRef::Static(key) => {
                    if let Some(StaticModel::Mixin(mixin)) = self.ctx.models.get(key) {
                        out.push(Arc::clone(mixin));
                    }
                }
                BaseRef::Dynamic(target) => self.collect_mixins(*target, out, seen),
            }
        }
    }
}

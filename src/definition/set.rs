use super::{
    AttributeDefinition, AttributeDraft, AttributeId, AttributePatch, BaseDefinition, BaseId,
    BaseRef, Choice, ChoiceDraft, ChoiceId, ChoiceSet, DefinitionId, OrderingDefinition,
    OrderingId, TypeDefinition, TypeDraft, TypePatch, UniquenessDefinition, UniquenessId,
};
use crate::core::{DbError, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Every definition row, keyed by identifier.
///
/// All identifiers come from one sequence, so a row id is unique across
/// row kinds. The set is plain data: cloning it is how the engine stages a
/// change before committing it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "DefinitionRows", into = "DefinitionRows")]
pub struct DefinitionSet {
    next_id: u64,
    types: BTreeMap<DefinitionId, TypeDefinition>,
    attributes: BTreeMap<AttributeId, AttributeDefinition>,
    choices: BTreeMap<ChoiceId, Choice>,
    bases: BTreeMap<BaseId, BaseDefinition>,
    orderings: BTreeMap<OrderingId, OrderingDefinition>,
    uniqueness: BTreeMap<UniquenessId, UniquenessDefinition>,
}

/// Serialized form: flat row lists, the way the rows would sit in tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DefinitionRows {
    #[serde(default)]
    types: Vec<TypeDefinition>,
    #[serde(default)]
    attributes: Vec<AttributeDefinition>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    bases: Vec<BaseDefinition>,
    #[serde(default)]
    orderings: Vec<OrderingDefinition>,
    #[serde(default)]
    uniqueness: Vec<UniquenessDefinition>,
}

impl From<DefinitionRows> for DefinitionSet {
    fn from(rows: DefinitionRows) -> Self {
        let mut set = Self::default();
        let mut max_id = 0;
        for row in rows.types {
            max_id = max_id.max(row.id.raw());
            set.types.insert(row.id, row);
        }
        for row in rows.attributes {
            max_id = max_id.max(row.id.raw());
            set.attributes.insert(row.id, row);
        }
        for row in rows.choices {
            max_id = max_id.max(row.id.raw());
            set.choices.insert(row.id, row);
        }
        for row in rows.bases {
            max_id = max_id.max(row.id.raw());
            set.bases.insert(row.id, row);
        }
        for row in rows.orderings {
            max_id = max_id.max(row.id.raw());
            set.orderings.insert(row.id, row);
        }
        for row in rows.uniqueness {
            max_id = max_id.max(row.id.raw());
            set.uniqueness.insert(row.id, row);
        }
        set.next_id = max_id;
        set
    }
}

impl From<DefinitionSet> for DefinitionRows {
    fn from(set: DefinitionSet) -> Self {
        Self {
            types: set.types.into_values().collect(),
            attributes: set.attributes.into_values().collect(),
            choices: set.choices.into_values().collect(),
            bases: set.bases.into_values().collect(),
            orderings: set.orderings.into_values().collect(),
            uniqueness: set.uniqueness.into_values().collect(),
        }
    }
}

fn missing(what: &str, id: impl std::fmt::Display) -> DbError {
    DbError::DefinitionNotFound(format!("{} #{}", what, id))
}

impl DefinitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn types(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }

    pub fn type_ids(&self) -> Vec<DefinitionId> {
        self.types.keys().copied().collect()
    }

    pub fn get_type(&self, id: DefinitionId) -> Option<&TypeDefinition> {
        self.types.get(&id)
    }

    pub fn type_def(&self, id: DefinitionId) -> Result<&TypeDefinition> {
        self.types.get(&id).ok_or_else(|| missing("type definition", id))
    }

    pub fn find_type(&self, app_label: &str, object_name: &str) -> Option<&TypeDefinition> {
        self.types
            .values()
            .find(|t| t.app_label == app_label && t.object_name == object_name)
    }

    /// Looks a type up by its `app_label.ObjectName` key.
    pub fn find_by_key(&self, key: &str) -> Option<&TypeDefinition> {
        let (app_label, object_name) = key.split_once('.')?;
        self.find_type(app_label, object_name)
    }

    pub fn attribute(&self, id: AttributeId) -> Result<&AttributeDefinition> {
        self.attributes
            .get(&id)
            .ok_or_else(|| missing("attribute definition", id))
    }

    /// Attributes of a type in declaration order.
    pub fn attributes_of(&self, owner: DefinitionId) -> Vec<&AttributeDefinition> {
        let mut attrs: Vec<_> = self.attributes.values().filter(|a| a.owner == owner).collect();
        attrs.sort_by_key(|a| (a.position, a.id));
        attrs
    }

    pub fn choice(&self, id: ChoiceId) -> Result<&Choice> {
        self.choices.get(&id).ok_or_else(|| missing("choice", id))
    }

    pub fn choices_of(&self, attribute: AttributeId) -> Vec<&Choice> {
        let mut choices: Vec<_> = self
            .choices
            .values()
            .filter(|c| c.attribute == attribute)
            .collect();
        choices.sort_by_key(|c| (c.position, c.id));
        choices
    }

    pub fn base(&self, id: BaseId) -> Result<&BaseDefinition> {
        self.bases.get(&id).ok_or_else(|| missing("base definition", id))
    }

    /// Bases of a type in precedence order.
    pub fn bases_of(&self, owner: DefinitionId) -> Vec<&BaseDefinition> {
        let mut bases: Vec<_> = self.bases.values().filter(|b| b.owner == owner).collect();
        bases.sort_by_key(|b| (b.position, b.id));
        bases
    }

    pub fn ordering(&self, id: OrderingId) -> Result<&OrderingDefinition> {
        self.orderings
            .get(&id)
            .ok_or_else(|| missing("ordering definition", id))
    }

    pub fn orderings_of(&self, owner: DefinitionId) -> Vec<&OrderingDefinition> {
        let mut orderings: Vec<_> = self
            .orderings
            .values()
            .filter(|o| o.owner == owner)
            .collect();
        orderings.sort_by_key(|o| (o.position, o.id));
        orderings
    }

    pub fn uniqueness(&self, id: UniquenessId) -> Result<&UniquenessDefinition> {
        self.uniqueness
            .get(&id)
            .ok_or_else(|| missing("uniqueness definition", id))
    }

    pub fn uniqueness_of(&self, owner: DefinitionId) -> Vec<&UniquenessDefinition> {
        self.uniqueness.values().filter(|u| u.owner == owner).collect()
    }

    /// Dynamic types this type is built from: dynamic bases and relation targets.
    /// A relation onto the type itself is not a dependency.
    pub fn dependencies_of(&self, id: DefinitionId) -> BTreeSet<DefinitionId> {
        let mut deps: BTreeSet<DefinitionId> = self
            .bases_of(id)
            .into_iter()
            .filter_map(|b| match b.base {
                BaseRef::Dynamic(target) => Some(target),
                BaseRef::Static(_) => None,
            })
            .collect();
        deps.extend(
            self.attributes_of(id)
                .into_iter()
                .filter_map(AttributeDefinition::dynamic_target),
        );
        deps.remove(&id);
        deps
    }

    /// Types that directly depend on `id`.
    pub fn dependents_of(&self, id: DefinitionId) -> BTreeSet<DefinitionId> {
        self.types
            .keys()
            .copied()
            .filter(|&other| other != id && self.dependencies_of(other).contains(&id))
            .collect()
    }

    /// `id` followed by every type that transitively depends on it, ordered so
    /// that a type always comes after the types it depends on.
    pub fn dependency_closure(&self, id: DefinitionId) -> Result<Vec<DefinitionId>> {
        let mut reached = BTreeSet::from([id]);
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents_of(current) {
                if reached.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }
        self.topological_order(&reached)
    }

    /// Orders `ids` so that dependencies precede dependents. Edges leaving the
    /// given set are ignored.
    pub fn topological_order(&self, ids: &BTreeSet<DefinitionId>) -> Result<Vec<DefinitionId>> {
        let mut pending: BTreeMap<DefinitionId, BTreeSet<DefinitionId>> = ids
            .iter()
            .map(|&id| {
                let deps = self
                    .dependencies_of(id)
                    .into_iter()
                    .filter(|d| ids.contains(d))
                    .collect();
                (id, deps)
            })
            .collect();

        let mut ordered = Vec::with_capacity(ids.len());
        while !pending.is_empty() {
            let ready: Vec<DefinitionId> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(&id, _)| id)
                .collect();
            if ready.is_empty() {
                let cycle: Vec<String> = pending.keys().map(|id| id.to_string()).collect();
                return Err(DbError::Configuration(format!(
                    "Dependency cycle between type definitions {}",
                    cycle.join(", ")
                )));
            }
            for id in ready {
                pending.remove(&id);
                for deps in pending.values_mut() {
                    deps.remove(&id);
                }
                ordered.push(id);
            }
        }
        Ok(ordered)
    }

    // ========================================================================
    // Type definitions
    // ========================================================================

    /// Inserts a type together with its initial attributes and bases.
    pub fn insert_type(&mut self, draft: TypeDraft) -> Result<DefinitionId> {
        let id = DefinitionId(self.allocate());
        self.types.insert(
            id,
            TypeDefinition {
                id,
                app_label: draft.app_label,
                object_name: draft.object_name,
                db_table: draft.db_table,
                managed: draft.managed,
                verbose_name: draft.verbose_name,
                verbose_name_plural: draft.verbose_name_plural,
            },
        );
        for attribute in draft.attributes {
            self.insert_attribute(id, attribute)?;
        }
        for base in draft.bases {
            self.insert_base(id, base, None)?;
        }
        Ok(id)
    }

    pub fn update_type(&mut self, id: DefinitionId, patch: TypePatch) -> Result<()> {
        let def = self.types.get_mut(&id).ok_or_else(|| missing("type definition", id))?;
        if let Some(app_label) = patch.app_label {
            def.app_label = app_label;
        }
        if let Some(object_name) = patch.object_name {
            def.object_name = object_name;
        }
        if let Some(db_table) = patch.db_table {
            def.db_table = db_table;
        }
        if let Some(managed) = patch.managed {
            def.managed = managed;
        }
        if let Some(verbose_name) = patch.verbose_name {
            def.verbose_name = verbose_name;
        }
        if let Some(verbose_name_plural) = patch.verbose_name_plural {
            def.verbose_name_plural = verbose_name_plural;
        }
        Ok(())
    }

    /// Removes a type and every row it owns.
    pub fn remove_type(&mut self, id: DefinitionId) -> Result<TypeDefinition> {
        let def = self.types.remove(&id).ok_or_else(|| missing("type definition", id))?;
        let owned: Vec<AttributeId> = self
            .attributes
            .values()
            .filter(|a| a.owner == id)
            .map(|a| a.id)
            .collect();
        for attribute in owned {
            self.attributes.remove(&attribute);
            self.choices.retain(|_, c| c.attribute != attribute);
        }
        self.bases.retain(|_, b| b.owner != id);
        self.orderings.retain(|_, o| o.owner != id);
        self.uniqueness.retain(|_, u| u.owner != id);
        Ok(def)
    }

    // ========================================================================
    // Attributes and choices
    // ========================================================================

    pub fn insert_attribute(&mut self, owner: DefinitionId, draft: AttributeDraft) -> Result<AttributeId> {
        self.type_def(owner)?;
        let position = self
            .attributes_of(owner)
            .last()
            .map(|a| a.position + 1)
            .unwrap_or(0);
        let id = AttributeId(self.allocate());
        let choices = draft.choices;
        self.attributes.insert(
            id,
            AttributeDefinition {
                id,
                owner,
                name: draft.name,
                kind: draft.kind,
                null: draft.null,
                unique: draft.unique,
                db_index: draft.db_index,
                primary_key: draft.primary_key,
                default: draft.default,
                db_column: draft.db_column,
                options: draft.options,
                position,
            },
        );
        for choice in choices {
            self.insert_choice(id, choice)?;
        }
        Ok(id)
    }

    pub fn update_attribute(&mut self, id: AttributeId, patch: AttributePatch) -> Result<()> {
        let attr = self
            .attributes
            .get_mut(&id)
            .ok_or_else(|| missing("attribute definition", id))?;
        if let Some(name) = patch.name {
            attr.name = name;
        }
        if let Some(kind) = patch.kind {
            attr.kind = kind;
        }
        if let Some(null) = patch.null {
            attr.null = null;
        }
        if let Some(unique) = patch.unique {
            attr.unique = unique;
        }
        if let Some(db_index) = patch.db_index {
            attr.db_index = db_index;
        }
        if let Some(primary_key) = patch.primary_key {
            attr.primary_key = primary_key;
            if primary_key {
                attr.null = false;
            }
        }
        if let Some(default) = patch.default {
            attr.default = default;
        }
        if let Some(db_column) = patch.db_column {
            attr.db_column = db_column;
        }
        for (key, value) in patch.options {
            if value.is_null() {
                attr.options.remove(&key);
            } else {
                attr.options.insert(key, value);
            }
        }
        Ok(())
    }

    /// Removes an attribute with its choices. The attribute also leaves every
    /// uniqueness set, and orderings starting at it are dropped.
    pub fn remove_attribute(&mut self, id: AttributeId) -> Result<AttributeDefinition> {
        let attr = self
            .attributes
            .remove(&id)
            .ok_or_else(|| missing("attribute definition", id))?;
        self.choices.retain(|_, c| c.attribute != id);
        for uniqueness in self.uniqueness.values_mut() {
            uniqueness.attributes.remove(&id);
        }
        let prefix = format!("{}__", attr.name);
        self.orderings.retain(|_, o| {
            o.owner != attr.owner || (o.lookup != attr.name && !o.lookup.starts_with(&prefix))
        });
        Ok(attr)
    }

    pub fn insert_choice(&mut self, attribute: AttributeId, draft: ChoiceDraft) -> Result<ChoiceId> {
        self.attribute(attribute)?;
        let position = self
            .choices_of(attribute)
            .last()
            .map(|c| c.position + 1)
            .unwrap_or(0);
        let id = ChoiceId(self.allocate());
        self.choices.insert(
            id,
            Choice {
                id,
                attribute,
                position,
                group: draft.group,
                value: draft.value,
                label: draft.label,
            },
        );
        Ok(id)
    }

    pub fn remove_choice(&mut self, id: ChoiceId) -> Result<Choice> {
        self.choices.remove(&id).ok_or_else(|| missing("choice", id))
    }

    /// Resolved choice set of an attribute, if it has any choice rows.
    pub fn choice_set(&self, attribute: AttributeId) -> Option<ChoiceSet> {
        ChoiceSet::resolve(self.choices_of(attribute))
    }

    // ========================================================================
    // Bases, orderings, uniqueness
    // ========================================================================

    /// Appends a base, or inserts it at `position` when given.
    pub fn insert_base(&mut self, owner: DefinitionId, base: BaseRef, position: Option<i64>) -> Result<BaseId> {
        self.type_def(owner)?;
        let position = match position {
            Some(position) => position,
            None => self
                .bases_of(owner)
                .last()
                .map(|b| b.position + 1)
                .unwrap_or(0),
        };
        let id = BaseId(self.allocate());
        self.bases.insert(id, BaseDefinition { id, owner, position, base });
        Ok(id)
    }

    pub fn move_base(&mut self, id: BaseId, position: i64) -> Result<()> {
        let base = self.bases.get_mut(&id).ok_or_else(|| missing("base definition", id))?;
        base.position = position;
        Ok(())
    }

    pub fn remove_base(&mut self, id: BaseId) -> Result<BaseDefinition> {
        self.bases.remove(&id).ok_or_else(|| missing("base definition", id))
    }

    pub fn insert_ordering(
        &mut self,
        owner: DefinitionId,
        lookup: impl Into<String>,
        descending: bool,
    ) -> Result<OrderingId> {
        self.type_def(owner)?;
        let position = self
            .orderings_of(owner)
            .last()
            .map(|o| o.position + 1)
            .unwrap_or(0);
        let id = OrderingId(self.allocate());
        self.orderings.insert(
            id,
            OrderingDefinition {
                id,
                owner,
                position,
                lookup: lookup.into(),
                descending,
            },
        );
        Ok(id)
    }

    pub fn remove_ordering(&mut self, id: OrderingId) -> Result<OrderingDefinition> {
        self.orderings
            .remove(&id)
            .ok_or_else(|| missing("ordering definition", id))
    }

    pub fn insert_uniqueness(
        &mut self,
        owner: DefinitionId,
        attributes: impl IntoIterator<Item = AttributeId>,
    ) -> Result<UniquenessId> {
        self.type_def(owner)?;
        let id = UniquenessId(self.allocate());
        self.uniqueness.insert(
            id,
            UniquenessDefinition {
                id,
                owner,
                attributes: attributes.into_iter().collect(),
            },
        );
        Ok(id)
    }

    fn uniqueness_mut(&mut self, id: UniquenessId) -> Result<&mut UniquenessDefinition> {
        self.uniqueness
            .get_mut(&id)
            .ok_or_else(|| missing("uniqueness definition", id))
    }

    pub fn add_uniqueness_member(&mut self, id: UniquenessId, attribute: AttributeId) -> Result<()> {
        self.attribute(attribute)?;
        self.uniqueness_mut(id)?.attributes.insert(attribute);
        Ok(())
    }

    pub fn remove_uniqueness_member(&mut self, id: UniquenessId, attribute: AttributeId) -> Result<()> {
        self.uniqueness_mut(id)?.attributes.remove(&attribute);
        Ok(())
    }

    /// Empties the member set; the row itself stays.
    pub fn clear_uniqueness(&mut self, id: UniquenessId) -> Result<()> {
        self.uniqueness_mut(id)?.attributes.clear();
        Ok(())
    }

    pub fn remove_uniqueness(&mut self, id: UniquenessId) -> Result<UniquenessDefinition> {
        self.uniqueness
            .remove(&id)
            .ok_or_else(|| missing("uniqueness definition", id))
    }
}

impl AttributeDefinition {
    /// Dynamic type referenced through the `to` option, if any.
    pub fn dynamic_target(&self) -> Option<DefinitionId> {
        match self.options.get("to") {
            Some(Value::Integer(id)) if *id > 0 => Some(DefinitionId(*id as u64)),
            _ => None,
        }
    }

    /// Statically declared type referenced through the `to` option, if any.
    pub fn static_target(&self) -> Option<&str> {
        self.options.get("to").and_then(Value::as_str)
    }

    /// Choice set of this attribute as resolved from `set`.
    pub fn choices(&self, set: &DefinitionSet) -> Option<ChoiceSet> {
        set.choice_set(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> TypeDraft {
        TypeDraft::new("app", "Widget")
            .attribute(AttributeDraft::new("name", "char").option("max_length", 50))
            .attribute(AttributeDraft::new("age", "integer"))
    }

    #[test]
    fn test_insert_and_cascade_remove() {
        let mut set = DefinitionSet::new();
        let id = set.insert_type(widget()).unwrap();
        let attrs: Vec<AttributeId> = set.attributes_of(id).iter().map(|a| a.id).collect();
        assert_eq!(attrs.len(), 2);
        set.insert_choice(attrs[0], ChoiceDraft::new("a", "A")).unwrap();
        let uniq = set.insert_uniqueness(id, attrs.clone()).unwrap();
        set.insert_ordering(id, "name", false).unwrap();

        set.remove_attribute(attrs[0]).unwrap();
        assert!(set.choices_of(attrs[0]).is_empty());
        assert_eq!(set.uniqueness(uniq).unwrap().attributes.len(), 1);
        assert!(set.orderings_of(id).is_empty());

        set.remove_type(id).unwrap();
        assert!(set.attributes_of(id).is_empty());
        assert!(set.uniqueness_of(id).is_empty());
    }

    #[test]
    fn test_dependency_closure_is_topological() {
        let mut set = DefinitionSet::new();
        let base = set.insert_type(TypeDraft::new("app", "Base")).unwrap();
        let middle = set
            .insert_type(TypeDraft::new("app", "Middle").base(BaseRef::Dynamic(base)))
            .unwrap();
        let leaf = set
            .insert_type(
                TypeDraft::new("app", "Leaf")
                    .attribute(AttributeDraft::new("middle", "foreign_key").to_dynamic(middle)),
            )
            .unwrap();

        assert_eq!(set.dependency_closure(base).unwrap(), vec![base, middle, leaf]);
        assert_eq!(set.dependents_of(middle), BTreeSet::from([leaf]));
    }

    #[test]
    fn test_cycle_detected() {
        let mut set = DefinitionSet::new();
        let a = set.insert_type(TypeDraft::new("app", "A")).unwrap();
        let b = set
            .insert_type(TypeDraft::new("app", "B").base(BaseRef::Dynamic(a)))
            .unwrap();
        set.insert_base(a, BaseRef::Dynamic(b), None).unwrap();
        let err = set.dependency_closure(a).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rows_round_trip_keeps_sequence() {
        let mut set = DefinitionSet::new();
        set.insert_type(widget()).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        let mut restored: DefinitionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, set);
        let next = restored.insert_type(TypeDraft::new("app", "Other")).unwrap();
        assert!(set.get_type(next).is_none());
    }
}

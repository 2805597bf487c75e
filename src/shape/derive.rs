use super::{
    AttributeKey, AttributeShape, BaseShape, Join, OrderingPath, OrderingShape, RelationTarget,
    Shape, TableOptions, UniqueShape, checksum,
};
use crate::core::{DataType, DbError, ForeignKey, Result, Value};
use crate::definition::validate::validate_identifier;
use crate::definition::{
    AttributeDraft, BaseRef, ChoiceSet, DefaultValue, DefinitionId, DefinitionSet,
};
use crate::kinds::KindRegistry;
use crate::models::{ModelRegistry, StaticModel};
use std::collections::HashSet;

/// Everything needed to turn definition rows into shapes.
#[derive(Clone, Copy)]
pub struct ShapeContext<'a> {
    pub set: &'a DefinitionSet,
    pub kinds: &'a KindRegistry,
    pub models: &'a ModelRegistry,
}

impl<'a> ShapeContext<'a> {
    pub fn new(set: &'a DefinitionSet, kinds: &'a KindRegistry, models: &'a ModelRegistry) -> Self {
        Self { set, kinds, models }
    }

    pub fn shape(&self, id: DefinitionId) -> Result<Shape> {
        self.derive(id, &mut Vec::new(), true)
    }

    pub fn checksum(&self, id: DefinitionId) -> Result<String> {
        checksum(&self.shape(id)?)
    }

    /// `full` adds uniqueness and ordering; lookups through relations only
    /// need the attribute list and skip both.
    fn derive(&self, id: DefinitionId, visiting: &mut Vec<DefinitionId>, full: bool) -> Result<Shape> {
        if visiting.contains(&id) {
            return Err(DbError::Configuration(format!(
                "Type definition {} inherits from itself",
                id
            )));
        }
        visiting.push(id);
        let def = self.set.type_def(id)?;

        let mut attributes = Vec::new();
        let mut bases = Vec::new();
        for base in self.set.bases_of(id) {
            match &base.base {
                BaseRef::Static(key) => {
                    let model = self.models.get(key).ok_or_else(|| {
                        DbError::Configuration(format!(
                            "Base '{}' of '{}' is not a registered static type",
                            key,
                            def.model_key()
                        ))
                    })?;
                    match model {
                        StaticModel::Mixin(_) => bases.push(BaseShape::Mixin(key.clone())),
                        StaticModel::Abstract { fields } => {
                            for field in fields {
                                let inherited = AttributeKey::Inherited {
                                    base: key.clone(),
                                    name: field.name.clone(),
                                };
                                let choices = ChoiceSet::from_drafts(&field.choices);
                                attributes.push(self.attribute_shape(inherited, field, choices)?);
                            }
                            bases.push(BaseShape::Abstract(key.clone()));
                        }
                        StaticModel::Concrete { table, pk_column, .. } => {
                            let name = key.rsplit('.').next().unwrap_or(key);
                            attributes.push(parent_link(
                                key.clone(),
                                name,
                                RelationTarget::Static(key.clone()),
                                ForeignKey::new(table.clone(), pk_column.clone()),
                                DataType::Integer,
                            ));
                            bases.push(BaseShape::Concrete(key.clone()));
                        }
                        StaticModel::Proxy { of } => {
                            return Err(DbError::Configuration(format!(
                                "Base '{}' is a proxy of '{}' and cannot be extended",
                                key, of
                            )));
                        }
                    }
                }
                BaseRef::Dynamic(target) => {
                    let base_def = self.set.type_def(*target).map_err(|_| {
                        DbError::Configuration(format!(
                            "Base of '{}' refers to missing type definition {}",
                            def.model_key(),
                            target
                        ))
                    })?;
                    let base_shape = self.derive(*target, visiting, full)?;
                    let pk = base_shape.primary_key().ok_or_else(|| {
                        DbError::Configuration(format!("Base '{}' has no primary key", base_def.model_key()))
                    })?;
                    attributes.push(parent_link(
                        base_def.model_key(),
                        &base_def.object_name,
                        RelationTarget::Dynamic(*target),
                        ForeignKey::new(base_def.table_name(), pk.column.clone()),
                        pk.data_type.clone(),
                    ));
                    bases.push(BaseShape::Dynamic {
                        id: *target,
                        checksum: checksum(&base_shape)?,
                    });
                }
            }
        }

        for attr in self.set.attributes_of(id) {
            let draft = AttributeDraft::from(attr);
            attributes.push(self.attribute_shape(AttributeKey::Explicit(attr.id), &draft, attr.choices(self.set))?);
        }
        visiting.pop();

        check_names(&def.model_key(), &attributes)?;
        let primary_keys = attributes.iter().filter(|a| a.primary_key).count();
        if primary_keys > 1 {
            return Err(DbError::Configuration(format!(
                "'{}' declares {} primary keys",
                def.model_key(),
                primary_keys
            )));
        }
        if primary_keys == 0 {
            if attributes.iter().any(|a| a.name == "id" || a.column == "id") {
                return Err(DbError::Configuration(format!(
                    "'{}' needs a synthetic 'id' key but already has an attribute named 'id'",
                    def.model_key()
                )));
            }
            attributes.insert(0, AttributeShape::synthetic_key());
        }

        let mut table = TableOptions {
            db_table: def.table_name(),
            managed: def.managed,
            verbose_name: def
                .verbose_name
                .clone()
                .unwrap_or_else(|| def.object_name.to_lowercase()),
            verbose_name_plural: def
                .verbose_name_plural
                .clone()
                .or_else(|| def.verbose_name.as_ref().map(|v| format!("{}s", v)))
                .unwrap_or_else(|| format!("{}s", def.object_name.to_lowercase())),
            unique_together: Vec::new(),
            ordering: Vec::new(),
        };

        if full {
            for uniqueness in self.set.uniqueness_of(id) {
                if uniqueness.attributes.is_empty() {
                    continue;
                }
                let mut members = Vec::new();
                let mut columns = Vec::new();
                for attr_id in &uniqueness.attributes {
                    let key = AttributeKey::Explicit(*attr_id);
                    let attr = attributes.iter().find(|a| a.key == key).ok_or_else(|| {
                        DbError::Configuration(format!(
                            "Uniqueness {} of '{}' names attribute {} of another type",
                            uniqueness.id,
                            def.model_key(),
                            attr_id
                        ))
                    })?;
                    members.push(key);
                    columns.push(attr.column.clone());
                }
                table.unique_together.push(UniqueShape {
                    name: uniqueness.constraint_name(),
                    columns,
                    members,
                });
            }

            for ordering in self.set.orderings_of(id) {
                table.ordering.push(OrderingShape {
                    lookup: ordering.lookup.clone(),
                    descending: ordering.descending,
                    path: self.resolve_lookup(&attributes, &ordering.lookup)?,
                });
            }
        }

        Ok(Shape {
            definition: id,
            type_name: def.model_key(),
            table,
            bases,
            attributes,
        })
    }

    fn attribute_shape(
        &self,
        key: AttributeKey,
        draft: &AttributeDraft,
        choices: Option<ChoiceSet>,
    ) -> Result<AttributeShape> {
        validate_identifier("attribute name", &draft.name)?;
        let kind = self.kinds.get(&draft.kind)?;
        kind.validate_options(&draft.options)?;
        let mut data_type = kind.data_type(&draft.options)?;

        let (relation, references) = if kind.is_relation() {
            let (target, fk, key_type) = self.relation_target(draft)?;
            data_type = key_type;
            (Some(target), Some(fk))
        } else {
            (None, None)
        };

        let default = match &draft.default {
            Some(DefaultValue::Callable(name)) => {
                if !self.kinds.has_default(name) {
                    return Err(DbError::Configuration(format!(
                        "Default of '{}' names unknown callable '{}'",
                        draft.name, name
                    )));
                }
                Some(DefaultValue::Callable(name.clone()))
            }
            Some(DefaultValue::Value(value)) => {
                let value = kind
                    .to_runtime_value(value, &draft.options)
                    .ok()
                    .filter(|v| data_type.is_compatible(v))
                    .ok_or_else(|| {
                        DbError::Configuration(format!(
                            "Default '{}' does not fit attribute '{}' of kind '{}'",
                            value, draft.name, draft.kind
                        ))
                    })?;
                Some(DefaultValue::Value(value))
            }
            None => None,
        };

        let column = match (&draft.db_column, relation.is_some()) {
            (Some(column), _) => column.clone(),
            (None, true) => format!("{}_id", draft.name),
            (None, false) => draft.name.clone(),
        };

        Ok(AttributeShape {
            key,
            name: draft.name.clone(),
            column,
            kind: draft.kind.clone(),
            data_type,
            null: draft.null && !draft.primary_key,
            unique: draft.unique || kind.implies_unique(),
            db_index: draft.db_index,
            primary_key: draft.primary_key,
            auto_increment: false,
            default,
            options: draft.options.clone(),
            references,
            choices,
            relation,
        })
    }

    fn relation_target(&self, draft: &AttributeDraft) -> Result<(RelationTarget, ForeignKey, DataType)> {
        match draft.options.get("to") {
            Some(Value::Integer(raw)) => {
                let target = DefinitionId(*raw as u64);
                let def = self.set.type_def(target).map_err(|_| {
                    DbError::Configuration(format!(
                        "Relation '{}' targets missing type definition {}",
                        draft.name, raw
                    ))
                })?;
                let (column, key_type) = self.primary_key_of(target)?;
                Ok((
                    RelationTarget::Dynamic(target),
                    ForeignKey::new(def.table_name(), column),
                    key_type,
                ))
            }
            Some(Value::Text(key)) => match self.models.get(key) {
                Some(StaticModel::Concrete { table, pk_column, .. }) => Ok((
                    RelationTarget::Static(key.clone()),
                    ForeignKey::new(table.clone(), pk_column.clone()),
                    DataType::Integer,
                )),
                Some(other) => Err(DbError::Configuration(format!(
                    "Relation '{}' cannot target {} type '{}'",
                    draft.name,
                    other.kind_name(),
                    key
                ))),
                None => Err(DbError::Configuration(format!(
                    "Relation '{}' targets unregistered type '{}'",
                    draft.name, key
                ))),
            },
            _ => Err(DbError::Configuration(format!(
                "Relation '{}' has no 'to' target",
                draft.name
            ))),
        }
    }

    /// Primary key column and type of a dynamic type, without deriving its
    /// whole shape. Relations onto the type itself resolve through this.
    fn primary_key_of(&self, id: DefinitionId) -> Result<(String, DataType)> {
        let explicit = self
            .set
            .attributes_of(id)
            .into_iter()
            .map(AttributeDraft::from)
            .find(|a| a.primary_key);
        let inherited = || {
            self.set.bases_of(id).into_iter().find_map(|b| match &b.base {
                BaseRef::Static(key) => match self.models.get(key) {
                    Some(StaticModel::Abstract { fields }) => fields.iter().find(|f| f.primary_key).cloned(),
                    _ => None,
                },
                BaseRef::Dynamic(_) => None,
            })
        };
        match explicit.or_else(inherited) {
            Some(pk) => {
                let kind = self.kinds.get(&pk.kind)?;
                let column = pk.db_column.clone().unwrap_or_else(|| pk.name.clone());
                Ok((column, kind.data_type(&pk.options)?))
            }
            None => Ok(("id".to_string(), DataType::Integer)),
        }
    }

    fn resolve_lookup(&self, fields: &[AttributeShape], lookup: &str) -> Result<OrderingPath> {
        let segments: Vec<&str> = lookup.split("__").collect();
        let mut current = fields.to_vec();
        let mut joins = Vec::new();
        for (index, segment) in segments.iter().enumerate() {
            let field = current.iter().find(|a| a.name == *segment).ok_or_else(|| {
                DbError::Configuration(format!(
                    "Ordering '{}' refers to unknown attribute '{}'",
                    lookup, segment
                ))
            })?;
            if index + 1 == segments.len() {
                return Ok(OrderingPath {
                    joins,
                    column: field.column.clone(),
                });
            }
            let (Some(target), Some(fk)) = (&field.relation, &field.references) else {
                return Err(DbError::Configuration(format!(
                    "Ordering '{}' traverses '{}', which is not a relation",
                    lookup, segment
                )));
            };
            joins.push(Join {
                column: field.column.clone(),
                table: fk.table.clone(),
                target_column: fk.column.clone(),
            });
            current = self.lookup_fields(target)?;
        }
        Err(DbError::Configuration("Empty ordering lookup".into()))
    }

    fn lookup_fields(&self, target: &RelationTarget) -> Result<Vec<AttributeShape>> {
        match target {
            RelationTarget::Dynamic(id) => Ok(self.derive(*id, &mut Vec::new(), false)?.attributes),
            RelationTarget::Static(key) => match self.models.get(key) {
                Some(StaticModel::Concrete { fields, pk_column, .. }) => {
                    let mut shapes = Vec::with_capacity(fields.len() + 1);
                    for field in fields {
                        let inherited = AttributeKey::Inherited {
                            base: key.clone(),
                            name: field.name.clone(),
                        };
                        shapes.push(self.attribute_shape(inherited, field, None)?);
                    }
                    if !shapes.iter().any(|s| &s.column == pk_column) {
                        let mut pk = AttributeShape::synthetic_key();
                        pk.name = pk_column.clone();
                        pk.column = pk_column.clone();
                        shapes.push(pk);
                    }
                    Ok(shapes)
                }
                _ => Err(DbError::Configuration(format!(
                    "'{}' is not a concrete static type",
                    key
                ))),
            },
        }
    }
}

fn parent_link(
    base: String,
    base_name: &str,
    target: RelationTarget,
    references: ForeignKey,
    data_type: DataType,
) -> AttributeShape {
    let name = format!("{}_ptr", base_name.to_lowercase());
    let to = match &target {
        RelationTarget::Dynamic(id) => Value::Integer(id.raw() as i64),
        RelationTarget::Static(key) => Value::Text(key.clone()),
    };
    AttributeShape {
        key: AttributeKey::ParentLink(base),
        column: format!("{}_id", name),
        name,
        kind: "one_to_one".to_string(),
        data_type,
        null: true,
        unique: true,
        db_index: false,
        primary_key: false,
        auto_increment: false,
        default: None,
        options: [("to".to_string(), to)].into_iter().collect(),
        references: Some(references),
        choices: None,
        relation: Some(target),
    }
}

fn check_names(model: &str, attributes: &[AttributeShape]) -> Result<()> {
    let mut names = HashSet::new();
    let mut columns = HashSet::new();
    for attr in attributes {
        if !names.insert(attr.name.as_str()) {
            return Err(DbError::Configuration(format!(
                "'{}' has more than one attribute named '{}'",
                model, attr.name
            )));
        }
        if !columns.insert(attr.column.as_str()) {
            return Err(DbError::Configuration(format!(
                "'{}' maps more than one attribute to column '{}'",
                model, attr.column
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::TypeDraft;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Plain;
    impl crate::models::Mixin for Plain {}

    fn registries() -> (KindRegistry, ModelRegistry) {
        let mut models = ModelRegistry::new();
        models
            .register(
                "core.Timestamped",
                StaticModel::Abstract {
                    fields: vec![AttributeDraft::new("created", "datetime").default_callable("now")],
                },
            )
            .unwrap();
        models.register("core.Plain", StaticModel::Mixin(Arc::new(Plain))).unwrap();
        models
            .register("core.Shadow", StaticModel::Proxy { of: "auth.User".into() })
            .unwrap();
        (KindRegistry::with_builtins(), models)
    }

    #[test]
    fn test_synthetic_key_and_inherited_fields_first() {
        let (kinds, models) = registries();
        let mut set = DefinitionSet::new();
        let id = set
            .insert_type(
                TypeDraft::new("app", "Widget")
                    .attribute(AttributeDraft::new("name", "char").option("max_length", 50))
                    .base(BaseRef::Static("core.Timestamped".into()))
                    .base(BaseRef::Static("core.Plain".into())),
            )
            .unwrap();
        let shape = ShapeContext::new(&set, &kinds, &models).shape(id).unwrap();
        let names: Vec<&str> = shape.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["id", "created", "name"]);
        assert_eq!(shape.table.db_table, "app_widget");
        assert_eq!(shape.bases.len(), 2);
    }

    #[test]
    fn test_configuration_errors() {
        let (kinds, models) = registries();
        let mut set = DefinitionSet::new();
        let unknown_kind = set
            .insert_type(TypeDraft::new("app", "A").attribute(AttributeDraft::new("x", "geometry")))
            .unwrap();
        let proxy_base = set
            .insert_type(TypeDraft::new("app", "B").base(BaseRef::Static("core.Shadow".into())))
            .unwrap();
        let two_keys = set
            .insert_type(
                TypeDraft::new("app", "C")
                    .attribute(AttributeDraft::new("a", "integer").primary_key())
                    .attribute(AttributeDraft::new("b", "integer").primary_key()),
            )
            .unwrap();
        let ctx = ShapeContext::new(&set, &kinds, &models);
        for id in [unknown_kind, proxy_base, two_keys] {
            assert!(ctx.shape(id).unwrap_err().is_configuration());
        }
    }

    #[test]
    fn test_dynamic_base_adds_parent_link_and_checksum() {
        let (kinds, models) = registries();
        let mut set = DefinitionSet::new();
        let base = set
            .insert_type(TypeDraft::new("app", "Base").attribute(AttributeDraft::new("title", "text")))
            .unwrap();
        let child = set
            .insert_type(TypeDraft::new("app", "Child").base(BaseRef::Dynamic(base)))
            .unwrap();
        let ctx = ShapeContext::new(&set, &kinds, &models);
        let shape = ctx.shape(child).unwrap();
        let link = shape.attribute("base_ptr").unwrap();
        assert_eq!(link.column, "base_ptr_id");
        assert_eq!(link.references, Some(ForeignKey::new("app_base", "id")));
        assert_eq!(
            shape.bases,
            vec![BaseShape::Dynamic { id: base, checksum: ctx.checksum(base).unwrap() }]
        );
    }

    #[test]
    fn test_ordering_traverses_relations() {
        let (kinds, models) = registries();
        let mut set = DefinitionSet::new();
        let owner = set
            .insert_type(TypeDraft::new("app", "Owner").attribute(AttributeDraft::new("name", "text")))
            .unwrap();
        let pet = set
            .insert_type(
                TypeDraft::new("app", "Pet")
                    .attribute(AttributeDraft::new("owner", "foreign_key").to_dynamic(owner)),
            )
            .unwrap();
        set.insert_ordering(pet, "owner__name", true).unwrap();
        let ctx = ShapeContext::new(&set, &kinds, &models);
        let shape = ctx.shape(pet).unwrap();
        let path = &shape.table.ordering[0].path;
        assert_eq!(path.column, "name");
        assert_eq!(path.joins[0].column, "owner_id");
        assert_eq!(path.joins[0].table, "app_owner");

        set.insert_ordering(pet, "owner__missing", false).unwrap();
        let ctx = ShapeContext::new(&set, &kinds, &models);
        assert!(ctx.shape(pet).unwrap_err().is_configuration());
    }
}

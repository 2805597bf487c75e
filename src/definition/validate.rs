//! Checks that run before any structural change is attempted.

use super::{DefinitionId, DefinitionSet};
use crate::core::{DbError, Result};
use crate::shape::{Shape, ShapeContext};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

pub fn validate_identifier(what: &str, name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) && !name.contains("__") {
        Ok(())
    } else {
        Err(DbError::Configuration(format!(
            "'{}' is not a valid {}",
            name, what
        )))
    }
}

/// Validates one type definition against the whole set and returns its shape.
///
/// Covers naming, collisions with static and other dynamic types, storage
/// name clashes, dependency cycles and everything shape derivation rejects.
pub fn validate_type(ctx: &ShapeContext<'_>, id: DefinitionId) -> Result<Shape> {
    let def = ctx.set.type_def(id)?;
    validate_identifier("app label", &def.app_label)?;
    validate_identifier("type name", &def.object_name)?;

    if ctx.models.contains(&def.app_label, &def.object_name) {
        return Err(DbError::Configuration(format!(
            "'{}' collides with a statically declared type",
            def.model_key()
        )));
    }

    let table = def.table_name();
    if table.trim().is_empty() {
        return Err(DbError::Configuration(format!(
            "'{}' has an empty storage name",
            def.model_key()
        )));
    }
    for other in ctx.set.types().filter(|t| t.id != id) {
        if other.app_label == def.app_label && other.object_name.eq_ignore_ascii_case(&def.object_name) {
            return Err(DbError::Configuration(format!(
                "'{}' is already defined",
                def.model_key()
            )));
        }
        if other.table_name() == table {
            return Err(DbError::Configuration(format!(
                "Storage name '{}' of '{}' is already used by '{}'",
                table,
                def.model_key(),
                other.model_key()
            )));
        }
    }

    ctx.set.dependency_closure(id)?;
    ctx.shape(id)
}

/// A type can only be deleted once nothing else is built from it.
pub fn validate_deletion(set: &DefinitionSet, id: DefinitionId) -> Result<()> {
    let def = set.type_def(id)?;
    let dependents = set.dependents_of(id);
    if dependents.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = dependents
        .iter()
        .filter_map(|d| set.get_type(*d).map(|t| t.model_key()))
        .collect();
    Err(DbError::Configuration(format!(
        "'{}' cannot be deleted while {} depend on it",
        def.model_key(),
        names.join(", ")
    )))
}

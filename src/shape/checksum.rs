use super::{AttributeShape, BaseShape, Shape, TableOptions};
use crate::core::Result;
use crate::definition::DefinitionId;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const CHECKSUM_DOMAIN_TAG: &[u8] = b"rustmutant.shape.v1";

/// Order-normalized view of a shape: attributes keyed by name so that
/// declaration order does not reach the digest.
#[derive(Serialize)]
struct Canonical<'a> {
    definition: DefinitionId,
    type_name: &'a str,
    table: &'a TableOptions,
    bases: &'a [BaseShape],
    attributes: BTreeMap<&'a str, &'a AttributeShape>,
}

/// Hex-encoded SHA-256 over the canonical JSON form of `shape`.
pub fn checksum(shape: &Shape) -> Result<String> {
    let canonical = Canonical {
        definition: shape.definition,
        type_name: &shape.type_name,
        table: &shape.table,
        bases: &shape.bases,
        attributes: shape
            .attributes
            .iter()
            .map(|a| (a.name.as_str(), a))
            .collect(),
    };
    let bytes = serde_json::to_vec(&canonical)?;

    let mut hasher = Sha256::new();
    hasher.update(CHECKSUM_DOMAIN_TAG);
    hasher.update(&bytes);
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{AttributeDraft, DefinitionSet, TypeDraft};
    use crate::kinds::KindRegistry;
    use crate::models::ModelRegistry;
    use crate::shape::ShapeContext;

    #[test]
    fn test_attribute_order_does_not_matter() {
        let kinds = KindRegistry::with_builtins();
        let models = ModelRegistry::new();

        let mut first = DefinitionSet::new();
        let a = first
            .insert_type(
                TypeDraft::new("app", "Widget")
                    .attribute(AttributeDraft::new("name", "text"))
                    .attribute(AttributeDraft::new("age", "integer")),
            )
            .unwrap();
        let mut second = DefinitionSet::new();
        let b = second
            .insert_type(
                TypeDraft::new("app", "Widget")
                    .attribute(AttributeDraft::new("age", "integer"))
                    .attribute(AttributeDraft::new("name", "text")),
            )
            .unwrap();
        assert_eq!(a, b);

        let left = ShapeContext::new(&first, &kinds, &models).checksum(a).unwrap();
        let right = ShapeContext::new(&second, &kinds, &models).checksum(b).unwrap();
        assert_eq!(left, right);
        assert_eq!(left.len(), 64);
    }
}

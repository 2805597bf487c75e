//! Bulk export and import of records belonging to dynamic types.

use crate::core::{DbError, Result, Value};
use crate::engine::SchemaEngine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureRecord {
    /// `app_label.ObjectName`
    pub model: String,
    pub pk: Value,
    pub fields: BTreeMap<String, Value>,
}

/// Every record of every dynamic type, dependencies first.
pub async fn dump_data(engine: &SchemaEngine) -> Result<Vec<FixtureRecord>> {
    let types = engine.ensure_all_materialized().await?;
    let storage = &**engine.storage();

    let mut out = Vec::new();
    for ty in types {
        if !storage.table_exists(ty.table()).await {
            continue;
        }
        let pk_name = ty.primary_key().name.clone();
        for record in ty.all(storage).await? {
            let mut fields = record.values().clone();
            let pk = fields.remove(&pk_name).unwrap_or(Value::Null);
            out.push(FixtureRecord {
                model: ty.type_name().to_string(),
                pk,
                fields,
            });
        }
    }
    Ok(out)
}

pub async fn dump_json(engine: &SchemaEngine) -> Result<String> {
    Ok(serde_json::to_string_pretty(&dump_data(engine).await?)?)
}

/// Inserts or overwrites the given records and returns how many were written.
pub async fn load_data(engine: &SchemaEngine, records: &[FixtureRecord]) -> Result<usize> {
    let types: HashMap<String, _> = engine
        .ensure_all_materialized()
        .await?
        .into_iter()
        .map(|ty| (ty.type_name().to_string(), ty))
        .collect();
    let storage = &**engine.storage();

    for fixture in records {
        let ty = types.get(&fixture.model).ok_or_else(|| {
            DbError::DefinitionNotFound(format!("fixture model '{}'", fixture.model))
        })?;
        let mut record = match ty.get(storage, &fixture.pk).await? {
            Some(existing) => existing,
            None => {
                let mut fresh = ty.new_record();
                fresh.set(&ty.primary_key().name, fixture.pk.clone())?;
                fresh
            }
        };
        for (name, value) in &fixture.fields {
            record.set(name, value.clone())?;
        }
        record.save(storage).await?;
    }
    Ok(records.len())
}

pub async fn load_json(engine: &SchemaEngine, json: &str) -> Result<usize> {
    let records: Vec<FixtureRecord> = serde_json::from_str(json)?;
    load_data(engine, &records).await
}

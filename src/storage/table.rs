use crate::core::{Column, DbError, Result, Row, Schema, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Row addressed by column name.
pub type NamedRow = BTreeMap<String, Value>;

/// Composite uniqueness over several columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<usize, Row>,
    next_row_id: usize,
    /// Last value handed out by the auto-increment column.
    sequence: i64,
}

impl Table {
    pub fn new(schema: TableSchema) -> Result<Self> {
        let primary_keys = schema.schema().columns().iter().filter(|c| c.primary_key).count();
        if primary_keys > 1 {
            return Err(DbError::ConstraintViolation(format!(
                "Table '{}' declares {} primary keys",
                schema.name(),
                primary_keys
            )));
        }
        Ok(Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
            sequence: 0,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn rename(&mut self, new_name: &str) {
        self.schema.name = new_name.to_string();
    }

    // ========================================================================
    // Row access
    // ========================================================================

    /// Inserts a row given by column name, returning the primary key value.
    pub fn insert(&mut self, values: &NamedRow) -> Result<Value> {
        self.check_known_columns(values)?;

        let mut row = Row::with_capacity(self.schema.schema().column_count());
        for column in self.schema.schema().columns() {
            let value = match values.get(&column.name) {
                Some(v) => v.clone(),
                None => column.default.clone().unwrap_or(Value::Null),
            };
            row.push(value);
        }

        let auto_idx = self
            .schema
            .schema()
            .columns()
            .iter()
            .position(|c| c.auto_increment);
        if let Some(idx) = auto_idx {
            match row[idx] {
                Value::Null => {
                    self.sequence += 1;
                    row[idx] = Value::Integer(self.sequence);
                }
                Value::Integer(explicit) => self.sequence = self.sequence.max(explicit),
                _ => {}
            }
        }

        self.validate_row(&row)?;
        self.check_uniqueness(&row, None)?;

        let id = self.next_row_id;
        self.next_row_id += 1;
        let pk = self.primary_key_value(&row);
        self.rows.insert(id, row);
        Ok(pk)
    }

    pub fn update(&mut self, pk: &Value, values: &NamedRow) -> Result<bool> {
        self.check_known_columns(values)?;
        let Some(id) = self.find_row_id(pk)? else {
            return Ok(false);
        };

        let mut new_row = self.rows[&id].clone();
        for (name, value) in values {
            if let Some(idx) = self.schema.schema().find_column_index(name) {
                new_row[idx] = value.clone();
            }
        }

        self.validate_row(&new_row)?;
        self.check_uniqueness(&new_row, Some(id))?;
        self.rows.insert(id, new_row);
        Ok(true)
    }

    pub fn delete(&mut self, pk: &Value) -> Result<bool> {
        match self.find_row_id(pk)? {
            Some(id) => Ok(self.rows.remove(&id).is_some()),
            None => Ok(false),
        }
    }

    pub fn fetch(&self, pk: &Value) -> Result<Option<NamedRow>> {
        Ok(self.find_row_id(pk)?.map(|id| self.to_named(&self.rows[&id])))
    }

    pub fn scan(&self) -> Vec<NamedRow> {
        self.rows.values().map(|row| self.to_named(row)).collect()
    }

    /// True when some row holds `value` in `column`.
    pub fn contains_value(&self, column: &str, value: &Value) -> bool {
        match self.schema.schema().find_column_index(column) {
            Some(idx) => self.rows.values().any(|row| &row[idx] == value),
            None => false,
        }
    }

    fn find_row_id(&self, pk: &Value) -> Result<Option<usize>> {
        let (pk_idx, _) = self.schema.schema().primary_key().ok_or_else(|| {
            DbError::ExecutionError(format!("Table '{}' has no primary key", self.schema.name))
        })?;
        Ok(self
            .rows
            .iter()
            .find(|(_, row)| &row[pk_idx] == pk)
            .map(|(id, _)| *id))
    }

    fn primary_key_value(&self, row: &Row) -> Value {
        self.schema
            .schema()
            .primary_key()
            .map(|(idx, _)| row[idx].clone())
            .unwrap_or(Value::Null)
    }

    fn to_named(&self, row: &Row) -> NamedRow {
        self.schema
            .schema()
            .columns()
            .iter()
            .zip(row.iter())
            .map(|(col, value)| (col.name.clone(), value.clone()))
            .collect()
    }

    fn check_known_columns(&self, values: &NamedRow) -> Result<()> {
        for name in values.keys() {
            if self.schema.schema().find_column_index(name).is_none() {
                return Err(DbError::ColumnNotFound(name.clone(), self.schema.name.clone()));
            }
        }
        Ok(())
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        let columns = self.schema.schema().columns();
        if row.len() != columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Expected {} columns, got {}",
                columns.len(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }

    fn check_uniqueness(&self, row: &Row, ignore_id: Option<usize>) -> Result<()> {
        let others = || {
            self.rows
                .iter()
                .filter(move |(id, _)| Some(**id) != ignore_id)
                .map(|(_, r)| r)
        };

        for (col_idx, column) in self.schema.schema().columns().iter().enumerate() {
            if !column.is_unique() || row[col_idx].is_null() {
                continue;
            }
            if others().any(|other| other[col_idx] == row[col_idx]) {
                return Err(DbError::ConstraintViolation(format!(
                    "Unique constraint violation: Column '{}' already contains value {}",
                    column.name, row[col_idx]
                )));
            }
        }

        for unique in &self.schema.uniques {
            let indices = self.column_indices(&unique.columns)?;
            // NULL never collides in a composite constraint
            if indices.iter().any(|&i| row[i].is_null()) {
                continue;
            }
            if others().any(|other| indices.iter().all(|&i| other[i] == row[i])) {
                return Err(DbError::ConstraintViolation(format!(
                    "Unique constraint '{}' violated for ({})",
                    unique.name,
                    unique.columns.join(", ")
                )));
            }
        }
        Ok(())
    }

    fn column_indices(&self, names: &[String]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.schema
                    .schema()
                    .find_column_index(name)
                    .ok_or_else(|| DbError::ColumnNotFound(name.clone(), self.schema.name.clone()))
            })
            .collect()
    }

    // ========================================================================
    // Structural changes
    // ========================================================================

    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.schema.schema().find_column_index(&column.name).is_some() {
            return Err(DbError::ExecutionError(format!(
                "Column '{}' already exists in table '{}'",
                column.name, self.schema.name
            )));
        }
        if column.primary_key && self.schema.schema().primary_key().is_some() {
            return Err(DbError::ConstraintViolation(format!(
                "Table '{}' already has a primary key",
                self.schema.name
            )));
        }

        let mut fill = Vec::with_capacity(self.rows.len());
        for _ in 0..self.rows.len() {
            let value = if column.auto_increment {
                self.sequence += 1;
                Value::Integer(self.sequence)
            } else {
                column.default.clone().unwrap_or(Value::Null)
            };
            column.validate(&value)?;
            fill.push(value);
        }

        if column.is_unique() {
            check_distinct(&column.name, &fill)?;
        }

        for (row, value) in self.rows.values_mut().zip(fill) {
            row.push(value);
        }
        if column.indexed {
            self.schema.indexes.push(column.name.clone());
        }
        self.schema.schema.columns_mut().push(column);
        Ok(())
    }

    /// Rewrites a column definition in place, converting stored values.
    pub fn alter_column(&mut self, name: &str, column: Column) -> Result<()> {
        let idx = self
            .schema
            .schema()
            .find_column_index(name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string(), self.schema.name.clone()))?;

        if column.primary_key {
            if let Some((pk_idx, _)) = self.schema.schema().primary_key() {
                if pk_idx != idx {
                    return Err(DbError::ConstraintViolation(format!(
                        "Table '{}' already has a primary key",
                        self.schema.name
                    )));
                }
            }
        }

        let mut converted = Vec::with_capacity(self.rows.len());
        let mut sequence = self.sequence;
        for row in self.rows.values() {
            let mut value = column.data_type.cast(&row[idx])?;
            if value.is_null() {
                if column.auto_increment {
                    sequence += 1;
                    value = Value::Integer(sequence);
                } else if let (false, Some(default)) = (column.nullable, &column.default) {
                    value = default.clone();
                }
            }
            column.validate(&value)?;
            converted.push(value);
        }

        if column.is_unique() {
            check_distinct(&column.name, &converted)?;
        }

        for (row, value) in self.rows.values_mut().zip(converted) {
            row[idx] = value;
        }
        self.sequence = sequence;

        let old_name = self.schema.schema().columns()[idx].name.clone();
        self.schema.indexes.retain(|c| c != &old_name);
        if column.indexed {
            self.schema.indexes.push(column.name.clone());
        }
        if column.name != old_name {
            self.rename_in_constraints(&old_name, &column.name);
        }
        self.schema.schema.columns_mut()[idx] = column;
        Ok(())
    }

    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        if self.schema.schema().find_column_index(new).is_some() {
            return Err(DbError::ExecutionError(format!(
                "Column '{}' already exists in table '{}'",
                new, self.schema.name
            )));
        }
        let idx = self
            .schema
            .schema()
            .find_column_index(old)
            .ok_or_else(|| DbError::ColumnNotFound(old.to_string(), self.schema.name.clone()))?;

        self.schema.schema.columns_mut()[idx].name = new.to_string();
        for index in &mut self.schema.indexes {
            if index == old {
                *index = new.to_string();
            }
        }
        self.rename_in_constraints(old, new);
        Ok(())
    }

    /// Drops a column together with every composite constraint that covers it.
    pub fn delete_column(&mut self, name: &str) -> Result<()> {
        let idx = self
            .schema
            .schema()
            .find_column_index(name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string(), self.schema.name.clone()))?;

        for row in self.rows.values_mut() {
            row.remove(idx);
        }
        self.schema.schema.columns_mut().remove(idx);
        self.schema.indexes.retain(|c| c != name);
        self.schema
            .uniques
            .retain(|u| !u.columns.iter().any(|c| c == name));
        Ok(())
    }

    pub fn add_unique(&mut self, constraint: UniqueConstraint) -> Result<()> {
        if self.schema.uniques.iter().any(|u| u.name == constraint.name) {
            return Err(DbError::ExecutionError(format!(
                "Constraint '{}' already exists on table '{}'",
                constraint.name, self.schema.name
            )));
        }

        let indices = self.column_indices(&constraint.columns)?;
        let mut seen = HashSet::new();
        for row in self.rows.values() {
            if indices.iter().any(|&i| row[i].is_null()) {
                continue;
            }
            let key: Vec<Value> = indices.iter().map(|&i| row[i].clone()).collect();
            if !seen.insert(key) {
                return Err(DbError::ConstraintViolation(format!(
                    "Cannot create unique constraint '{}': duplicate values in ({})",
                    constraint.name,
                    constraint.columns.join(", ")
                )));
            }
        }

        self.schema.uniques.push(constraint);
        Ok(())
    }

    pub fn delete_unique(&mut self, name: &str) -> Result<()> {
        let before = self.schema.uniques.len();
        self.schema.uniques.retain(|u| u.name != name);
        if self.schema.uniques.len() == before {
            return Err(DbError::ExecutionError(format!(
                "Constraint '{}' not found on table '{}'",
                name, self.schema.name
            )));
        }
        Ok(())
    }

    /// Points foreign keys at a renamed table.
    pub(crate) fn retarget_references(&mut self, old_table: &str, new_table: &str) {
        for column in self.schema.schema.columns_mut() {
            if let Some(fk) = column.references.as_mut() {
                if fk.table == old_table {
                    fk.table = new_table.to_string();
                }
            }
        }
    }

    fn rename_in_constraints(&mut self, old: &str, new: &str) {
        for unique in &mut self.schema.uniques {
            for column in &mut unique.columns {
                if column == old {
                    *column = new.to_string();
                }
            }
        }
    }
}

fn check_distinct(column: &str, values: &[Value]) -> Result<()> {
    let mut seen = HashSet::new();
    for value in values.iter().filter(|v| !v.is_null()) {
        if !seen.insert(value.clone()) {
            return Err(DbError::ConstraintViolation(format!(
                "Unique constraint violation: Column '{}' contains duplicate value {}",
                column, value
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    schema: Schema,
    pub uniques: Vec<UniqueConstraint>,
    pub indexes: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let indexes = columns
            .iter()
            .filter(|c| c.indexed)
            .map(|c| c.name.clone())
            .collect();
        Self {
            name: name.into(),
            schema: Schema::new(columns),
            uniques: Vec::new(),
            indexes,
        }
    }
    pub fn name(&self) -> &str { &self.name }
    pub fn schema(&self) -> &Schema { &self.schema }
    pub fn is_indexed(&self, column: &str) -> bool {
        self.indexes.iter().any(|idx| idx == column)
    }
    pub fn unique(&self, name: &str) -> Option<&UniqueConstraint> {
        self.uniques.iter().find(|u| u.name == name)
    }
}

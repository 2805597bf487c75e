use serde::{Deserialize, Serialize};
use super::{DbError, Result, DataType, Value};

pub type Row = Vec<Value>;

/// Column-level reference to another table's key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

impl ForeignKey {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub indexed: bool,
    pub auto_increment: bool,
    pub default: Option<Value>,
    pub references: Option<ForeignKey>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
            unique: false,
            indexed: false,
            auto_increment: false,
            default: None,
            references: None,
        }
    }

    /// Synthetic auto-incrementing integer key.
    pub fn auto_key(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Integer).primary_key().auto_increment()
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn references(mut self, fk: ForeignKey) -> Self {
        self.references = Some(fk);
        self
    }

    /// Primary keys and unique columns both reject duplicates.
    pub fn is_unique(&self) -> bool {
        self.primary_key || self.unique
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if matches!(value, Value::Null) {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(DbError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {} '{}'",
                self.name,
                self.data_type,
                value.type_name(),
                value
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub(crate) fn columns_mut(&mut self) -> &mut Vec<Column> {
        &mut self.columns
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn primary_key(&self) -> Option<(usize, &Column)> {
        self.columns.iter().enumerate().find(|(_, col)| col.primary_key)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_implies_not_null() {
        let col = Column::new("id", DataType::Integer).primary_key();
        assert!(!col.nullable);
        assert!(col.validate(&Value::Null).is_err());
        assert!(col.is_unique());
    }

    #[test]
    fn test_schema_lookup() {
        let schema = Schema::new(vec![
            Column::auto_key("id"),
            Column::new("name", DataType::Varchar(10)),
        ]);
        assert_eq!(schema.find_column_index("name"), Some(1));
        assert_eq!(schema.primary_key().map(|(i, _)| i), Some(0));
        assert!(schema.get_column("missing").is_none());
    }
}

use super::{AttributeKind, KindRegistry};
use crate::core::{DataType, DbError, Result, Value};
use crate::definition::AttributeOptions;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref SLUG: Regex = Regex::new(r"^[-a-zA-Z0-9_]+$").unwrap();
}

pub(super) fn register_all(registry: &mut KindRegistry) {
    registry.register(CharKind);
    registry.register(TextKind);
    registry.register(IntegerKind { id: "integer" });
    registry.register(IntegerKind { id: "big_integer" });
    registry.register(FloatKind);
    registry.register(DecimalKind);
    registry.register(BooleanKind);
    registry.register(DateKind);
    registry.register(DateTimeKind);
    registry.register(PatternKind {
        id: "email",
        description: "Email address",
        pattern: &*EMAIL,
        default_length: 254,
    });
    registry.register(PatternKind {
        id: "slug",
        description: "Letters, numbers, underscores or hyphens",
        pattern: &*SLUG,
        default_length: 50,
    });
    registry.register(RelationKind { id: "foreign_key", unique: false });
    registry.register(RelationKind { id: "one_to_one", unique: true });

    registry.register_default("now", || {
        Value::Text(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
    });
    registry.register_default("today", || {
        Value::Text(Utc::now().date_naive().format("%Y-%m-%d").to_string())
    });
    registry.register_default("uuid4", || Value::Text(Uuid::new_v4().to_string()));
}

fn mismatch(kind: &str, value: &Value) -> DbError {
    DbError::TypeMismatch(format!(
        "Attribute kind '{}' cannot hold {} value '{}'",
        kind,
        value.type_name(),
        value
    ))
}

/// Reads a positive integer option, falling back to `default` when absent.
fn length_option(kind: &str, options: &AttributeOptions, key: &str, default: Option<u32>) -> Result<u32> {
    match options.get(key) {
        Some(value) => value
            .as_i64()
            .filter(|n| *n > 0 && *n <= u32::MAX as i64)
            .map(|n| n as u32)
            .ok_or_else(|| {
                DbError::Configuration(format!(
                    "Option '{}' of kind '{}' must be a positive integer, got '{}'",
                    key, kind, value
                ))
            }),
        None => default.ok_or_else(|| {
            DbError::Configuration(format!("Attribute kind '{}' requires option '{}'", kind, key))
        }),
    }
}

fn as_text(value: &Value) -> Value {
    match value {
        Value::Null | Value::Text(_) => value.clone(),
        other => Value::Text(other.to_string()),
    }
}

#[derive(Debug)]
struct CharKind;

impl AttributeKind for CharKind {
    fn id(&self) -> &str {
        "char"
    }
    fn category(&self) -> &str {
        "Text"
    }
    fn description(&self) -> &str {
        "String of bounded length"
    }
    fn option_names(&self) -> &[&'static str] {
        &["max_length"]
    }
    fn data_type(&self, options: &AttributeOptions) -> Result<DataType> {
        Ok(DataType::Varchar(length_option(self.id(), options, "max_length", None)?))
    }
    fn to_runtime_value(&self, value: &Value, _options: &AttributeOptions) -> Result<Value> {
        Ok(as_text(value))
    }
}

#[derive(Debug)]
struct TextKind;

impl AttributeKind for TextKind {
    fn id(&self) -> &str {
        "text"
    }
    fn category(&self) -> &str {
        "Text"
    }
    fn description(&self) -> &str {
        "Unbounded text"
    }
    fn data_type(&self, _options: &AttributeOptions) -> Result<DataType> {
        Ok(DataType::Text)
    }
    fn to_runtime_value(&self, value: &Value, _options: &AttributeOptions) -> Result<Value> {
        Ok(as_text(value))
    }
}

#[derive(Debug)]
struct IntegerKind {
    id: &'static str,
}

impl AttributeKind for IntegerKind {
    fn id(&self) -> &str {
        self.id
    }
    fn category(&self) -> &str {
        "Number"
    }
    fn description(&self) -> &str {
        "Integer"
    }
    fn data_type(&self, _options: &AttributeOptions) -> Result<DataType> {
        Ok(DataType::Integer)
    }
    fn to_runtime_value(&self, value: &Value, _options: &AttributeOptions) -> Result<Value> {
        match value {
            Value::Null | Value::Integer(_) => Ok(value.clone()),
            Value::Float(_) => value.as_i64().map(Value::Integer).ok_or_else(|| mismatch(self.id, value)),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| mismatch(self.id, value)),
            Value::Boolean(_) => Err(mismatch(self.id, value)),
        }
    }
}

#[derive(Debug)]
struct FloatKind;

impl AttributeKind for FloatKind {
    fn id(&self) -> &str {
        "float"
    }
    fn category(&self) -> &str {
        "Number"
    }
    fn description(&self) -> &str {
        "Floating point number"
    }
    fn data_type(&self, _options: &AttributeOptions) -> Result<DataType> {
        Ok(DataType::Float)
    }
    fn to_runtime_value(&self, value: &Value, _options: &AttributeOptions) -> Result<Value> {
        to_float(self.id(), value)
    }
}

fn to_float(kind: &str, value: &Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Float(_) | Value::Integer(_) => Ok(Value::Float(value.as_f64().unwrap_or_default())),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| mismatch(kind, value)),
        Value::Boolean(_) => Err(mismatch(kind, value)),
    }
}

/// Fixed precision number, stored as a float rounded to `decimal_places`.
#[derive(Debug)]
struct DecimalKind;

impl AttributeKind for DecimalKind {
    fn id(&self) -> &str {
        "decimal"
    }
    fn category(&self) -> &str {
        "Number"
    }
    fn description(&self) -> &str {
        "Fixed precision decimal number"
    }
    fn option_names(&self) -> &[&'static str] {
        &["max_digits", "decimal_places"]
    }
    fn data_type(&self, options: &AttributeOptions) -> Result<DataType> {
        let digits = length_option(self.id(), options, "max_digits", None)?;
        let places = options.get("decimal_places").and_then(Value::as_i64).ok_or_else(|| {
            DbError::Configuration("Attribute kind 'decimal' requires option 'decimal_places'".into())
        })?;
        if places < 0 || places > digits as i64 {
            return Err(DbError::Configuration(format!(
                "decimal_places ({}) must be between 0 and max_digits ({})",
                places, digits
            )));
        }
        Ok(DataType::Float)
    }
    fn to_runtime_value(&self, value: &Value, options: &AttributeOptions) -> Result<Value> {
        let Value::Float(f) = to_float(self.id(), value)? else {
            return Ok(Value::Null);
        };
        let places = options.get("decimal_places").and_then(Value::as_i64).unwrap_or(0);
        let digits = options.get("max_digits").and_then(Value::as_i64).unwrap_or(i64::MAX);
        let scale = 10f64.powi(places as i32);
        let rounded = (f * scale).round() / scale;
        let whole_digits = rounded.abs().trunc().to_string().trim_start_matches('0').len() as i64;
        if whole_digits > digits - places {
            return Err(DbError::ConstraintViolation(format!(
                "Value {} has more than {} digits before the decimal point",
                rounded,
                digits - places
            )));
        }
        Ok(Value::Float(rounded))
    }
}

#[derive(Debug)]
struct BooleanKind;

impl AttributeKind for BooleanKind {
    fn id(&self) -> &str {
        "boolean"
    }
    fn description(&self) -> &str {
        "Boolean (either true or false)"
    }
    fn data_type(&self, _options: &AttributeOptions) -> Result<DataType> {
        Ok(DataType::Boolean)
    }
    fn to_runtime_value(&self, value: &Value, _options: &AttributeOptions) -> Result<Value> {
        match value {
            Value::Null | Value::Boolean(_) => Ok(value.clone()),
            Value::Integer(0) => Ok(Value::Boolean(false)),
            Value::Integer(1) => Ok(Value::Boolean(true)),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Boolean(true)),
                "false" | "f" | "0" => Ok(Value::Boolean(false)),
                _ => Err(mismatch(self.id(), value)),
            },
            _ => Err(mismatch(self.id(), value)),
        }
    }
}

/// Calendar date, stored as `YYYY-MM-DD`.
#[derive(Debug)]
struct DateKind;

impl AttributeKind for DateKind {
    fn id(&self) -> &str {
        "date"
    }
    fn category(&self) -> &str {
        "Temporal"
    }
    fn description(&self) -> &str {
        "Date (without time)"
    }
    fn data_type(&self, _options: &AttributeOptions) -> Result<DataType> {
        Ok(DataType::Varchar(10))
    }
    fn to_runtime_value(&self, value: &Value, _options: &AttributeOptions) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .map_err(|_| mismatch(self.id(), value)),
            _ => Err(mismatch(self.id(), value)),
        }
    }
}

/// Instant in time, stored as an RFC 3339 UTC string.
#[derive(Debug)]
struct DateTimeKind;

impl AttributeKind for DateTimeKind {
    fn id(&self) -> &str {
        "datetime"
    }
    fn category(&self) -> &str {
        "Temporal"
    }
    fn description(&self) -> &str {
        "Date (with time)"
    }
    fn data_type(&self, _options: &AttributeOptions) -> Result<DataType> {
        Ok(DataType::Text)
    }
    fn to_runtime_value(&self, value: &Value, _options: &AttributeOptions) -> Result<Value> {
        let Value::Text(s) = value else {
            return match value {
                Value::Null => Ok(Value::Null),
                _ => Err(mismatch(self.id(), value)),
            };
        };
        let s = s.trim();
        let parsed = DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc()))
            .map_err(|_| mismatch(self.id(), value))?;
        Ok(Value::Text(parsed.to_rfc3339_opts(SecondsFormat::Micros, true)))
    }
}

/// Bounded text that must match a pattern.
#[derive(Debug)]
struct PatternKind {
    id: &'static str,
    description: &'static str,
    pattern: &'static Regex,
    default_length: u32,
}

impl AttributeKind for PatternKind {
    fn id(&self) -> &str {
        self.id
    }
    fn category(&self) -> &str {
        "Text"
    }
    fn description(&self) -> &str {
        self.description
    }
    fn option_names(&self) -> &[&'static str] {
        &["max_length"]
    }
    fn data_type(&self, options: &AttributeOptions) -> Result<DataType> {
        Ok(DataType::Varchar(length_option(
            self.id,
            options,
            "max_length",
            Some(self.default_length),
        )?))
    }
    fn to_runtime_value(&self, value: &Value, _options: &AttributeOptions) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(s) if self.pattern.is_match(s.trim()) => Ok(Value::Text(s.trim().to_string())),
            Value::Text(_) => Err(DbError::ConstraintViolation(format!(
                "'{}' is not a valid {}",
                value, self.id
            ))),
            _ => Err(mismatch(self.id, value)),
        }
    }
}

/// Reference to another type's primary key. The physical type is replaced
/// by the target key's type when the shape is derived.
#[derive(Debug)]
struct RelationKind {
    id: &'static str,
    unique: bool,
}

impl AttributeKind for RelationKind {
    fn id(&self) -> &str {
        self.id
    }
    fn category(&self) -> &str {
        "Related"
    }
    fn description(&self) -> &str {
        if self.unique {
            "One-to-one relationship"
        } else {
            "Foreign key (type determined by related field)"
        }
    }
    fn option_names(&self) -> &[&'static str] {
        &["to"]
    }
    fn validate_options(&self, options: &AttributeOptions) -> Result<()> {
        if let Some(unknown) = options.keys().find(|k| k.as_str() != "to") {
            return Err(DbError::Configuration(format!(
                "Option '{}' is not understood by attribute kind '{}'",
                unknown, self.id
            )));
        }
        match options.get("to") {
            Some(Value::Integer(_)) | Some(Value::Text(_)) => Ok(()),
            _ => Err(DbError::Configuration(format!(
                "Attribute kind '{}' requires a 'to' target",
                self.id
            ))),
        }
    }
    fn data_type(&self, _options: &AttributeOptions) -> Result<DataType> {
        Ok(DataType::Integer)
    }
    fn to_runtime_value(&self, value: &Value, _options: &AttributeOptions) -> Result<Value> {
        match value {
            Value::Float(_) => value.as_i64().map(Value::Integer).ok_or_else(|| mismatch(self.id, value)),
            Value::Boolean(_) => Err(mismatch(self.id, value)),
            _ => Ok(value.clone()),
        }
    }
    fn is_relation(&self) -> bool {
        true
    }
    fn implies_unique(&self) -> bool {
        self.unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, Value)]) -> AttributeOptions {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_char_requires_max_length() {
        assert!(CharKind.data_type(&AttributeOptions::new()).unwrap_err().is_configuration());
        assert_eq!(
            CharKind.data_type(&options(&[("max_length", Value::Integer(50))])).unwrap(),
            DataType::Varchar(50)
        );
    }

    #[test]
    fn test_integer_conversion() {
        let kind = IntegerKind { id: "integer" };
        let none = AttributeOptions::new();
        assert_eq!(kind.to_runtime_value(&Value::from(" 42 "), &none).unwrap(), Value::Integer(42));
        assert_eq!(kind.to_runtime_value(&Value::Float(3.0), &none).unwrap(), Value::Integer(3));
        assert!(kind.to_runtime_value(&Value::Float(3.5), &none).is_err());
    }

    #[test]
    fn test_decimal_rounding_and_digits() {
        let opts = options(&[("max_digits", Value::Integer(5)), ("decimal_places", Value::Integer(2))]);
        assert_eq!(DecimalKind.to_runtime_value(&Value::Float(12.346), &opts).unwrap(), Value::Float(12.35));
        assert!(DecimalKind.to_runtime_value(&Value::Float(1234.5), &opts).is_err());
    }

    #[test]
    fn test_temporal_normalization() {
        let none = AttributeOptions::new();
        assert!(DateKind.to_runtime_value(&Value::from("2024-02-30"), &none).is_err());
        assert_eq!(
            DateTimeKind.to_runtime_value(&Value::from("2024-01-02T03:04:05+02:00"), &none).unwrap(),
            Value::from("2024-01-02T01:04:05.000000Z")
        );
    }

    #[test]
    fn test_email_and_slug() {
        let registry = KindRegistry::with_builtins();
        let none = AttributeOptions::new();
        let email = registry.get("email").unwrap();
        assert!(email.to_runtime_value(&Value::from("a@b.io"), &none).is_ok());
        assert!(email.to_runtime_value(&Value::from("nope"), &none).is_err());
        let slug = registry.get("slug").unwrap();
        assert!(slug.to_runtime_value(&Value::from("hello world"), &none).is_err());
        assert_eq!(slug.data_type(&none).unwrap(), DataType::Varchar(50));
    }

    #[test]
    fn test_relation_requires_target() {
        let fk = RelationKind { id: "foreign_key", unique: false };
        assert!(fk.validate_options(&AttributeOptions::new()).is_err());
        assert!(fk.validate_options(&options(&[("to", Value::from("auth.User"))])).is_ok());
        assert!(RelationKind { id: "one_to_one", unique: true }.implies_unique());
    }
}
